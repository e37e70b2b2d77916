//! GPIO alternate-function and pad-drive configuration for GPCLK0 (GPIO4).
//!
//! Mirrors the shape of `hs-probe-bsp/src/gpio.rs`'s `Pin` wrapper (a thin
//! typed handle over a shared register window) but is generic over
//! [`RegisterIo`] rather than an `stm32ral::Instance`, so it can be driven by
//! either the real peripheral window or [`crate::peripheral::FakeRegisterIo`]
//! in tests.

use crate::peripheral::RegisterIo;
use crate::registers::{GPIO_FSEL0, GPIO_FSEL_ALT0, PADS_GPIO_0_27, PASSWORD};

/// GPIO4's function-select field occupies bits 12..14 of `GPIO_FSEL0`
/// (each pin gets 3 bits, GPIO4 is the 5th field).
const GPIO4_FSEL_SHIFT: u32 = 12;
const GPIO4_FSEL_MASK: u32 = 0b111 << GPIO4_FSEL_SHIFT;

pub struct Gpio<'a, R: RegisterIo + ?Sized> {
    io: &'a R,
}

impl<'a, R: RegisterIo + ?Sized> Gpio<'a, R> {
    pub fn new(io: &'a R) -> Self {
        Gpio { io }
    }

    /// Routes GPCLK0 onto GPIO4 (alternate function 0) and sets the pad
    /// drive current. `drive_index` is 0..7, mapping to 2..16 mA per spec §4.5.
    pub fn configure_gpclk0(&self, drive_index: u8) {
        assert!(drive_index < 8, "drive_index must be 0..7");

        let fsel = self.io.read(GPIO_FSEL0);
        let fsel = (fsel & !GPIO4_FSEL_MASK) | (GPIO_FSEL_ALT0 << GPIO4_FSEL_SHIFT);
        self.io.write(GPIO_FSEL0, fsel);

        self.io.write(PADS_GPIO_0_27, (PASSWORD << 24) | 0x18 | drive_index as u32);
    }

    /// Returns GPIO4 to input (high-impedance), used on teardown.
    pub fn release_gpclk0(&self) {
        let fsel = self.io.read(GPIO_FSEL0);
        self.io.write(GPIO_FSEL0, fsel & !GPIO4_FSEL_MASK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripheral::FakeRegisterIo;

    #[test]
    fn configure_sets_alt0_and_drive_strength() {
        let io = FakeRegisterIo::new();
        let gpio = Gpio::new(&io);
        gpio.configure_gpclk0(5);

        let fsel = io.read(GPIO_FSEL0);
        assert_eq!((fsel >> GPIO4_FSEL_SHIFT) & 0b111, GPIO_FSEL_ALT0);

        let pads = io.read(PADS_GPIO_0_27);
        assert_eq!(pads >> 24, PASSWORD);
        assert_eq!(pads & 0x7, 5);
    }

    #[test]
    fn release_clears_function_select() {
        let io = FakeRegisterIo::new();
        let gpio = Gpio::new(&io);
        gpio.configure_gpclk0(0);
        gpio.release_gpclk0();
        assert_eq!((io.read(GPIO_FSEL0) >> GPIO4_FSEL_SHIFT) & 0b111, 0);
    }
}

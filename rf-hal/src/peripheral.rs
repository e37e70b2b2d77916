//! C1: Peripheral Mapper.
//!
//! Resolves the SoC peripheral base, maps a 16 MiB window over `/dev/mem`,
//! and exposes typed bus-address read/write. Grounded on
//! `examples/other_examples/a71a3ea5_TheChilliPL-pilock__gpio-src-clock-raw.rs.rs`,
//! the pack's one example of mapping a BCM clock-manager register window out
//! of `/dev/mem` via `memmap2`; generalized here from a single 8-byte clock
//! register to the full 16 MiB peripheral block spec §4.1 requires.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Read as _;

use memmap2::{MmapOptions, MmapRaw};

use crate::error::{Error, Result};
use crate::registers::{PERI_BUS_BASE, PERI_WINDOW_BYTES};

/// Register read/write seam. The real implementation is [`PeripheralWindow`];
/// tests substitute [`FakeRegisterIo`] so C3/C4/C5 logic can be exercised
/// without `/dev/mem` or real hardware (spec §8 scenarios S2-S5 require this).
pub trait RegisterIo {
    fn read(&self, bus_addr: u32) -> u32;
    fn write(&self, bus_addr: u32, value: u32);

    fn set_bit(&self, bus_addr: u32, bit: u32) {
        let v = self.read(bus_addr);
        self.write(bus_addr, v | (1 << bit));
    }

    fn clear_bit(&self, bus_addr: u32, bit: u32) {
        let v = self.read(bus_addr);
        self.write(bus_addr, v & !(1 << bit));
    }
}

/// Identifies which BCM SoC generation we're running on, derived from the
/// board revision. Drives the mailbox allocation flag and the nominal PLLD
/// frequency (spec §4.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Processor {
    Bcm2835,
    Bcm2836,
    Bcm2837,
    Bcm2711,
}

impl Processor {
    /// VideoCore mailbox memory allocation flag for this SoC (spec §4.1).
    pub fn mailbox_mem_flag(&self) -> u32 {
        match self {
            Processor::Bcm2835 => 0x0C,
            _ => 0x04,
        }
    }

    /// Nominal PLLD frequency before any ppm correction, in Hz.
    ///
    /// BCM2835 (Pi 1) carries an empirical -2.5 ppm correction baked into the
    /// nominal value itself, matching the original implementation's
    /// processor-specific PLLD table (see SPEC_FULL.md "Supplemented
    /// Features").
    pub fn plld_nominal_hz(&self) -> f64 {
        match self {
            Processor::Bcm2711 => 750_000_000.0,
            Processor::Bcm2835 => 500_000_000.0 * (1.0 - 2.5e-6),
            Processor::Bcm2836 | Processor::Bcm2837 => 500_000_000.0,
        }
    }

    fn from_id_bits(bits: u32) -> Result<Self> {
        match bits {
            0 => Ok(Processor::Bcm2835),
            1 => Ok(Processor::Bcm2836),
            2 => Ok(Processor::Bcm2837),
            3 | 4 => Ok(Processor::Bcm2711),
            other => Err(Error::unsupported(format!("unknown processor id bits {other:#x}"))),
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Processor::Bcm2835 => "BCM2835",
            Processor::Bcm2836 => "BCM2836",
            Processor::Bcm2837 => "BCM2837",
            Processor::Bcm2711 => "BCM2711",
        };
        f.write_str(name)
    }
}

/// Reads `/proc/cpuinfo`, finds the `Revision` field, and decodes the
/// processor generation from its "new-style" encoding (bit 23 set means
/// the processor id occupies bits 12..16); falls back to BCM2835 for
/// old-style revision codes, per spec §4.1.
pub fn probe_processor() -> Result<Processor> {
    let mut cpuinfo = String::new();
    File::open("/proc/cpuinfo")
        .map_err(|e| Error::hardware(format!("opening /proc/cpuinfo: {e}")))?
        .read_to_string(&mut cpuinfo)
        .map_err(|e| Error::hardware(format!("reading /proc/cpuinfo: {e}")))?;

    let revision_line = cpuinfo
        .lines()
        .find(|l| l.starts_with("Revision"))
        .ok_or_else(|| Error::hardware("no Revision field in /proc/cpuinfo"))?;

    let hex = revision_line
        .split(':')
        .nth(1)
        .ok_or_else(|| Error::hardware("malformed Revision line"))?
        .trim();
    let revision = u32::from_str_radix(hex, 16)
        .map_err(|e| Error::hardware(format!("parsing revision {hex:?}: {e}")))?;

    const NEW_STYLE_FLAG: u32 = 1 << 23;
    if revision & NEW_STYLE_FLAG == 0 {
        return Ok(Processor::Bcm2835);
    }
    let id_bits = (revision >> 12) & 0xF;
    Processor::from_id_bits(id_bits)
}

/// Reads the 32-bit big-endian SoC peripheral base out of the device tree's
/// `soc/ranges` property, trying offset 4 then offset 8, and finally falling
/// back to the legacy BCM2835 base (spec §4.1).
pub fn probe_peripheral_base() -> u32 {
    const LEGACY_BASE: u32 = 0x2000_0000;
    let Ok(mut f) = File::open("/proc/device-tree/soc/ranges") else {
        return LEGACY_BASE;
    };
    let mut buf = Vec::new();
    if f.read_to_end(&mut buf).is_err() {
        return LEGACY_BASE;
    }
    if let Some(base) = read_be_u32(&buf, 4) {
        if base != 0 {
            return base;
        }
    }
    if let Some(base) = read_be_u32(&buf, 8) {
        if base != 0 {
            return base;
        }
    }
    LEGACY_BASE
}

fn read_be_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let slice = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes(slice.try_into().ok()?))
}

/// A single process-wide mapping over the 16 MiB SoC peripheral region.
pub struct PeripheralWindow {
    mmap: MmapRaw,
    bus_base: u32,
}

impl PeripheralWindow {
    /// Probes the peripheral base, opens `/dev/mem` with synchronized
    /// (uncached) semantics, maps the window, and closes the descriptor —
    /// the mapping itself keeps the region alive (spec §4.1).
    pub fn map() -> Result<Self> {
        let bus_base = probe_peripheral_base();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
            .map_err(|e| Error::hardware(format!("opening /dev/mem: {e}")))?;

        let mmap = MmapOptions::new()
            .offset(bus_base as u64)
            .len(PERI_WINDOW_BYTES)
            .map_raw(&file)
            .map_err(|e| Error::hardware(format!("mmap of peripheral window failed: {e}")))?;

        // `file` closes here; the mapping remains valid per mmap(2) semantics.
        Ok(PeripheralWindow { mmap, bus_base })
    }

    fn ptr_for(&self, bus_addr: u32) -> *mut u32 {
        let offset = bus_addr.wrapping_sub(PERI_BUS_BASE) as usize;
        unsafe { (self.mmap.as_ptr() as *mut u8).add(offset) as *mut u32 }
    }

    /// The bus base this window was mapped against (for diagnostics).
    pub fn bus_base(&self) -> u32 {
        self.bus_base
    }
}

use std::os::unix::fs::OpenOptionsExt;

impl RegisterIo for PeripheralWindow {
    fn read(&self, bus_addr: u32) -> u32 {
        unsafe { self.ptr_for(bus_addr).read_volatile() }
    }

    fn write(&self, bus_addr: u32, value: u32) {
        unsafe { self.ptr_for(bus_addr).write_volatile(value) }
    }
}

/// In-memory register file used by tests in this crate and in `rf-core`.
/// Addresses are looked up by exact match; unknown addresses read as zero.
#[derive(Default)]
pub struct FakeRegisterIo {
    cells: std::sync::RwLock<std::collections::HashMap<u32, u32>>,
}

impl FakeRegisterIo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegisterIo for FakeRegisterIo {
    fn read(&self, bus_addr: u32) -> u32 {
        *self.cells.read().unwrap().get(&bus_addr).unwrap_or(&0)
    }

    fn write(&self, bus_addr: u32, value: u32) {
        self.cells.write().unwrap().insert(bus_addr, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_register_io_round_trips() {
        let io = FakeRegisterIo::new();
        assert_eq!(io.read(0x1000), 0);
        io.write(0x1000, 0xDEAD_BEEF);
        assert_eq!(io.read(0x1000), 0xDEAD_BEEF);
    }

    #[test]
    fn set_and_clear_bit() {
        let io = FakeRegisterIo::new();
        io.set_bit(0x10, 3);
        assert_eq!(io.read(0x10), 0b1000);
        io.set_bit(0x10, 0);
        assert_eq!(io.read(0x10), 0b1001);
        io.clear_bit(0x10, 3);
        assert_eq!(io.read(0x10), 0b0001);
    }

    #[test]
    fn processor_from_id_bits() {
        assert_eq!(Processor::from_id_bits(0).unwrap(), Processor::Bcm2835);
        assert_eq!(Processor::from_id_bits(2).unwrap(), Processor::Bcm2837);
        assert_eq!(Processor::from_id_bits(4).unwrap(), Processor::Bcm2711);
        assert!(Processor::from_id_bits(15).is_err());
    }

    #[test]
    fn mailbox_flags_match_spec() {
        assert_eq!(Processor::Bcm2835.mailbox_mem_flag(), 0x0C);
        assert_eq!(Processor::Bcm2837.mailbox_mem_flag(), 0x04);
        assert_eq!(Processor::Bcm2711.mailbox_mem_flag(), 0x04);
    }
}

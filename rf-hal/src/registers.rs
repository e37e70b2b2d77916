//! Bus-address constants for the peripherals this crate drives.
//!
//! All addresses are bus addresses (as seen by the DMA engine and as printed
//! in the BCM peripheral datasheets); [`crate::peripheral::PeripheralWindow`]
//! translates them to process-virtual addresses. Values are bit-exact with
//! spec §6's hardware register contract table.

/// Bus address at which the peripheral block is aliased (BCM283x/BCM2711).
pub const PERI_BUS_BASE: u32 = 0x7E00_0000;

/// Size of the peripheral window to map: covers GPIO through DMA.
pub const PERI_WINDOW_BYTES: usize = 16 * 1024 * 1024;

/// Clock-manager / PWM / GPIO / DMA password nibble required in the high byte
/// of writes to password-protected registers.
pub const PASSWORD: u32 = 0x5A;

pub const GPIO_FSEL0: u32 = 0x7E20_0000;
pub const PADS_GPIO_0_27: u32 = 0x7E10_002C;

pub const CM_GP0CTL: u32 = 0x7E10_1070;
pub const CM_GP0DIV: u32 = 0x7E10_1074;

pub const CLK_BASE: u32 = 0x7E10_1000;
pub const CM_PWMCTL: u32 = CLK_BASE + 40 * 4;
pub const CM_PWMDIV: u32 = CLK_BASE + 41 * 4;

pub const PWM_CTL: u32 = 0x7E20_C000;
pub const PWM_STA: u32 = 0x7E20_C004;
pub const PWM_DMAC: u32 = 0x7E20_C008;
pub const PWM_RNG1: u32 = 0x7E20_C010;
pub const PWM_DAT1: u32 = 0x7E20_C014;
pub const PWM_FIF1: u32 = 0x7E20_C018;
pub const PWM_RNG2: u32 = 0x7E20_C020;
pub const PWM_DAT2: u32 = 0x7E20_C024;

pub const DMA0_CS: u32 = 0x7E00_7000;
pub const DMA0_CONBLK_AD: u32 = 0x7E00_7004;
pub const DMA0_TI: u32 = 0x7E00_7008;

/// On real hardware this is the same register as [`DMA0_CONBLK_AD`]: while a
/// channel is active the DMA engine keeps it pointed at the control block it
/// is currently executing, so a plain read doubles as a "which CB is
/// running" query. Kept as a distinct name for readability at call sites.
pub const DMA0_CURR_CONBLK_AD: u32 = DMA0_CONBLK_AD;

/// DREQ peripheral code used by the FIFO-feed control block (PWM).
pub const DREQ_PWM: u32 = 5;

/// `CM_GP0CTL` clock source code selecting PLLD.
pub const CM_SRC_PLLD: u32 = 6;

/// GPIO alternate function code selecting GPCLK0 on GPIO4.
pub const GPIO_FSEL_ALT0: u32 = 0b100;

/// `CM_GP0CTL`/`CM_PWMCTL` bit layout (shared clock-manager register shape).
pub const CM_CTL_ENAB: u32 = 1 << 4;
pub const CM_CTL_KILL: u32 = 1 << 5;
pub const CM_CTL_BUSY: u32 = 1 << 7;
pub const CM_CTL_MASH3: u32 = 0b11 << 9;

/// Hardware-defined 32-byte DMA control block, natural field order.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlBlock {
    pub ti: u32,
    pub source_ad: u32,
    pub dest_ad: u32,
    pub txfr_len: u32,
    pub stride: u32,
    pub nextconbk: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl ControlBlock {
    pub const SIZE_BYTES: usize = 32;

    /// Transfer-info bits for a FIFO-feed CB: paces the transfer on the PWM
    /// peripheral's DREQ line so `txfr_len` words take `txfr_len` PWM clocks
    /// to drain, and disables wide bursts so the pacing is exact.
    pub fn ti_fifo_feed() -> u32 {
        const TI_DEST_DREQ: u32 = 1 << 6;
        const TI_NO_WIDE_BURSTS: u32 = 1 << 26;
        let permap = DREQ_PWM << 16; // PERMAP field, bits 16..20
        TI_DEST_DREQ | permap | TI_NO_WIDE_BURSTS
    }

    /// Transfer-info bits for a divider-write CB: ungated, runs at full
    /// DMA speed as soon as the previous CB completes.
    pub fn ti_divider_write() -> u32 {
        const TI_NO_WIDE_BURSTS: u32 = 1 << 26;
        TI_NO_WIDE_BURSTS
    }
}

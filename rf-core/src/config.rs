//! Transmission configuration snapshot.
//!
//! Plain data, no parsing: the INI/JSON/CLI surface that produces a
//! `TransmissionConfig` is an external collaborator, out of scope here.

/// Selects between WSPR message encoding and a plain calibration tone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Wspr,
    Tone,
}

/// Everything the scheduler needs from the outside world to arm a
/// transmission. Corresponds 1:1 to spec §6's configuration snapshot.
#[derive(Clone, Debug)]
pub struct TransmissionConfig {
    /// ≤6 characters, letters/digits (normalized further by the encoder).
    pub callsign: String,
    /// 4-character Maidenhead locator.
    pub grid: String,
    /// 0..60 dBm, one of the canonical WSPR power levels.
    pub power_dbm: u8,
    /// One or more center frequencies to cycle through across frames (Hz).
    pub center_frequencies: Vec<f64>,
    /// GPIO pad drive strength, 0..7 mapping to 2..16 mA.
    pub drive_index: u8,
    /// Apply a small uniform random offset to the center frequency per frame.
    pub use_offset: bool,
    /// Whether PPM correction is expected to be refreshed from an NTP/chrony
    /// collaborator (informational; the core itself only consumes `ppm`).
    pub use_ntp: bool,
    /// Crystal drift correction in parts per million.
    pub ppm: f64,
    pub mode: Mode,
    /// Used only in `Mode::Tone`.
    pub test_tone_hz: f64,
}

impl TransmissionConfig {
    /// Message mode requires callsign, grid, and power to all be present;
    /// spec §4.5's Idle→Armed transition decides mode from this.
    pub fn is_message_mode(&self) -> bool {
        self.mode == Mode::Wspr && !self.callsign.is_empty() && !self.grid.is_empty()
    }
}

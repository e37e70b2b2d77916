//! Error taxonomy for the WSPR transmission core.
//!
//! Extends [`rf_hal::Error`]'s hardware-access taxonomy with the
//! protocol-level failure modes a caller can hit before any register is ever
//! touched: a center frequency that can't be synthesized, a malformed
//! callsign/grid/power triple, an out-of-range PPM correction, and
//! cooperative cancellation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The peripheral/mailbox/DMA layer reported a hardware failure.
    #[error(transparent)]
    Hardware(#[from] rf_hal::Error),

    /// The requested center frequency and tone spacing cannot be
    /// synthesized with a single 12.12 fixed-point divider bracket, even
    /// after recentering (spec §4.3 step 2's correction still straddles a
    /// divider boundary).
    #[error("center frequency {center_hz} Hz with {tone_spacing_hz} Hz spacing is not synthesizable from a {plld_hz} Hz reference")]
    FrequencyOutOfBand { center_hz: f64, tone_spacing_hz: f64, plld_hz: f64 },

    /// Callsign, grid locator, or power level failed WSPR encoding rules.
    #[error("invalid WSPR message input: {0}")]
    EncoderInput(String),

    /// A supplied PPM correction falls outside the range the hardware can
    /// plausibly tolerate (processor drift compensation is a small fraction
    /// of a percent, not the full dial).
    #[error("ppm correction {0} is out of range")]
    PpmOutOfRange(f64),

    /// A transmission was interrupted by a stop request before it completed.
    #[error("transmission cancelled")]
    Cancelled,

    /// A read of an external clock/time source failed and the operation can
    /// be safely retried (e.g. system clock momentarily unavailable).
    #[error("transient failure: {0}")]
    Transient(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn encoder_input(msg: impl Into<String>) -> Self {
        Error::EncoderInput(msg.into())
    }
}

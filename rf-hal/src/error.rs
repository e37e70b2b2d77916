//! Error taxonomy for the hardware-access layer (spec §7: `HardwareAccess`, `Unsupported`).
//!
//! Both variants here are fatal to the calling core: they abort setup and
//! propagate to the caller rather than being retried locally.

use std::io;

/// Errors that can occur while mapping peripherals, talking to the VideoCore
/// mailbox, or allocating DMA-visible memory.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `/dev/mem` could not be opened, mapping the peripheral window failed,
    /// or the mailbox device could not be opened/allocated/locked.
    #[error("hardware access failed: {0}")]
    HardwareAccess(String),

    /// The board's processor revision could not be identified, or yielded a
    /// PLLD frequency assumption that doesn't correspond to a shipped SoC.
    #[error("unsupported processor: {0}")]
    Unsupported(String),
}

impl Error {
    pub fn hardware(msg: impl Into<String>) -> Self {
        Error::HardwareAccess(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::HardwareAccess(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

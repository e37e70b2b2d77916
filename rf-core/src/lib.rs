//! DMA-dithered WSPR transmission core: tuning math and DMA program
//! construction (C3), the symbol-level dithering engine (C4), the frame
//! scheduler and lifecycle (C5), and the WSPR message encoder, all built on
//! top of `rf-hal`'s peripheral mapping and DMA buffer pool (C1+C2).

pub mod app;
pub mod callbacks;
pub mod config;
pub mod dma_program;
pub mod encoder;
pub mod error;
pub mod priority;
pub mod prng;
pub mod scheduler;
pub mod symbol_engine;
pub mod tuning;

pub use app::App;
pub use callbacks::{Callbacks, FinishedCallback, StartedCallback};
pub use config::{Mode, TransmissionConfig};
pub use error::{Error, Result};
pub use scheduler::{ControlSurface, Scheduler, TransmissionMode, TransmissionParams};

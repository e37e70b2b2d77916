//! Peripheral access, VideoCore mailbox, and DMA buffer pool for BCM283x /
//! BCM2711 clock-dithered RF synthesis.
//!
//! This crate is C1 (Peripheral Mapper) and C2 (DMA Buffer Pool) of the WSPR
//! transmission core; `rf-core` builds the DMA instruction chain, symbol
//! engine, and frame scheduler on top of it.

pub mod delay;
pub mod dma_pool;
pub mod error;
pub mod gpio;
pub mod mailbox;
pub mod peripheral;
pub mod registers;

pub use dma_pool::{DmaPool, PoolPage};
pub use error::{Error, Result};
pub use peripheral::{probe_peripheral_base, probe_processor, PeripheralWindow, Processor, RegisterIo};

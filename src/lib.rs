//! ST25R3918 fragrance-cart reader.
//!
//! Exposes the driver core for integration testing and for the firmware
//! binary. All ESP-IDF-specific code is guarded by
//! `#[cfg(feature = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod chip;
pub mod config;
pub mod error;
pub mod fsm;
pub mod irq;
pub mod payload;
pub mod pins;
pub mod registry;
pub mod rfid;
pub mod scheduler;
pub mod session;
pub mod usage;

pub use config::ReaderConfig;
pub use error::{Error, Result};
pub use scheduler::{CartReader, NoIrq, Readings};

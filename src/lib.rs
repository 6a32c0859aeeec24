//! blescript: a scriptable BLE peripheral.
//!
//! Scripts describe GATT services as plain objects; the crate turns them
//! into attribute tables, registers them with the BLE stack and routes
//! client reads, writes and subscriptions back into script callbacks.
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; host builds get a simulated stack.

#![deny(unused_must_use)]

pub mod adapters;
pub mod advertising;
pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod gatt;
pub mod platform;

pub use app::service::{Peripheral, PeripheralState};
pub use config::PeripheralConfig;
pub use error::{Error, Result};

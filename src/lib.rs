//! AirNode sensing node core.
//!
//! Exposes the pure-logic modules for integration testing and for the
//! board binary.  Everything here is generic over the `embedded-hal`
//! `I2c` and `DelayNs` traits; ESP-IDF specifics live behind the
//! `espidf` feature.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bus;
pub mod config;
pub mod error;
pub mod fsm;
pub mod interrupt;
pub mod power;
pub mod scheduler;
pub mod sensors;
pub mod snapshot;

pub use error::{BusError, Error, Result};

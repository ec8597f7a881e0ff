//! Battery charger / power-path controller.
//!
//! - [`regs`]: register map and scaled field encoding
//! - [`status`]: status, fault and ADC decoding
//! - [`sequencer`]: the driver and its mode sequencing

pub mod regs;
pub mod sequencer;
pub mod status;

pub use sequencer::{Charger, DisconnectKind, PowerMode};
pub use status::{AdcReadings, ChargerFault, ChargerStatus};

//! Application boundary: events out, commands in, and the port traits
//! adapters implement.

pub mod commands;
pub mod events;
pub mod ports;

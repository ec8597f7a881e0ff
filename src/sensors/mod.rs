//! Sensor subsystem.
//!
//! The CO2 and particulate sensors are driven by their own state machines
//! on the shared bus.  Pressure, gas index and acceleration come from
//! collaborators outside this core; the scheduler records their latest
//! values in the types below.

pub mod average;
pub mod co2;
pub mod particulate;

/// Ambient pressure reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureReading {
    pub pressure_pa: u32,
    pub timestamp_ms: u64,
}

/// VOC / NOx index pair from the gas sensor's index algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasIndex {
    pub voc: u16,
    pub nox: u16,
    pub timestamp_ms: u64,
}

/// Acceleration vector in milli-g.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acceleration {
    pub x_mg: i16,
    pub y_mg: i16,
    pub z_mg: i16,
    pub timestamp_ms: u64,
}

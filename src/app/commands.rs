//! Inbound commands to the scheduler.
//!
//! These represent actions requested by the outside world (button,
//! serial console, UI) that [`NodeScheduler::handle_command`](crate::scheduler::NodeScheduler::handle_command)
//! routes to the owning state machine.

/// Commands that external adapters can send into the node core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeCommand {
    EnableBoost,
    DisableBoost,
    SetChargeEnabled(bool),
    EnterShipMode,
    EnterShutdownMode,
    SystemPowerReset,
    /// Forced recalibration of the CO2 sensor to a reference concentration.
    Co2ForcedRecalibration { target_ppm: u16 },
    /// Ambient temperature / humidity for CO2 compensation.
    Co2RhtCompensation { temperature_c: f32, humidity_rh: f32 },
    ParticulateFanCleaning,
}

/// Result payload of a successful command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandReply {
    Done,
    /// Applied forced-recalibration correction (ppm).
    Co2Correction(i16),
    /// The CO2 sensor is measuring; recalibration is queued and reported
    /// through `NodeEvent::Co2Recalibrated`.
    Co2RecalibrationQueued,
}

//! Read-only aggregated view of the node.
//!
//! Built on demand by [`NodeScheduler::snapshot`](crate::scheduler::NodeScheduler::snapshot).
//! Each category is an `Option`: `None` means "no data yet" or "not
//! currently available", never an error.

use crate::power::{AdcReadings, ChargerFault, ChargerStatus, PowerMode};
use crate::sensors::average::Co2Average;
use crate::sensors::co2::Co2State;
use crate::sensors::particulate::{ParticulateSample, ParticulateState};
use crate::sensors::{Acceleration, GasIndex, PressureReading};

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub taken_at_ms: u64,

    // --- Air quality ---
    /// Mean of the CO2 samples in the last 5 s
    pub co2: Option<Co2Average>,
    pub particulate: Option<ParticulateSample>,
    pub gas_index: Option<GasIndex>,
    pub pressure: Option<PressureReading>,

    // --- Motion ---
    pub acceleration: Option<Acceleration>,
    /// Latched until `clear_motion()`
    pub motion_detected: bool,

    // --- Power ---
    pub power_mode: PowerMode,
    pub charger_status: Option<ChargerStatus>,
    pub charger_fault: Option<ChargerFault>,
    pub charger_adc: Option<AdcReadings>,

    // --- State machines ---
    pub co2_state: Co2State,
    pub particulate_state: ParticulateState,
    /// State changes since boot; a fast-growing count means a device
    /// keeps failing and restarting.
    pub co2_transitions: u32,
    pub particulate_transitions: u32,
}

impl NodeSnapshot {
    /// Whether the charger reports any latched fault.
    pub fn has_charger_fault(&self) -> bool {
        self.charger_fault.is_some_and(|f| f.any())
    }
}

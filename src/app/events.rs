//! Outbound node events.
//!
//! The state machines and the scheduler emit these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, refresh a display,
//! queue for upload.

use crate::power::{ChargerFault, PowerMode};
use crate::sensors::average::Co2Sample;
use crate::sensors::co2::Co2State;
use crate::sensors::particulate::{ParticulateSample, ParticulateState};

/// Structured events emitted by the node core.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// The scheduler configured the charger and started ticking.
    Started,

    /// A CO2 measurement was accepted into the average.
    Co2Sample(Co2Sample),

    /// The CO2 state machine moved.
    Co2StateChanged { from: Co2State, to: Co2State },

    /// A queued forced recalibration finished.  `correction` is `None`
    /// when the sensor rejected it or the machine failed first.
    Co2Recalibrated {
        target_ppm: u16,
        correction: Option<i16>,
    },

    /// A particulate frame was read.
    ParticulateSample(ParticulateSample),

    /// The particulate state machine moved.
    ParticulateStateChanged {
        from: ParticulateState,
        to: ParticulateState,
    },

    /// The particulate sensor stopped producing data and is being restarted.
    ParticulateStalled,

    /// The power sequencer changed mode.
    PowerModeChanged { from: PowerMode, to: PowerMode },

    /// Boost output verified active after the stabilisation dwell.
    BoostConfirmed,

    /// Boost was left enabled although the status did not confirm it.
    BoostUnconfirmed,

    /// Boost did not come up and was turned off again.
    BoostFailed,

    /// The charger fault register changed.  Faults are reported, never
    /// cleared by the core.
    ChargerFault(ChargerFault),

    /// The motion interrupt fired since the last tick.
    MotionDetected,

    /// A tick took longer than the tick period.
    TickOverrun { duration_ms: u64 },
}

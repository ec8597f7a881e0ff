//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing node events to the logger (UART /
//! USB-CDC in production).  A display or uplink adapter would implement
//! the same trait.

use log::{info, warn};

use crate::app::events::NodeEvent;
use crate::app::ports::EventSink;
use crate::fsm::StateId;

/// Adapter that logs every [`NodeEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink {
    /// Log every sample, not only state changes
    verbose: bool,
}

impl LogEventSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &NodeEvent) {
        match event {
            NodeEvent::Started => info!("START | node core running"),
            NodeEvent::Co2Sample(s) => {
                if self.verbose {
                    info!(
                        "CO2   | {} ppm | T={:.1}\u{00b0}C | RH={:.1}%",
                        s.ppm, s.temperature_c, s.humidity_rh
                    );
                }
            }
            NodeEvent::Co2StateChanged { from, to } => {
                info!("STATE | co2 {} -> {}", from.name(), to.name());
            }
            NodeEvent::Co2Recalibrated {
                target_ppm,
                correction: Some(c),
            } => info!("CO2   | recalibrated to {} ppm, correction {}", target_ppm, c),
            NodeEvent::Co2Recalibrated { target_ppm, .. } => {
                warn!("CO2   | recalibration to {} ppm failed", target_ppm);
            }
            NodeEvent::ParticulateSample(s) => {
                if self.verbose {
                    info!(
                        "PM    | PM1.0={:.1} PM2.5={:.1} PM10={:.1} \u{00b5}g/m\u{00b3} | size={:.2}\u{00b5}m",
                        s.mass_pm1_0, s.mass_pm2_5, s.mass_pm10, s.typical_size_um
                    );
                }
            }
            NodeEvent::ParticulateStateChanged { from, to } => {
                info!("STATE | particulate {} -> {}", from.name(), to.name());
            }
            NodeEvent::ParticulateStalled => warn!("PM    | stalled, restarting"),
            NodeEvent::PowerModeChanged { from, to } => {
                info!("POWER | {} -> {}", from.name(), to.name());
            }
            NodeEvent::BoostConfirmed => info!("POWER | boost confirmed"),
            NodeEvent::BoostUnconfirmed => warn!("POWER | boost unconfirmed"),
            NodeEvent::BoostFailed => warn!("POWER | boost failed, disabled"),
            NodeEvent::ChargerFault(f) => {
                if f.any() {
                    warn!("FAULT | {:?}", f);
                } else {
                    info!("FAULT | cleared (ts={:?})", f.ts);
                }
            }
            NodeEvent::MotionDetected => info!("MOTION| detected"),
            NodeEvent::TickOverrun { duration_ms } => warn!("TICK  | overrun {} ms", duration_ms),
        }
    }
}

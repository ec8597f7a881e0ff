//! Fixed-period cooperative tick scheduler.
//!
//! Owns the bus, every device state machine and the latest readings.
//! Each call to [`NodeScheduler::tick`] advances everything by at most
//! one step, in a fixed order:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  tick(now)                                                   │
//! │                                                              │
//! │   1. motion flag  ── take() from ISR ──▶ latch + event       │
//! │   2. charger      ── boost dwell / status check              │
//! │   3. watchdog     ── every 10 s                              │
//! │   4. charger poll ── status, fault, ADC every 2 s            │
//! │   5. CO2 FSM      ── one step                                │
//! │   6. pressure     ── compensation write, at most every 60 s  │
//! │   7. PM FSM       ── one step                                │
//! │   8. power mode   ── change event                            │
//! │                                                              │
//! │  The bus is lent as `&mut` to one machine at a time, so no   │
//! │  two devices' transactions can interleave.                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Multi-second waits are dwell conditions inside the machines; the
//! only blocking waits are the protocol layer's short settle delays.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{info, warn};

use crate::app::commands::{CommandReply, NodeCommand};
use crate::app::events::NodeEvent;
use crate::app::ports::EventSink;
use crate::bus::Bus;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::interrupt::MotionFlag;
use crate::power::{AdcReadings, Charger, ChargerFault, ChargerStatus, PowerMode};
use crate::sensors::co2::{Co2Sensor, Co2State, Phase};
use crate::sensors::particulate::ParticulateSensor;
use crate::sensors::{Acceleration, GasIndex, PressureReading};
use crate::snapshot::NodeSnapshot;

// ═══════════════════════════════════════════════════════════════
//  Cadence
// ═══════════════════════════════════════════════════════════════

/// Interval trigger on the millisecond time base.  Fires on the first
/// check, then whenever `interval_ms` has passed since it last fired.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl Cadence {
    pub const fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms: interval_ms as u64,
            last_ms: None,
        }
    }

    pub fn due(&mut self, now_ms: u64) -> bool {
        let fire = match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        };
        if fire {
            self.last_ms = Some(now_ms);
        }
        fire
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tick accounting
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    /// Ticks whose work took longer than the tick period
    pub overruns: u32,
    pub worst_ms: u64,
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

pub struct NodeScheduler<'a, I, D> {
    config: NodeConfig,
    bus: Bus<I, D>,
    co2: Co2Sensor,
    particulate: ParticulateSensor,
    charger: Charger,

    motion_flag: &'a MotionFlag,
    motion_latched: bool,

    watchdog: Cadence,
    charger_poll: Cadence,
    pressure_compensation: Cadence,

    pressure: Option<PressureReading>,
    gas_index: Option<GasIndex>,
    acceleration: Option<Acceleration>,
    charger_status: Option<ChargerStatus>,
    charger_fault: Option<ChargerFault>,
    charger_adc: Option<AdcReadings>,

    published_mode: PowerMode,
    tick_started_ms: u64,
    stats: TickStats,
}

impl<'a, I: I2c, D: DelayNs> NodeScheduler<'a, I, D> {
    pub fn new(i2c: I, delay: D, config: NodeConfig, motion_flag: &'a MotionFlag) -> Self {
        Self {
            bus: Bus::new(i2c, delay),
            co2: Co2Sensor::new(config.co2_address, config.co2),
            particulate: ParticulateSensor::new(config.particulate_address, config.particulate),
            charger: Charger::new(config.charger_address, config.power.clone()),

            motion_flag,
            motion_latched: false,

            watchdog: Cadence::new(config.watchdog_interval_ms),
            charger_poll: Cadence::new(config.charger_poll_interval_ms),
            pressure_compensation: Cadence::new(config.pressure_compensation_interval_ms),

            pressure: None,
            gas_index: None,
            acceleration: None,
            charger_status: None,
            charger_fault: None,
            charger_adc: None,

            published_mode: PowerMode::Unconfigured,
            tick_started_ms: 0,
            stats: TickStats::default(),
            config,
        }
    }

    /// Validate the configuration and program the charger.  Sensor state
    /// machines start on the first tick regardless of the outcome.
    pub fn start(&mut self, now_ms: u64, sink: &mut impl EventSink) -> Result<()> {
        self.config.validate()?;
        let power = self.config.power.clone();
        let result = self.charger.set_charge_parameters(&mut self.bus, &power, now_ms);
        self.publish_power_mode(sink);
        result?;
        info!("Scheduler started, tick {} ms", self.config.tick_period_ms);
        sink.emit(&NodeEvent::Started);
        Ok(())
    }

    /// Advance every subsystem by at most one step.
    pub fn tick(&mut self, now_ms: u64, sink: &mut impl EventSink) {
        self.tick_started_ms = now_ms;

        // 1. Motion interrupt
        if self.motion_flag.take() {
            self.motion_latched = true;
            sink.emit(&NodeEvent::MotionDetected);
        }

        // 2. Boost stabilisation
        self.charger.tick(&mut self.bus, now_ms, sink);

        // 3-4. Charger housekeeping
        if !matches!(self.charger.mode(), PowerMode::Disconnected(_)) {
            if self.watchdog.due(now_ms) {
                if let Err(e) = self.charger.kick_watchdog(&mut self.bus) {
                    warn!("Scheduler: watchdog kick failed: {}", e);
                }
            }
            if self.charger_poll.due(now_ms) {
                self.poll_charger(sink);
            }
        }

        // 5-6. CO2
        self.co2.step(&mut self.bus, now_ms, sink);
        self.forward_pressure(now_ms);

        // 7. Particulate
        self.particulate.step(&mut self.bus, now_ms, sink);

        // 8. Power mode
        self.publish_power_mode(sink);
    }

    /// Record when the tick's work finished.  Call once per tick after
    /// [`tick`](Self::tick).
    pub fn end_tick(&mut self, finished_ms: u64, sink: &mut impl EventSink) {
        let duration_ms = finished_ms.saturating_sub(self.tick_started_ms);
        self.stats.ticks += 1;
        self.stats.worst_ms = self.stats.worst_ms.max(duration_ms);
        if duration_ms > u64::from(self.config.tick_period_ms) {
            self.stats.overruns = self.stats.overruns.saturating_add(1);
            warn!("Scheduler: tick overrun, {} ms", duration_ms);
            sink.emit(&NodeEvent::TickOverrun { duration_ms });
        }
    }

    fn poll_charger(&mut self, sink: &mut impl EventSink) {
        self.charger_status = self
            .charger
            .read_status(&mut self.bus)
            .inspect_err(|e| warn!("Scheduler: charger status: {}", e))
            .ok();
        self.charger_adc = self
            .charger
            .read_adc(&mut self.bus)
            .inspect_err(|e| warn!("Scheduler: charger ADC: {}", e))
            .ok();

        match self.charger.read_fault(&mut self.bus) {
            Ok(fault) => {
                if self.charger_fault != Some(fault) {
                    if fault.any() {
                        warn!("Scheduler: charger fault {:?}", fault);
                    }
                    sink.emit(&NodeEvent::ChargerFault(fault));
                }
                self.charger_fault = Some(fault);
            }
            Err(e) => {
                warn!("Scheduler: charger fault read: {}", e);
                self.charger_fault = None;
            }
        }
    }

    fn forward_pressure(&mut self, now_ms: u64) {
        if self.co2.state() != Co2State::Measuring(Phase::Sampling) {
            return;
        }
        let Some(reading) = self.pressure else {
            return;
        };
        if !self.pressure_compensation.due(now_ms) {
            return;
        }
        if let Err(e) = self
            .co2
            .set_pressure_compensation(&mut self.bus, reading.pressure_pa)
        {
            warn!("Scheduler: pressure compensation: {}", e);
        }
    }

    fn publish_power_mode(&mut self, sink: &mut impl EventSink) {
        let mode = self.charger.mode();
        if mode != self.published_mode {
            sink.emit(&NodeEvent::PowerModeChanged {
                from: self.published_mode,
                to: mode,
            });
            self.published_mode = mode;
        }
    }

    // ── Commands ──────────────────────────────────────────────

    /// Route an external command to the owning machine.  Sequencing
    /// errors are returned to the caller unchanged.
    pub fn handle_command(
        &mut self,
        cmd: NodeCommand,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> Result<CommandReply> {
        info!("Command: {:?}", cmd);
        let bus = &mut self.bus;
        let result = match cmd {
            NodeCommand::EnableBoost => self.charger.enable_boost_output(bus, now_ms),
            NodeCommand::DisableBoost => self.charger.disable_boost_output(bus, now_ms),
            NodeCommand::SetChargeEnabled(on) => self.charger.set_charge_enabled(bus, on, now_ms),
            NodeCommand::EnterShipMode => self.charger.enter_ship_mode(bus, now_ms),
            NodeCommand::EnterShutdownMode => self.charger.enter_shutdown_mode(bus, now_ms),
            NodeCommand::SystemPowerReset => self.charger.system_power_reset(bus, now_ms),
            NodeCommand::Co2ForcedRecalibration { target_ppm } if self.co2.state().is_measuring() => {
                self.co2.request_recalibration(target_ppm)?;
                return Ok(CommandReply::Co2RecalibrationQueued);
            }
            NodeCommand::Co2ForcedRecalibration { target_ppm } => {
                let correction = self.co2.forced_recalibration(bus, target_ppm)?;
                return Ok(CommandReply::Co2Correction(correction));
            }
            NodeCommand::Co2RhtCompensation {
                temperature_c,
                humidity_rh,
            } => self.co2.set_rht_compensation(bus, temperature_c, humidity_rh),
            NodeCommand::ParticulateFanCleaning => self.particulate.start_fan_cleaning(bus),
        };
        self.publish_power_mode(sink);
        result.map(|()| CommandReply::Done)
    }

    // ── External readings ─────────────────────────────────────

    pub fn record_pressure(&mut self, pressure_pa: u32, now_ms: u64) {
        self.pressure = Some(PressureReading {
            pressure_pa,
            timestamp_ms: now_ms,
        });
    }

    pub fn record_gas_index(&mut self, voc: u16, nox: u16, now_ms: u64) {
        self.gas_index = Some(GasIndex {
            voc,
            nox,
            timestamp_ms: now_ms,
        });
    }

    pub fn record_acceleration(&mut self, x_mg: i16, y_mg: i16, z_mg: i16, now_ms: u64) {
        self.acceleration = Some(Acceleration {
            x_mg,
            y_mg,
            z_mg,
            timestamp_ms: now_ms,
        });
    }

    /// Acknowledge the latched motion flag.
    pub fn clear_motion(&mut self) {
        self.motion_latched = false;
    }

    // ── Views ─────────────────────────────────────────────────

    pub fn snapshot(&self, now_ms: u64) -> NodeSnapshot {
        NodeSnapshot {
            taken_at_ms: now_ms,
            co2: self.co2.average(now_ms),
            particulate: self.particulate.latest().copied(),
            gas_index: self.gas_index,
            pressure: self.pressure,
            acceleration: self.acceleration,
            motion_detected: self.motion_latched,
            power_mode: self.charger.mode(),
            charger_status: self.charger_status,
            charger_fault: self.charger_fault,
            charger_adc: self.charger_adc,
            co2_state: self.co2.state(),
            particulate_state: self.particulate.state(),
            co2_transitions: self.co2.transition_count(),
            particulate_transitions: self.particulate.transition_count(),
        }
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn co2(&self) -> &Co2Sensor {
        &self.co2
    }

    pub fn particulate(&self) -> &ParticulateSensor {
        &self.particulate
    }

    pub fn charger(&self) -> &Charger {
        &self.charger
    }

    /// Tear down and hand back the bus peripherals.
    pub fn release(self) -> (I, D) {
        self.bus.release()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

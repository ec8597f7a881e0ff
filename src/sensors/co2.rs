//! CO2 sensor continuous-measurement state machine.
//!
//! ```text
//!   Init ──▶ Starting ──ok──▶ Measuring ──5 failed reads──▶ Error ──5 s──▶ Init
//!               │                                            ▲
//!               └─────────────── start fails ────────────────┘
//!
//!   Measuring sub-phases, every 6 h:
//!     Sampling ──stop──▶ Stopped ──1.2 s──▶ Conditioning ──22 s──▶ Sampling
//!   and on request:
//!     Sampling ──stop──▶ Recalibrating ──1.2 s, FRC──▶ Sampling
//!     (any failed step ──▶ Error)
//! ```
//!
//! Reconditioning is a sub-phase of `Measuring`: stop continuous mode,
//! let the sensor settle, run the conditioning command, wait for it to
//! finish, then restart continuous mode.  Every wait is a dwell on the
//! state entry time, so the loop never blocks for longer than a settle.
//!
//! `Error` sends one best-effort stop, so a device left in continuous
//! mode accepts the start command issued after the back-off.
//!
//! [`plan`] decides what to send this tick, [`Co2Sensor`] sends it, and
//! [`transition`] maps the outcome to the next state.  Both are pure.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};

use crate::app::events::NodeEvent;
use crate::app::ports::EventSink;
use crate::bus::Bus;
use crate::config::Co2Timing;
use crate::error::{Error, Result};
use crate::fsm::{Fsm, IoResult, StateId};
use crate::sensors::average::{Co2Average, Co2RingBuffer, Co2Sample};

// ─── Command set ──────────────────────────────────────────────

const CMD_START_CONTINUOUS: u16 = 0x218B;
const CMD_STOP_CONTINUOUS: u16 = 0x3F86;
const CMD_READ_MEASUREMENT: u16 = 0xEC05;
const CMD_PERFORM_CONDITIONING: u16 = 0x29BC;
const CMD_SET_RHT_COMPENSATION: u16 = 0xE000;
const CMD_SET_PRESSURE_COMPENSATION: u16 = 0xE016;
const CMD_FORCED_RECALIBRATION: u16 = 0x362F;

const READ_MEASUREMENT_EXEC_MS: u32 = 1;
const FORCED_RECALIBRATION_EXEC_MS: u32 = 90;

/// The device ignores commands for this long after leaving continuous mode.
pub const STOP_SETTLE_MS: u64 = 1_200;
/// Duration of the conditioning procedure.
pub const CONDITIONING_MS: u64 = 22_000;

/// Highest reference concentration accepted for forced recalibration.
pub const FRC_MAX_TARGET_PPM: u16 = 32_000;
const FRC_FAILED: u16 = 0xFFFF;
const FRC_OFFSET: i32 = 0x8000;

// ─── States ───────────────────────────────────────────────────

/// Sub-phase of `Measuring`.  Only `Sampling` reads data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sampling,
    /// Continuous mode stopped, waiting before conditioning.
    Stopped,
    /// Conditioning command issued, waiting for completion.
    Conditioning,
    /// Continuous mode stopped for a queued forced recalibration.
    Recalibrating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Co2State {
    Init,
    Starting,
    Measuring(Phase),
    Error,
}

impl StateId for Co2State {
    fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Starting => "Starting",
            Self::Measuring(Phase::Sampling) => "Measuring",
            Self::Measuring(Phase::Stopped) => "Measuring(stopped)",
            Self::Measuring(Phase::Conditioning) => "Measuring(conditioning)",
            Self::Measuring(Phase::Recalibrating) => "Measuring(recalibrating)",
            Self::Error => "Error",
        }
    }
}

impl Co2State {
    /// Whether the sensor is in continuous mode or reconditioning.
    pub fn is_measuring(&self) -> bool {
        matches!(self, Self::Measuring(_))
    }
}

/// Bus work requested by [`plan`] for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Co2Action {
    None,
    StartContinuous,
    ReadMeasurement,
    StopContinuous,
    PerformConditioning,
    StopForRecalibration,
    ForcedRecalibration,
    ResumeContinuous,
}

/// Clock readings and flags the planner needs besides the state itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Co2Clock {
    pub now_ms: u64,
    /// Time spent in the current state
    pub elapsed_ms: u64,
    /// Last read attempt
    pub last_read_ms: u64,
    /// Start of the current continuous-measurement cycle
    pub cycle_start_ms: u64,
    /// `Error` has not yet sent its stop
    pub stop_pending: bool,
    /// A forced recalibration is queued
    pub recalibration_pending: bool,
}

/// Choose this tick's bus work.
pub fn plan(state: Co2State, clock: &Co2Clock, timing: &Co2Timing) -> Co2Action {
    match state {
        Co2State::Error if clock.stop_pending => Co2Action::StopContinuous,
        Co2State::Init | Co2State::Error => Co2Action::None,
        Co2State::Starting if clock.elapsed_ms >= u64::from(timing.start_settle_ms) => {
            Co2Action::StartContinuous
        }
        Co2State::Starting => Co2Action::None,
        Co2State::Measuring(Phase::Sampling) => {
            let since_cycle = clock.now_ms.saturating_sub(clock.cycle_start_ms);
            let since_read = clock.now_ms.saturating_sub(clock.last_read_ms);
            if clock.recalibration_pending {
                Co2Action::StopForRecalibration
            } else if since_cycle >= u64::from(timing.recondition_interval_ms) {
                Co2Action::StopContinuous
            } else if since_read >= u64::from(timing.sample_interval_ms) {
                Co2Action::ReadMeasurement
            } else {
                Co2Action::None
            }
        }
        Co2State::Measuring(Phase::Stopped) if clock.elapsed_ms >= STOP_SETTLE_MS => {
            Co2Action::PerformConditioning
        }
        Co2State::Measuring(Phase::Conditioning) if clock.elapsed_ms >= CONDITIONING_MS => {
            Co2Action::ResumeContinuous
        }
        Co2State::Measuring(Phase::Recalibrating) if clock.elapsed_ms >= STOP_SETTLE_MS => {
            if clock.recalibration_pending {
                Co2Action::ForcedRecalibration
            } else {
                Co2Action::ResumeContinuous
            }
        }
        Co2State::Measuring(_) => Co2Action::None,
    }
}

/// Next state after executing `action` with outcome `io`, or `None` to stay.
///
/// `read_failures` is the consecutive failed-read count *after* this tick.
pub fn transition(
    state: Co2State,
    action: Co2Action,
    io: IoResult,
    elapsed_ms: u64,
    read_failures: u8,
    timing: &Co2Timing,
) -> Option<Co2State> {
    use Co2Action as A;
    use Co2State as S;

    match (state, action, io) {
        (S::Init, _, _) => Some(S::Starting),

        (S::Starting, A::StartContinuous, IoResult::Ok) => Some(S::Measuring(Phase::Sampling)),
        (S::Starting, A::StartContinuous, _) => Some(S::Error),

        (S::Measuring(Phase::Sampling), A::ReadMeasurement, IoResult::Failed)
            if read_failures >= timing.max_read_failures =>
        {
            Some(S::Error)
        }
        (S::Measuring(Phase::Sampling), A::StopContinuous, IoResult::Ok) => {
            Some(S::Measuring(Phase::Stopped))
        }
        (S::Measuring(Phase::Stopped), A::PerformConditioning, IoResult::Ok) => {
            Some(S::Measuring(Phase::Conditioning))
        }
        (S::Measuring(Phase::Sampling), A::StopForRecalibration, IoResult::Ok) => {
            Some(S::Measuring(Phase::Recalibrating))
        }
        (S::Measuring(_), A::ResumeContinuous, IoResult::Ok) => {
            Some(S::Measuring(Phase::Sampling))
        }
        (
            S::Measuring(_),
            A::StopContinuous
            | A::PerformConditioning
            | A::StopForRecalibration
            | A::ResumeContinuous,
            IoResult::Failed | IoResult::NotReady,
        ) => Some(S::Error),

        (S::Error, _, _) if elapsed_ms >= u64::from(timing.error_backoff_ms) => Some(S::Init),

        _ => None,
    }
}

// ─── Conversions ──────────────────────────────────────────────

/// Raw sensor word to degrees Celsius.
pub fn convert_temperature_output(raw: u16) -> f32 {
    -45.0 + 175.0 * f32::from(raw) / 65535.0
}

/// Degrees Celsius to the raw word the sensor expects.
pub fn convert_temperature_input(celsius: f32) -> u16 {
    ((celsius + 45.0) * 65535.0 / 175.0).clamp(0.0, 65535.0) as u16
}

/// Raw sensor word to percent relative humidity.
pub fn convert_humidity_output(raw: u16) -> f32 {
    -6.0 + 125.0 * f32::from(raw) / 65535.0
}

/// Percent relative humidity to the raw word the sensor expects.
pub fn convert_humidity_input(rh: f32) -> u16 {
    ((rh + 6.0) * 65535.0 / 125.0).clamp(0.0, 65535.0) as u16
}

/// Signed correction in ppm from a forced-recalibration response word.
pub fn frc_correction(raw: u16) -> Result<i16> {
    if raw == FRC_FAILED {
        return Err(Error::Calibration);
    }
    Ok((i32::from(raw) - FRC_OFFSET) as i16)
}

// ─── Driver ───────────────────────────────────────────────────

/// CO2 sensor driver and its measurement state machine.
pub struct Co2Sensor {
    address: u8,
    timing: Co2Timing,
    fsm: Fsm<Co2State>,
    last_read_ms: u64,
    cycle_start_ms: u64,
    read_failures: u8,
    stop_pending: bool,
    recalibration_target: Option<u16>,
    samples: Co2RingBuffer,
    total_samples: u32,
}

impl Co2Sensor {
    pub fn new(address: u8, timing: Co2Timing) -> Self {
        Self {
            address,
            timing,
            fsm: Fsm::new("co2", Co2State::Init),
            last_read_ms: 0,
            cycle_start_ms: 0,
            read_failures: 0,
            stop_pending: false,
            recalibration_target: None,
            samples: Co2RingBuffer::new(),
            total_samples: 0,
        }
    }

    pub fn state(&self) -> Co2State {
        self.fsm.current()
    }

    pub fn samples(&self) -> &Co2RingBuffer {
        &self.samples
    }

    pub fn average(&self, now_ms: u64) -> Option<Co2Average> {
        self.samples.mean_last_5s(now_ms)
    }

    /// Consecutive failed reads in the current measuring cycle.
    pub fn read_failures(&self) -> u8 {
        self.read_failures
    }

    /// Samples accepted since construction.
    pub fn total_samples(&self) -> u32 {
        self.total_samples
    }

    /// State changes since construction.
    pub fn transition_count(&self) -> u32 {
        self.fsm.transition_count()
    }

    /// Advance the machine by at most one step.
    pub fn step<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) {
        let state = self.fsm.current();
        let elapsed_ms = self.fsm.elapsed_ms(now_ms);
        let clock = Co2Clock {
            now_ms,
            elapsed_ms,
            last_read_ms: self.last_read_ms,
            cycle_start_ms: self.cycle_start_ms,
            stop_pending: self.stop_pending,
            recalibration_pending: self.recalibration_target.is_some(),
        };

        let action = plan(state, &clock, &self.timing);
        let io = self.execute(bus, action, now_ms, sink);

        if let Some(next) = transition(
            state,
            action,
            io,
            elapsed_ms,
            self.read_failures,
            &self.timing,
        ) {
            self.enter(next, now_ms, sink);
        }
    }

    fn execute<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        action: Co2Action,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> IoResult {
        let cmd = match action {
            Co2Action::None => return IoResult::Idle,
            Co2Action::ReadMeasurement => return self.read_measurement(bus, now_ms, sink),
            Co2Action::ForcedRecalibration => return self.run_queued_recalibration(bus, sink),
            Co2Action::StartContinuous | Co2Action::ResumeContinuous => CMD_START_CONTINUOUS,
            Co2Action::StopContinuous | Co2Action::StopForRecalibration => CMD_STOP_CONTINUOUS,
            Co2Action::PerformConditioning => CMD_PERFORM_CONDITIONING,
        };

        let result = bus.write_command(self.address, cmd);
        if self.fsm.current() == Co2State::Error {
            // One attempt only; the device may be unpowered.
            self.stop_pending = false;
            if let Err(e) = &result {
                debug!("co2: stop after error: {}", e);
            }
            return IoResult::Idle;
        }
        if let Err(e) = &result {
            warn!("co2: {:?} failed: {}", action, e);
        }
        IoResult::from_result(&result, false)
    }

    fn run_queued_recalibration<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        sink: &mut impl EventSink,
    ) -> IoResult {
        let Some(target_ppm) = self.recalibration_target.take() else {
            return IoResult::Idle;
        };
        let correction = match self.recalibrate(bus, target_ppm) {
            Ok(correction) => Some(correction),
            Err(e) => {
                warn!("co2: recalibration to {} ppm failed: {}", target_ppm, e);
                None
            }
        };
        sink.emit(&NodeEvent::Co2Recalibrated {
            target_ppm,
            correction,
        });
        IoResult::Ok
    }

    fn read_measurement<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> IoResult {
        self.last_read_ms = now_ms;

        // A NACK on the command means the device is gone; only a NACK on
        // the data read means "no sample yet".
        let mut words = [0u16; 4];
        let io = match bus.write_command(self.address, CMD_READ_MEASUREMENT) {
            Ok(()) => {
                bus.settle(READ_MEASUREMENT_EXEC_MS);
                let read = bus.read_words(self.address, &mut words);
                match &read {
                    Err(e) if !e.is_nack() => warn!(
                        "co2: read failed ({}/{}): {}",
                        self.read_failures.saturating_add(1),
                        self.timing.max_read_failures,
                        e
                    ),
                    _ => {}
                }
                IoResult::from_result(&read, true)
            }
            Err(e) => {
                warn!(
                    "co2: read command failed ({}/{}): {}",
                    self.read_failures.saturating_add(1),
                    self.timing.max_read_failures,
                    e
                );
                IoResult::Failed
            }
        };

        match io {
            IoResult::Ok => {
                self.read_failures = 0;
                let [ppm, raw_t, raw_rh, status] = words;
                if status != 0 {
                    debug!("co2: status word 0x{:04X}", status);
                }
                let sample = Co2Sample {
                    ppm,
                    temperature_c: convert_temperature_output(raw_t),
                    humidity_rh: convert_humidity_output(raw_rh),
                    timestamp_ms: now_ms,
                };
                self.samples.push(sample);
                self.total_samples = self.total_samples.wrapping_add(1);
                sink.emit(&NodeEvent::Co2Sample(sample));
            }
            IoResult::NotReady => debug!("co2: no data yet"),
            IoResult::Failed => self.read_failures = self.read_failures.saturating_add(1),
            IoResult::Idle => {}
        }
        io
    }

    fn enter(&mut self, next: Co2State, now_ms: u64, sink: &mut impl EventSink) {
        let (from, to) = self.fsm.transition(next, now_ms);
        match to {
            Co2State::Measuring(Phase::Sampling) => {
                // First read one interval after (re)entering continuous mode.
                self.last_read_ms = now_ms;
                self.read_failures = 0;
                // A queued recalibration keeps the reconditioning schedule.
                if from != Co2State::Measuring(Phase::Recalibrating) {
                    self.cycle_start_ms = now_ms;
                }
            }
            Co2State::Measuring(Phase::Stopped) => info!("co2: reconditioning"),
            Co2State::Error => {
                self.stop_pending = true;
                if let Some(target_ppm) = self.recalibration_target.take() {
                    warn!("co2: recalibration to {} ppm abandoned", target_ppm);
                    sink.emit(&NodeEvent::Co2Recalibrated {
                        target_ppm,
                        correction: None,
                    });
                }
            }
            _ => {}
        }
        sink.emit(&NodeEvent::Co2StateChanged { from, to });
    }

    // ── Commands ──────────────────────────────────────────────

    /// Feed the sensor ambient temperature and humidity for compensation.
    pub fn set_rht_compensation<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        temperature_c: f32,
        humidity_rh: f32,
    ) -> Result<()> {
        let words = [
            convert_temperature_input(temperature_c),
            convert_humidity_input(humidity_rh),
        ];
        bus.write_command_with_data(self.address, CMD_SET_RHT_COMPENSATION, &words)
    }

    /// Feed the sensor ambient pressure (pascal) for compensation.
    pub fn set_pressure_compensation<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        pressure_pa: u32,
    ) -> Result<()> {
        let word = u16::try_from(pressure_pa / 2)
            .map_err(|_| Error::InvalidArgument("pressure out of range"))?;
        bus.write_command_with_data(self.address, CMD_SET_PRESSURE_COMPENSATION, &[word])
    }

    /// Recalibrate against a known reference concentration.  Returns the
    /// applied correction in ppm.  The sensor must not be in continuous
    /// mode.
    pub fn forced_recalibration<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        target_ppm: u16,
    ) -> Result<i16> {
        check_recalibration_target(target_ppm)?;
        if !matches!(
            self.fsm.current(),
            Co2State::Init | Co2State::Starting | Co2State::Error
        ) {
            return Err(Error::InvalidState("co2 sensor is in continuous mode"));
        }
        self.recalibrate(bus, target_ppm)
    }

    /// Queue a forced recalibration while measuring.  The machine leaves
    /// continuous mode, waits [`STOP_SETTLE_MS`], recalibrates and
    /// resumes; the outcome arrives as [`NodeEvent::Co2Recalibrated`].
    pub fn request_recalibration(&mut self, target_ppm: u16) -> Result<()> {
        check_recalibration_target(target_ppm)?;
        if !self.fsm.current().is_measuring() {
            return Err(Error::InvalidState("co2 sensor is not measuring"));
        }
        if self.recalibration_target.is_some() {
            return Err(Error::InvalidState("co2 recalibration already queued"));
        }
        info!("co2: recalibration to {} ppm queued", target_ppm);
        self.recalibration_target = Some(target_ppm);
        Ok(())
    }

    fn recalibrate<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        target_ppm: u16,
    ) -> Result<i16> {
        bus.write_command_with_data(self.address, CMD_FORCED_RECALIBRATION, &[target_ppm])?;
        bus.settle(FORCED_RECALIBRATION_EXEC_MS);
        let mut word = [0u16; 1];
        bus.read_words(self.address, &mut word)?;
        let correction = frc_correction(word[0])?;
        info!("co2: recalibrated to {} ppm, correction {}", target_ppm, correction);
        Ok(correction)
    }
}

fn check_recalibration_target(target_ppm: u16) -> Result<()> {
    if target_ppm > FRC_MAX_TARGET_PPM {
        return Err(Error::InvalidArgument("recalibration target above 32000 ppm"));
    }
    Ok(())
}

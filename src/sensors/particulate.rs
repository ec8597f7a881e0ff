//! Particulate matter sensor state machine.
//!
//! ```text
//!   ┌──────────────┐ wake ok ┌───────┐ start ok ┌────────┐  8 s  ┌───────────┐
//!   │ Init{backoff}│────────▶│ Start │─────────▶│ Warmup │──────▶│ Measuring │
//!   └──────────────┘         └───┬───┘          └────────┘       └─────┬─────┘
//!      ▲   ▲  wake fails: retry  │ start fails: sleep, back off        │
//!      │   └─────────────────────┘                                     │
//!      └─────────────── stalled: stop, sleep ──────────────────────────┘
//! ```
//!
//! While measuring, the data-ready flag is polled once a second.  More
//! than `stall_limit` consecutive polls without data (or failed polls)
//! means the sensor has wedged: it is stopped, put to sleep and woken
//! again from `Init`.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};

use crate::app::events::NodeEvent;
use crate::app::ports::EventSink;
use crate::bus::{Bus, decode_f32};
use crate::config::ParticulateTiming;
use crate::error::{Error, Result};
use crate::fsm::{Fsm, IoResult, StateId};

// ─── Command set ──────────────────────────────────────────────

const CMD_WAKE: u16 = 0x1103;
const CMD_START_MEASUREMENT: u16 = 0x0010;
const CMD_STOP_MEASUREMENT: u16 = 0x0104;
const CMD_READ_DATA_READY: u16 = 0x0202;
const CMD_READ_VALUES: u16 = 0x0300;
const CMD_SLEEP: u16 = 0x1001;
const CMD_FAN_CLEANING: u16 = 0x5607;

/// Start-measurement argument selecting big-endian IEEE-754 output.
const OUTPUT_FORMAT_FLOAT: u16 = 0x0300;

const READ_EXEC_MS: u32 = 1;
const VALUE_WORDS: usize = 20;

// ─── Data ─────────────────────────────────────────────────────

/// One measured-values frame.  Mass in µg/m³, number in #/cm³, size in µm.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParticulateSample {
    pub mass_pm1_0: f32,
    pub mass_pm2_5: f32,
    pub mass_pm4_0: f32,
    pub mass_pm10: f32,
    pub number_pm0_5: f32,
    pub number_pm1_0: f32,
    pub number_pm2_5: f32,
    pub number_pm4_0: f32,
    pub number_pm10: f32,
    pub typical_size_um: f32,
    pub timestamp_ms: u64,
}

impl ParticulateSample {
    /// Decode the ten big-endian floats of a measured-values read.
    pub fn from_words(words: &[u16; VALUE_WORDS], timestamp_ms: u64) -> Self {
        let f = |i: usize| decode_f32(words[2 * i], words[2 * i + 1]);
        Self {
            mass_pm1_0: f(0),
            mass_pm2_5: f(1),
            mass_pm4_0: f(2),
            mass_pm10: f(3),
            number_pm0_5: f(4),
            number_pm1_0: f(5),
            number_pm2_5: f(6),
            number_pm4_0: f(7),
            number_pm10: f(8),
            typical_size_um: f(9),
            timestamp_ms,
        }
    }
}

// ─── States ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticulateState {
    /// Waking the sensor.  With `backoff` set the first attempt waits for
    /// the retry back-off.
    Init { backoff: bool },
    Start,
    Warmup,
    Measuring,
}

impl StateId for ParticulateState {
    fn name(&self) -> &'static str {
        match self {
            Self::Init { backoff: false } => "Init",
            Self::Init { backoff: true } => "Init(backoff)",
            Self::Start => "Start",
            Self::Warmup => "Warmup",
            Self::Measuring => "Measuring",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticulateAction {
    None,
    Wake,
    StartMeasurement,
    PollDataReady,
    /// Stop and sleep a stalled sensor.
    Restart,
}

/// Choose this tick's bus work.
pub fn plan(
    state: ParticulateState,
    elapsed_ms: u64,
    since_poll_ms: u64,
    not_ready: u8,
    timing: &ParticulateTiming,
) -> ParticulateAction {
    use ParticulateAction as A;
    use ParticulateState as S;

    match state {
        S::Init { backoff: false } => A::Wake,
        S::Init { backoff: true } if elapsed_ms >= u64::from(timing.retry_backoff_ms) => A::Wake,
        S::Start if elapsed_ms >= u64::from(timing.start_settle_ms) => A::StartMeasurement,
        S::Measuring if not_ready > timing.stall_limit => A::Restart,
        S::Measuring if since_poll_ms >= u64::from(timing.poll_interval_ms) => A::PollDataReady,
        _ => A::None,
    }
}

/// Next state after executing `action` with outcome `io`, or `None` to stay.
pub fn transition(
    state: ParticulateState,
    action: ParticulateAction,
    io: IoResult,
    elapsed_ms: u64,
    timing: &ParticulateTiming,
) -> Option<ParticulateState> {
    use ParticulateAction as A;
    use ParticulateState as S;

    match (state, action, io) {
        (S::Init { .. }, A::Wake, IoResult::Ok) => Some(S::Start),
        (S::Init { .. }, A::Wake, _) => Some(S::Init { backoff: true }),
        (S::Start, A::StartMeasurement, IoResult::Ok) => Some(S::Warmup),
        (S::Start, A::StartMeasurement, _) => Some(S::Init { backoff: true }),
        (S::Warmup, _, _) if elapsed_ms >= u64::from(timing.warmup_ms) => Some(S::Measuring),
        (S::Measuring, A::Restart, _) => Some(S::Init { backoff: false }),
        _ => None,
    }
}

// ─── Driver ───────────────────────────────────────────────────

pub struct ParticulateSensor {
    address: u8,
    timing: ParticulateTiming,
    fsm: Fsm<ParticulateState>,
    last_poll_ms: u64,
    not_ready: u8,
    latest: Option<ParticulateSample>,
    stalls: u32,
}

impl ParticulateSensor {
    pub fn new(address: u8, timing: ParticulateTiming) -> Self {
        Self {
            address,
            timing,
            fsm: Fsm::new("particulate", ParticulateState::Init { backoff: false }),
            last_poll_ms: 0,
            not_ready: 0,
            latest: None,
            stalls: 0,
        }
    }

    pub fn state(&self) -> ParticulateState {
        self.fsm.current()
    }

    pub fn latest(&self) -> Option<&ParticulateSample> {
        self.latest.as_ref()
    }

    /// Consecutive polls without data.
    pub fn not_ready_count(&self) -> u8 {
        self.not_ready
    }

    /// Forced restarts since construction.
    pub fn stall_count(&self) -> u32 {
        self.stalls
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
        let since_poll_ms = now_ms.saturating_sub(self.last_poll_ms);

        let action = plan(state, elapsed_ms, since_poll_ms, self.not_ready, &self.timing);
        let io = self.execute(bus, action, now_ms, sink);

        if let Some(next) = transition(state, action, io, elapsed_ms, &self.timing) {
            let (from, to) = self.fsm.transition(next, now_ms);
            if to == ParticulateState::Measuring {
                self.last_poll_ms = now_ms;
                self.not_ready = 0;
            }
            sink.emit(&NodeEvent::ParticulateStateChanged { from, to });
        }
    }

    fn execute<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        action: ParticulateAction,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> IoResult {
        match action {
            ParticulateAction::None => IoResult::Idle,
            ParticulateAction::Wake => {
                // The first wake after sleep is usually NACKed while the
                // interface powers up.
                let result = bus
                    .write_command(self.address, CMD_WAKE)
                    .or_else(|_| bus.write_command(self.address, CMD_WAKE));
                if let Err(e) = &result {
                    warn!("particulate: wake failed: {}", e);
                }
                IoResult::from_result(&result, false)
            }
            ParticulateAction::StartMeasurement => {
                let result = bus.write_command_with_data(
                    self.address,
                    CMD_START_MEASUREMENT,
                    &[OUTPUT_FORMAT_FLOAT],
                );
                if let Err(e) = &result {
                    warn!("particulate: start failed: {}", e);
                    if let Err(e) = bus.write_command(self.address, CMD_SLEEP) {
                        debug!("particulate: sleep after failed start: {}", e);
                    }
                }
                IoResult::from_result(&result, false)
            }
            ParticulateAction::PollDataReady => self.poll(bus, now_ms, sink),
            ParticulateAction::Restart => {
                self.stalls = self.stalls.wrapping_add(1);
                warn!(
                    "particulate: stalled after {} polls without data, restarting",
                    self.not_ready
                );
                sink.emit(&NodeEvent::ParticulateStalled);
                if let Err(e) = bus.write_command(self.address, CMD_STOP_MEASUREMENT) {
                    info!("particulate: stop during restart: {}", e);
                }
                if let Err(e) = bus.write_command(self.address, CMD_SLEEP) {
                    info!("particulate: sleep during restart: {}", e);
                }
                IoResult::Ok
            }
        }
    }

    fn poll<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) -> IoResult {
        self.last_poll_ms = now_ms;

        let mut flag = [0u16; 1];
        if let Err(e) = bus.send_and_fetch(self.address, CMD_READ_DATA_READY, READ_EXEC_MS, &mut flag) {
            warn!("particulate: data-ready poll failed: {}", e);
            self.not_ready = self.not_ready.saturating_add(1);
            return IoResult::Failed;
        }
        if flag[0] & 0x00FF != 1 {
            self.not_ready = self.not_ready.saturating_add(1);
            debug!("particulate: not ready ({})", self.not_ready);
            return IoResult::NotReady;
        }

        let mut words = [0u16; VALUE_WORDS];
        match bus.send_and_fetch(self.address, CMD_READ_VALUES, READ_EXEC_MS, &mut words) {
            Ok(()) => {
                self.not_ready = 0;
                let sample = ParticulateSample::from_words(&words, now_ms);
                self.latest = Some(sample);
                sink.emit(&NodeEvent::ParticulateSample(sample));
                IoResult::Ok
            }
            Err(e) => {
                warn!("particulate: value read failed: {}", e);
                self.not_ready = self.not_ready.saturating_add(1);
                IoResult::Failed
            }
        }
    }

    /// Run the fan at full speed for a few seconds to blow out dust.
    pub fn start_fan_cleaning<I: I2c, D: DelayNs>(&mut self, bus: &mut Bus<I, D>) -> Result<()> {
        if self.fsm.current() != ParticulateState::Measuring {
            return Err(Error::InvalidState("fan cleaning needs an active measurement"));
        }
        info!("particulate: fan cleaning");
        bus.write_command(self.address, CMD_FAN_CLEANING)
    }
}

//! Node configuration parameters
//!
//! All tunable parameters for the sensing node core.  The initialisation
//! layer supplies one [`NodeConfig`] at startup, either the defaults or a
//! postcard-encoded blob it loaded from flash.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Core node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    // --- Scheduler ---
    /// Fixed tick period (milliseconds)
    pub tick_period_ms: u32,

    // --- Bus addresses (7-bit) ---
    pub co2_address: u8,
    pub particulate_address: u8,
    pub charger_address: u8,

    // --- Devices ---
    pub co2: Co2Timing,
    pub particulate: ParticulateTiming,
    pub power: PowerConfig,

    // --- Housekeeping ---
    /// Charger watchdog kick interval (milliseconds).  Must stay well below
    /// the device's own watchdog timeout or it reverts to default limits.
    pub watchdog_interval_ms: u32,
    /// Charger status/fault/ADC poll interval (milliseconds)
    pub charger_poll_interval_ms: u32,
    /// Minimum spacing of ambient-pressure compensation writes (milliseconds)
    pub pressure_compensation_interval_ms: u32,
}

/// CO2 sensor timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Co2Timing {
    /// Measurement read interval while in continuous mode
    pub sample_interval_ms: u32,
    /// Dwell in STARTING before the start command is issued
    pub start_settle_ms: u32,
    /// Back-off in ERROR before returning to INIT
    pub error_backoff_ms: u32,
    /// Interval between reconditioning manoeuvres
    pub recondition_interval_ms: u32,
    /// Consecutive failed reads tolerated before giving up on the device
    pub max_read_failures: u8,
}

/// Particulate sensor timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticulateTiming {
    /// Dwell in START before the start command is issued
    pub start_settle_ms: u32,
    /// Fan/laser stabilisation dwell
    pub warmup_ms: u32,
    /// Data-ready poll interval while measuring
    pub poll_interval_ms: u32,
    /// Delay before retrying after a failed wake/start
    pub retry_backoff_ms: u32,
    /// Consecutive not-ready polls tolerated; one more is a stall
    pub stall_limit: u8,
}

/// What to do when the boost status read-back does not show "boost active".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoostCheckPolicy {
    /// Log a warning and keep boost enabled (unconfirmed).
    Warn,
    /// Turn boost back off and report a failure event.
    Fail,
}

/// Charger / power-path configuration.  Values outside the device's range
/// are clamped when encoded, not rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Battery regulation voltage (mV)
    pub charge_voltage_mv: u16,
    /// Fast-charge current (mA)
    pub charge_current_ma: u16,
    /// Input current limit (mA)
    pub input_current_limit_ma: u16,
    /// Input voltage limit / VINDPM (mV)
    pub input_voltage_limit_mv: u16,
    /// Minimum system voltage (mV)
    pub min_system_voltage_mv: u16,
    /// Pre-charge current (mA)
    pub precharge_current_ma: u16,
    /// Termination current (mA)
    pub termination_current_ma: u16,
    /// Boost output voltage (mV)
    pub boost_voltage_mv: u16,
    /// Battery charging enabled
    pub charge_enabled: bool,
    /// Boost output enabled at configuration time
    pub boost_enabled: bool,
    /// Battery thermistor checking enabled
    pub thermal_sense_enabled: bool,
    /// Wait between enabling boost and checking its status (milliseconds)
    pub boost_stabilization_ms: u32,
    /// Reaction to an unconfirmed boost status
    pub boost_check: BoostCheckPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 50,

            co2_address: 0x64,
            particulate_address: 0x69,
            charger_address: 0x6B,

            co2: Co2Timing::default(),
            particulate: ParticulateTiming::default(),
            power: PowerConfig::default(),

            watchdog_interval_ms: 10_000,
            charger_poll_interval_ms: 2_000,
            pressure_compensation_interval_ms: 60_000,
        }
    }
}

impl Default for Co2Timing {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1_000,
            start_settle_ms: 100,
            error_backoff_ms: 5_000,
            recondition_interval_ms: 6 * 60 * 60 * 1_000, // 6 h
            max_read_failures: 5,
        }
    }
}

impl Default for ParticulateTiming {
    fn default() -> Self {
        Self {
            start_settle_ms: 100,
            warmup_ms: 8_000,
            poll_interval_ms: 1_000,
            retry_backoff_ms: 5_000,
            stall_limit: 2,
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            // Single-cell Li-ion, 1 A charge from a 500 mA-capable port.
            charge_voltage_mv: 4_200,
            charge_current_ma: 1_000,
            input_current_limit_ma: 500,
            input_voltage_limit_mv: 4_400,
            min_system_voltage_mv: 3_520,
            precharge_current_ma: 50,
            termination_current_ma: 20,
            boost_voltage_mv: 5_000,
            charge_enabled: true,
            boost_enabled: true,
            thermal_sense_enabled: true,
            boost_stabilization_ms: 200,
            boost_check: BoostCheckPolicy::Warn,
        }
    }
}

/// Largest encoded configuration blob.
pub const MAX_ENCODED_LEN: usize = 128;

impl NodeConfig {
    /// Reject combinations the scheduler cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.tick_period_ms == 0 {
            return Err(Error::Config("tick period must be non-zero"));
        }
        if self.co2.sample_interval_ms < self.tick_period_ms
            || self.particulate.poll_interval_ms < self.tick_period_ms
        {
            return Err(Error::Config("sampling faster than the tick"));
        }
        // The charger resets its limits after 50 s without a kick.
        if self.watchdog_interval_ms == 0 || self.watchdog_interval_ms >= 50_000 {
            return Err(Error::Config("watchdog interval must be below 50 s"));
        }
        let addrs = [self.co2_address, self.particulate_address, self.charger_address];
        if addrs.iter().any(|&a| a > 0x7F) {
            return Err(Error::Config("bus address is not 7-bit"));
        }
        if addrs[0] == addrs[1] || addrs[0] == addrs[2] || addrs[1] == addrs[2] {
            return Err(Error::Config("bus addresses collide"));
        }
        // The stop sent on entering Error must settle before the restart.
        if u64::from(self.co2.error_backoff_ms) < crate::sensors::co2::STOP_SETTLE_MS {
            return Err(Error::Config("co2 back-off shorter than the stop settle"));
        }
        if self.particulate.stall_limit == 0 || self.co2.max_read_failures == 0 {
            return Err(Error::Config("retry limits must be non-zero"));
        }
        Ok(())
    }

    /// Decode and validate a configuration blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            postcard::from_bytes(bytes).map_err(|_| Error::Config("undecodable blob"))?;
        config.validate()?;
        Ok(config)
    }

    /// Encode into `buf`, returning the used prefix.
    pub fn to_bytes<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8]> {
        postcard::to_slice(self, buf).map_err(|_| Error::Config("buffer too small"))
    }
}

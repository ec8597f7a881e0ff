//! Charger driver and power-mode sequencer.
//!
//! ```text
//!                 configure
//!  Unconfigured ─────────────▶ Charging / ChargeDisabled
//!                                 │   ▲
//!              enable_boost_output│   │disable_boost_output / check failed (Fail policy)
//!                                 ▼   │
//!                       BoostStabilizing ──dwell──▶ Boost{confirmed}
//!
//!  any mode ──ship / shutdown / reset──▶ Disconnected(kind)   (terminal)
//! ```
//!
//! Limit writes and the boost enable step propagate bus errors to the
//! caller.  The boost status check happens on a later tick once the
//! output has had time to stabilise.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{info, warn};

use super::regs::{self, Field, adc_ctrl, ctrl0, ntc_ctrl0, otg_ctrl, reg};
use super::status::{AdcReadings, ChargerFault, ChargerStatus};
use crate::app::events::NodeEvent;
use crate::app::ports::EventSink;
use crate::bus::Bus;
use crate::config::{BoostCheckPolicy, PowerConfig};
use crate::error::{Error, Result};
use crate::fsm::{Fsm, StateId};

/// How the battery was disconnected from the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Lowest-drain storage mode, exits on adapter plug-in or button.
    Ship,
    /// Exits only on adapter plug-in.
    Shutdown,
    /// Full system power cycle.
    Reset,
}

impl DisconnectKind {
    fn batfet_bits(self) -> u8 {
        match self {
            Self::Ship => otg_ctrl::BATFET_SHIP,
            Self::Shutdown => otg_ctrl::BATFET_SHUTDOWN,
            Self::Reset => otg_ctrl::BATFET_RESET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Unconfigured,
    Charging,
    /// Charging off; input power passes through to the system.
    ChargeDisabled,
    BoostStabilizing { since_ms: u64 },
    Boost { confirmed: bool },
    Disconnected(DisconnectKind),
}

impl StateId for PowerMode {
    fn name(&self) -> &'static str {
        match self {
            Self::Unconfigured => "Unconfigured",
            Self::Charging => "Charging",
            Self::ChargeDisabled => "ChargeDisabled",
            Self::BoostStabilizing { .. } => "BoostStabilizing",
            Self::Boost { confirmed: true } => "Boost",
            Self::Boost { confirmed: false } => "Boost(unconfirmed)",
            Self::Disconnected(DisconnectKind::Ship) => "Ship",
            Self::Disconnected(DisconnectKind::Shutdown) => "Shutdown",
            Self::Disconnected(DisconnectKind::Reset) => "Reset",
        }
    }
}

impl PowerMode {
    pub fn is_boost(&self) -> bool {
        matches!(self, Self::BoostStabilizing { .. } | Self::Boost { .. })
    }
}

/// Charger driver plus the mode it has been sequenced into.
pub struct Charger {
    address: u8,
    config: PowerConfig,
    mode: Fsm<PowerMode>,
}

impl Charger {
    pub fn new(address: u8, config: PowerConfig) -> Self {
        Self {
            address,
            config,
            mode: Fsm::new("power", PowerMode::Unconfigured),
        }
    }

    pub fn mode(&self) -> PowerMode {
        self.mode.current()
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.mode.current() {
            PowerMode::Disconnected(_) => Err(Error::InvalidState("battery disconnected")),
            _ => Ok(()),
        }
    }

    /// Mode to fall back to when boost is off.
    fn charge_mode(&self) -> PowerMode {
        if self.config.charge_enabled {
            PowerMode::Charging
        } else {
            PowerMode::ChargeDisabled
        }
    }

    // ── Register helpers ──────────────────────────────────────

    fn write_field<I: I2c, D: DelayNs>(
        &self,
        bus: &mut Bus<I, D>,
        field: Field,
        value: u16,
    ) -> Result<()> {
        if field.clamp(value) != value {
            warn!(
                "power: reg 0x{:02X} value {} clamped to {}",
                field.reg,
                value,
                field.clamp(value)
            );
        }
        bus.write_register(self.address, field.reg, &field.encode(value).to_le_bytes())
    }

    fn read_u8<I: I2c, D: DelayNs>(&self, bus: &mut Bus<I, D>, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        bus.read_register(self.address, register, &mut buf)?;
        Ok(buf[0])
    }

    /// Read-modify-write of the bits in `mask`.
    fn update_bits<I: I2c, D: DelayNs>(
        &self,
        bus: &mut Bus<I, D>,
        register: u8,
        mask: u8,
        bits: u8,
    ) -> Result<()> {
        let current = self.read_u8(bus, register)?;
        let next = (current & !mask) | (bits & mask);
        bus.write_register(self.address, register, &[next])
    }

    fn set_flag<I: I2c, D: DelayNs>(
        &self,
        bus: &mut Bus<I, D>,
        register: u8,
        flag: u8,
        on: bool,
    ) -> Result<()> {
        self.update_bits(bus, register, flag, if on { flag } else { 0 })
    }

    // ── Configuration ─────────────────────────────────────────

    /// Program every limit and flag in `config`, then switch boost per
    /// its flag.  Out-of-range limits are clamped to the device range.
    pub fn set_charge_parameters<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        config: &PowerConfig,
        now_ms: u64,
    ) -> Result<()> {
        self.ensure_connected()?;

        self.write_field(bus, regs::CHARGE_CURRENT, config.charge_current_ma)?;
        self.write_field(bus, regs::CHARGE_VOLTAGE, config.charge_voltage_mv)?;
        self.write_field(bus, regs::INPUT_CURRENT, config.input_current_limit_ma)?;
        self.write_field(bus, regs::INPUT_VOLTAGE, config.input_voltage_limit_mv)?;
        self.write_field(bus, regs::MIN_SYSTEM_VOLTAGE, config.min_system_voltage_mv)?;
        self.write_field(bus, regs::PRECHARGE_CURRENT, config.precharge_current_ma)?;
        self.write_field(bus, regs::TERMINATION_CURRENT, config.termination_current_ma)?;

        self.set_flag(bus, reg::CTRL0, ctrl0::EN_CHG, config.charge_enabled)?;
        self.set_flag(bus, reg::NTC_CTRL0, ntc_ctrl0::TS_IGNORE, !config.thermal_sense_enabled)?;
        bus.write_register(self.address, reg::ADC_CTRL, &[adc_ctrl::ADC_EN])?;

        self.config = config.clone();
        info!(
            "power: {} mV / {} mA, input {} mA, charge {}",
            config.charge_voltage_mv,
            config.charge_current_ma,
            config.input_current_limit_ma,
            if config.charge_enabled { "on" } else { "off" }
        );

        if config.boost_enabled {
            self.enable_boost_output(bus, now_ms)
        } else {
            self.disable_boost_output(bus, now_ms)
        }
    }

    /// Turn battery charging on or off without touching the limits.
    pub fn set_charge_enabled<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        enabled: bool,
        now_ms: u64,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.set_flag(bus, reg::CTRL0, ctrl0::EN_CHG, enabled)?;
        self.config.charge_enabled = enabled;
        if !self.mode.current().is_boost() {
            let next = self.charge_mode();
            self.mode.transition(next, now_ms);
        }
        Ok(())
    }

    // ── Boost ─────────────────────────────────────────────────

    /// Run the boost enable sequence.  Only the final EN_OTG write is
    /// fatal; the preparatory writes are logged and skipped on failure.
    /// The status check follows in [`tick`](Self::tick).
    pub fn enable_boost_output<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
    ) -> Result<()> {
        self.ensure_connected()?;

        if let Err(e) = self.set_flag(bus, reg::CTRL0, ctrl0::EN_HIZ, false) {
            warn!("power: clear HIZ: {}", e);
        }
        if let Err(e) = self.set_flag(bus, reg::NTC_CTRL0, ntc_ctrl0::TS_IGNORE, false) {
            warn!("power: enable TS: {}", e);
        }
        if let Err(e) = self.write_field(bus, regs::BOOST_VOLTAGE, self.config.boost_voltage_mv) {
            warn!("power: boost voltage: {}", e);
        }
        if let Err(e) = self.set_flag(bus, reg::OTG_CTRL, otg_ctrl::EN_BYPASS, false) {
            warn!("power: clear bypass: {}", e);
        }

        self.set_flag(bus, reg::OTG_CTRL, otg_ctrl::EN_OTG, true)
            .inspect_err(|e| warn!("power: boost enable failed: {}", e))?;

        self.mode
            .transition(PowerMode::BoostStabilizing { since_ms: now_ms }, now_ms);
        Ok(())
    }

    /// Turn boost off and return to the charge mode.
    pub fn disable_boost_output<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.set_flag(bus, reg::OTG_CTRL, otg_ctrl::EN_OTG, false)?;
        let next = self.charge_mode();
        if self.mode.current() != next {
            self.mode.transition(next, now_ms);
        }
        Ok(())
    }

    /// Complete a pending boost enable once the output has stabilised.
    pub fn tick<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
        sink: &mut impl EventSink,
    ) {
        if !matches!(self.mode.current(), PowerMode::BoostStabilizing { .. })
            || self.mode.elapsed_ms(now_ms) < u64::from(self.config.boost_stabilization_ms)
        {
            return;
        }

        let boosting = match self.read_status(bus) {
            Ok(status) => status.is_boosting(),
            Err(e) => {
                warn!("power: boost status read failed: {}", e);
                false
            }
        };

        if boosting {
            self.mode.transition(PowerMode::Boost { confirmed: true }, now_ms);
            sink.emit(&NodeEvent::BoostConfirmed);
            return;
        }

        match self.config.boost_check {
            BoostCheckPolicy::Warn => {
                warn!("power: boost enabled but status does not show OTG");
                self.mode.transition(PowerMode::Boost { confirmed: false }, now_ms);
                sink.emit(&NodeEvent::BoostUnconfirmed);
            }
            BoostCheckPolicy::Fail => {
                warn!("power: boost did not come up, turning it off");
                if let Err(e) = self.disable_boost_output(bus, now_ms) {
                    warn!("power: boost disable failed: {}", e);
                }
                sink.emit(&NodeEvent::BoostFailed);
            }
        }
    }

    // ── Battery disconnect ────────────────────────────────────

    pub fn enter_ship_mode<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
    ) -> Result<()> {
        self.disconnect(bus, DisconnectKind::Ship, now_ms)
    }

    pub fn enter_shutdown_mode<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
    ) -> Result<()> {
        self.disconnect(bus, DisconnectKind::Shutdown, now_ms)
    }

    pub fn system_power_reset<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        now_ms: u64,
    ) -> Result<()> {
        self.disconnect(bus, DisconnectKind::Reset, now_ms)
    }

    fn disconnect<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut Bus<I, D>,
        kind: DisconnectKind,
        now_ms: u64,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.update_bits(bus, reg::OTG_CTRL, otg_ctrl::BATFET_MASK, kind.batfet_bits())?;
        info!("power: battery disconnect ({:?})", kind);
        self.mode.transition(PowerMode::Disconnected(kind), now_ms);
        Ok(())
    }

    // ── Housekeeping ──────────────────────────────────────────

    /// Reset the charger's watchdog so it keeps the programmed limits.
    pub fn kick_watchdog<I: I2c, D: DelayNs>(&mut self, bus: &mut Bus<I, D>) -> Result<()> {
        self.ensure_connected()?;
        self.set_flag(bus, reg::CTRL0, ctrl0::WD_RST, true)
    }

    pub fn read_status<I: I2c, D: DelayNs>(&self, bus: &mut Bus<I, D>) -> Result<ChargerStatus> {
        let mut raw = [0u8; 2];
        bus.read_register(self.address, reg::STATUS0, &mut raw)?;
        Ok(ChargerStatus::decode(raw[0], raw[1]))
    }

    pub fn read_fault<I: I2c, D: DelayNs>(&self, bus: &mut Bus<I, D>) -> Result<ChargerFault> {
        self.read_u8(bus, reg::FAULT0).map(ChargerFault::decode)
    }

    pub fn read_adc<I: I2c, D: DelayNs>(&self, bus: &mut Bus<I, D>) -> Result<AdcReadings> {
        let mut raw = [0u8; AdcReadings::RAW_LEN];
        bus.read_register(self.address, reg::ADC_IBUS, &mut raw)?;
        Ok(AdcReadings::decode(&raw))
    }
}

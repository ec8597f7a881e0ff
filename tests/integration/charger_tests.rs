//! Charger configuration, boost sequencing and battery disconnect.

use airnode::app::events::NodeEvent;
use airnode::bus::Bus;
use airnode::config::{BoostCheckPolicy, PowerConfig};
use airnode::error::{BusError, Error};
use airnode::power::regs::{self, ctrl0, otg_ctrl};
use airnode::power::status::{ChargePhase, VbusSource};
use airnode::power::{Charger, DisconnectKind, PowerMode};

use crate::sim_bus::{CHARGER_ADDR, NoDelay, RecordingSink, SimBus};

struct Rig {
    sim: SimBus,
    bus: Bus<SimBus, NoDelay>,
    charger: Charger,
    sink: RecordingSink,
}

impl Rig {
    fn new(config: PowerConfig) -> Self {
        let sim = SimBus::new();
        Self {
            bus: Bus::new(sim.clone(), NoDelay::default()),
            sim,
            charger: Charger::new(CHARGER_ADDR, config),
            sink: RecordingSink::new(),
        }
    }

    fn configure(&mut self, now_ms: u64) {
        let config = self.charger.config().clone();
        self.charger
            .set_charge_parameters(&mut self.bus, &config, now_ms)
            .unwrap();
    }

    fn otg_enabled(&self) -> bool {
        self.sim.devices().charger.regs[0x18] & otg_ctrl::EN_OTG != 0
    }
}

fn no_boost() -> PowerConfig {
    PowerConfig {
        boost_enabled: false,
        ..PowerConfig::default()
    }
}

#[test]
fn configuration_programs_every_limit() {
    let mut rig = Rig::new(PowerConfig {
        charge_current_ma: 5_000, // above the device range
        ..no_boost()
    });
    rig.configure(0);

    let dev = rig.sim.devices();
    let c = &dev.charger;
    assert_eq!(regs::CHARGE_CURRENT.decode(c.word(0x02)), 2_000);
    assert_eq!(c.word(0x04), 420 << 3);
    assert_eq!(c.word(0x06), 25 << 4);
    assert_eq!(regs::INPUT_VOLTAGE.decode(c.word(0x08)), 4_400);
    assert_eq!(regs::MIN_SYSTEM_VOLTAGE.decode(c.word(0x0E)), 3_520);
    assert_eq!(regs::PRECHARGE_CURRENT.decode(c.word(0x10)), 50);
    assert_eq!(regs::TERMINATION_CURRENT.decode(c.word(0x12)), 20);
    assert_ne!(c.regs[0x16] & ctrl0::EN_CHG, 0);
    assert_eq!(c.regs[0x1A] & 0x80, 0, "thermistor sensing left on");
    assert_eq!(c.regs[0x26], 0x80);
    drop(dev);

    assert_eq!(rig.charger.mode(), PowerMode::Charging);
}

#[test]
fn charge_enable_toggles_mode() {
    let mut rig = Rig::new(PowerConfig {
        charge_enabled: false,
        ..no_boost()
    });
    rig.configure(0);
    assert_eq!(rig.charger.mode(), PowerMode::ChargeDisabled);
    assert_eq!(rig.sim.devices().charger.regs[0x16] & ctrl0::EN_CHG, 0);

    rig.charger.set_charge_enabled(&mut rig.bus, true, 10).unwrap();
    assert_eq!(rig.charger.mode(), PowerMode::Charging);
    assert_ne!(rig.sim.devices().charger.regs[0x16] & ctrl0::EN_CHG, 0);
}

#[test]
fn boost_is_confirmed_after_stabilization() {
    let mut rig = Rig::new(PowerConfig::default());
    rig.configure(0);
    assert_eq!(rig.charger.mode(), PowerMode::BoostStabilizing { since_ms: 0 });
    assert_eq!(
        rig.sim.devices().charger.word(0x0C),
        regs::BOOST_VOLTAGE.encode(5_000)
    );

    rig.charger.tick(&mut rig.bus, 150, &mut rig.sink);
    assert_eq!(rig.charger.mode(), PowerMode::BoostStabilizing { since_ms: 0 });

    rig.charger.tick(&mut rig.bus, 200, &mut rig.sink);
    assert_eq!(rig.charger.mode(), PowerMode::Boost { confirmed: true });
    assert!(rig.sink.contains(&NodeEvent::BoostConfirmed));
}

#[test]
fn unconfirmed_boost_stays_on_with_warn_policy() {
    let mut rig = Rig::new(PowerConfig::default());
    rig.sim.devices().charger.boost_works = false;
    rig.configure(0);
    rig.charger.tick(&mut rig.bus, 200, &mut rig.sink);

    assert_eq!(rig.charger.mode(), PowerMode::Boost { confirmed: false });
    assert!(rig.otg_enabled());
    assert!(rig.sink.contains(&NodeEvent::BoostUnconfirmed));
}

#[test]
fn unconfirmed_boost_is_reverted_with_fail_policy() {
    let mut rig = Rig::new(PowerConfig {
        boost_check: BoostCheckPolicy::Fail,
        ..PowerConfig::default()
    });
    rig.sim.devices().charger.boost_works = false;
    rig.configure(0);
    rig.charger.tick(&mut rig.bus, 200, &mut rig.sink);

    assert_eq!(rig.charger.mode(), PowerMode::Charging);
    assert!(!rig.otg_enabled());
    assert!(rig.sink.contains(&NodeEvent::BoostFailed));
}

#[test]
fn failed_boost_enable_write_is_fatal() {
    let mut rig = Rig::new(no_boost());
    rig.configure(0);
    rig.sim.devices().charger.failing_regs = vec![0x18];

    let result = rig.charger.enable_boost_output(&mut rig.bus, 100);
    assert_eq!(result, Err(Error::Bus(BusError::Nack)));
    assert_eq!(rig.charger.mode(), PowerMode::Charging);
    assert!(!rig.otg_enabled());

    // No status check is scheduled.
    rig.sim.devices().charger.reads.clear();
    rig.charger.tick(&mut rig.bus, 1_000, &mut rig.sink);
    assert!(!rig.sim.devices().charger.reads.contains(&0x1D));
    assert!(rig.sink.events.is_empty());
}

#[test]
fn preparatory_boost_write_failures_are_tolerated() {
    let mut rig = Rig::new(no_boost());
    rig.configure(0);
    rig.sim.devices().charger.failing_regs = vec![0x0C, 0x1A];

    rig.charger.enable_boost_output(&mut rig.bus, 100).unwrap();
    assert_eq!(rig.charger.mode(), PowerMode::BoostStabilizing { since_ms: 100 });
    assert!(rig.otg_enabled());
}

#[test]
fn disable_boost_returns_to_charge_mode() {
    let mut rig = Rig::new(PowerConfig::default());
    rig.configure(0);
    rig.charger.tick(&mut rig.bus, 200, &mut rig.sink);
    rig.charger.disable_boost_output(&mut rig.bus, 300).unwrap();
    assert_eq!(rig.charger.mode(), PowerMode::Charging);
    assert!(!rig.otg_enabled());
}

#[test]
fn ship_mode_is_terminal() {
    let mut rig = Rig::new(no_boost());
    rig.configure(0);
    rig.charger.enter_ship_mode(&mut rig.bus, 10).unwrap();

    assert_eq!(
        rig.sim.devices().charger.regs[0x18] & otg_ctrl::BATFET_MASK,
        0b10
    );
    assert_eq!(
        rig.charger.mode(),
        PowerMode::Disconnected(DisconnectKind::Ship)
    );

    let state_err = |r: airnode::Result<()>| matches!(r, Err(Error::InvalidState(_)));
    assert!(state_err(rig.charger.enable_boost_output(&mut rig.bus, 20)));
    assert!(state_err(rig.charger.kick_watchdog(&mut rig.bus)));
    assert!(state_err(rig.charger.enter_shutdown_mode(&mut rig.bus, 20)));
    let config = no_boost();
    assert!(state_err(
        rig.charger.set_charge_parameters(&mut rig.bus, &config, 20)
    ));
}

#[test]
fn shutdown_and_reset_codes() {
    let mut rig = Rig::new(no_boost());
    rig.configure(0);
    rig.charger.enter_shutdown_mode(&mut rig.bus, 10).unwrap();
    assert_eq!(rig.sim.devices().charger.regs[0x18] & 0b11, 0b01);

    let mut rig = Rig::new(no_boost());
    rig.configure(0);
    rig.charger.system_power_reset(&mut rig.bus, 10).unwrap();
    assert_eq!(rig.sim.devices().charger.regs[0x18] & 0b11, 0b11);
    assert_eq!(
        rig.charger.mode(),
        PowerMode::Disconnected(DisconnectKind::Reset)
    );
}

#[test]
fn watchdog_kick_sets_reset_bit() {
    let mut rig = Rig::new(no_boost());
    rig.configure(0);
    rig.charger.kick_watchdog(&mut rig.bus).unwrap();
    let dev = rig.sim.devices();
    let last = dev.charger.written(0x16).last().map(|d| d[0]);
    assert_eq!(last.map(|b| b & ctrl0::WD_RST != 0), Some(true));
    assert_eq!(last.map(|b| b & ctrl0::EN_CHG != 0), Some(true));
}

#[test]
fn status_fault_and_adc_reads() {
    let mut rig = Rig::new(no_boost());
    {
        let mut dev = rig.sim.devices();
        let r = &mut dev.charger.regs;
        r[0x1D] = 0b0100_0000;
        r[0x1E] = 0b0000_1001;
        r[0x1F] = 0b0100_0000;
        // VBAT at ADC word 4
        r[0x30..0x32].copy_from_slice(&(2_000u16 << 1).to_le_bytes());
        // IBUS sentinel
        r[0x28..0x2A].copy_from_slice(&0x8000u16.to_le_bytes());
    }

    let status = rig.charger.read_status(&mut rig.bus).unwrap();
    assert!(status.adc_done);
    assert_eq!(status.vbus, VbusSource::UsbSdp);
    assert_eq!(status.charge, ChargePhase::ConstantCurrent);

    let fault = rig.charger.read_fault(&mut rig.bus).unwrap();
    assert!(fault.battery);
    assert!(fault.any());

    let adc = rig.charger.read_adc(&mut rig.bus).unwrap();
    assert_eq!(adc.vbat_mv, 3_980);
    assert_eq!(adc.ibus_ma, 0);
}

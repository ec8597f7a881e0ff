//! CO2 state machine against the simulated sensor.

use airnode::app::events::NodeEvent;
use airnode::bus::Bus;
use airnode::config::Co2Timing;
use airnode::error::Error;
use airnode::sensors::co2::{
    Co2Sensor, Co2State, Phase, convert_humidity_input, convert_temperature_input,
};

use crate::sim_bus::{CO2_ADDR, NoDelay, RecordingSink, SimBus};

struct Rig {
    sim: SimBus,
    bus: Bus<SimBus, NoDelay>,
    delay: NoDelay,
    sensor: Co2Sensor,
    sink: RecordingSink,
}

impl Rig {
    fn new(timing: Co2Timing) -> Self {
        let sim = SimBus::new();
        let delay = NoDelay::default();
        Self {
            bus: Bus::new(sim.clone(), delay.clone()),
            sim,
            delay,
            sensor: Co2Sensor::new(CO2_ADDR, timing),
            sink: RecordingSink::new(),
        }
    }

    /// Tick every 50 ms over `from..=to`.
    fn run(&mut self, from: u64, to: u64) {
        for t in (from..=to).step_by(50) {
            self.sensor.step(&mut self.bus, t, &mut self.sink);
        }
    }
}

const SAMPLING: Co2State = Co2State::Measuring(Phase::Sampling);

#[test]
fn start_reaches_measuring_after_settle() {
    let mut rig = Rig::new(Co2Timing::default());
    rig.run(0, 50);
    assert_eq!(rig.sensor.state(), Co2State::Starting);
    rig.run(100, 100);
    assert_eq!(rig.sensor.state(), SAMPLING);
    assert!(rig.sim.devices().co2.continuous);
}

#[test]
fn failed_start_backs_off_before_init() {
    let mut rig = Rig::new(Co2Timing::default());
    rig.sim.devices().co2.fail_start = true;

    rig.run(0, 100);
    assert_eq!(rig.sensor.state(), Co2State::Error);

    rig.run(150, 5_050);
    assert_eq!(rig.sensor.state(), Co2State::Error, "left Error before 5 s");

    rig.run(5_100, 5_100);
    assert_eq!(rig.sensor.state(), Co2State::Init);
    rig.run(5_150, 5_150);
    assert_eq!(rig.sensor.state(), Co2State::Starting);
}

#[test]
fn samples_once_a_second_into_the_average() {
    let mut rig = Rig::new(Co2Timing::default());
    for t in (0..=6_100).step_by(50) {
        let reads = rig.sim.devices().co2.reads_issued() as u16;
        rig.sim.devices().co2.ppm = 400 + 10 * reads;
        rig.sensor.step(&mut rig.bus, t, &mut rig.sink);
    }

    // Reads at 1100, 2100, …, 6100
    assert_eq!(rig.sensor.total_samples(), 6);
    let avg = rig.sensor.average(7_100).expect("samples in window");
    assert_eq!(avg.samples, 5);
    assert!((avg.ppm - 430.0).abs() < 1e-3);
    assert_eq!(rig.sensor.samples().latest().map(|s| s.timestamp_ms), Some(6_100));
}

#[test]
fn nack_on_read_is_not_a_failure() {
    let mut rig = Rig::new(Co2Timing::default());
    rig.sim.devices().co2.not_ready_reads = 8;
    rig.run(0, 8_100);
    assert_eq!(rig.sensor.state(), SAMPLING);
    assert_eq!(rig.sensor.read_failures(), 0);
    assert_eq!(rig.sensor.total_samples(), 0);
}

#[test]
fn five_consecutive_failures_reset_the_device() {
    let mut rig = Rig::new(Co2Timing::default());
    rig.sim.devices().co2.failing_reads = 4;
    rig.run(0, 4_100);
    assert_eq!(rig.sensor.read_failures(), 4);
    assert_eq!(rig.sensor.state(), SAMPLING);

    // One good read resets the count.
    rig.run(4_150, 5_100);
    assert_eq!(rig.sensor.read_failures(), 0);

    rig.sim.devices().co2.corrupt_reads = 5;
    rig.run(5_150, 10_100);
    assert_eq!(rig.sensor.state(), Co2State::Error);
}

#[test]
fn unplugged_sensor_counts_as_failures() {
    let mut rig = Rig::new(Co2Timing::default());
    rig.run(0, 2_000);
    assert_eq!(rig.sensor.total_samples(), 1);

    // The command write is NACKed at the address; that is not "no data yet".
    rig.sim.devices().detached.push(CO2_ADDR);
    rig.run(2_050, 6_050);
    assert_eq!(rig.sensor.read_failures(), 4);
    assert_eq!(rig.sensor.state(), SAMPLING);

    rig.run(6_100, 6_100);
    assert_eq!(rig.sensor.state(), Co2State::Error);
}

#[test]
fn recovers_from_error_while_device_is_still_measuring() {
    let mut rig = Rig::new(Co2Timing::default());
    rig.run(0, 100);
    rig.sim.devices().co2.corrupt_reads = 5;

    // Reads at 1100 … 5100 fail; the device never left continuous mode.
    rig.run(150, 5_100);
    assert_eq!(rig.sensor.state(), Co2State::Error);
    assert!(rig.sim.devices().co2.continuous);

    rig.run(5_150, 5_150);
    assert_eq!(rig.sim.devices().co2.commands.last(), Some(&0x3F86));
    assert!(!rig.sim.devices().co2.continuous);

    // Init at 10100, Starting at 10150, start accepted at 10250.
    rig.run(5_200, 10_250);
    assert_eq!(rig.sensor.state(), SAMPLING);
    assert!(rig.sim.devices().co2.continuous);
    let stops = rig.sim.devices().co2.commands.iter().filter(|&&c| c == 0x3F86).count();
    assert_eq!(stops, 1);
}

#[test]
fn queued_recalibration_stops_and_resumes() {
    let mut rig = Rig::new(Co2Timing::default());
    assert!(matches!(
        rig.sensor.request_recalibration(420),
        Err(Error::InvalidState(_))
    ));

    rig.run(0, 2_000);
    assert!(matches!(
        rig.sensor.request_recalibration(40_000),
        Err(Error::InvalidArgument(_))
    ));
    rig.sim.devices().co2.frc_response = 0x8000 + 25;
    rig.sensor.request_recalibration(420).unwrap();
    // Continuous mode still refuses the synchronous path.
    assert!(matches!(
        rig.sensor.forced_recalibration(&mut rig.bus, 420),
        Err(Error::InvalidState(_))
    ));

    rig.run(2_050, 3_200);
    assert_eq!(rig.sensor.state(), Co2State::Measuring(Phase::Recalibrating));
    assert_eq!(rig.sim.devices().co2.frc_target, None);

    rig.run(3_250, 3_300);
    assert_eq!(rig.sensor.state(), SAMPLING);
    assert!(rig.sink.contains(&NodeEvent::Co2Recalibrated {
        target_ppm: 420,
        correction: Some(25),
    }));

    let cmds = rig.sim.devices().co2.commands.clone();
    let tail: Vec<u16> = cmds.iter().rev().take(3).rev().copied().collect();
    assert_eq!(tail, [0x3F86, 0x362F, 0x218B]);
}

#[test]
fn queued_recalibration_reports_sensor_refusal() {
    let mut rig = Rig::new(Co2Timing::default());
    rig.run(0, 2_000);
    rig.sim.devices().co2.frc_response = 0xFFFF;
    rig.sensor.request_recalibration(420).unwrap();

    rig.run(2_050, 3_300);
    assert_eq!(rig.sensor.state(), SAMPLING);
    assert!(rig.sink.contains(&NodeEvent::Co2Recalibrated {
        target_ppm: 420,
        correction: None,
    }));
}

#[test]
fn reconditioning_runs_inside_measuring() {
    let timing = Co2Timing {
        recondition_interval_ms: 10_000,
        ..Co2Timing::default()
    };
    let mut rig = Rig::new(timing);
    rig.run(0, 10_050);
    let reads_before = rig.sim.devices().co2.reads_issued();

    rig.run(10_100, 10_100);
    assert_eq!(rig.sensor.state(), Co2State::Measuring(Phase::Stopped));
    assert!(!rig.sim.devices().co2.continuous);

    rig.run(10_150, 11_300);
    assert_eq!(rig.sensor.state(), Co2State::Measuring(Phase::Conditioning));

    rig.run(11_350, 33_300);
    assert_eq!(rig.sensor.state(), SAMPLING);
    assert!(rig.sensor.state().is_measuring());
    assert!(rig.sim.devices().co2.continuous);
    assert_eq!(
        rig.sim.devices().co2.reads_issued(),
        reads_before,
        "no reads while reconditioning"
    );

    let cmds = rig.sim.devices().co2.commands.clone();
    let tail: Vec<u16> = cmds.iter().rev().take(3).rev().copied().collect();
    assert_eq!(tail, [0x3F86, 0x29BC, 0x218B]);
}

#[test]
fn failed_reconditioning_step_goes_to_error() {
    let timing = Co2Timing {
        recondition_interval_ms: 10_000,
        ..Co2Timing::default()
    };
    let mut rig = Rig::new(timing);
    rig.run(0, 10_050);
    rig.sim.devices().co2.fail_conditioning = true;
    rig.run(10_100, 10_100);
    assert_eq!(rig.sensor.state(), Co2State::Error);
}

#[test]
fn forced_recalibration_rules() {
    let mut rig = Rig::new(Co2Timing::default());

    assert!(matches!(
        rig.sensor.forced_recalibration(&mut rig.bus, 40_000),
        Err(Error::InvalidArgument(_))
    ));

    rig.sim.devices().co2.frc_response = 0x8000 + 25;
    assert_eq!(rig.sensor.forced_recalibration(&mut rig.bus, 420), Ok(25));
    assert_eq!(rig.sim.devices().co2.frc_target, Some(420));
    assert_eq!(rig.delay.total_ms(), 90, "execution wait before the result read");

    rig.sim.devices().co2.frc_response = 0xFFFF;
    assert_eq!(
        rig.sensor.forced_recalibration(&mut rig.bus, 420),
        Err(Error::Calibration)
    );

    rig.run(0, 100);
    assert!(matches!(
        rig.sensor.forced_recalibration(&mut rig.bus, 420),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn compensation_words() {
    let mut rig = Rig::new(Co2Timing::default());
    rig.sensor
        .set_rht_compensation(&mut rig.bus, 25.0, 50.0)
        .unwrap();
    assert_eq!(
        rig.sim.devices().co2.rht_compensation,
        Some((convert_temperature_input(25.0), convert_humidity_input(50.0)))
    );

    rig.sensor
        .set_pressure_compensation(&mut rig.bus, 101_325)
        .unwrap();
    assert_eq!(rig.sim.devices().co2.pressure_compensation, [50_662]);

    assert!(rig.sensor.set_pressure_compensation(&mut rig.bus, 200_000).is_err());
}

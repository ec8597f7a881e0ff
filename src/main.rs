//! AirNode firmware main entry point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  I2cDriver (gpio8/9)   Delay   MonotonicClock   LogEventSink   │
//! │                                                                │
//! │  ─────────────── embedded-hal / port boundary ─────────────    │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  NodeScheduler: CO2 FSM · PM FSM · power sequencer     │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  motion GPIO ISR ──▶ MOTION (atomic flag)                      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use esp_idf_hal::delay::{Delay, FreeRtos};
use esp_idf_hal::gpio::{InterruptType, PinDriver, Pull};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::FromValueType;
use log::{error, info, warn};

use airnode::adapters::log_sink::LogEventSink;
use airnode::adapters::time::MonotonicClock;
use airnode::app::ports::Clock;
use airnode::config::NodeConfig;
use airnode::interrupt::MotionFlag;
use airnode::scheduler::NodeScheduler;

/// Raised by the accelerometer's motion interrupt.
static MOTION: MotionFlag = MotionFlag::new();

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  AirNode v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Peripherals ────────────────────────────────────────
    let peripherals = Peripherals::take()?;

    let i2c_config = I2cConfig::new().baudrate(100.kHz().into());
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio8,
        peripherals.pins.gpio9,
        &i2c_config,
    )?;

    let mut motion_pin = PinDriver::input(peripherals.pins.gpio4)?;
    motion_pin.set_pull(Pull::Down)?;
    motion_pin.set_interrupt_type(InterruptType::PosEdge)?;
    // SAFETY: the callback only touches a lock-free atomic.
    unsafe {
        motion_pin.subscribe(|| MOTION.raise())?;
    }
    motion_pin.enable_interrupt()?;

    // ── 3. Core ───────────────────────────────────────────────
    let config = NodeConfig::default();
    let tick_ms = config.tick_period_ms;
    let clock = MonotonicClock::new();
    let mut sink = LogEventSink::new(false);

    let mut node = NodeScheduler::new(i2c, Delay::new_default(), config, &MOTION);
    if let Err(e) = node.start(clock.now_ms(), &mut sink) {
        // Sensors still run; the charger keeps its power-on defaults.
        error!("Charger configuration failed: {}", e);
    }

    // ── 4. Cooperative loop ───────────────────────────────────
    info!("Entering {} ms tick loop", tick_ms);
    loop {
        let started = clock.now_ms();
        node.tick(started, &mut sink);

        // The GPIO driver disarms the interrupt after each trigger.
        if let Err(e) = motion_pin.enable_interrupt() {
            warn!("Motion interrupt re-arm failed: {}", e);
        }

        let finished = clock.now_ms();
        node.end_tick(finished, &mut sink);

        let spent = finished.saturating_sub(started) as u32;
        FreeRtos::delay_ms(tick_ms.saturating_sub(spent).max(1));
    }
}

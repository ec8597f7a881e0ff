//! Simulated I²C bus for integration tests.
//!
//! Three scripted devices sit behind one `embedded-hal` `I2c`
//! implementation: the CO2 sensor, the particulate sensor and the
//! charger.  Every command and register access is recorded so tests can
//! assert on the full bus history without real hardware.
//!
//! The bus handle is `Clone`; tests hand one clone to the code under test
//! and keep another to script the devices and inspect the log.

use std::cell::RefCell;
use std::rc::Rc;

use airnode::app::events::NodeEvent;
use airnode::app::ports::EventSink;
use airnode::bus::{crc8, encode_word};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

pub const CO2_ADDR: u8 = 0x64;
pub const PM_ADDR: u8 = 0x69;
pub const CHARGER_ADDR: u8 = 0x6B;

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimError(pub ErrorKind);

impl embedded_hal::i2c::Error for SimError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

fn nack() -> SimError {
    SimError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data))
}

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|&w| encode_word(w)).collect()
}

/// Decode and CRC-check the data words following a command.
fn payload_words(bytes: &[u8]) -> Vec<u16> {
    bytes[2..]
        .chunks_exact(3)
        .map(|g| {
            assert_eq!(crc8(&g[..2]), g[2], "host sent a bad checksum");
            u16::from_be_bytes([g[0], g[1]])
        })
        .collect()
}

// ── CO2 sensor ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SimCo2 {
    pub commands: Vec<u16>,
    pub continuous: bool,
    pub ppm: u16,
    pub raw_temperature: u16,
    pub raw_humidity: u16,
    /// NACK the start command
    pub fail_start: bool,
    /// Number of upcoming measurement reads answered with NACK
    pub not_ready_reads: u32,
    /// Number of upcoming reads failing with a bus error
    pub failing_reads: u32,
    /// Number of upcoming reads with a corrupted checksum
    pub corrupt_reads: u32,
    /// NACK stop / conditioning commands
    pub fail_conditioning: bool,
    pub frc_response: u16,
    pub rht_compensation: Option<(u16, u16)>,
    pub pressure_compensation: Vec<u16>,
    pub frc_target: Option<u16>,
    pending: Vec<u8>,
}

impl SimCo2 {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        let cmd = u16::from_be_bytes([bytes[0], bytes[1]]);
        self.commands.push(cmd);
        self.pending.clear();
        match cmd {
            // Only read, stop and compensation are accepted while measuring.
            0x218B if self.fail_start || self.continuous => return Err(nack()),
            0x218B => self.continuous = true,
            0x3F86 | 0x29BC if self.fail_conditioning => return Err(nack()),
            0x3F86 => self.continuous = false,
            0x29BC => {}
            0xEC05 => {
                if self.not_ready_reads > 0 {
                    self.not_ready_reads -= 1;
                } else {
                    self.pending = words_to_bytes(&[
                        self.ppm,
                        self.raw_temperature,
                        self.raw_humidity,
                        0,
                    ]);
                }
            }
            0xE000 => {
                let w = payload_words(bytes);
                self.rht_compensation = Some((w[0], w[1]));
            }
            0xE016 => self.pressure_compensation.push(payload_words(bytes)[0]),
            0x362F => {
                self.frc_target = Some(payload_words(bytes)[0]);
                self.pending = words_to_bytes(&[self.frc_response]);
            }
            _ => {}
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), SimError> {
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(SimError(ErrorKind::Bus));
        }
        if self.pending.len() != buf.len() {
            return Err(nack());
        }
        buf.copy_from_slice(&self.pending);
        if self.corrupt_reads > 0 {
            self.corrupt_reads -= 1;
            buf[2] ^= 0xFF;
        }
        self.pending.clear();
        Ok(())
    }

    pub fn reads_issued(&self) -> usize {
        self.commands.iter().filter(|&&c| c == 0xEC05).count()
    }
}

// ── Particulate sensor ────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SimPm {
    pub commands: Vec<u16>,
    pub awake: bool,
    pub measuring: bool,
    pub data_ready: bool,
    pub values: [f32; 10],
    /// NACK every wake
    pub fail_wake: bool,
    /// NACK the first wake after sleep
    pub drowsy: bool,
    pub fail_start: bool,
    pub start_argument: Option<u16>,
    nacked_wake: bool,
    pending: Vec<u8>,
}

impl SimPm {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        let cmd = u16::from_be_bytes([bytes[0], bytes[1]]);
        self.commands.push(cmd);
        self.pending.clear();
        match cmd {
            0x1103 => {
                if self.fail_wake {
                    return Err(nack());
                }
                if self.drowsy && !self.awake && !self.nacked_wake {
                    self.nacked_wake = true;
                    return Err(nack());
                }
                self.awake = true;
            }
            0x0010 => {
                if self.fail_start || !self.awake {
                    return Err(nack());
                }
                self.start_argument = Some(payload_words(bytes)[0]);
                self.measuring = true;
            }
            0x0104 => self.measuring = false,
            0x1001 => {
                self.awake = false;
                self.measuring = false;
                self.nacked_wake = false;
            }
            0x0202 => self.pending = words_to_bytes(&[u16::from(self.data_ready)]),
            0x0300 => {
                let words: Vec<u16> = self
                    .values
                    .iter()
                    .flat_map(|v| {
                        let bits = v.to_bits();
                        [(bits >> 16) as u16, bits as u16]
                    })
                    .collect();
                self.pending = words_to_bytes(&words);
            }
            _ => {}
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), SimError> {
        if self.pending.len() != buf.len() {
            return Err(nack());
        }
        buf.copy_from_slice(&self.pending);
        self.pending.clear();
        Ok(())
    }

    pub fn count(&self, cmd: u16) -> usize {
        self.commands.iter().filter(|&&c| c == cmd).count()
    }
}

// ── Charger ───────────────────────────────────────────────────

#[derive(Debug)]
pub struct SimCharger {
    pub regs: [u8; 0x40],
    /// Registers whose data writes are NACKed
    pub failing_regs: Vec<u8>,
    /// STATUS1 reports OTG once EN_OTG is set
    pub boost_works: bool,
    pub writes: Vec<(u8, Vec<u8>)>,
    /// Register pointer of every read
    pub reads: Vec<u8>,
    pointer: u8,
}

impl Default for SimCharger {
    fn default() -> Self {
        Self {
            regs: [0; 0x40],
            failing_regs: Vec::new(),
            boost_works: true,
            writes: Vec::new(),
            reads: Vec::new(),
            pointer: 0,
        }
    }
}

impl SimCharger {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        let reg = bytes[0];
        self.pointer = reg;
        if bytes.len() == 1 {
            return Ok(());
        }
        if self.failing_regs.contains(&reg) {
            return Err(nack());
        }
        self.writes.push((reg, bytes[1..].to_vec()));
        for (i, b) in bytes[1..].iter().enumerate() {
            self.regs[usize::from(reg) + i] = *b;
        }
        if reg == 0x18 {
            let otg = self.regs[0x18] & 0x40 != 0 && self.boost_works;
            self.regs[0x1E] = (self.regs[0x1E] & !0b111) | if otg { 0b111 } else { 0 };
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), SimError> {
        self.reads.push(self.pointer);
        let start = usize::from(self.pointer);
        buf.copy_from_slice(&self.regs[start..start + buf.len()]);
        Ok(())
    }

    pub fn written(&self, reg: u8) -> Vec<&[u8]> {
        self.writes
            .iter()
            .filter(|(r, _)| *r == reg)
            .map(|(_, d)| d.as_slice())
            .collect()
    }

    pub fn word(&self, reg: u8) -> u16 {
        u16::from_le_bytes([self.regs[usize::from(reg)], self.regs[usize::from(reg) + 1]])
    }
}

// ── Bus ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Devices {
    pub co2: SimCo2,
    pub pm: SimPm,
    pub charger: SimCharger,
    /// Addresses in transaction order
    pub order: Vec<u8>,
    /// Addresses that no longer acknowledge, as if unplugged
    pub detached: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct SimBus(pub Rc<RefCell<Devices>>);

impl SimBus {
    pub fn new() -> Self {
        let bus = Self::default();
        {
            let mut d = bus.0.borrow_mut();
            d.co2.ppm = 400;
            d.co2.raw_temperature = 0x6666;
            d.co2.raw_humidity = 0x5555;
            d.pm.data_ready = true;
        }
        bus
    }

    pub fn devices(&self) -> std::cell::RefMut<'_, Devices> {
        self.0.borrow_mut()
    }
}

impl ErrorType for SimBus {
    type Error = SimError;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut d = self.0.borrow_mut();
        d.order.push(address);
        if d.detached.contains(&address) {
            return Err(SimError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)));
        }
        for op in operations {
            match (address, op) {
                (CO2_ADDR, Operation::Write(bytes)) => d.co2.write(&bytes[..])?,
                (CO2_ADDR, Operation::Read(buf)) => d.co2.read(&mut buf[..])?,
                (PM_ADDR, Operation::Write(bytes)) => d.pm.write(&bytes[..])?,
                (PM_ADDR, Operation::Read(buf)) => d.pm.read(&mut buf[..])?,
                (CHARGER_ADDR, Operation::Write(bytes)) => d.charger.write(&bytes[..])?,
                (CHARGER_ADDR, Operation::Read(buf)) => d.charger.read(&mut buf[..])?,
                _ => return Err(SimError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))),
            }
        }
        Ok(())
    }
}

// ── Delay ─────────────────────────────────────────────────────

/// Delay provider that returns immediately and tallies requested time.
#[derive(Clone, Default)]
pub struct NoDelay(pub Rc<RefCell<u64>>);

impl NoDelay {
    pub fn total_ms(&self) -> u64 {
        *self.0.borrow() / 1_000_000
    }
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        *self.0.borrow_mut() += u64::from(ns);
    }
}

// ── Event recorder ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<NodeEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&NodeEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(*e)).count()
    }

    pub fn contains(&self, event: &NodeEvent) -> bool {
        self.events.contains(event)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &NodeEvent) {
        self.events.push(event.clone());
    }
}

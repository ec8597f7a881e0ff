//! Checksummed command/response bus protocol.
//!
//! The CO2 and particulate sensors share one I²C bus and speak the same
//! framing: a 16-bit command code sent big-endian with no checksum,
//! optionally followed by data words, each of which is two bytes plus a
//! CRC-8.  Responses use the same three-byte-per-word layout.
//!
//! ```text
//!  write_command            ┌────┬────┐
//!                           │ C₁ │ C₀ │
//!                           └────┴────┘
//!  write_command_with_data  ┌────┬────┬────┬────┬─────┬────┬────┬─────┐
//!                           │ C₁ │ C₀ │ D₁ │ D₀ │ CRC │ D₁ │ D₀ │ CRC │ …
//!                           └────┴────┴────┴────┴─────┴────┴────┴─────┘
//!  read_words               ┌────┬────┬─────┬────┬────┬─────┐
//!                           │ D₁ │ D₀ │ CRC │ D₁ │ D₀ │ CRC │ …
//!                           └────┴────┴─────┴────┴────┴─────┘
//! ```
//!
//! The charger is not checksummed; it uses plain register reads and writes,
//! which are also provided here so that every transaction on the shared bus
//! goes through one owner.
//!
//! All primitives are synchronous.  Timeouts are enforced by the HAL driver
//! and surface as [`BusError`](crate::error::BusError), never as an empty
//! result.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use heapless::Vec;
use log::debug;

use crate::error::{BusError, Error, Result};

/// Largest payload any device on this bus transfers in one read
/// (particulate measured values: ten floats = twenty words).
pub const MAX_WORDS: usize = 20;

/// Longest settle delay the protocol layer will block for.  Anything
/// longer must be a state-machine dwell.
pub const MAX_SETTLE_MS: u32 = 100;

const CRC8_POLYNOMIAL: u8 = 0x31;
const CRC8_INIT: u8 = 0xFF;

const MAX_FRAME: usize = 2 + 3 * MAX_WORDS;
const MAX_REGISTER_WRITE: usize = 8;

// ═══════════════════════════════════════════════════════════════
//  Checksums
// ═══════════════════════════════════════════════════════════════

/// CRC-8, polynomial 0x31 (x⁸ + x⁵ + x⁴ + 1), init 0xFF, no reflection,
/// no final XOR.  The protocol always applies it to exactly two bytes.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC8_INIT;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ CRC8_POLYNOMIAL;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Encode one data word as it appears on the wire.
pub fn encode_word(word: u16) -> [u8; 3] {
    let [hi, lo] = word.to_be_bytes();
    [hi, lo, crc8(&[hi, lo])]
}

/// Verify and unpack `raw` (a multiple of three bytes) into `out`.
///
/// Either every word verifies and `out` is fully written, or the first
/// failing group is reported and `out` must be treated as garbage.
pub fn decode_words(raw: &[u8], out: &mut [u16]) -> Result<()> {
    if raw.len() != out.len() * 3 {
        return Err(Error::InvalidArgument("raw length must be 3 bytes per word"));
    }
    for (index, (group, word)) in raw.chunks_exact(3).zip(out.iter_mut()).enumerate() {
        if crc8(&group[..2]) != group[2] {
            return Err(Error::Checksum { index });
        }
        *word = u16::from_be_bytes([group[0], group[1]]);
    }
    Ok(())
}

/// Reassemble a big-endian IEEE-754 float transmitted as two words.
pub fn decode_f32(hi: u16, lo: u16) -> f32 {
    f32::from_bits((u32::from(hi) << 16) | u32::from(lo))
}

// ═══════════════════════════════════════════════════════════════
//  Bus owner
// ═══════════════════════════════════════════════════════════════

/// Exclusive owner of the shared I²C bus and the short-delay provider.
///
/// The scheduler holds the only `Bus`, and lends `&mut` to one state
/// machine at a time, so command and response bytes of different devices
/// can never interleave.
pub struct Bus<I, D> {
    i2c: I,
    delay: D,
}

impl<I: I2c, D: DelayNs> Bus<I, D> {
    pub fn new(i2c: I, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Give the underlying peripherals back (shutdown path).
    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    // ── Checksummed protocol ──────────────────────────────────

    /// Send a bare 16-bit command.
    pub fn write_command(&mut self, addr: u8, cmd: u16) -> Result<()> {
        self.i2c.write(addr, &cmd.to_be_bytes()).map_err(transport)
    }

    /// Send a command followed by checksummed data words.  A failed write
    /// is reported as-is; the caller decides whether to retry.
    pub fn write_command_with_data(&mut self, addr: u8, cmd: u16, words: &[u16]) -> Result<()> {
        if words.len() > MAX_WORDS {
            return Err(Error::InvalidArgument("too many data words"));
        }
        let mut frame: Vec<u8, MAX_FRAME> = Vec::new();
        // Capacity is checked above, so the extends cannot overflow.
        let _ = frame.extend_from_slice(&cmd.to_be_bytes());
        for &word in words {
            let _ = frame.extend_from_slice(&encode_word(word));
        }
        self.i2c.write(addr, &frame).map_err(transport)
    }

    /// Read `out.len()` checksummed words.
    pub fn read_words(&mut self, addr: u8, out: &mut [u16]) -> Result<()> {
        if out.is_empty() || out.len() > MAX_WORDS {
            return Err(Error::InvalidArgument("word count out of range"));
        }
        let mut raw = [0u8; 3 * MAX_WORDS];
        let raw = &mut raw[..out.len() * 3];
        self.i2c.read(addr, raw).map_err(transport)?;
        decode_words(raw, out).inspect_err(|e| debug!("bus 0x{addr:02X}: {e}"))
    }

    /// Command, bounded execution wait, then read the response words.
    pub fn send_and_fetch(&mut self, addr: u8, cmd: u16, exec_ms: u32, out: &mut [u16]) -> Result<()> {
        self.write_command(addr, cmd)?;
        self.settle(exec_ms);
        self.read_words(addr, out)
    }

    /// Blocking wait for device command execution.  Capped at
    /// [`MAX_SETTLE_MS`].
    pub fn settle(&mut self, ms: u32) {
        if ms > 0 {
            self.delay.delay_ms(ms.min(MAX_SETTLE_MS));
        }
    }

    // ── Plain register access ─────────────────────────────────

    /// Write `data` starting at register `reg`.
    pub fn write_register(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<()> {
        if data.len() >= MAX_REGISTER_WRITE {
            return Err(Error::InvalidArgument("register write too long"));
        }
        let mut frame: Vec<u8, MAX_REGISTER_WRITE> = Vec::new();
        let _ = frame.push(reg);
        let _ = frame.extend_from_slice(data);
        self.i2c.write(addr, &frame).map_err(transport)
    }

    /// Read `buf.len()` bytes starting at register `reg`.
    pub fn read_register(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<()> {
        self.i2c.write_read(addr, &[reg], buf).map_err(transport)
    }
}

fn transport<E: embedded_hal::i2c::Error>(e: E) -> Error {
    Error::Bus(BusError::from(e.kind()))
}

//! Unified error types for the sensing node core.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! scheduler's error handling uniform.  All variants are `Copy` so they can
//! be passed through the state machines and event sink without allocation.

use core::fmt;

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Transport-level failure: NACK, timeout, bus not ready.
    Bus(BusError),
    /// A received word failed CRC verification.  `index` is the zero-based
    /// position of the offending 3-byte group within the read.
    Checksum { index: usize },
    /// Operation attempted while the device or its state machine is not in
    /// a state that permits it.
    InvalidState(&'static str),
    /// Value outside the documented range.
    InvalidArgument(&'static str),
    /// The CO2 sensor rejected a forced recalibration (sentinel result).
    Calibration,
    /// Configuration failed validation or could not be decoded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Checksum { index } => write!(f, "checksum mismatch in word {index}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Calibration => write!(f, "forced recalibration failed"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

/// Transport failure categories, collapsed from the HAL's `ErrorKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The addressed device did not acknowledge (absent, busy, or data not
    /// ready for devices that signal readiness by NACKing reads).
    Nack,
    /// Another master won arbitration.
    ArbitrationLoss,
    /// Bus-level protocol error (misplaced start/stop).
    Protocol,
    /// Peripheral overrun.
    Overrun,
    /// Timeout or any other driver-specific failure.
    Other,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nack => write!(f, "no acknowledge"),
            Self::ArbitrationLoss => write!(f, "arbitration lost"),
            Self::Protocol => write!(f, "protocol error"),
            Self::Overrun => write!(f, "overrun"),
            Self::Other => write!(f, "transport failure"),
        }
    }
}

impl From<ErrorKind> for BusError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(
                NoAcknowledgeSource::Address | NoAcknowledgeSource::Data | NoAcknowledgeSource::Unknown,
            ) => Self::Nack,
            ErrorKind::ArbitrationLoss => Self::ArbitrationLoss,
            ErrorKind::Bus => Self::Protocol,
            ErrorKind::Overrun => Self::Overrun,
            _ => Self::Other,
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl Error {
    /// `true` when the failure is a NACK, which some sensors use to signal
    /// "no data yet" rather than a fault.
    pub fn is_nack(&self) -> bool {
        matches!(self, Self::Bus(BusError::Nack))
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

//! State bookkeeping shared by every device state machine.
//!
//! Each device module defines a closed state enum and a pure transition
//! function:
//!
//! ```text
//!   (state, elapsed_ms, io_result) ──transition()──▶ Option<next state>
//! ```
//!
//! [`Fsm`] holds the part that is the same for all of them: the current
//! state, the time it was entered, and transition logging.  Dwell
//! conditions (warm-up, back-off, stabilisation) are expressed as
//! `elapsed_ms(now) >= limit` against the entry time, never as sleeps.

use core::fmt::Debug;

use log::info;

/// Implemented by every state enum driven through an [`Fsm`].
pub trait StateId: Copy + PartialEq + Debug {
    /// Short human-readable name used in logs.
    fn name(&self) -> &'static str;
}

/// Outcome of the I/O a state machine performed this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoResult {
    /// No transaction was issued.
    Idle,
    /// The transaction completed and the response verified.
    Ok,
    /// The device answered "no data yet".  Not a fault.
    NotReady,
    /// Transport or checksum failure.
    Failed,
}

impl IoResult {
    /// Fold a driver `Result` into an outcome, treating NACK on a data read
    /// as "not ready" when `nack_means_not_ready` is set.
    pub fn from_result<T>(result: &crate::error::Result<T>, nack_means_not_ready: bool) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) if nack_means_not_ready && e.is_nack() => Self::NotReady,
            Err(_) => Self::Failed,
        }
    }
}

/// Current state plus the time it was entered.
#[derive(Debug, Clone)]
pub struct Fsm<S: StateId> {
    label: &'static str,
    current: S,
    entered_ms: u64,
    transitions: u32,
}

impl<S: StateId> Fsm<S> {
    /// Start in `initial`, entered at t = 0.
    pub fn new(label: &'static str, initial: S) -> Self {
        Self {
            label,
            current: initial,
            entered_ms: 0,
            transitions: 0,
        }
    }

    /// The active state.
    pub fn current(&self) -> S {
        self.current
    }

    /// Milliseconds spent in the active state.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entered_ms)
    }

    /// Timestamp at which the active state was entered.
    pub fn entered_ms(&self) -> u64 {
        self.entered_ms
    }

    /// Number of transitions taken since construction.
    pub fn transition_count(&self) -> u32 {
        self.transitions
    }

    /// Move to `next`.  Re-entering the same state restarts its dwell
    /// timer.  Returns `(from, to)` for event publication.
    pub fn transition(&mut self, next: S, now_ms: u64) -> (S, S) {
        let from = self.current;
        if from == next {
            info!("{} re-enter: {}", self.label, next.name());
        } else {
            info!("{} transition: {} -> {}", self.label, from.name(), next.name());
        }
        self.current = next;
        self.entered_ms = now_ms;
        self.transitions = self.transitions.wrapping_add(1);
        (from, next)
    }
}

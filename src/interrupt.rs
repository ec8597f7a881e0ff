//! Motion interrupt flag.
//!
//! The accelerometer's motion interrupt line is the only thing that
//! crosses from interrupt context into the node core.  The ISR only
//! raises the flag; the scheduler only takes it.  Both are lock-free.
//!
//! ```text
//!   GPIO ISR ──raise()──▶ MotionFlag ──take()──▶ NodeScheduler::tick
//! ```

use core::sync::atomic::{AtomicBool, Ordering};

/// Single-bit ISR → loop signal.  Intended to live in a `static`.
#[derive(Debug)]
pub struct MotionFlag(AtomicBool);

impl Default for MotionFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Set from interrupt context.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear and return whether the flag was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

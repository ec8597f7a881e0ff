//! Port traits: the boundary between the node core and the outside world.
//!
//! ```text
//!   NodeScheduler ──▶ EventSink ──▶ adapter (log, display, uplink)
//!   Clock ──▶ main loop ──▶ NodeScheduler::tick(now_ms)
//! ```
//!
//! The bus itself is not a port here: the core is generic over the
//! `embedded-hal` `I2c` and `DelayNs` traits directly.

use super::events::NodeEvent;

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: core → logging / display)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`NodeEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &NodeEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond time base.
pub trait Clock {
    /// Milliseconds since boot.  Never goes backwards.
    fn now_ms(&self) -> u64;
}

/// Sink that drops every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &NodeEvent) {}
}

//! Services the engine owns on behalf of every tracker.
//!
//! The alarm queue is the single clock-driven scheduler; the distributor is
//! the outbox for client-facing progress messages.

mod alarms;
mod distributor;

pub use alarms::*;
pub use distributor::*;

//! External collaborators the engine calls into, bundled per operation.
//!
//! Nothing here is global: every mutating [`Commodity`](crate::commodity::Commodity)
//! operation receives an [`EngineContext`] that borrows the clock, the owner,
//! and the buff/interaction/progress systems for the duration of the call.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::callbacks::CallbackHandle;
use crate::message::ProgressUpdate;
use crate::value::Tick;

/// Identifies one commodity instance within its owner's tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommodityId(pub u64);

impl fmt::Display for CommodityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "commodity#{}", self.0)
    }
}

/// Handle for a scheduled alarm, issued by the [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlarmHandle(pub u64);

/// Handle for an applied status effect, issued by the [`BuffSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuffHandle(pub u64);

/// What a fired alarm should be routed back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmTarget {
    pub commodity: CommodityId,
    pub callback: CallbackHandle,
}

/// Global clock and alarm service.
pub trait Scheduler {
    fn now(&self) -> Tick;
    /// Ask for `target` to be delivered to `Commodity::on_alarm` at or after `tick`.
    fn schedule_at(&mut self, tick: Tick, target: AlarmTarget) -> AlarmHandle;
    /// Cancelling an alarm that already fired or was never issued is a no-op.
    fn cancel(&mut self, alarm: AlarmHandle);
}

/// The entity (and its tracker) that owns the commodity.
pub trait Owner {
    /// Locked commodities do not decay.
    fn is_locked(&self, commodity: CommodityId) -> bool;
    /// Whether the owner is currently instanced; interaction pushes are skipped otherwise.
    fn has_sim_instance(&self) -> bool;
    /// Request removal; hosts defer this until the current drain completes.
    fn remove_statistic(&mut self, commodity: CommodityId);
    /// Apply a state's on-enter loot action to the owner.
    fn apply_loot(&mut self, commodity: CommodityId, loot: &str);
}

/// Status-effect service.
pub trait BuffSystem {
    fn add(
        &mut self,
        buff: &str,
        reason: &str,
        change_rate: f64,
        commodity: CommodityId,
    ) -> Option<BuffHandle>;
    /// Returns `false` for handles that are not active.
    fn remove(&mut self, handle: BuffHandle) -> bool;
    fn notify_rate_changed(&mut self, handle: BuffHandle, rate: f64);
}

/// Relative urgency of a pushed interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    High,
    Critical,
}

/// Interaction/affordance push service.
pub trait InteractionSystem {
    fn push(
        &mut self,
        affordance: &str,
        target: Option<u64>,
        priority: Priority,
    ) -> Result<(), PushError>;
    fn is_running_or_queued(&self, affordance: &str) -> bool;
    /// Whether the affordance's preconditions currently hold.
    fn test(&self, affordance: &str) -> bool;
}

/// Receives client-facing progress updates.
pub trait ProgressSink {
    fn send(&mut self, update: ProgressUpdate);
}

/// An interaction push that the interaction system refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushError {
    pub affordance: String,
    pub reason: String,
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push of '{}' refused: {}", self.affordance, self.reason)
    }
}

impl std::error::Error for PushError {}

/// Everything an engine operation may touch outside the commodity itself.
pub struct EngineContext<'a> {
    pub scheduler: &'a mut dyn Scheduler,
    pub owner: &'a mut dyn Owner,
    pub buffs: &'a mut dyn BuffSystem,
    pub interactions: &'a mut dyn InteractionSystem,
    pub progress: &'a mut dyn ProgressSink,
}

impl EngineContext<'_> {
    pub fn now(&self) -> Tick {
        self.scheduler.now()
    }
}

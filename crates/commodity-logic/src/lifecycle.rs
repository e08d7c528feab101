//! Convergence-driven removal and the destroyed guard.

use crate::callbacks::{CallbackHandle, CallbackRegistry};
use crate::commodity::Trigger;
use crate::context::{CommodityId, Owner};
use crate::threshold::Threshold;

#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    armed: bool,
    removal_requested: bool,
    destroyed: bool,
    convergence: Option<CallbackHandle>,
}

impl Lifecycle {
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn removal_requested(&self) -> bool {
        self.removal_requested
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Called once construction finished. Only then may the commodity remove itself.
    pub(crate) fn arm(
        &mut self,
        removes_at_convergence: bool,
        convergence: f64,
        callbacks: &mut CallbackRegistry<Trigger>,
    ) {
        self.armed = true;
        if removes_at_convergence && self.convergence.is_none() {
            let threshold = Threshold::equal_to(convergence);
            self.convergence = Some(callbacks.add(threshold, Trigger::Converged, None));
        }
    }

    pub(crate) fn converged(&mut self, id: CommodityId, owner: &mut dyn Owner) {
        self.convergence = None;
        if !self.armed || self.destroyed || self.removal_requested {
            return;
        }
        self.removal_requested = true;
        log::info!("{}: reached convergence, requesting removal", id);
        owner.remove_statistic(id);
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
        self.convergence = None;
    }
}

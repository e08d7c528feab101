//! In-process collaborators attached to every owner entity.
//!
//! These stand in for the game's buff, interaction and loot services so the
//! engine can run headless. Each keeps enough history for tests and the
//! simtest harness to assert on.

use std::collections::{BTreeMap, BTreeSet};

use commodity_logic::context::{
    BuffHandle, BuffSystem, CommodityId, InteractionSystem, Priority, PushError,
};

/// Marker for owners that are currently instanced in the world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimInstance;

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBuff {
    pub name: String,
    pub reason: String,
    pub rate: f64,
    pub commodity: CommodityId,
}

#[derive(Debug, Default)]
pub struct BuffLedger {
    active: BTreeMap<BuffHandle, ActiveBuff>,
    next_handle: u64,
}

impl BuffLedger {
    pub fn get(&self, handle: BuffHandle) -> Option<&ActiveBuff> {
        self.active.get(&handle)
    }

    pub fn has(&self, name: &str) -> bool {
        self.active.values().any(|b| b.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.active.values().map(|b| b.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl BuffSystem for BuffLedger {
    fn add(
        &mut self,
        buff: &str,
        reason: &str,
        change_rate: f64,
        commodity: CommodityId,
    ) -> Option<BuffHandle> {
        let handle = BuffHandle(self.next_handle);
        self.next_handle += 1;
        self.active.insert(
            handle,
            ActiveBuff {
                name: buff.to_string(),
                reason: reason.to_string(),
                rate: change_rate,
                commodity,
            },
        );
        Some(handle)
    }

    fn remove(&mut self, handle: BuffHandle) -> bool {
        self.active.remove(&handle).is_some()
    }

    fn notify_rate_changed(&mut self, handle: BuffHandle, rate: f64) {
        if let Some(buff) = self.active.get_mut(&handle) {
            buff.rate = rate;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedInteraction {
    pub affordance: String,
    pub target: Option<u64>,
    pub priority: Priority,
}

/// Interaction queue; blocked affordances fail their precondition test.
#[derive(Debug, Default)]
pub struct InteractionQueue {
    queue: Vec<QueuedInteraction>,
    blocked: BTreeSet<String>,
}

impl InteractionQueue {
    pub fn queued(&self) -> &[QueuedInteraction] {
        &self.queue
    }

    pub fn block(&mut self, affordance: &str) {
        self.blocked.insert(affordance.to_string());
    }

    pub fn unblock(&mut self, affordance: &str) {
        self.blocked.remove(affordance);
    }

    /// Finish the oldest queued instance of `affordance`.
    pub fn complete(&mut self, affordance: &str) -> bool {
        match self.queue.iter().position(|q| q.affordance == affordance) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl InteractionSystem for InteractionQueue {
    fn push(
        &mut self,
        affordance: &str,
        target: Option<u64>,
        priority: Priority,
    ) -> Result<(), PushError> {
        if self.blocked.contains(affordance) {
            return Err(PushError {
                affordance: affordance.to_string(),
                reason: "preconditions failed".to_string(),
            });
        }
        self.queue.push(QueuedInteraction {
            affordance: affordance.to_string(),
            target,
            priority,
        });
        Ok(())
    }

    fn is_running_or_queued(&self, affordance: &str) -> bool {
        self.queue.iter().any(|q| q.affordance == affordance)
    }

    fn test(&self, affordance: &str) -> bool {
        !self.blocked.contains(affordance)
    }
}

/// Loot actions applied to the owner, in order.
#[derive(Debug, Default)]
pub struct LootLog {
    entries: Vec<(CommodityId, String)>,
}

impl LootLog {
    pub fn record(&mut self, commodity: CommodityId, loot: &str) {
        self.entries.push((commodity, loot.to_string()));
    }

    pub fn entries(&self) -> &[(CommodityId, String)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buff_ledger_tracks_rate() {
        let mut ledger = BuffLedger::default();
        let handle = ledger.add("buff_hungry", "motive_state", -1.0, CommodityId(1)).unwrap();
        ledger.notify_rate_changed(handle, -2.0);
        assert_eq!(ledger.get(handle).unwrap().rate, -2.0);
        assert!(ledger.has("buff_hungry"));
        assert!(ledger.remove(handle));
        assert!(!ledger.remove(handle));
    }

    #[test]
    fn test_blocked_interaction_is_refused() {
        let mut queue = InteractionQueue::default();
        queue.block("eat_from_fridge");
        assert!(!queue.test("eat_from_fridge"));
        assert!(queue.push("eat_from_fridge", None, Priority::Critical).is_err());

        queue.push("eat", None, Priority::High).unwrap();
        assert!(queue.is_running_or_queued("eat"));
        assert!(queue.complete("eat"));
        assert!(!queue.is_running_or_queued("eat"));
    }
}

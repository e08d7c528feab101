//! Per-owner commodity tracker.

use std::collections::{BTreeMap, BTreeSet};

use commodity_logic::context::{CommodityId, Owner};
use commodity_logic::Commodity;

use super::status::LootLog;

/// Owner-side state the engine reads back through [`Owner`].
#[derive(Debug, Default)]
pub(crate) struct OwnerState {
    pub(crate) locked: BTreeSet<CommodityId>,
    pub(crate) pending_removals: Vec<CommodityId>,
}

/// All commodities owned by one entity.
#[derive(Debug, Default)]
pub struct CommodityTracker {
    pub(crate) commodities: BTreeMap<CommodityId, Commodity>,
    pub(crate) owner: OwnerState,
    pub(crate) next_id: u64,
}

impl CommodityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> impl Iterator<Item = CommodityId> + '_ {
        self.commodities.keys().copied()
    }

    pub fn get(&self, id: CommodityId) -> Option<&Commodity> {
        self.commodities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.commodities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commodities.is_empty()
    }

    pub fn is_locked(&self, id: CommodityId) -> bool {
        self.owner.locked.contains(&id)
    }

    /// The commodity instance of a given tuning, if tracked.
    pub fn find_by_config(&self, config_id: u64) -> Option<CommodityId> {
        self.commodities
            .iter()
            .find(|(_, c)| c.config().id == config_id)
            .map(|(&id, _)| id)
    }

    /// Returns `false` if `id` is not tracked.
    pub(crate) fn set_locked(&mut self, id: CommodityId, locked: bool) -> bool {
        if !self.commodities.contains_key(&id) {
            return false;
        }
        if locked {
            self.owner.locked.insert(id);
        } else {
            self.owner.locked.remove(&id);
        }
        true
    }

    pub(crate) fn allocate_id(next_id: &mut u64) -> CommodityId {
        let id = CommodityId(*next_id);
        *next_id += 1;
        id
    }
}

/// [`Owner`] view over a tracker for the duration of one engine call.
pub(crate) struct TrackerOwner<'a> {
    pub(crate) state: &'a mut OwnerState,
    pub(crate) loot: &'a mut LootLog,
    pub(crate) instanced: bool,
}

impl Owner for TrackerOwner<'_> {
    fn is_locked(&self, commodity: CommodityId) -> bool {
        self.state.locked.contains(&commodity)
    }

    fn has_sim_instance(&self) -> bool {
        self.instanced
    }

    // Removal waits until the current drain finished; see `CommodityEngine::with_tracker`.
    fn remove_statistic(&mut self, commodity: CommodityId) {
        if !self.state.pending_removals.contains(&commodity) {
            self.state.pending_removals.push(commodity);
        }
    }

    fn apply_loot(&mut self, commodity: CommodityId, loot: &str) {
        self.loot.record(commodity, loot);
    }
}

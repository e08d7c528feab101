//! Commodity engine - main entry point for hosting commodity trackers

use hecs::{Entity, World};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

use commodity_logic::callbacks::CallbackHandle;
use commodity_logic::value::ModifierHandle;
use commodity_logic::{
    load_tuning_json, Commodity, CommodityId, ConfigError, EngineContext, ListenerEvent,
    RateModifier, Threshold, Tick, ValidatedConfig,
};

use crate::components::*;
use crate::persistence::{SaveError, SavedOwner};
use crate::systems::*;

/// Main commodity engine
pub struct CommodityEngine {
    /// ECS world; one entity per owner
    pub world: World,
    /// Current simulation tick (game minutes)
    pub sim_time: Tick,
    alarms: AlarmQueue,
    distributor: Distributor,
    tuning: BTreeMap<u64, Arc<ValidatedConfig>>,
}

impl CommodityEngine {
    /// Create an empty engine over a tuning table
    pub fn new(tuning: Vec<ValidatedConfig>) -> Self {
        let tuning = tuning
            .into_iter()
            .map(|config| (config.id, Arc::new(config)))
            .collect();
        Self {
            world: World::new(),
            sim_time: 0,
            alarms: AlarmQueue::new(),
            distributor: Distributor::new(),
            tuning,
        }
    }

    pub fn from_tuning_json(json: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(load_tuning_json(json)?))
    }

    pub fn tuning(&self, config_id: u64) -> Option<&ValidatedConfig> {
        self.tuning.get(&config_id).map(|config| config.as_ref())
    }

    /// Number of live alarms across all owners
    pub fn pending_alarms(&self) -> usize {
        self.alarms.len()
    }

    // ── Owners ──────────────────────────────────────────────────────────

    pub fn spawn_owner(&mut self, instanced: bool) -> Entity {
        let entity = self.world.spawn((
            CommodityTracker::new(),
            BuffLedger::default(),
            InteractionQueue::default(),
            LootLog::default(),
        ));
        if instanced {
            if let Err(e) = self.world.insert_one(entity, SimInstance) {
                log::debug!("{:?}: instance marker not attached: {}", entity, e);
            }
        }
        log::info!("spawned owner {:?} (instanced: {})", entity, instanced);
        entity
    }

    /// Destroy every commodity of the owner and drop its pending alarms
    pub fn despawn_owner(&mut self, entity: Entity) -> bool {
        let now = self.sim_time;
        let Ok((tracker, buffs)) = self
            .world
            .query_one_mut::<(&mut CommodityTracker, &mut BuffLedger)>(entity)
        else {
            return false;
        };
        let mut scheduler = EntityScheduler {
            queue: &mut self.alarms,
            entity,
            now,
        };
        for commodity in tracker.commodities.values_mut() {
            commodity.destroy(&mut scheduler, &mut *buffs);
        }
        let dropped = self.alarms.cancel_entity(entity);
        if let Err(e) = self.world.despawn(entity) {
            log::debug!("{:?}: despawn failed: {}", entity, e);
        }
        log::info!("despawned owner {:?} ({} alarms dropped)", entity, dropped);
        true
    }

    /// Instancing only gates interaction pushes, so nothing is re-evaluated here.
    pub fn set_instanced(&mut self, entity: Entity, instanced: bool) -> bool {
        if !self.world.contains(entity) {
            return false;
        }
        if instanced {
            if let Err(e) = self.world.insert_one(entity, SimInstance) {
                log::debug!("{:?}: instance marker not attached: {}", entity, e);
            }
        } else if let Err(e) = self.world.remove_one::<SimInstance>(entity) {
            log::debug!("{:?}: no instance marker to remove: {}", entity, e);
        }
        true
    }

    pub fn owner_count(&self) -> usize {
        self.world.query::<&CommodityTracker>().iter().count()
    }

    // ── Commodities ─────────────────────────────────────────────────────

    /// Start tracking a tuned commodity. An owner tracks each tuning at most once.
    pub fn add_commodity(&mut self, entity: Entity, config_id: u64) -> Option<CommodityId> {
        let Some(config) = self.tuning.get(&config_id).cloned() else {
            log::warn!("no tuning for commodity {}", config_id);
            return None;
        };
        let existing = self.world.get::<&CommodityTracker>(entity).ok()?.find_by_config(config_id);
        if existing.is_some() {
            return existing;
        }
        self.with_tracker(entity, |commodities, next_id, ctx| {
            let id = CommodityTracker::allocate_id(next_id);
            log::info!("{:?}: tracking {} as {}", entity, config.name, id);
            commodities.insert(id, Commodity::create(id, config, ctx));
            id
        })
    }

    /// Removal goes through the same deferred path as convergence removal.
    pub fn remove_commodity(&mut self, entity: Entity, id: CommodityId) -> bool {
        self.with_tracker(entity, |commodities, _, ctx| {
            if !commodities.contains_key(&id) {
                return false;
            }
            ctx.owner.remove_statistic(id);
            true
        })
        .unwrap_or(false)
    }

    pub fn has_commodity(&self, entity: Entity, id: CommodityId) -> bool {
        self.world
            .get::<&CommodityTracker>(entity)
            .map(|tracker| tracker.get(id).is_some())
            .unwrap_or(false)
    }

    /// The commodity tracking `config_id` on this owner
    pub fn commodity_for(&self, entity: Entity, config_id: u64) -> Option<CommodityId> {
        self.world.get::<&CommodityTracker>(entity).ok()?.find_by_config(config_id)
    }

    /// Current value. Any callbacks that came due since the last alarm fire first.
    pub fn value(&mut self, entity: Entity, id: CommodityId) -> Option<f64> {
        self.with_commodity(entity, id, |commodity, ctx| commodity.value(ctx))
    }

    pub fn set_value(&mut self, entity: Entity, id: CommodityId, value: f64) -> bool {
        self.with_commodity(entity, id, |commodity, ctx| commodity.set_value(value, ctx))
            .is_some()
    }

    pub fn add_value(&mut self, entity: Entity, id: CommodityId, delta: f64) -> bool {
        self.with_commodity(entity, id, |commodity, ctx| commodity.add_value(delta, ctx))
            .is_some()
    }

    pub fn add_modifier(
        &mut self,
        entity: Entity,
        id: CommodityId,
        modifier: RateModifier,
    ) -> Option<ModifierHandle> {
        self.with_commodity(entity, id, |commodity, ctx| {
            commodity.add_decay_modifier(modifier, ctx)
        })
        .flatten()
    }

    pub fn remove_modifier(
        &mut self,
        entity: Entity,
        id: CommodityId,
        handle: ModifierHandle,
    ) -> bool {
        self.with_commodity(entity, id, |commodity, ctx| {
            commodity.remove_decay_modifier(handle, ctx)
        })
        .unwrap_or(false)
    }

    /// Lock or unlock decay. The commodity re-reads the owner's locked set.
    pub fn set_locked(&mut self, entity: Entity, id: CommodityId, locked: bool) -> bool {
        let tracked = match self.world.get::<&mut CommodityTracker>(entity) {
            Ok(mut tracker) => tracker.set_locked(id, locked),
            Err(_) => false,
        };
        if !tracked {
            return false;
        }
        self.with_commodity(entity, id, |commodity, ctx| commodity.refresh_lock(ctx))
            .is_some()
    }

    pub fn state_name(&self, entity: Entity, id: CommodityId) -> Option<String> {
        let tracker = self.world.get::<&CommodityTracker>(entity).ok()?;
        tracker.get(id).map(|commodity| commodity.state_name().to_string())
    }

    pub fn add_listener(
        &mut self,
        entity: Entity,
        id: CommodityId,
        threshold: Threshold,
        notify_rearm: bool,
    ) -> Option<CallbackHandle> {
        self.with_commodity(entity, id, |commodity, ctx| {
            commodity.add_listener(threshold, notify_rearm, ctx)
        })
        .flatten()
    }

    pub fn listener_events(&mut self, entity: Entity, id: CommodityId) -> Vec<ListenerEvent> {
        self.with_commodity(entity, id, |commodity, _| commodity.drain_listener_events())
            .unwrap_or_default()
    }

    /// Read the owner's tracker and collaborators together.
    pub fn with_status<R>(
        &self,
        entity: Entity,
        f: impl FnOnce(&CommodityTracker, &BuffLedger, &InteractionQueue, &LootLog) -> R,
    ) -> Option<R> {
        let mut query = self
            .world
            .query_one::<(&CommodityTracker, &BuffLedger, &InteractionQueue, &LootLog)>(entity)
            .ok()?;
        query
            .get()
            .map(|(tracker, buffs, queue, loot)| f(tracker, buffs, queue, loot))
    }

    /// Mutable access to an owner's interaction queue, e.g. to complete or block affordances.
    pub fn interactions_mut(
        &mut self,
        entity: Entity,
    ) -> Option<hecs::RefMut<'_, InteractionQueue>> {
        self.world.get::<&mut InteractionQueue>(entity).ok()
    }

    /// Take all progress messages queued since the last call
    pub fn drain_progress(&mut self) -> Vec<Outgoing> {
        self.distributor.drain()
    }

    // ── Time ────────────────────────────────────────────────────────────

    /// Advance the clock, delivering every alarm due on the way in order.
    /// Returns the number of alarms delivered.
    pub fn advance(&mut self, ticks: Tick) -> usize {
        let until = self.sim_time.saturating_add(ticks);
        let mut delivered = 0;
        while let Some((tick, EntityAlarm { entity, target })) = self.alarms.pop_due(until) {
            self.sim_time = self.sim_time.max(tick);
            let routed = self.with_tracker(entity, |commodities, _, ctx| {
                match commodities.get_mut(&target.commodity) {
                    Some(commodity) => {
                        commodity.on_alarm(target.callback, ctx);
                        true
                    }
                    None => false,
                }
            });
            if routed == Some(true) {
                log::debug!(
                    "tick {}: alarm delivered to {:?}/{}",
                    tick, entity, target.commodity
                );
                delivered += 1;
            } else {
                log::debug!(
                    "tick {}: alarm for {:?}/{} dropped",
                    tick, entity, target.commodity
                );
            }
        }
        self.sim_time = until;
        delivered
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Save all owners to a writer
    pub fn save<W: std::io::Write>(&self, writer: W) -> Result<(), SaveError> {
        crate::persistence::save_commodities(writer, &self.world, self.sim_time)
    }

    /// Replace the world with a save, restored as of `now`.
    ///
    /// Every commodity runs its auto-satisfy catch-up for the time since it
    /// was saved. Unknown tunings fail the load before anything is replaced.
    pub fn load<R: std::io::Read>(
        &mut self,
        reader: R,
        now: Tick,
        rng: &mut impl Rng,
    ) -> Result<(), SaveError> {
        let loaded = crate::persistence::load_commodities(reader)?;
        let mut owners = Vec::with_capacity(loaded.owners.len());
        for owner in loaded.owners {
            let mut restored = Vec::with_capacity(owner.commodities.len());
            for snapshot in &owner.commodities {
                let config = self
                    .tuning
                    .get(&snapshot.config_id)
                    .cloned()
                    .ok_or(SaveError::UnknownCommodity(snapshot.config_id))?;
                restored.push(config);
            }
            owners.push((owner, restored));
        }

        self.world = World::new();
        self.alarms = AlarmQueue::new();
        self.distributor = Distributor::new();
        self.sim_time = now.max(loaded.sim_time);

        for (owner, configs) in owners {
            self.restore_owner(owner, configs, rng);
        }
        log::info!(
            "loaded {} owners at tick {} (saved at {})",
            self.owner_count(),
            self.sim_time,
            loaded.sim_time
        );
        Ok(())
    }

    fn restore_owner(
        &mut self,
        owner: SavedOwner,
        configs: Vec<Arc<ValidatedConfig>>,
        rng: &mut impl Rng,
    ) {
        let now = self.sim_time;
        let entity = self.spawn_owner(owner.instanced);
        if let Ok(mut tracker) = self.world.get::<&mut CommodityTracker>(entity) {
            tracker.next_id = owner.next_id;
            tracker.owner.locked = owner.locked.iter().copied().collect();
        }
        self.with_tracker(entity, |commodities, _, ctx| {
            for (snapshot, config) in owner.commodities.iter().zip(configs) {
                let absent_for = now.saturating_sub(snapshot.saved_at);
                let commodity =
                    Commodity::restore(snapshot.id, config, snapshot, absent_for, &mut *rng, ctx);
                commodities.insert(snapshot.id, commodity);
            }
        });
    }

    // ── Plumbing ────────────────────────────────────────────────────────

    fn with_commodity<R>(
        &mut self,
        entity: Entity,
        id: CommodityId,
        f: impl FnOnce(&mut Commodity, &mut EngineContext<'_>) -> R,
    ) -> Option<R> {
        self.with_tracker(entity, |commodities, _, ctx| {
            commodities.get_mut(&id).map(|commodity| f(commodity, ctx))
        })
        .flatten()
    }

    /// Run `f` against one owner's commodities with a context wired to that
    /// owner's collaborators, then process the removals it requested.
    fn with_tracker<R>(
        &mut self,
        entity: Entity,
        f: impl FnOnce(
            &mut BTreeMap<CommodityId, Commodity>,
            &mut u64,
            &mut EngineContext<'_>,
        ) -> R,
    ) -> Option<R> {
        let Self {
            world,
            sim_time,
            alarms,
            distributor,
            ..
        } = self;
        let now = *sim_time;
        let Ok((tracker, buffs, interactions, loot, instance)) = world.query_one_mut::<(
            &mut CommodityTracker,
            &mut BuffLedger,
            &mut InteractionQueue,
            &mut LootLog,
            Option<&SimInstance>,
        )>(entity) else {
            return None;
        };
        let CommodityTracker {
            commodities,
            owner: owner_state,
            next_id,
        } = tracker;

        let result = {
            let mut scheduler = EntityScheduler {
                queue: &mut *alarms,
                entity,
                now,
            };
            let mut owner = TrackerOwner {
                state: &mut *owner_state,
                loot,
                instanced: instance.is_some(),
            };
            let mut progress = EntityDistributor {
                distributor: &mut *distributor,
                entity,
            };
            let mut ctx = EngineContext {
                scheduler: &mut scheduler,
                owner: &mut owner,
                buffs: &mut *buffs,
                interactions,
                progress: &mut progress,
            };
            f(&mut *commodities, &mut *next_id, &mut ctx)
        };

        let pending = std::mem::take(&mut owner_state.pending_removals);
        if !pending.is_empty() {
            let mut scheduler = EntityScheduler {
                queue: &mut *alarms,
                entity,
                now,
            };
            for id in pending {
                if let Some(mut commodity) = commodities.remove(&id) {
                    commodity.destroy(&mut scheduler, &mut *buffs);
                    owner_state.locked.remove(&id);
                    log::info!("{:?}: removed {} ({})", entity, id, commodity.config().name);
                }
            }
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commodity_logic::context::Priority;
    use commodity_logic::message::ProgressUpdate;

    const TUNING_JSON: &str = include_str!("../../../data/commodity_tuning.json");
    const HUNGER: u64 = 1;
    const ENERGY: u64 = 2;
    const BOREDOM: u64 = 3;

    fn engine() -> CommodityEngine {
        CommodityEngine::from_tuning_json(TUNING_JSON).expect("bundled tuning loads")
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine();
        assert_eq!(engine.owner_count(), 0);
        assert_eq!(engine.sim_time, 0);
        assert!(engine.tuning(HUNGER).is_some());
        assert!(engine.tuning(99).is_none());
    }

    #[test]
    fn test_add_commodity_is_idempotent_per_tuning() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        assert_eq!(engine.add_commodity(owner, HUNGER), Some(hunger));
        assert!(engine.add_commodity(owner, 99).is_none());
        assert_eq!(engine.commodity_for(owner, HUNGER), Some(hunger));
        assert_eq!(engine.state_name(owner, hunger).as_deref(), Some("fine"));
    }

    #[test]
    fn test_advance_walks_hunger_down() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();

        // 50 at -1 per tick drops below the "fine" bound of 40 on tick 11
        engine.advance(10);
        assert_eq!(engine.state_name(owner, hunger).as_deref(), Some("fine"));
        engine.advance(1);
        assert_eq!(engine.state_name(owner, hunger).as_deref(), Some("hungry"));
        assert_eq!(engine.sim_time, 11);

        let (has_buff, loot) = engine
            .with_status(owner, |_, buffs, _, loot| {
                (buffs.has("buff_hungry"), loot.entries().to_vec())
            })
            .unwrap();
        assert!(has_buff);
        assert_eq!(loot, vec![(hunger, "loot_stomach_growl".to_string())]);
    }

    #[test]
    fn test_distress_pushes_eat_when_instanced() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();

        engine.advance(100);
        assert!((engine.value(owner, hunger).unwrap() + 50.0).abs() < 1e-6);
        let queued = engine
            .with_status(owner, |_, buffs, queue, _| {
                assert!(buffs.has("buff_hunger_distress"));
                queue.queued().to_vec()
            })
            .unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].affordance, "eat");
        assert_eq!(queued[0].priority, Priority::High);

        // Eating lifts hunger back out of distress
        engine.interactions_mut(owner).unwrap().complete("eat");
        assert!(engine.set_value(owner, hunger, 60.0));
        let distressed = engine
            .with_status(owner, |_, buffs, _, _| buffs.has("buff_hunger_distress"))
            .unwrap();
        assert!(!distressed);
        assert_eq!(engine.state_name(owner, hunger).as_deref(), Some("fine"));
    }

    #[test]
    fn test_uninstanced_owner_gets_buff_but_no_push() {
        let mut engine = engine();
        let owner = engine.spawn_owner(false);
        engine.add_commodity(owner, HUNGER).unwrap();
        engine.advance(100);
        let (distressed, queued) = engine
            .with_status(owner, |_, buffs, queue, _| {
                (buffs.has("buff_hunger_distress"), queue.queued().len())
            })
            .unwrap();
        assert!(distressed);
        assert_eq!(queued, 0);
    }

    #[test]
    fn test_set_instanced_toggles_marker() {
        let mut engine = engine();
        let owner = engine.spawn_owner(false);
        // Clearing an absent marker is logged, not refused
        assert!(engine.set_instanced(owner, false));
        assert!(engine.world.get::<&SimInstance>(owner).is_err());
        assert!(engine.set_instanced(owner, true));
        assert!(engine.world.get::<&SimInstance>(owner).is_ok());

        assert!(engine.despawn_owner(owner));
        assert!(!engine.set_instanced(owner, true));
        assert_eq!(engine.owner_count(), 0);
    }

    #[test]
    fn test_transient_removed_at_convergence() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let boredom = engine.add_commodity(owner, BOREDOM).unwrap();
        assert!(engine.with_status(owner, |_, buffs, _, _| buffs.has("buff_bored")).unwrap());

        // 60 at 0.5 per tick rests at 0 on tick 120
        engine.advance(119);
        assert!(engine.has_commodity(owner, boredom));
        engine.advance(1);
        assert!(!engine.has_commodity(owner, boredom));
        assert!(engine.with_status(owner, |_, buffs, _, _| buffs.is_empty()).unwrap());
        assert_eq!(engine.pending_alarms(), 0);
    }

    #[test]
    fn test_remove_and_despawn_cancel_alarms() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        let energy = engine.add_commodity(owner, ENERGY).unwrap();
        assert!(engine.pending_alarms() > 0);

        assert!(engine.remove_commodity(owner, hunger));
        assert!(!engine.has_commodity(owner, hunger));
        assert!(!engine.remove_commodity(owner, hunger));
        assert!(engine.has_commodity(owner, energy));

        assert!(engine.despawn_owner(owner));
        assert_eq!(engine.pending_alarms(), 0);
        assert_eq!(engine.advance(10_000), 0);
        assert!(!engine.despawn_owner(owner));
    }

    #[test]
    fn test_lock_freezes_value() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        engine.advance(5);
        assert!(engine.set_locked(owner, hunger, true));
        engine.advance(50);
        assert!((engine.value(owner, hunger).unwrap() - 45.0).abs() < 1e-6);
        assert!(engine.set_locked(owner, hunger, false));
        engine.advance(10);
        assert!((engine.value(owner, hunger).unwrap() - 35.0).abs() < 1e-6);
        assert_eq!(engine.state_name(owner, hunger).as_deref(), Some("hungry"));
    }

    #[test]
    fn test_modifier_changes_rate() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        let handle = engine.add_modifier(owner, hunger, RateModifier::Multiply(2.0)).unwrap();
        engine.advance(5);
        assert!((engine.value(owner, hunger).unwrap() - 40.0).abs() < 1e-6);
        assert!(engine.remove_modifier(owner, hunger, handle));
        assert!(!engine.remove_modifier(owner, hunger, handle));
        engine.advance(5);
        assert!((engine.value(owner, hunger).unwrap() - 35.0).abs() < 1e-6);
    }

    #[test]
    fn test_progress_messages_are_tagged() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        engine.add_commodity(owner, ENERGY).unwrap();
        let sent = engine.drain_progress();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].entity, owner);
        assert_eq!(sent[0].update.commodity_id, ENERGY);
        assert_eq!(sent[0].bytes.len(), ProgressUpdate::ENCODED_LEN);
        assert!(engine.drain_progress().is_empty());
    }

    #[test]
    fn test_listener_fires_through_alarm() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        let handle = engine
            .add_listener(owner, hunger, Threshold::at_or_below(30.0), false)
            .unwrap();
        engine.advance(19);
        assert!(engine.listener_events(owner, hunger).is_empty());
        engine.advance(1);
        assert_eq!(
            engine.listener_events(owner, hunger),
            vec![ListenerEvent::Crossed(handle)]
        );
    }

    fn state_buff_rate(engine: &CommodityEngine, owner: Entity, id: CommodityId) -> Option<f64> {
        engine
            .with_status(owner, |tracker, buffs, _, _| {
                let handle = tracker.get(id)?.state_buff()?;
                buffs.get(handle).map(|buff| buff.rate)
            })
            .flatten()
    }

    #[test]
    fn test_unlock_resyncs_state_buff_rate() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        engine.advance(15);
        assert_eq!(engine.state_name(owner, hunger).as_deref(), Some("hungry"));
        assert_eq!(state_buff_rate(&engine, owner, hunger), Some(-1.0));

        assert!(engine.set_locked(owner, hunger, true));
        assert_eq!(state_buff_rate(&engine, owner, hunger), Some(0.0));

        assert!(engine.set_locked(owner, hunger, false));
        assert_eq!(state_buff_rate(&engine, owner, hunger), Some(-1.0));
    }

    #[test]
    fn test_repeated_set_value_keeps_alarm_heap_bounded() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let energy = engine.add_commodity(owner, ENERGY).unwrap();

        for i in 0..10_000 {
            let value = if i % 2 == 0 { 70.0 } else { 30.0 };
            assert!(engine.set_value(owner, energy, value));
        }
        let live = engine.pending_alarms();
        assert!(live > 0);
        let backlog = engine.alarms.backlog();
        assert!(backlog < 256, "{} heap entries for {} live", backlog, live);
    }
}

//! The commodity: a decaying value plus everything layered on top of it.
//!
//! Every mutation runs the same pipeline: bank decay, settle the state
//! machine, re-arm callbacks against the new trajectory, then drain the due
//! queue until nothing is left. Handlers never call back into the commodity
//! directly; they enqueue work, so re-entrant effects stay ordered and the
//! stack depth stays bounded. At most one progress update is published per
//! public operation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use crate::callbacks::{CallbackHandle, CallbackRegistry, Firing};
use crate::config::ValidatedConfig;
use crate::constants::MAX_DRAIN_STEPS;
use crate::context::{BuffHandle, BuffSystem, CommodityId, EngineContext, Scheduler};
use crate::distress::{DistressTracker, FailureTracker};
use crate::lifecycle::Lifecycle;
use crate::message::ProgressUpdate;
use crate::policy::CommodityPolicy;
use crate::states::{StateEnv, StateMachine, Step};
use crate::threshold::Threshold;
use crate::value::{ContinuousValue, ModifierHandle, RateModifier, Tick};

/// Handler keys stored in the callback registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    StateUp,
    StateDown,
    StateBuff,
    SyncStateBuff,
    DistressEnter,
    DistressExit,
    Failure,
    Converged,
    Listener,
    ListenerRearmed,
}

/// Work waiting in the drain queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    Fire(CallbackHandle),
    SyncBuff,
    ListenerRearmed(CallbackHandle),
}

/// Notification for an external threshold listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    /// The threshold was reached; the listener is gone.
    Crossed(CallbackHandle),
    /// The trajectory changed while the listener was pending.
    Rearmed(CallbackHandle),
}

/// Persisted form of a commodity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommoditySnapshot {
    pub id: CommodityId,
    pub config_id: u64,
    pub value: f64,
    pub saved_at: Tick,
    pub state_index: u32,
    pub in_distress: bool,
    pub failure_fired: bool,
}

#[derive(Debug, Default)]
struct Progress {
    dirty: bool,
    last_rate: Option<f32>,
}

#[derive(Debug)]
pub struct Commodity {
    id: CommodityId,
    config: Arc<ValidatedConfig>,
    policy: Box<dyn CommodityPolicy>,
    value: ContinuousValue,
    callbacks: CallbackRegistry<Trigger>,
    states: StateMachine,
    distress: DistressTracker,
    failure: FailureTracker,
    lifecycle: Lifecycle,
    listeners: BTreeSet<CallbackHandle>,
    listener_events: Vec<ListenerEvent>,
    due: VecDeque<Due>,
    progress: Progress,
}

impl Commodity {
    /// A new commodity at its tuned initial value.
    pub fn create(
        id: CommodityId,
        config: Arc<ValidatedConfig>,
        ctx: &mut EngineContext<'_>,
    ) -> Self {
        let initial = config.initial_value;
        Self::create_with_value(id, config, initial, ctx)
    }

    pub fn create_with_value(
        id: CommodityId,
        config: Arc<ValidatedConfig>,
        value: f64,
        ctx: &mut EngineContext<'_>,
    ) -> Self {
        let policy = config.kind.policy();
        Self::with_policy(id, config, policy, value, ctx)
    }

    /// Like [`create_with_value`](Self::create_with_value) with a host-supplied policy.
    pub fn with_policy(
        id: CommodityId,
        config: Arc<ValidatedConfig>,
        policy: Box<dyn CommodityPolicy>,
        value: f64,
        ctx: &mut EngineContext<'_>,
    ) -> Self {
        let failure = FailureTracker::default();
        let mut commodity = Self::build(id, config, policy, value, ctx.now(), failure);
        commodity.init(ctx, false, false);
        commodity
    }

    /// Rebuild from saved data. The auto-satisfy catch-up runs before the
    /// initial state pass, so the caught-up value picks the starting state.
    pub fn restore(
        id: CommodityId,
        config: Arc<ValidatedConfig>,
        snapshot: &CommoditySnapshot,
        absent_for: Tick,
        rng: &mut impl Rng,
        ctx: &mut EngineContext<'_>,
    ) -> Self {
        if snapshot.config_id != config.id {
            log::warn!(
                "{}: snapshot tuned as {} restored with tuning {}",
                id,
                snapshot.config_id,
                config.id
            );
        }
        let now = ctx.now();
        let mut value = snapshot.value;
        if let Some(curve) = &config.auto_satisfy {
            if let Some(caught_up) = curve.catch_up_value(value, now, absent_for, rng) {
                log::debug!(
                    "{}: caught up {} -> {} after {} ticks",
                    id, value, caught_up, absent_for
                );
                value = caught_up;
            }
        }
        let policy = config.kind.policy();
        let failure = FailureTracker::restored(snapshot.failure_fired);
        let mut commodity = Self::build(id, config, policy, value, now, failure);
        commodity.init(ctx, true, snapshot.in_distress);
        commodity
    }

    fn build(
        id: CommodityId,
        config: Arc<ValidatedConfig>,
        policy: Box<dyn CommodityPolicy>,
        initial: f64,
        now: Tick,
        failure: FailureTracker,
    ) -> Self {
        let mut value = ContinuousValue::new(config.min_value, config.max_value, initial, now)
            .with_decay(
                config.decay_rate,
                config.convergence_value,
                config.decay_direction,
            );
        if !config.decay_enabled {
            value.set_decay_enabled(false, now);
        }
        Self {
            id,
            config,
            policy,
            value,
            callbacks: CallbackRegistry::new(),
            states: StateMachine::default(),
            distress: DistressTracker::default(),
            failure,
            lifecycle: Lifecycle::default(),
            listeners: BTreeSet::new(),
            listener_events: Vec::new(),
            due: VecDeque::new(),
            progress: Progress::default(),
        }
    }

    fn init(&mut self, ctx: &mut EngineContext<'_>, loaded: bool, resume_distress: bool) {
        let now = ctx.now();
        self.value.set_locked(ctx.owner.is_locked(self.id), now);

        let (states, mut env) = self.split(ctx);
        states.initialize(&mut env, loaded);

        if let Some(distress) = &self.config.distress {
            if resume_distress && distress.threshold.compare(self.value.current()) {
                let rate = self.value.effective_rate();
                self.distress.resume(distress, self.id, rate, ctx, &mut self.callbacks);
            } else {
                self.distress.arm(distress, &mut self.callbacks);
            }
        }
        if let Some(failure) = &self.config.failure {
            self.failure.arm(failure, &mut self.callbacks);
        }
        self.lifecycle.arm(
            self.policy.removes_at_convergence(),
            self.value.convergence_value(),
            &mut self.callbacks,
        );

        self.progress.dirty = true;
        self.drain(ctx);
        self.publish(ctx);
    }

    // ── Reads ──

    pub fn id(&self) -> CommodityId {
        self.id
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn policy(&self) -> &dyn CommodityPolicy {
        &*self.policy
    }

    /// Bring the value up to date, firing anything the scheduler has not delivered yet.
    pub fn value(&mut self, ctx: &mut EngineContext<'_>) -> f64 {
        if self.lifecycle.is_destroyed() {
            return self.value.current();
        }
        let now = ctx.now();
        self.value.get_value(now);
        for handle in self.callbacks.overdue(now) {
            self.enqueue(Due::Fire(handle));
        }
        self.drain(ctx);
        self.publish(ctx);
        self.value.current()
    }

    /// Value as of the last touch, without decay or side effects.
    pub fn current_value(&self) -> f64 {
        self.value.current()
    }

    pub fn value_at(&self, now: Tick) -> f64 {
        self.value.value_at(now)
    }

    pub fn effective_rate(&self) -> f64 {
        self.value.effective_rate()
    }

    pub fn is_locked(&self) -> bool {
        self.value.is_locked()
    }

    pub fn state_index(&self) -> usize {
        self.states.index()
    }

    pub fn state_name(&self) -> &str {
        &self.config.states[self.states.index()].name
    }

    pub fn state_buff(&self) -> Option<BuffHandle> {
        self.states.buff()
    }

    pub fn in_distress(&self) -> bool {
        self.distress.is_active()
    }

    pub fn failure_fired(&self) -> bool {
        self.failure.has_fired()
    }

    pub fn time_until(&self, threshold: &Threshold, now: Tick) -> Option<Tick> {
        self.callbacks.time_until(threshold, &self.value, now)
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.is_destroyed()
    }

    pub fn removal_requested(&self) -> bool {
        self.lifecycle.removal_requested()
    }

    pub fn snapshot(&self, now: Tick) -> CommoditySnapshot {
        CommoditySnapshot {
            id: self.id,
            config_id: self.config.id,
            value: self.value.value_at(now),
            saved_at: now,
            state_index: self.states.index() as u32,
            in_distress: self.distress.is_active(),
            failure_fired: self.failure.has_fired(),
        }
    }

    // ── Mutations ──

    pub fn set_value(&mut self, value: f64, ctx: &mut EngineContext<'_>) {
        if self.guard("set_value") {
            return;
        }
        self.value.set_value(value, ctx.now());
        self.progress.dirty = true;
        self.after_mutation(ctx);
    }

    pub fn add_value(&mut self, delta: f64, ctx: &mut EngineContext<'_>) {
        if self.guard("add_value") {
            return;
        }
        self.value.add_value(delta, ctx.now());
        self.progress.dirty = true;
        self.after_mutation(ctx);
    }

    pub fn add_decay_modifier(
        &mut self,
        modifier: RateModifier,
        ctx: &mut EngineContext<'_>,
    ) -> Option<ModifierHandle> {
        if self.guard("add_decay_modifier") {
            return None;
        }
        let handle = self.value.add_modifier(modifier, ctx.now());
        self.after_mutation(ctx);
        Some(handle)
    }

    pub fn remove_decay_modifier(
        &mut self,
        handle: ModifierHandle,
        ctx: &mut EngineContext<'_>,
    ) -> bool {
        if self.guard("remove_decay_modifier") {
            return false;
        }
        if !self.value.remove_modifier(handle, ctx.now()) {
            return false;
        }
        self.after_mutation(ctx);
        true
    }

    pub fn set_decay_enabled(&mut self, enabled: bool, ctx: &mut EngineContext<'_>) {
        if self.guard("set_decay_enabled") || self.value.decay_enabled() == enabled {
            return;
        }
        self.value.set_decay_enabled(enabled, ctx.now());
        self.after_mutation(ctx);
    }

    /// Re-read the owner's lock for this commodity.
    pub fn refresh_lock(&mut self, ctx: &mut EngineContext<'_>) {
        if self.guard("refresh_lock") {
            return;
        }
        let locked = ctx.owner.is_locked(self.id);
        if locked == self.value.is_locked() {
            return;
        }
        self.value.set_locked(locked, ctx.now());
        self.after_mutation(ctx);
    }

    /// Watch a threshold from outside. Listeners are one-shot, and a listener
    /// that already holds fires before this returns.
    pub fn add_listener(
        &mut self,
        threshold: Threshold,
        notify_rearm: bool,
        ctx: &mut EngineContext<'_>,
    ) -> Option<CallbackHandle> {
        if self.guard("add_listener") {
            return None;
        }
        let on_rearm = notify_rearm.then_some(Trigger::ListenerRearmed);
        let handle = self.callbacks.add(threshold, Trigger::Listener, on_rearm);
        self.listeners.insert(handle);
        self.drain(ctx);
        self.publish(ctx);
        Some(handle)
    }

    /// Only listener handles are accepted; internal callbacks are left alone.
    pub fn remove_listener(
        &mut self,
        handle: CallbackHandle,
        scheduler: &mut dyn Scheduler,
    ) -> bool {
        if !self.listeners.remove(&handle) {
            return false;
        }
        self.callbacks.remove(handle, scheduler)
    }

    pub fn drain_listener_events(&mut self) -> Vec<ListenerEvent> {
        std::mem::take(&mut self.listener_events)
    }

    /// Entry point for a scheduler alarm.
    pub fn on_alarm(&mut self, handle: CallbackHandle, ctx: &mut EngineContext<'_>) {
        if self.lifecycle.is_destroyed() {
            log::debug!("{}: alarm after destroy ignored", self.id);
            return;
        }
        self.callbacks.alarm_fired(handle);
        self.enqueue(Due::Fire(handle));
        self.drain(ctx);
        self.publish(ctx);
    }

    /// Cancel every alarm and drop every buff. Later calls are no-ops.
    pub fn destroy(&mut self, scheduler: &mut dyn Scheduler, buffs: &mut dyn BuffSystem) {
        if self.lifecycle.is_destroyed() {
            return;
        }
        self.callbacks.clear(scheduler);
        self.states.release(buffs);
        self.distress.release(buffs);
        self.listeners.clear();
        self.due.clear();
        self.lifecycle.mark_destroyed();
        log::debug!("{}: destroyed", self.id);
    }

    // ── Pipeline ──

    fn guard(&self, op: &str) -> bool {
        if self.lifecycle.is_destroyed() {
            log::debug!("{}: {} after destroy ignored", self.id, op);
            return true;
        }
        false
    }

    fn split<'a, 'b>(
        &'a mut self,
        ctx: &'a mut EngineContext<'b>,
    ) -> (&'a mut StateMachine, StateEnv<'a, 'b>) {
        let env = StateEnv {
            id: self.id,
            states: &self.config.states,
            policy: &*self.policy,
            value: self.value.current(),
            rate: self.value.effective_rate(),
            callbacks: &mut self.callbacks,
            ctx,
        };
        (&mut self.states, env)
    }

    fn after_mutation(&mut self, ctx: &mut EngineContext<'_>) {
        self.settle(ctx, None);
        let now = ctx.now();
        let rearmed = self.callbacks.rearm_all(&self.value, ctx.scheduler, self.id, now);
        for handle in rearmed.due {
            self.enqueue(Due::Fire(handle));
        }
        for (handle, key) in rearmed.rearmed {
            self.enqueue_rearm(handle, key);
        }
        self.drain(ctx);
        self.publish(ctx);
    }

    fn settle(&mut self, ctx: &mut EngineContext<'_>, hint: Option<Step>) {
        let (states, mut env) = self.split(ctx);
        if states.settle(&mut env, hint) {
            self.progress.dirty = true;
        }
    }

    fn enqueue(&mut self, due: Due) {
        if !self.due.contains(&due) {
            self.due.push_back(due);
        }
    }

    fn enqueue_rearm(&mut self, handle: CallbackHandle, key: Trigger) {
        match key {
            Trigger::SyncStateBuff => self.enqueue(Due::SyncBuff),
            Trigger::ListenerRearmed => self.enqueue(Due::ListenerRearmed(handle)),
            other => log::warn!("{}: {:?} is not a rearm handler", self.id, other),
        }
    }

    fn drain(&mut self, ctx: &mut EngineContext<'_>) {
        let mut steps = 0;
        loop {
            if self.lifecycle.is_destroyed() {
                self.due.clear();
                return;
            }
            let now = ctx.now();
            for handle in self.callbacks.arm_new(&self.value, ctx.scheduler, self.id, now) {
                self.enqueue(Due::Fire(handle));
            }
            let Some(next) = self.due.pop_front() else {
                return;
            };
            steps += 1;
            if steps > MAX_DRAIN_STEPS {
                log::warn!(
                    "{}: callback drain hit {} steps, dropping {} queued",
                    self.id,
                    MAX_DRAIN_STEPS,
                    self.due.len() + 1
                );
                self.due.clear();
                return;
            }
            match next {
                Due::Fire(handle) => self.fire(handle, ctx),
                Due::SyncBuff => self.states.sync_buff(ctx.buffs, self.value.effective_rate()),
                Due::ListenerRearmed(handle) => {
                    self.listener_events.push(ListenerEvent::Rearmed(handle))
                }
            }
        }
    }

    fn fire(&mut self, handle: CallbackHandle, ctx: &mut EngineContext<'_>) {
        let now = ctx.now();
        let value = self.value.get_value(now);
        match self.callbacks.try_fire(handle, value, ctx.scheduler) {
            Firing::Crossed(key) => self.dispatch(handle, key, ctx),
            Firing::NotReached(on_rearm) => {
                if self.callbacks.reschedule(handle, &self.value, ctx.scheduler, self.id, now) {
                    self.enqueue(Due::Fire(handle));
                }
                if let Some(key) = on_rearm {
                    self.enqueue_rearm(handle, key);
                }
            }
            Firing::Missing => {}
        }
    }

    fn dispatch(&mut self, handle: CallbackHandle, key: Trigger, ctx: &mut EngineContext<'_>) {
        match key {
            Trigger::StateUp | Trigger::StateDown => {
                self.states.bound_crossed(handle);
                let step = if key == Trigger::StateUp { Step::Up } else { Step::Down };
                self.settle(ctx, Some(step));
            }
            Trigger::StateBuff => {
                let (states, mut env) = self.split(ctx);
                states.buff_threshold_reached(&mut env, handle);
            }
            Trigger::DistressEnter => {
                if let Some(config) = &self.config.distress {
                    let rate = self.value.effective_rate();
                    self.distress.enter(
                        config,
                        self.id,
                        &*self.policy,
                        rate,
                        ctx,
                        &mut self.callbacks,
                    );
                }
            }
            Trigger::DistressExit => {
                if let Some(config) = &self.config.distress {
                    self.distress.exit(config, self.id, ctx.buffs, &mut self.callbacks);
                }
            }
            Trigger::Failure => {
                if let Some(config) = &self.config.failure {
                    self.failure.fire(config, self.id, &*self.policy, ctx);
                }
            }
            Trigger::Converged => self.lifecycle.converged(self.id, ctx.owner),
            Trigger::Listener => {
                self.listeners.remove(&handle);
                self.listener_events.push(ListenerEvent::Crossed(handle));
            }
            Trigger::SyncStateBuff | Trigger::ListenerRearmed => self.enqueue_rearm(handle, key),
        }
    }

    fn publish(&mut self, ctx: &mut EngineContext<'_>) {
        if self.lifecycle.is_destroyed() {
            return;
        }
        let rate = self.value.effective_rate() as f32;
        let rate_changed = self.progress.last_rate != Some(rate);
        if !self.progress.dirty && !rate_changed {
            return;
        }
        self.progress.dirty = false;
        self.progress.last_rate = Some(rate);
        ctx.progress.send(ProgressUpdate {
            commodity_id: self.config.id,
            current_value: self.value.current() as f32,
            rate_of_change: rate,
            commodity_state_index: self.states.index() as u32,
            is_rate_change: rate_changed,
        });
    }
}

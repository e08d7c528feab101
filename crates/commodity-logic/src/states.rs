//! Commodity state machine: named bands over the value range.
//!
//! Transitions only ever move one index at a time. A jump across several
//! boundaries walks through every intermediate state so each one's buff swap
//! and entry loot happen in order.

use crate::callbacks::{CallbackHandle, CallbackRegistry};
use crate::commodity::Trigger;
use crate::config::StateConfig;
use crate::context::{BuffHandle, BuffSystem, CommodityId, EngineContext};
use crate::policy::CommodityPolicy;
use crate::threshold::Threshold;

/// Index of the band containing `value`: the highest state whose lower bound
/// it is at or above. Values below every bound map to state 0.
pub fn find_state_index(states: &[StateConfig], value: f64) -> usize {
    states
        .iter()
        .rposition(|s| Threshold::at_or_above(s.lower_bound).compare(value))
        .unwrap_or(0)
}

/// Which bounding callback triggered a settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Up,
    Down,
}

/// Borrowed view of everything a transition touches.
pub(crate) struct StateEnv<'a, 'b> {
    pub id: CommodityId,
    pub states: &'a [StateConfig],
    pub policy: &'a dyn CommodityPolicy,
    pub value: f64,
    pub rate: f64,
    pub callbacks: &'a mut CallbackRegistry<Trigger>,
    pub ctx: &'a mut EngineContext<'b>,
}

#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    index: usize,
    buff: Option<BuffHandle>,
    pending_buff: Option<CallbackHandle>,
    up: Option<CallbackHandle>,
    down: Option<CallbackHandle>,
}

impl StateMachine {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn buff(&self) -> Option<BuffHandle> {
        self.buff
    }

    /// Initial pass. Entry loot only runs when restoring saved data.
    pub(crate) fn initialize(&mut self, env: &mut StateEnv<'_, '_>, loaded: bool) {
        self.index = find_state_index(env.states, env.value);
        self.enter(env, loaded);
        self.rearm_bounds(env);
    }

    /// Walk to the band containing the current value. Returns `true` if the
    /// index changed.
    pub(crate) fn settle(&mut self, env: &mut StateEnv<'_, '_>, hint: Option<Step>) -> bool {
        let target = find_state_index(env.states, env.value);
        if target == self.index {
            if let Some(step) = hint {
                log::warn!(
                    "{}: {:?} crossing at {} but state did not change (still '{}')",
                    env.id,
                    step,
                    env.value,
                    env.states[self.index].name
                );
                self.rearm_bounds(env);
            }
            return false;
        }

        while self.index != target {
            self.exit(env);
            if target > self.index {
                self.index += 1;
            } else {
                self.index -= 1;
            }
            self.enter(env, true);
        }
        self.rearm_bounds(env);
        true
    }

    /// A bounding callback fired; it is gone from the registry.
    pub(crate) fn bound_crossed(&mut self, handle: CallbackHandle) {
        if self.up == Some(handle) {
            self.up = None;
        }
        if self.down == Some(handle) {
            self.down = None;
        }
    }

    /// The deferred buff threshold was reached.
    pub(crate) fn buff_threshold_reached(
        &mut self,
        env: &mut StateEnv<'_, '_>,
        handle: CallbackHandle,
    ) {
        if self.pending_buff != Some(handle) {
            return;
        }
        self.pending_buff = None;
        self.apply_buff(env);
    }

    pub(crate) fn sync_buff(&self, buffs: &mut dyn BuffSystem, rate: f64) {
        if let Some(buff) = self.buff {
            buffs.notify_rate_changed(buff, rate);
        }
    }

    /// Drop the state buff. Callbacks are cleared by the owner.
    pub(crate) fn release(&mut self, buffs: &mut dyn BuffSystem) {
        if let Some(buff) = self.buff.take() {
            buffs.remove(buff);
        }
        self.pending_buff = None;
        self.up = None;
        self.down = None;
    }

    fn enter(&mut self, env: &mut StateEnv<'_, '_>, run_loot: bool) {
        let state = &env.states[self.index];
        log::debug!("{}: entering state '{}'", env.id, state.name);
        if state.buff.is_some() {
            match state.buff_add_threshold {
                Some(threshold) if !threshold.compare(env.value) => {
                    let pending = env.callbacks.add(threshold, Trigger::StateBuff, None);
                    self.pending_buff = Some(pending);
                }
                _ => self.apply_buff(env),
            }
        }
        if run_loot {
            for loot in &state.loot_on_enter {
                env.ctx.owner.apply_loot(env.id, loot);
            }
        }
    }

    fn exit(&mut self, env: &mut StateEnv<'_, '_>) {
        if let Some(buff) = self.buff.take() {
            if !env.ctx.buffs.remove(buff) {
                log::warn!("{}: state buff {:?} was not active", env.id, buff);
            }
        }
        if let Some(pending) = self.pending_buff.take() {
            env.callbacks.remove(pending, env.ctx.scheduler);
        }
    }

    fn apply_buff(&mut self, env: &mut StateEnv<'_, '_>) {
        let Some(name) = env.states[self.index].buff.as_deref() else {
            return;
        };
        if let Some(old) = self.buff.take() {
            env.ctx.buffs.remove(old);
        }
        self.buff = env.ctx.buffs.add(name, env.policy.buff_reason(), env.rate, env.id);
        if self.buff.is_none() {
            log::warn!("{}: buff system refused '{}'", env.id, name);
        }
    }

    /// Replace the callbacks that watch the current band's edges.
    fn rearm_bounds(&mut self, env: &mut StateEnv<'_, '_>) {
        for handle in [self.up.take(), self.down.take()].into_iter().flatten() {
            env.callbacks.remove(handle, env.ctx.scheduler);
        }
        let sync = Some(Trigger::SyncStateBuff);
        if let Some(next) = env.states.get(self.index + 1) {
            let threshold = Threshold::at_or_above(next.lower_bound);
            self.up = Some(env.callbacks.add(threshold, Trigger::StateUp, sync));
        }
        if self.index > 0 {
            let threshold = Threshold::below(env.states[self.index].lower_bound);
            self.down = Some(env.callbacks.add(threshold, Trigger::StateDown, sync));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands() -> Vec<StateConfig> {
        vec![
            StateConfig::new("starving", -100.0),
            StateConfig::new("hungry", -20.0),
            StateConfig::new("fine", 40.0),
        ]
    }

    #[test]
    fn test_find_state_index() {
        let states = bands();
        assert_eq!(find_state_index(&states, -100.0), 0);
        assert_eq!(find_state_index(&states, -50.0), 0);
        assert_eq!(find_state_index(&states, -20.0), 1);
        assert_eq!(find_state_index(&states, 39.9), 1);
        assert_eq!(find_state_index(&states, 40.0), 2);
        assert_eq!(find_state_index(&states, 100.0), 2);
    }

    #[test]
    fn test_boundary_is_tolerant() {
        let states = bands();
        assert_eq!(find_state_index(&states, 40.0 - 1e-9), 2);
        assert_eq!(find_state_index(&states, 40.0 - 1e-3), 1);
    }

    #[test]
    fn test_below_all_bounds_is_bottom() {
        let states = vec![StateConfig::new("low", 10.0), StateConfig::new("high", 50.0)];
        assert_eq!(find_state_index(&states, 0.0), 0);
    }
}

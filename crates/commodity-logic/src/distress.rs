//! Distress and failure escalation.
//!
//! Distress is reversible: it alternates between an enter callback on the
//! tuned threshold and an exit callback on its inverse. Failure is a harder,
//! one-way threshold that fires at most once per commodity lifetime.

use crate::callbacks::{CallbackHandle, CallbackRegistry};
use crate::commodity::Trigger;
use crate::config::{DistressConfig, FailureConfig};
use crate::context::{BuffHandle, BuffSystem, CommodityId, EngineContext};
use crate::policy::CommodityPolicy;

const DISTRESS_BUFF_REASON: &str = "distress";

#[derive(Debug, Clone, Default)]
pub struct DistressTracker {
    active: bool,
    buff: Option<BuffHandle>,
    callback: Option<CallbackHandle>,
}

impl DistressTracker {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn buff(&self) -> Option<BuffHandle> {
        self.buff
    }

    /// Register whichever edge the automaton is waiting for.
    pub(crate) fn arm(
        &mut self,
        config: &DistressConfig,
        callbacks: &mut CallbackRegistry<Trigger>,
    ) {
        if self.callback.is_some() {
            return;
        }
        self.callback = if self.active {
            config
                .threshold
                .inverse()
                .map(|exit| callbacks.add(exit, Trigger::DistressExit, None))
        } else {
            Some(callbacks.add(config.threshold, Trigger::DistressEnter, None))
        };
    }

    /// Restore an in-distress snapshot: reapply the buff without pushing the
    /// corrective interaction again.
    pub(crate) fn resume(
        &mut self,
        config: &DistressConfig,
        id: CommodityId,
        rate: f64,
        ctx: &mut EngineContext<'_>,
        callbacks: &mut CallbackRegistry<Trigger>,
    ) {
        self.active = true;
        self.add_buff(config, id, rate, ctx.buffs);
        self.arm(config, callbacks);
    }

    pub(crate) fn enter(
        &mut self,
        config: &DistressConfig,
        id: CommodityId,
        policy: &dyn CommodityPolicy,
        rate: f64,
        ctx: &mut EngineContext<'_>,
        callbacks: &mut CallbackRegistry<Trigger>,
    ) {
        self.callback = None;
        if self.active {
            log::warn!("{}: distress entered twice", id);
        }
        self.active = true;
        log::info!("{}: entering distress ({})", id, config.threshold);
        self.add_buff(config, id, rate, ctx.buffs);

        if let Some(affordance) = config.interaction.as_deref() {
            if !ctx.owner.has_sim_instance() {
                log::debug!("{}: no sim instance, skipping '{}'", id, affordance);
            } else if ctx.interactions.is_running_or_queued(affordance) {
                log::debug!("{}: '{}' already running or queued", id, affordance);
            } else if let Err(e) =
                ctx.interactions.push(affordance, None, policy.distress_priority())
            {
                log::warn!("{}: {}", id, e);
            }
        }
        self.arm(config, callbacks);
    }

    pub(crate) fn exit(
        &mut self,
        config: &DistressConfig,
        id: CommodityId,
        buffs: &mut dyn BuffSystem,
        callbacks: &mut CallbackRegistry<Trigger>,
    ) {
        self.callback = None;
        if self.active {
            self.active = false;
            log::info!("{}: leaving distress", id);
            self.remove_buff(buffs);
        }
        self.arm(config, callbacks);
    }

    /// Tear down without re-arming. Safe to call when not in distress.
    pub(crate) fn release(&mut self, buffs: &mut dyn BuffSystem) {
        self.active = false;
        self.callback = None;
        self.remove_buff(buffs);
    }

    fn add_buff(
        &mut self,
        config: &DistressConfig,
        id: CommodityId,
        rate: f64,
        buffs: &mut dyn BuffSystem,
    ) {
        let Some(name) = config.buff.as_deref() else {
            return;
        };
        if self.buff.is_some() {
            log::error!("{}: distress buff '{}' already applied", id, name);
            return;
        }
        self.buff = buffs.add(name, DISTRESS_BUFF_REASON, rate, id);
    }

    fn remove_buff(&mut self, buffs: &mut dyn BuffSystem) {
        if let Some(buff) = self.buff.take() {
            buffs.remove(buff);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    fired: bool,
    callback: Option<CallbackHandle>,
}

impl FailureTracker {
    /// Carry a persisted "already failed" flag into a new instance.
    pub(crate) fn restored(fired: bool) -> Self {
        Self { fired, callback: None }
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub(crate) fn arm(
        &mut self,
        config: &FailureConfig,
        callbacks: &mut CallbackRegistry<Trigger>,
    ) {
        if self.fired || self.callback.is_some() {
            return;
        }
        self.callback = Some(callbacks.add(config.threshold, Trigger::Failure, None));
    }

    pub(crate) fn fire(
        &mut self,
        config: &FailureConfig,
        id: CommodityId,
        policy: &dyn CommodityPolicy,
        ctx: &mut EngineContext<'_>,
    ) {
        self.callback = None;
        if self.fired {
            return;
        }
        self.fired = true;
        log::info!("{}: failure threshold {} reached", id, config.threshold);

        if !ctx.owner.has_sim_instance() {
            log::debug!("{}: no sim instance, skipping failure interactions", id);
            return;
        }
        let Some(affordance) = config.interactions.iter().find(|a| ctx.interactions.test(a)) else {
            log::warn!("{}: no failure interaction passed its test", id);
            return;
        };
        if let Err(e) = ctx.interactions.push(affordance, None, policy.failure_priority()) {
            log::warn!("{}: {}", id, e);
        }
    }
}

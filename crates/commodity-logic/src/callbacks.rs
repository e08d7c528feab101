//! Threshold callback registry.
//!
//! A callback pairs a [`Threshold`] with handler *keys*: `on_cross` when the
//! threshold is reached, `on_rearm` when an armed callback is rescheduled
//! without having fired. The registry never runs handlers itself; it hands
//! keys back to the owner, which dispatches them from a queue so that
//! re-entrant mutations stay ordered.
//!
//! Callbacks are one-shot: a crossed callback is removed from the registry,
//! and whoever needs to detect the opposite crossing registers the inverse.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::{AlarmHandle, AlarmTarget, CommodityId, Scheduler};
use crate::threshold::Threshold;
use crate::value::{ContinuousValue, Tick};

/// Identifies a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallbackHandle(u32);

/// A registered threshold callback.
#[derive(Debug, Clone)]
pub struct Callback<K> {
    pub threshold: Threshold,
    pub on_cross: K,
    pub on_rearm: Option<K>,
    alarm: Option<AlarmHandle>,
    due_at: Option<Tick>,
    armed: bool,
}

impl<K> Callback<K> {
    /// Tick the callback is expected to fire at, if its trajectory reaches it.
    pub fn due_at(&self) -> Option<Tick> {
        self.due_at
    }

    pub fn is_scheduled(&self) -> bool {
        self.alarm.is_some()
    }
}

/// Outcome of re-validating a callback when it comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firing<K> {
    /// Threshold holds; the callback was removed and its cross key returned.
    Crossed(K),
    /// Threshold no longer holds; treat as a rearm.
    NotReached(Option<K>),
    /// Handle was removed before it came due.
    Missing,
}

/// Result of rescheduling every callback after a mutation.
#[derive(Debug, Clone, Default)]
pub struct Rearmed<K> {
    /// Callbacks already satisfied; fire them next.
    pub due: Vec<CallbackHandle>,
    /// Armed callbacks that were rescheduled, with their rearm keys. This
    /// includes callbacks the old trajectory never reached.
    pub rearmed: Vec<(CallbackHandle, K)>,
}

/// Callbacks registered against a single statistic.
#[derive(Debug, Clone)]
pub struct CallbackRegistry<K> {
    entries: BTreeMap<CallbackHandle, Callback<K>>,
    next_handle: u32,
}

impl<K> Default for CallbackRegistry<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_handle: 0,
        }
    }
}

impl<K: Copy> CallbackRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It is scheduled on the next [`arm_new`](Self::arm_new).
    pub fn add(
        &mut self,
        threshold: Threshold,
        on_cross: K,
        on_rearm: Option<K>,
    ) -> CallbackHandle {
        let handle = CallbackHandle(self.next_handle);
        self.next_handle += 1;
        self.entries.insert(
            handle,
            Callback {
                threshold,
                on_cross,
                on_rearm,
                alarm: None,
                due_at: None,
                armed: false,
            },
        );
        handle
    }

    pub fn get(&self, handle: CallbackHandle) -> Option<&Callback<K>> {
        self.entries.get(&handle)
    }

    pub fn contains(&self, handle: CallbackHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = CallbackHandle> + '_ {
        self.entries.keys().copied()
    }

    /// Remove a callback and cancel its alarm. Unknown handles return `false`.
    pub fn remove(&mut self, handle: CallbackHandle, scheduler: &mut dyn Scheduler) -> bool {
        match self.entries.remove(&handle) {
            Some(entry) => {
                if let Some(alarm) = entry.alarm {
                    scheduler.cancel(alarm);
                }
                true
            }
            None => false,
        }
    }

    pub fn time_until(
        &self,
        threshold: &Threshold,
        value: &ContinuousValue,
        now: Tick,
    ) -> Option<Tick> {
        value.time_until(threshold, now)
    }

    /// Schedule `entry`; returns `true` when it is already satisfied.
    fn schedule(
        entry: &mut Callback<K>,
        handle: CallbackHandle,
        value: &ContinuousValue,
        scheduler: &mut dyn Scheduler,
        commodity: CommodityId,
        now: Tick,
    ) -> bool {
        entry.armed = true;
        match value.time_until(&entry.threshold, now) {
            Some(0) => {
                entry.due_at = Some(now);
                true
            }
            Some(ticks) => {
                let at = now.saturating_add(ticks);
                let target = AlarmTarget {
                    commodity,
                    callback: handle,
                };
                entry.alarm = Some(scheduler.schedule_at(at, target));
                entry.due_at = Some(at);
                false
            }
            None => {
                entry.due_at = None;
                false
            }
        }
    }

    /// Schedule callbacks added since the last arm. Returns those already due.
    pub fn arm_new(
        &mut self,
        value: &ContinuousValue,
        scheduler: &mut dyn Scheduler,
        commodity: CommodityId,
        now: Tick,
    ) -> Vec<CallbackHandle> {
        let mut due = Vec::new();
        for (&handle, entry) in self.entries.iter_mut().filter(|(_, e)| !e.armed) {
            if Self::schedule(entry, handle, value, scheduler, commodity, now) {
                due.push(handle);
            }
        }
        due
    }

    /// Cancel and reschedule every callback against the current trajectory.
    pub fn rearm_all(
        &mut self,
        value: &ContinuousValue,
        scheduler: &mut dyn Scheduler,
        commodity: CommodityId,
        now: Tick,
    ) -> Rearmed<K> {
        let mut out = Rearmed {
            due: Vec::new(),
            rearmed: Vec::new(),
        };
        for (&handle, entry) in self.entries.iter_mut() {
            let was_armed = entry.armed;
            if let Some(alarm) = entry.alarm.take() {
                scheduler.cancel(alarm);
            }
            if Self::schedule(entry, handle, value, scheduler, commodity, now) {
                out.due.push(handle);
            } else if was_armed {
                if let Some(key) = entry.on_rearm {
                    out.rearmed.push((handle, key));
                }
            }
        }
        out
    }

    /// Reschedule one callback. Returns `true` when it is already due.
    pub fn reschedule(
        &mut self,
        handle: CallbackHandle,
        value: &ContinuousValue,
        scheduler: &mut dyn Scheduler,
        commodity: CommodityId,
        now: Tick,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };
        if let Some(alarm) = entry.alarm.take() {
            scheduler.cancel(alarm);
        }
        Self::schedule(entry, handle, value, scheduler, commodity, now)
    }

    /// The scheduler delivered this callback's alarm; it no longer needs cancelling.
    pub fn alarm_fired(&mut self, handle: CallbackHandle) {
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.alarm = None;
        }
    }

    /// Re-validate a due callback against `value`.
    pub fn try_fire(
        &mut self,
        handle: CallbackHandle,
        value: f64,
        scheduler: &mut dyn Scheduler,
    ) -> Firing<K> {
        match self.entries.get(&handle) {
            None => Firing::Missing,
            Some(entry) if !entry.threshold.compare(value) => Firing::NotReached(entry.on_rearm),
            Some(_) => match self.entries.remove(&handle) {
                Some(entry) => {
                    if let Some(alarm) = entry.alarm {
                        scheduler.cancel(alarm);
                    }
                    Firing::Crossed(entry.on_cross)
                }
                None => Firing::Missing,
            },
        }
    }

    /// Callbacks whose due tick has passed, e.g. because the scheduler is late.
    pub fn overdue(&self, now: Tick) -> Vec<CallbackHandle> {
        self.entries
            .iter()
            .filter(|(_, e)| e.armed && e.due_at.is_some_and(|at| at <= now))
            .map(|(&h, _)| h)
            .collect()
    }

    /// Drop every callback, cancelling outstanding alarms.
    pub fn clear(&mut self, scheduler: &mut dyn Scheduler) {
        for entry in self.entries.values() {
            if let Some(alarm) = entry.alarm {
                scheduler.cancel(alarm);
            }
        }
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DecayDirection;

    #[derive(Default)]
    struct RecordingScheduler {
        now: Tick,
        next: u64,
        scheduled: Vec<(Tick, AlarmHandle)>,
        cancelled: Vec<AlarmHandle>,
    }

    impl Scheduler for RecordingScheduler {
        fn now(&self) -> Tick {
            self.now
        }

        fn schedule_at(&mut self, tick: Tick, _target: AlarmTarget) -> AlarmHandle {
            let handle = AlarmHandle(self.next);
            self.next += 1;
            self.scheduled.push((tick, handle));
            handle
        }

        fn cancel(&mut self, alarm: AlarmHandle) {
            self.cancelled.push(alarm);
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Key {
        Cross,
        Rearm,
    }

    fn falling(from: f64) -> ContinuousValue {
        ContinuousValue::new(0.0, 100.0, from, 0).with_decay(
            1.0,
            0.0,
            DecayDirection::TowardConvergence,
        )
    }

    const ID: CommodityId = CommodityId(1);

    #[test]
    fn test_arm_schedules_at_crossing_tick() {
        let value = falling(50.0);
        let mut sched = RecordingScheduler::default();
        let mut reg = CallbackRegistry::new();
        let h = reg.add(Threshold::at_or_below(20.0), Key::Cross, None);
        assert!(reg.arm_new(&value, &mut sched, ID, 0).is_empty());
        assert_eq!(sched.scheduled, vec![(30, AlarmHandle(0))]);
        assert_eq!(reg.get(h).unwrap().due_at(), Some(30));
        // Already armed entries are left alone
        assert!(reg.arm_new(&value, &mut sched, ID, 0).is_empty());
        assert_eq!(sched.scheduled.len(), 1);
    }

    #[test]
    fn test_satisfied_callback_is_due_immediately() {
        let value = falling(50.0);
        let mut sched = RecordingScheduler::default();
        let mut reg = CallbackRegistry::new();
        let h = reg.add(Threshold::at_or_above(40.0), Key::Cross, None);
        assert_eq!(reg.arm_new(&value, &mut sched, ID, 0), vec![h]);
        assert!(sched.scheduled.is_empty());
    }

    #[test]
    fn test_rearm_reports_every_armed_callback() {
        let mut value = falling(50.0);
        let mut sched = RecordingScheduler::default();
        let mut reg = CallbackRegistry::new();
        let h = reg.add(Threshold::at_or_below(20.0), Key::Cross, Some(Key::Rearm));
        let never = reg.add(Threshold::above(90.0), Key::Cross, Some(Key::Rearm));
        reg.arm_new(&value, &mut sched, ID, 0);
        let fresh = reg.add(Threshold::at_or_below(10.0), Key::Cross, Some(Key::Rearm));

        value.set_value(30.0, 5);
        let out = reg.rearm_all(&value, &mut sched, ID, 5);
        assert!(out.due.is_empty());
        // `never` had no alarm but was armed; `fresh` was never armed
        assert_eq!(out.rearmed, vec![(h, Key::Rearm), (never, Key::Rearm)]);
        assert_eq!(reg.get(fresh).unwrap().due_at(), Some(25));
        assert_eq!(sched.cancelled, vec![AlarmHandle(0)]);
        assert_eq!(reg.get(h).unwrap().due_at(), Some(15));
        assert_eq!(reg.get(never).unwrap().due_at(), None);
    }

    #[test]
    fn test_try_fire_revalidates() {
        let mut value = falling(50.0);
        let mut sched = RecordingScheduler::default();
        let mut reg = CallbackRegistry::new();
        let h = reg.add(Threshold::at_or_below(20.0), Key::Cross, Some(Key::Rearm));
        reg.arm_new(&value, &mut sched, ID, 0);

        // Value was pushed back up before the alarm fired
        value.set_value(80.0, 30);
        assert_eq!(
            reg.try_fire(h, value.current(), &mut sched),
            Firing::NotReached(Some(Key::Rearm))
        );
        assert!(reg.contains(h));

        value.set_value(10.0, 31);
        let fired = reg.try_fire(h, value.current(), &mut sched);
        assert_eq!(fired, Firing::Crossed(Key::Cross));
        assert!(!reg.contains(h));
        let again = reg.try_fire(h, value.current(), &mut sched);
        assert_eq!(again, Firing::Missing);
    }

    #[test]
    fn test_remove_is_check_then_act() {
        let value = falling(50.0);
        let mut sched = RecordingScheduler::default();
        let mut reg = CallbackRegistry::new();
        let h = reg.add(Threshold::at_or_below(20.0), Key::Cross, None);
        reg.arm_new(&value, &mut sched, ID, 0);
        assert!(reg.remove(h, &mut sched));
        assert!(!reg.remove(h, &mut sched));
        assert_eq!(sched.cancelled, vec![AlarmHandle(0)]);
    }

    #[test]
    fn test_overdue_and_clear() {
        let value = falling(50.0);
        let mut sched = RecordingScheduler::default();
        let mut reg = CallbackRegistry::new();
        let soon = reg.add(Threshold::at_or_below(45.0), Key::Cross, None);
        let _late = reg.add(Threshold::at_or_below(5.0), Key::Cross, None);
        reg.arm_new(&value, &mut sched, ID, 0);
        assert_eq!(reg.overdue(10), vec![soon]);
        reg.clear(&mut sched);
        assert!(reg.is_empty());
        assert_eq!(sched.cancelled.len(), 2);
    }
}

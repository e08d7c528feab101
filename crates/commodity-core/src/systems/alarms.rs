//! Deterministic alarm queue backing every commodity's [`Scheduler`].
//!
//! Alarms are ordered by `(tick, sequence)`, so two alarms due on the same
//! tick are delivered in the order they were scheduled. Cancellation is lazy:
//! the heap entry stays behind and is skipped when popped, until cancelled
//! entries outnumber live ones and the heap is compacted.

use hecs::Entity;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use commodity_logic::context::{AlarmHandle, AlarmTarget, Scheduler};
use commodity_logic::Tick;

/// Cancelled entries tolerated before compaction is considered.
const COMPACT_SLACK: usize = 64;

/// An alarm routed to one commodity of one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityAlarm {
    pub entity: Entity,
    pub target: AlarmTarget,
}

#[derive(Debug, Default)]
pub struct AlarmQueue {
    heap: BinaryHeap<Reverse<(Tick, u64)>>,
    live: HashMap<u64, EntityAlarm>,
    next_seq: u64,
}

impl AlarmQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, tick: Tick, alarm: EntityAlarm) -> AlarmHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((tick, seq)));
        self.live.insert(seq, alarm);
        AlarmHandle(seq)
    }

    pub fn cancel(&mut self, handle: AlarmHandle) -> bool {
        let removed = self.live.remove(&handle.0).is_some();
        if removed {
            self.maybe_compact();
        }
        removed
    }

    /// Drop every live alarm belonging to `entity`.
    pub fn cancel_entity(&mut self, entity: Entity) -> usize {
        let before = self.live.len();
        self.live.retain(|_, alarm| alarm.entity != entity);
        self.maybe_compact();
        before - self.live.len()
    }

    /// Pop the earliest live alarm due at or before `until`.
    pub fn pop_due(&mut self, until: Tick) -> Option<(Tick, EntityAlarm)> {
        if self.next_due()? > until {
            return None;
        }
        let Reverse((tick, seq)) = self.heap.pop()?;
        let alarm = self.live.remove(&seq)?;
        Some((tick, alarm))
    }

    /// Tick of the earliest live alarm. Cancelled entries in front of it are discarded.
    fn next_due(&mut self) -> Option<Tick> {
        while let Some(&Reverse((tick, seq))) = self.heap.peek() {
            if self.live.contains_key(&seq) {
                return Some(tick);
            }
            self.heap.pop();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Heap entries, cancelled ones included.
    #[cfg(test)]
    pub(crate) fn backlog(&self) -> usize {
        self.heap.len()
    }

    /// Rebuild the heap from live alarms once it holds more than twice as many entries.
    fn maybe_compact(&mut self) {
        if self.heap.len() <= COMPACT_SLACK || self.heap.len() <= 2 * self.live.len() {
            return;
        }
        let live = &self.live;
        self.heap.retain(|Reverse((_, seq))| live.contains_key(seq));
    }
}

/// [`Scheduler`] for one owner at one point in time.
pub struct EntityScheduler<'a> {
    pub queue: &'a mut AlarmQueue,
    pub entity: Entity,
    pub now: Tick,
}

impl Scheduler for EntityScheduler<'_> {
    fn now(&self) -> Tick {
        self.now
    }

    fn schedule_at(&mut self, tick: Tick, target: AlarmTarget) -> AlarmHandle {
        // Never schedule into the past
        let tick = tick.max(self.now);
        self.queue.schedule(
            tick,
            EntityAlarm {
                entity: self.entity,
                target,
            },
        )
    }

    fn cancel(&mut self, alarm: AlarmHandle) {
        self.queue.cancel(alarm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commodity_logic::callbacks::CallbackRegistry;
    use commodity_logic::context::CommodityId;
    use commodity_logic::Threshold;
    use hecs::World;

    /// Callback handles only come from a registry; mint a few for one commodity.
    fn targets(n: usize) -> Vec<AlarmTarget> {
        let mut registry: CallbackRegistry<()> = CallbackRegistry::new();
        for _ in 0..n {
            registry.add(Threshold::above(0.5), (), None);
        }
        registry
            .handles()
            .map(|callback| AlarmTarget {
                commodity: CommodityId(0),
                callback,
            })
            .collect()
    }

    fn alarm(entity: Entity, target: AlarmTarget) -> EntityAlarm {
        EntityAlarm { entity, target }
    }

    #[test]
    fn test_pops_in_tick_then_schedule_order() {
        let mut world = World::new();
        let entity = world.spawn(());
        let t = targets(3);
        let mut queue = AlarmQueue::new();
        queue.schedule(20, alarm(entity, t[0]));
        queue.schedule(10, alarm(entity, t[1]));
        queue.schedule(10, alarm(entity, t[2]));

        assert_eq!(queue.next_due(), Some(10));
        assert_eq!(queue.pop_due(15).unwrap().1.target, t[1]);
        assert_eq!(queue.pop_due(15).unwrap().1.target, t[2]);
        assert!(queue.pop_due(15).is_none());
        assert_eq!(queue.pop_due(20).unwrap().0, 20);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancel_is_lazy_and_idempotent() {
        let mut world = World::new();
        let a = world.spawn(());
        let b = world.spawn(());
        let t = targets(2);
        let mut queue = AlarmQueue::new();
        let first = queue.schedule(5, alarm(a, t[0]));
        queue.schedule(6, alarm(b, t[1]));

        assert!(queue.cancel(first));
        assert!(!queue.cancel(first));
        assert_eq!(queue.next_due(), Some(6));
        assert_eq!(queue.cancel_entity(b), 1);
        assert!(queue.pop_due(100).is_none());
    }

    #[test]
    fn test_entity_scheduler_clamps_to_now() {
        let mut world = World::new();
        let entity = world.spawn(());
        let t = targets(1);
        let mut queue = AlarmQueue::new();
        let mut sched = EntityScheduler {
            queue: &mut queue,
            entity,
            now: 50,
        };
        sched.schedule_at(10, t[0]);
        assert_eq!(queue.next_due(), Some(50));
    }

    #[test]
    fn test_reschedule_churn_keeps_heap_bounded() {
        let mut world = World::new();
        let entity = world.spawn(());
        let t = targets(3);
        let mut queue = AlarmQueue::new();
        let mut handles: Vec<AlarmHandle> = t
            .iter()
            .map(|&target| queue.schedule(5_000, alarm(entity, target)))
            .collect();

        // Every mutation cancels and re-pushes each far-off alarm
        for round in 0..10_000u64 {
            for (handle, &target) in handles.iter_mut().zip(&t) {
                queue.cancel(*handle);
                *handle = queue.schedule(5_000 + round % 7, alarm(entity, target));
            }
        }
        assert_eq!(queue.len(), 3);
        let backlog = queue.backlog();
        assert!(backlog <= COMPACT_SLACK + 1, "heap grew to {}", backlog);

        // Order and cancellation still hold after compaction
        let due: Vec<_> = std::iter::from_fn(|| queue.pop_due(u64::MAX)).collect();
        assert_eq!(due.len(), 3);
        assert!(due.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(queue.backlog(), 0);
    }
}

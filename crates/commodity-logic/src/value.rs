//! Continuous value with lazy, piecewise-linear decay.
//!
//! The value is only materialised when touched: between touches it moves
//! linearly at [`ContinuousValue::effective_rate`] and comes to rest at its
//! stop point (the convergence value, or a range bound). Because the path is
//! linear, the tick at which any threshold is first satisfied can be solved
//! directly, which is what the callback registry schedules against.

use serde::{Deserialize, Serialize};

use crate::constants::VALUE_EPSILON;
use crate::threshold::Threshold;

/// Monotonic game time in minutes.
pub type Tick = u64;

/// Slack subtracted before rounding a crossing time up to a whole tick.
const TICK_EPSILON: f64 = 1e-9;

/// A change applied on top of the base decay rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RateModifier {
    /// Summed with the base rate before any multiplier.
    Add(f64),
    /// Scales the combined (base + additive) rate.
    Multiply(f64),
}

/// Handle returned when a modifier is attached, used to detach it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModifierHandle(u32);

/// How the sign of the decay rate is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecayDirection {
    /// The rate magnitude always points toward the convergence value.
    #[default]
    TowardConvergence,
    /// The tuned rate keeps its sign; motion toward convergence still stops there.
    Signed,
}

/// A bounded quantity that decays toward a rest point over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousValue {
    min_value: f64,
    max_value: f64,
    convergence_value: f64,
    decay_rate: f64,
    direction: DecayDirection,
    decay_enabled: bool,
    locked: bool,
    value: f64,
    last_update: Tick,
    modifiers: Vec<(ModifierHandle, RateModifier)>,
    next_modifier: u32,
}

impl ContinuousValue {
    /// A non-decaying value in `[min_value, max_value]`.
    pub fn new(min_value: f64, max_value: f64, initial: f64, now: Tick) -> Self {
        Self {
            min_value,
            max_value,
            convergence_value: min_value,
            decay_rate: 0.0,
            direction: DecayDirection::default(),
            decay_enabled: true,
            locked: false,
            value: initial.clamp(min_value, max_value),
            last_update: now,
            modifiers: Vec::new(),
            next_modifier: 0,
        }
    }

    pub fn with_decay(
        mut self,
        decay_rate: f64,
        convergence_value: f64,
        direction: DecayDirection,
    ) -> Self {
        self.decay_rate = decay_rate;
        self.convergence_value = convergence_value.clamp(self.min_value, self.max_value);
        self.direction = direction;
        self
    }

    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn convergence_value(&self) -> f64 {
        self.convergence_value
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn direction(&self) -> DecayDirection {
        self.direction
    }

    pub fn decay_enabled(&self) -> bool {
        self.decay_enabled
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn last_update(&self) -> Tick {
        self.last_update
    }

    /// Value as of the last touch, without applying pending decay.
    pub fn current(&self) -> f64 {
        self.value
    }

    pub fn modifier_count(&self) -> usize {
        self.modifiers.len()
    }

    /// Clamp into range. NaN leaves the current value in place.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.value;
        }
        value.clamp(self.min_value, self.max_value)
    }

    /// Base rate combined with every modifier: `(base + Σadd) × Πmul`.
    ///
    /// For [`DecayDirection::TowardConvergence`] this is a magnitude and never
    /// negative.
    pub fn modified_rate(&self) -> f64 {
        let base = match self.direction {
            DecayDirection::TowardConvergence => self.decay_rate.abs(),
            DecayDirection::Signed => self.decay_rate,
        };
        let additive: f64 = self
            .modifiers
            .iter()
            .filter_map(|(_, m)| match m {
                RateModifier::Add(a) => Some(*a),
                RateModifier::Multiply(_) => None,
            })
            .sum();
        let multiplier: f64 = self
            .modifiers
            .iter()
            .filter_map(|(_, m)| match m {
                RateModifier::Multiply(x) => Some(*x),
                RateModifier::Add(_) => None,
            })
            .product();
        let rate = (base + additive) * multiplier;
        match self.direction {
            DecayDirection::TowardConvergence => rate.max(0.0),
            DecayDirection::Signed => rate,
        }
    }

    /// Signed units per tick the value is currently moving at.
    pub fn effective_rate(&self) -> f64 {
        self.rate_for(self.value)
    }

    fn rate_for(&self, value: f64) -> f64 {
        if !self.decay_enabled || self.locked {
            return 0.0;
        }
        let modified = self.modified_rate();
        let conv = self.convergence_value;
        let rate = match self.direction {
            DecayDirection::TowardConvergence => {
                if value > conv + VALUE_EPSILON {
                    -modified
                } else if value < conv - VALUE_EPSILON {
                    modified
                } else {
                    0.0
                }
            }
            DecayDirection::Signed => modified,
        };
        if rate == 0.0 {
            return 0.0;
        }
        let stop = self.stop_for(value, rate);
        let at_rest = (value - stop).abs() <= VALUE_EPSILON
            || (rate > 0.0 && value >= stop)
            || (rate < 0.0 && value <= stop);
        if at_rest {
            0.0
        } else {
            rate
        }
    }

    /// Where motion from `value` at `rate` comes to rest.
    fn stop_for(&self, value: f64, rate: f64) -> f64 {
        let conv = self.convergence_value;
        match self.direction {
            DecayDirection::TowardConvergence => conv,
            DecayDirection::Signed if rate > 0.0 => {
                if value < conv - VALUE_EPSILON {
                    conv
                } else {
                    self.max_value
                }
            }
            DecayDirection::Signed => {
                if value > conv + VALUE_EPSILON {
                    conv
                } else {
                    self.min_value
                }
            }
        }
    }

    fn project(value: f64, rate: f64, stop: f64, ticks: Tick) -> f64 {
        let moved = value + rate * ticks as f64;
        if rate > 0.0 {
            moved.min(stop)
        } else {
            moved.max(stop)
        }
    }

    /// Projected value at `now` without committing the decay.
    pub fn value_at(&self, now: Tick) -> f64 {
        if now <= self.last_update {
            return self.value;
        }
        let rate = self.rate_for(self.value);
        if rate == 0.0 {
            return self.value;
        }
        let stop = self.stop_for(self.value, rate);
        Self::project(self.value, rate, stop, now - self.last_update)
    }

    /// Apply decay up to `now` and return the result.
    pub fn get_value(&mut self, now: Tick) -> f64 {
        self.value = self.value_at(now);
        self.last_update = self.last_update.max(now);
        self.value
    }

    pub fn set_value(&mut self, value: f64, now: Tick) {
        self.value = self.clamp(value);
        self.last_update = self.last_update.max(now);
    }

    pub fn add_value(&mut self, delta: f64, now: Tick) {
        let value = self.get_value(now) + delta;
        self.set_value(value, now);
    }

    pub fn add_modifier(&mut self, modifier: RateModifier, now: Tick) -> ModifierHandle {
        self.get_value(now);
        let handle = ModifierHandle(self.next_modifier);
        self.next_modifier += 1;
        self.modifiers.push((handle, modifier));
        handle
    }

    pub fn remove_modifier(&mut self, handle: ModifierHandle, now: Tick) -> bool {
        let Some(pos) = self.modifiers.iter().position(|(h, _)| *h == handle) else {
            return false;
        };
        self.get_value(now);
        self.modifiers.remove(pos);
        true
    }

    pub fn set_decay_enabled(&mut self, enabled: bool, now: Tick) {
        self.get_value(now);
        self.decay_enabled = enabled;
    }

    pub fn set_locked(&mut self, locked: bool, now: Tick) {
        self.get_value(now);
        self.locked = locked;
    }

    /// Ticks from `now` until `threshold` is first satisfied, or `None` if
    /// the current trajectory never satisfies it.
    ///
    /// An already-satisfied threshold returns `Some(0)` even while decay is
    /// disabled. Equality thresholds are only reached where the value comes
    /// to rest.
    pub fn time_until(&self, threshold: &Threshold, now: Tick) -> Option<Tick> {
        let value = self.value_at(now);
        if threshold.compare(value) {
            return Some(0);
        }
        let rate = self.rate_for(value);
        if rate == 0.0 {
            return None;
        }
        let stop = self.stop_for(value, rate);
        if !threshold.compare(stop) {
            return None;
        }
        let ticks_to =
            |target: f64| ((target - value) / rate - TICK_EPSILON).ceil().max(1.0) as Tick;
        let to_stop = ticks_to(stop);
        let estimate = ticks_to(threshold.value).min(to_stop);
        let found = (estimate..to_stop)
            .take(3)
            .find(|&dt| threshold.compare(Self::project(value, rate, stop, dt)));
        Some(found.unwrap_or(to_stop))
    }
}

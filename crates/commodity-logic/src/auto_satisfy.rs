//! Time-of-day auto-satisfy curve and the offline catch-up fixup.
//!
//! A commodity that was not simulated for a while (its owner was off-lot, or
//! the save was loaded later) is pulled toward the value its curve prescribes
//! for the current time of day. Short absences move it part of the way, long
//! ones snap it to the curve.
//!
//! ```
//! use commodity_logic::auto_satisfy::{AutoSatisfyCurve, CurvePoint};
//!
//! let curve = AutoSatisfyCurve::new(
//!     vec![CurvePoint { hour: 0.0, value: 10.0 }, CurvePoint { hour: 12.0, value: 50.0 }],
//!     360,
//!     0,
//! );
//! assert_eq!(curve.sample(6.0), 30.0);
//! assert_eq!(curve.sample(18.0), 30.0); // wraps past midnight
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{HOURS_PER_DAY, TICKS_PER_DAY, TICKS_PER_HOUR};
use crate::value::Tick;

/// One control point: the value the curve prescribes at `hour` (0 ≤ hour < 24).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub hour: f64,
    pub value: f64,
}

/// Circular 24-hour interpolation curve plus catch-up limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoSatisfyCurve {
    pub points: Vec<CurvePoint>,
    /// Absences at least this long snap straight to the curve.
    pub max_catch_up_duration: Tick,
    /// Upper bound of the random offset added to "now" before sampling.
    #[serde(default)]
    pub random_time_jitter: Tick,
}

impl AutoSatisfyCurve {
    pub fn new(
        mut points: Vec<CurvePoint>,
        max_catch_up_duration: Tick,
        random_time_jitter: Tick,
    ) -> Self {
        points.sort_by(|a, b| a.hour.total_cmp(&b.hour));
        Self {
            points,
            max_catch_up_duration,
            random_time_jitter,
        }
    }

    /// Interpolated value at an hour of day, wrapping at midnight.
    pub fn sample(&self, hour: f64) -> f64 {
        match self.points.as_slice() {
            [] => 0.0,
            [only] => only.value,
            points => {
                let hour = hour.rem_euclid(HOURS_PER_DAY);
                let next_idx = points.iter().position(|p| p.hour > hour).unwrap_or(0);
                let prev_idx = if next_idx == 0 { points.len() - 1 } else { next_idx - 1 };
                let (prev, next) = (points[prev_idx], points[next_idx]);
                let span = (next.hour - prev.hour).rem_euclid(HOURS_PER_DAY);
                if span <= 0.0 {
                    return prev.value;
                }
                let offset = (hour - prev.hour).rem_euclid(HOURS_PER_DAY);
                prev.value + (next.value - prev.value) * (offset / span)
            }
        }
    }

    pub fn sample_at_tick(&self, tick: Tick) -> f64 {
        let hour = (tick % TICKS_PER_DAY) as f64 / TICKS_PER_HOUR as f64;
        self.sample(hour)
    }

    /// Value to commit after an absence of `absent_for` ticks, or `None` for no change.
    pub fn catch_up_value(
        &self,
        saved: f64,
        now: Tick,
        absent_for: Tick,
        rng: &mut impl Rng,
    ) -> Option<f64> {
        if absent_for == 0 || self.points.is_empty() {
            return None;
        }
        let jitter = if self.random_time_jitter > 0 {
            rng.gen_range(0..=self.random_time_jitter)
        } else {
            0
        };
        let target = self.sample_at_tick(now.saturating_add(jitter));
        if absent_for >= self.max_catch_up_duration {
            return Some(target);
        }
        let fraction = absent_for as f64 / self.max_catch_up_duration as f64;
        Some(saved + (target - saved) * fraction)
    }
}

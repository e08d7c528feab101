//! Engine-wide constants: time units, tolerances, and drain limits.

/// One tick is one game minute.
pub const TICKS_PER_HOUR: u64 = 60;

/// Length of the circular auto-satisfy period.
pub const TICKS_PER_DAY: u64 = 24 * TICKS_PER_HOUR;

/// Hours in one auto-satisfy period.
pub const HOURS_PER_DAY: f64 = 24.0;

/// Absolute tolerance used by threshold comparisons.
///
/// Linear decay evaluated at integer ticks accumulates float error; a value
/// within this distance of a boundary is treated as sitting on it.
pub const VALUE_EPSILON: f64 = 1e-6;

/// Upper bound on callbacks processed in one drain.
///
/// A runaway chain of immediately-due callbacks is logged and cut off here
/// instead of spinning the caller.
pub const MAX_DRAIN_STEPS: usize = 256;

/// Name of the synthetic state substituted for broken tuning.
pub const FALLBACK_STATE_NAME: &str = "fallback_bottom";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_length() {
        assert_eq!(TICKS_PER_DAY, 1440);
        assert_eq!(TICKS_PER_DAY as f64 / TICKS_PER_HOUR as f64, HOURS_PER_DAY);
    }
}

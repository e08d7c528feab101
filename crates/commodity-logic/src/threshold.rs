//! Threshold value objects: a boundary plus a comparison.
//!
//! Comparisons are tolerant to [`VALUE_EPSILON`] so that a value computed by
//! linear decay lands on a boundary instead of a hair to either side. The
//! tolerance is applied so that `Less`/`GreaterOrEqual` and
//! `LessOrEqual`/`Greater` stay exact complements of each other.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::VALUE_EPSILON;

/// How a value is compared against a threshold boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Less => "<",
            Comparator::LessOrEqual => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Equal => "==",
        }
    }

    /// Compare `value` against `boundary` with the engine tolerance.
    pub fn compare(self, value: f64, boundary: f64) -> bool {
        match self {
            Comparator::Less => value < boundary - VALUE_EPSILON,
            Comparator::GreaterOrEqual => value >= boundary - VALUE_EPSILON,
            Comparator::LessOrEqual => value <= boundary + VALUE_EPSILON,
            Comparator::Greater => value > boundary + VALUE_EPSILON,
            Comparator::Equal => (value - boundary).abs() <= VALUE_EPSILON,
        }
    }

    /// The comparator satisfied exactly when this one is not.
    pub fn inverse(self) -> Option<Comparator> {
        match self {
            Comparator::Less => Some(Comparator::GreaterOrEqual),
            Comparator::GreaterOrEqual => Some(Comparator::Less),
            Comparator::LessOrEqual => Some(Comparator::Greater),
            Comparator::Greater => Some(Comparator::LessOrEqual),
            Comparator::Equal => None,
        }
    }
}

/// A boundary value plus the comparison used to detect crossing it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub value: f64,
    pub comparator: Comparator,
}

impl Threshold {
    pub const fn new(value: f64, comparator: Comparator) -> Self {
        Self { value, comparator }
    }

    pub const fn below(value: f64) -> Self {
        Self::new(value, Comparator::Less)
    }

    pub const fn at_or_below(value: f64) -> Self {
        Self::new(value, Comparator::LessOrEqual)
    }

    pub const fn above(value: f64) -> Self {
        Self::new(value, Comparator::Greater)
    }

    pub const fn at_or_above(value: f64) -> Self {
        Self::new(value, Comparator::GreaterOrEqual)
    }

    pub const fn equal_to(value: f64) -> Self {
        Self::new(value, Comparator::Equal)
    }

    /// Whether `value` satisfies this threshold.
    pub fn compare(&self, value: f64) -> bool {
        self.comparator.compare(value, self.value)
    }

    /// The threshold that detects leaving the region this one detects entering.
    pub fn inverse(&self) -> Option<Threshold> {
        self.comparator
            .inverse()
            .map(|comparator| Threshold::new(self.value, comparator))
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.comparator.symbol(), self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_comparisons() {
        assert!(Threshold::below(40.0).compare(39.0));
        assert!(!Threshold::below(40.0).compare(40.0));
        assert!(Threshold::at_or_above(40.0).compare(40.0));
        assert!(Threshold::at_or_below(-90.0).compare(-90.0));
        assert!(!Threshold::above(-90.0).compare(-90.0));
        assert!(Threshold::equal_to(100.0).compare(100.0));
        assert!(!Threshold::equal_to(100.0).compare(99.0));
    }

    #[test]
    fn test_tolerance_lands_on_boundary() {
        // 50 - 0.1 * 100 in floating point is not exactly 40
        let v = (0..100).fold(50.0_f64, |acc, _| acc - 0.1);
        assert!(Threshold::at_or_above(40.0).compare(v));
        assert!(!Threshold::below(40.0).compare(v));
    }

    #[test]
    fn test_inverse_is_complement() {
        let samples = [-1.0, 39.9999999, 40.0, 40.0000001, 41.0];
        for th in [
            Threshold::below(40.0),
            Threshold::at_or_below(40.0),
            Threshold::above(40.0),
            Threshold::at_or_above(40.0),
        ] {
            let inv = th.inverse().unwrap();
            for v in samples {
                assert_ne!(th.compare(v), inv.compare(v), "{} vs {} at {}", th, inv, v);
            }
        }
        assert!(Threshold::equal_to(1.0).inverse().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Threshold::at_or_below(-90.0).to_string(), "<= -90");
    }
}

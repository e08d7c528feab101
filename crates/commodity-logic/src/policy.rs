//! Per-kind commodity behavior.
//!
//! Everything that differs between commodity kinds lives behind
//! [`CommodityPolicy`] instead of in a type hierarchy. Tuning selects a kind;
//! hosts with special needs can supply their own policy.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::context::Priority;

/// Kind of commodity, as declared in tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommodityKind {
    /// Permanent motive (hunger, energy); never auto-removed.
    #[default]
    Core,
    /// Temporary commodity that disappears once it decays to rest.
    Transient,
}

impl CommodityKind {
    pub fn policy(self) -> Box<dyn CommodityPolicy> {
        match self {
            CommodityKind::Core => Box::new(CorePolicy),
            CommodityKind::Transient => Box::new(TransientPolicy),
        }
    }
}

pub trait CommodityPolicy: Debug + Send + Sync {
    /// Remove the commodity from its owner when it reaches its convergence value.
    fn removes_at_convergence(&self) -> bool;

    fn distress_priority(&self) -> Priority {
        Priority::High
    }

    fn failure_priority(&self) -> Priority {
        Priority::Critical
    }

    /// Reason string passed to the buff system for state buffs.
    fn buff_reason(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CorePolicy;

impl CommodityPolicy for CorePolicy {
    fn removes_at_convergence(&self) -> bool {
        false
    }

    fn buff_reason(&self) -> &'static str {
        "motive_state"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransientPolicy;

impl CommodityPolicy for TransientPolicy {
    fn removes_at_convergence(&self) -> bool {
        true
    }

    // A transient commodity nags rather than interrupts.
    fn distress_priority(&self) -> Priority {
        Priority::Low
    }

    fn buff_reason(&self) -> &'static str {
        "commodity_state"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_selects_policy() {
        assert!(!CommodityKind::Core.policy().removes_at_convergence());
        assert!(CommodityKind::Transient.policy().removes_at_convergence());
        assert_eq!(CommodityKind::default(), CommodityKind::Core);
    }

    #[test]
    fn test_priorities() {
        assert_eq!(CorePolicy.distress_priority(), Priority::High);
        assert_eq!(TransientPolicy.distress_priority(), Priority::Low);
        assert_eq!(TransientPolicy.failure_priority(), Priority::Critical);
    }
}

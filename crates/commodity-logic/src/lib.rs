//! Commodity decay and threshold engine.
//!
//! This crate holds the engine itself: bounded values that decay lazily
//! toward a rest point, threshold callbacks scheduled against the solved
//! trajectory, and the state/distress/failure machinery layered on top. It
//! owns no clock, world, or I/O; every operation borrows its collaborators
//! through an [`EngineContext`](context::EngineContext), so the same code
//! runs under the `commodity-core` host, the simtest harness, or plain mocks
//! in unit tests.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`auto_satisfy`] | Time-of-day curve and offline catch-up fixup |
//! | [`callbacks`] | One-shot threshold callbacks keyed by handler |
//! | [`commodity`] | The orchestrator: mutation pipeline, drain queue, snapshots |
//! | [`config`] | Typed tuning, JSON loading, validation with fallbacks |
//! | [`constants`] | Tick units, tolerance, drain cap |
//! | [`context`] | Scheduler, owner, buff, interaction and progress traits |
//! | [`distress`] | Reversible distress and one-way failure automatons |
//! | [`lifecycle`] | Convergence removal and the destroyed guard |
//! | [`message`] | Client-facing progress update and its wire encoding |
//! | [`policy`] | Per-kind behavior (core motive vs transient) |
//! | [`states`] | Band state machine with one-step walks |
//! | [`threshold`] | Comparators with tolerant comparison |
//! | [`value`] | Continuous value with piecewise-linear decay |

pub mod auto_satisfy;
pub mod callbacks;
pub mod commodity;
pub mod config;
pub mod constants;
pub mod context;
pub mod distress;
pub mod lifecycle;
pub mod message;
pub mod policy;
pub mod states;
pub mod threshold;
pub mod value;

pub use commodity::{Commodity, CommoditySnapshot, ListenerEvent};
pub use config::{load_tuning_json, CommodityConfig, ConfigError, ValidatedConfig};
pub use context::{CommodityId, EngineContext};
pub use threshold::{Comparator, Threshold};
pub use value::{RateModifier, Tick};

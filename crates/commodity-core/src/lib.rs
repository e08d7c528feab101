//! Commodity Core - ECS host for commodity trackers
//!
//! Runs `commodity-logic` commodities for many owners at once, with a single
//! deterministic alarm queue standing in for the game clock.
//!
//! # Architecture
//!
//! The host uses an Entity Component System (ECS) architecture via `hecs`:
//! - **Entities**: Owners (sims, objects) that track commodities
//! - **Components**: The tracker plus in-process buff, interaction and loot services
//! - **Systems**: The alarm queue and the progress message distributor
//!
//! # Example
//!
//! ```rust,no_run
//! use commodity_core::prelude::*;
//!
//! let json = std::fs::read_to_string("data/commodity_tuning.json").unwrap();
//! let mut engine = CommodityEngine::from_tuning_json(&json).unwrap();
//!
//! let sim = engine.spawn_owner(true);
//! let hunger = engine.add_commodity(sim, 1).unwrap();
//!
//! // One game hour
//! engine.advance(60);
//! println!("{:?}", engine.state_name(sim, hunger));
//! ```

pub mod components;
pub mod engine;
pub mod persistence;
pub mod systems;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::components::*;
    pub use crate::engine::CommodityEngine;
    pub use crate::persistence::SaveError;
    pub use crate::systems::Outgoing;
    pub use commodity_logic::{CommodityId, RateModifier, Threshold, Tick};
}

//! Save/Load functionality for persisting commodity trackers
//!
//! Uses bincode for compact binary serialization. Only durable data is
//! written: each commodity's value, state index and flags. Alarms, buffs and
//! pending interactions are rebuilt when the commodities are restored.

use hecs::World;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use commodity_logic::{CommodityId, CommoditySnapshot, Tick};

use crate::components::{CommodityTracker, SimInstance};

/// Version number for save file format (increment when format changes)
pub const SAVE_VERSION: u32 = 1;

/// Serializable snapshot of every tracker in the world
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveData {
    /// Save format version
    pub version: u32,
    /// Simulation tick the save was taken at
    pub sim_time: Tick,
    pub owners: Vec<SavedOwner>,
}

/// One owner entity and the commodities it tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedOwner {
    pub instanced: bool,
    /// Next commodity id to allocate, so restored ids are never reused
    pub next_id: u64,
    pub locked: Vec<CommodityId>,
    pub commodities: Vec<CommoditySnapshot>,
}

fn snapshot_owners(world: &World, sim_time: Tick) -> Vec<SavedOwner> {
    let mut query = world.query::<(&CommodityTracker, Option<&SimInstance>)>();
    let mut owners: Vec<(hecs::Entity, SavedOwner)> = query
        .iter()
        .map(|(entity, (tracker, instance))| {
            let saved = SavedOwner {
                instanced: instance.is_some(),
                next_id: tracker.next_id,
                locked: tracker.owner.locked.iter().copied().collect(),
                commodities: tracker
                    .commodities
                    .values()
                    .map(|commodity| commodity.snapshot(sim_time))
                    .collect(),
            };
            (entity, saved)
        })
        .collect();
    // Archetype iteration order depends on which markers are attached
    owners.sort_by_key(|(entity, _)| entity.id());
    owners.into_iter().map(|(_, saved)| saved).collect()
}

/// Save every tracker in the world to a writer
pub fn save_commodities<W: Write>(
    writer: W,
    world: &World,
    sim_time: Tick,
) -> Result<(), SaveError> {
    let save_data = SaveData {
        version: SAVE_VERSION,
        sim_time,
        owners: snapshot_owners(world, sim_time),
    };
    bincode::serialize_into(writer, &save_data)?;
    Ok(())
}

/// Read and version-check a save. Rebuilding the world is up to the engine.
pub fn load_commodities<R: Read>(reader: R) -> Result<SaveData, SaveError> {
    let save_data: SaveData = bincode::deserialize_from(reader)?;

    if save_data.version != SAVE_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: save_data.version,
        });
    }
    Ok(save_data)
}

/// Errors that can occur during save/load
#[derive(Debug)]
pub enum SaveError {
    Io(std::io::Error),
    Bincode(Box<bincode::ErrorKind>),
    VersionMismatch { expected: u32, found: u32 },
    /// The save references a tuning id the engine does not know
    UnknownCommodity(u64),
}

impl From<std::io::Error> for SaveError {
    fn from(e: std::io::Error) -> Self {
        SaveError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for SaveError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SaveError::Bincode(e)
    }
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::Io(e) => write!(f, "IO error: {}", e),
            SaveError::Bincode(e) => write!(f, "Serialization error: {}", e),
            SaveError::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Save version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            SaveError::UnknownCommodity(id) => write!(f, "Unknown commodity tuning: {}", id),
        }
    }
}

impl std::error::Error for SaveError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CommodityEngine;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TUNING_JSON: &str = include_str!("../../../data/commodity_tuning.json");
    const HUNGER: u64 = 1;
    const ENERGY: u64 = 2;

    fn engine() -> CommodityEngine {
        CommodityEngine::from_tuning_json(TUNING_JSON).expect("bundled tuning loads")
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        let energy = engine.add_commodity(owner, ENERGY).unwrap();
        assert!(engine.set_locked(owner, energy, true));
        engine.advance(30);
        assert_eq!(engine.state_name(owner, hunger).as_deref(), Some("hungry"));

        let mut save_buffer = Vec::new();
        engine.save(&mut save_buffer).expect("Save failed");

        // Reload at the same tick: nothing catches up
        let mut loaded = self::engine();
        let mut rng = StdRng::seed_from_u64(7);
        loaded.load(&save_buffer[..], 30, &mut rng).expect("Load failed");
        assert_eq!(loaded.owner_count(), 1);
        let owner = loaded.world.query::<&CommodityTracker>().iter().next().unwrap().0;
        assert_eq!(loaded.commodity_for(owner, HUNGER), Some(hunger));
        assert!((loaded.value(owner, hunger).unwrap() - 20.0).abs() < 1e-6);
        assert_eq!(loaded.state_name(owner, hunger).as_deref(), Some("hungry"));
        let hungry_buff = loaded
            .with_status(owner, |tracker, buffs, _, _| {
                assert!(tracker.is_locked(energy));
                buffs.has("buff_hungry")
            })
            .unwrap();
        assert!(hungry_buff);

        // Locked energy stays put
        loaded.advance(60);
        assert!((loaded.value(owner, energy).unwrap() - 80.0).abs() < 1e-6);

        // New commodities never reuse a restored id
        let mut tracker = loaded.world.get::<&mut CommodityTracker>(owner).unwrap();
        let next = CommodityTracker::allocate_id(&mut tracker.next_id);
        assert!(next != hunger && next != energy);
    }

    #[test]
    fn test_load_after_long_absence_snaps_to_curve() {
        let mut engine = engine();
        let owner = engine.spawn_owner(false);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        engine.advance(30);

        let mut save_buffer = Vec::new();
        engine.save(&mut save_buffer).unwrap();

        // 08:00 the next morning; the curve is 80 at 08:00 and 79 by 08:30
        let mut loaded = self::engine();
        let mut rng = StdRng::seed_from_u64(42);
        loaded.load(&save_buffer[..], 8 * 60, &mut rng).unwrap();
        let owner = loaded.world.query::<&CommodityTracker>().iter().next().unwrap().0;
        let value = loaded.value(owner, hunger).unwrap();
        assert!((79.0..=80.0).contains(&value), "caught up to {}", value);
        assert_eq!(loaded.state_name(owner, hunger).as_deref(), Some("fine"));
        assert_eq!(loaded.sim_time, 8 * 60);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let data = SaveData {
            version: SAVE_VERSION + 1,
            sim_time: 0,
            owners: Vec::new(),
        };
        let bytes = bincode::serialize(&data).unwrap();
        match load_commodities(&bytes[..]) {
            Err(SaveError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, SAVE_VERSION);
                assert_eq!(found, SAVE_VERSION + 1);
            }
            other => panic!("expected version mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tuning_leaves_world_intact() {
        let mut engine = engine();
        let owner = engine.spawn_owner(true);
        let hunger = engine.add_commodity(owner, HUNGER).unwrap();
        let mut snapshot = engine
            .world
            .get::<&CommodityTracker>(owner)
            .unwrap()
            .get(hunger)
            .unwrap()
            .snapshot(0);
        snapshot.config_id = 404;
        let data = SaveData {
            version: SAVE_VERSION,
            sim_time: 0,
            owners: vec![SavedOwner {
                instanced: true,
                next_id: 1,
                locked: Vec::new(),
                commodities: vec![snapshot],
            }],
        };
        let bytes = bincode::serialize(&data).unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let err = engine.load(&bytes[..], 0, &mut rng).unwrap_err();
        assert!(matches!(err, SaveError::UnknownCommodity(404)));
        assert!(engine.has_commodity(owner, hunger));
    }
}

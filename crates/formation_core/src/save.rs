//! Save game format.
//!
//! A versioned envelope around everything the simulation needs to resume:
//! units, formation snapshots, the player civilization table and the
//! clocks. Encoded with `bincode`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::components::{EntityId, PlayerId};
use crate::error::{FormationError, Result};
use crate::formation::FormationSnapshot;
use crate::motion::PassabilityClasses;
use crate::simulation::Entity;

/// Save format version for compatibility.
pub const SAVE_VERSION: u32 = 1;

/// Complete saved simulation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveGame {
    /// Save format version.
    pub version: u32,
    /// Simulation tick.
    pub tick: u64,
    /// Seed formations derive their jitter from.
    pub seed: u64,
    /// Time accumulated towards the next shape update.
    pub shape_update_accumulator: u32,
    /// Next id the entity allocator hands out.
    pub next_id: EntityId,
    /// Units in id order.
    pub units: Vec<Entity>,
    /// Formation controllers in id order.
    pub formations: Vec<FormationSnapshot>,
    /// Player civilizations.
    pub players: BTreeMap<PlayerId, String>,
    /// Passability clearance table.
    pub passability: PassabilityClasses,
}

impl SaveGame {
    /// Encode to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| FormationError::Serialization(format!("Failed to encode save: {e}")))
    }

    /// Decode from bytes, rejecting other save versions.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::Serialization`] for malformed data and
    /// [`FormationError::SaveVersionMismatch`] for another version.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let save: Self = bincode::deserialize(data)
            .map_err(|e| FormationError::Serialization(format!("Failed to decode save: {e}")))?;

        if save.version != SAVE_VERSION {
            return Err(FormationError::SaveVersionMismatch {
                expected: SAVE_VERSION,
                found: save.version,
            });
        }

        Ok(save)
    }
}

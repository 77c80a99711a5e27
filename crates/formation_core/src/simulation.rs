//! Simulation host.
//!
//! Owns the unit arena and every formation controller, routes global
//! events (ownership changes, renames, deaths) to the formations they
//! concern, and drives the periodic shape update from [`Simulation::tick`].
//!
//! # Determinism
//!
//! - No floating-point math (uses fixed-point via [`Fixed`])
//! - No system randomness (each formation carries a seeded generator)
//! - Units iterate in sorted id order, formations live in a `BTreeMap`
//!
//! # Example
//!
//! ```
//! use formation_core::data::FormationTemplate;
//! use formation_core::math::{Fixed, Vec2Fixed};
//! use formation_core::components::UnitMotion;
//! use formation_core::simulation::{EntitySpawnParams, Simulation};
//!
//! let mut sim = Simulation::new();
//! let units: Vec<_> = (0..4)
//!     .map(|i| {
//!         sim.spawn_unit(EntitySpawnParams {
//!             position: Some(Vec2Fixed::from_ints(i * 2, 0)),
//!             owner: Some(1),
//!             motion: Some(UnitMotion::new(Fixed::from_num(9), Fixed::ONE)),
//!             ..Default::default()
//!         })
//!     })
//!     .collect();
//!
//! let formation = sim
//!     .create_formation(FormationTemplate::box_formation(), Some(1), &units)
//!     .unwrap();
//! assert_eq!(sim.formation(formation).unwrap().member_count(), 4);
//!
//! sim.tick(1000);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::components::{
    AuraBuffs, ClassTags, EntityId, Footprint, FormationAura, Order, Placement, PlayerId, UnitAi,
    UnitMotion, Visual,
};
use crate::data::FormationTemplate;
use crate::error::{FormationError, Result};
use crate::formation::{Formation, MembershipOutcome};
use crate::math::{Fixed, Vec2Fixed};
use crate::motion::PassabilityClasses;
use crate::save::{SaveGame, SAVE_VERSION};

/// Interval between shape updates in milliseconds.
pub const SHAPE_UPDATE_INTERVAL_MS: u32 = 1000;

/// A unit with optional components.
///
/// Only components that are `Some` are active for this entity. A missing
/// component means the unit lacks that capability and is skipped by
/// whatever needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier for this entity.
    pub id: EntityId,
    /// Owning player.
    pub owner: Option<PlayerId>,
    /// World placement.
    pub placement: Option<Placement>,
    /// Movement capability.
    pub motion: Option<UnitMotion>,
    /// Obstruction footprint.
    pub footprint: Option<Footprint>,
    /// Identity classes.
    pub classes: Option<ClassTags>,
    /// Formation aura granted to formation-mates.
    pub aura: Option<FormationAura>,
    /// Formation auras currently received.
    pub aura_buffs: Option<AuraBuffs>,
    /// Animation hook.
    pub visual: Option<Visual>,
    /// Order queue and formation link.
    pub ai: Option<UnitAi>,
}

impl Entity {
    /// Create a new entity with the given ID and no components.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            owner: None,
            placement: None,
            motion: None,
            footprint: None,
            classes: None,
            aura: None,
            aura_buffs: None,
            visual: None,
            ai: None,
        }
    }
}

/// Parameters for spawning a new unit.
#[derive(Debug, Clone, Default)]
pub struct EntitySpawnParams {
    /// Initial position; units without one are not placed in the world.
    pub position: Option<Vec2Fixed>,
    /// Initial facing vector.
    pub facing: Option<Vec2Fixed>,
    /// Owning player.
    pub owner: Option<PlayerId>,
    /// Movement capability. Movable units also get an order queue.
    pub motion: Option<UnitMotion>,
    /// Obstruction footprint.
    pub footprint: Option<Footprint>,
    /// Identity classes.
    pub classes: Option<ClassTags>,
    /// Formation aura.
    pub aura: Option<FormationAura>,
}

/// Storage for all units.
///
/// Uses a `HashMap` for O(1) lookup by ID, with deterministic iteration
/// via sorted keys. Formation controllers draw their ids from the same
/// allocator so that ids never collide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStorage {
    entities: HashMap<EntityId, Entity>,
    next_id: EntityId,
}

impl EntityStorage {
    /// Create empty entity storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild storage from saved entities.
    #[must_use]
    pub fn from_parts(entities: Vec<Entity>, next_id: EntityId) -> Self {
        Self {
            entities: entities.into_iter().map(|e| (e.id, e)).collect(),
            next_id,
        }
    }

    /// Reserve an id without inserting an entity.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Next id the allocator will hand out.
    #[must_use]
    pub const fn next_id(&self) -> EntityId {
        self.next_id
    }

    /// Insert a new entity and return its ID.
    pub fn insert(&mut self, mut entity: Entity) -> EntityId {
        let id = self.allocate_id();
        entity.id = id;
        self.entities.insert(id, entity);
        id
    }

    /// Remove an entity by ID.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Get an entity by ID.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Check if an entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Get the number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Get sorted entity IDs for deterministic iteration.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Entities in id order.
    #[must_use]
    pub fn sorted_entities(&self) -> Vec<&Entity> {
        self.sorted_ids()
            .into_iter()
            .filter_map(|id| self.entities.get(&id))
            .collect()
    }
}

/// Two twin formations merged during a shape update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormationMerge {
    /// Formation that absorbed the members.
    pub survivor: EntityId,
    /// Twin that was destroyed.
    pub absorbed: EntityId,
    /// Units moved across.
    pub members_moved: usize,
}

/// Events generated during a simulation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// Shape updates run this tick.
    pub shape_updates: u32,
    /// Twin merges.
    pub merges: Vec<FormationMerge>,
    /// Formations that switched between columnar and regular shape.
    pub shape_changes: Vec<(EntityId, bool)>,
    /// Formations destroyed this tick.
    pub destroyed: Vec<EntityId>,
}

/// Host simulation: units, formations and the shape-update clock.
#[derive(Debug, Clone)]
pub struct Simulation {
    tick: u64,
    seed: u64,
    shape_update_accumulator: u32,
    units: EntityStorage,
    formations: BTreeMap<EntityId, Formation>,
    players: BTreeMap<PlayerId, String>,
    passability: PassabilityClasses,
}

impl Simulation {
    /// Create an empty simulation with seed 0.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create an empty simulation whose formations jitter from `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            tick: 0,
            seed,
            shape_update_accumulator: 0,
            units: EntityStorage::new(),
            formations: BTreeMap::new(),
            players: BTreeMap::new(),
            passability: PassabilityClasses::default(),
        }
    }

    /// Get the current tick number.
    #[must_use]
    pub const fn get_tick(&self) -> u64 {
        self.tick
    }

    /// Get a reference to the unit storage.
    #[must_use]
    pub fn units(&self) -> &EntityStorage {
        &self.units
    }

    /// Get a unit by ID.
    #[must_use]
    pub fn get_unit(&self, id: EntityId) -> Option<&Entity> {
        self.units.get(id)
    }

    /// Get a formation by controller ID.
    #[must_use]
    pub fn formation(&self, id: EntityId) -> Option<&Formation> {
        self.formations.get(&id)
    }

    /// All formations in id order.
    pub fn formations(&self) -> impl Iterator<Item = &Formation> {
        self.formations.values()
    }

    /// Formation a unit belongs to.
    ///
    /// Looked up through membership rather than the unit's AI, so members
    /// without a `UnitAi` are found too.
    #[must_use]
    pub fn formation_of(&self, unit: EntityId) -> Option<EntityId> {
        self.formations
            .values()
            .find(|formation| formation.contains(unit))
            .map(Formation::id)
    }

    /// Record the civilization of a player (used as formation visual variant).
    pub fn set_player_civ(&mut self, player: PlayerId, civ: impl Into<String>) {
        self.players.insert(player, civ.into());
    }

    /// Replace the passability class table.
    pub fn set_passability_classes(&mut self, classes: PassabilityClasses) {
        self.passability = classes;
    }

    /// Passability class table.
    #[must_use]
    pub const fn passability_classes(&self) -> &PassabilityClasses {
        &self.passability
    }

    // ------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------

    /// Spawn a unit.
    pub fn spawn_unit(&mut self, params: EntitySpawnParams) -> EntityId {
        let mut entity = Entity::new(0);

        if let Some(position) = params.position {
            let mut placement = Placement::new(position);
            if let Some(facing) = params.facing {
                placement = placement.with_facing(facing);
            }
            entity.placement = Some(placement);
            entity.visual = Some(Visual::default());
        }

        if let Some(motion) = params.motion {
            entity.motion = Some(motion);
            entity.ai = Some(UnitAi::new());
        }

        entity.owner = params.owner;
        entity.footprint = params.footprint;
        entity.classes = params.classes;
        entity.aura = params.aura;

        self.units.insert(entity)
    }

    /// Remove a unit, detaching it from its formation first.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::UnitNotFound`] if the unit doesn't exist.
    pub fn despawn_unit(&mut self, id: EntityId) -> Result<()> {
        if !self.units.contains(id) {
            return Err(FormationError::UnitNotFound(id));
        }
        self.detach_from_formation(id);
        self.units.remove(id);
        Ok(())
    }

    /// Replace a unit by a new entity (promotion, upgrade).
    ///
    /// The new unit takes over the old one's formation slot. Returns the
    /// new unit's id.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::UnitNotFound`] if `old` doesn't exist.
    pub fn rename_entity(&mut self, old: EntityId, params: EntitySpawnParams) -> Result<EntityId> {
        if !self.units.contains(old) {
            return Err(FormationError::UnitNotFound(old));
        }
        let controller = self.formation_of(old);

        let new = self.spawn_unit(params);
        if let Some(formation) = controller.and_then(|f| self.formations.get_mut(&f)) {
            formation.rename_member(&mut self.units, &self.passability, old, new);
        }
        self.units.remove(old);

        tracing::debug!(old, new, "Entity renamed");
        Ok(new)
    }

    /// Change the owner of a unit or formation.
    ///
    /// A unit changing hands leaves its formation. A formation changing
    /// hands takes the new owner's civilization as visual variant.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::UnitNotFound`] if the id is neither a unit
    /// nor a formation.
    pub fn change_owner(&mut self, id: EntityId, owner: Option<PlayerId>) -> Result<()> {
        if let Some(formation) = self.formations.get_mut(&id) {
            formation.set_owner(owner);
            let civ = owner.and_then(|p| self.players.get(&p)).cloned();
            formation.set_visual_variant(civ);
            return Ok(());
        }

        let unit = self.units.get_mut(id).ok_or(FormationError::UnitNotFound(id))?;
        unit.owner = owner;
        self.detach_from_formation(id);
        Ok(())
    }

    fn detach_from_formation(&mut self, unit: EntityId) {
        let Some(formation_id) = self.formation_of(unit) else {
            return;
        };
        let Some(formation) = self.formations.get_mut(&formation_id) else {
            return;
        };
        if formation.remove_members(&mut self.units, &self.passability, &[unit], false)
            == MembershipOutcome::Disbanded
        {
            self.destroy_formation(formation_id);
        }
    }

    // ------------------------------------------------------------------
    // Formations
    // ------------------------------------------------------------------

    /// Create a formation from a set of units.
    ///
    /// Units leave any previous formation first. Returns the controller id.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is invalid, a unit doesn't exist,
    /// or fewer units than the template requires are given.
    pub fn create_formation(
        &mut self,
        template: FormationTemplate,
        owner: Option<PlayerId>,
        members: &[EntityId],
    ) -> Result<EntityId> {
        template.validate()?;
        let members = self.checked_units(members)?;
        if members.len() < template.required_member_count {
            return Err(FormationError::TooFewMembers {
                required: template.required_member_count,
                provided: members.len(),
            });
        }

        for &member in &members {
            self.detach_from_formation(member);
        }

        let id = self.units.allocate_id();
        let mut formation = Formation::new(id, template, owner, self.seed);
        formation.set_members(&mut self.units, &self.passability, &members)?;
        formation.set_visual_variant(owner.and_then(|p| self.players.get(&p)).cloned());
        formation.move_members_into_formation(&mut self.units, false, true, None);
        self.formations.insert(id, formation);

        tracing::debug!(formation = id, members = members.len(), "Formation created");
        Ok(id)
    }

    /// Add units to a formation, taking them out of any other formation.
    ///
    /// # Errors
    ///
    /// Returns an error if the formation or a unit doesn't exist.
    pub fn add_members(&mut self, formation: EntityId, members: &[EntityId]) -> Result<()> {
        if !self.formations.contains_key(&formation) {
            return Err(FormationError::FormationNotFound(formation));
        }
        let members = self.checked_units(members)?;

        for &member in &members {
            if self.formation_of(member).is_some_and(|f| f != formation) {
                self.detach_from_formation(member);
            }
        }

        let target = self
            .formations
            .get_mut(&formation)
            .ok_or(FormationError::FormationNotFound(formation))?;
        target.add_members(&mut self.units, &self.passability, &members);
        Ok(())
    }

    /// Remove units from a formation. A disbanded formation is destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::FormationNotFound`] if the formation doesn't exist.
    pub fn remove_members(&mut self, formation: EntityId, members: &[EntityId]) -> Result<MembershipOutcome> {
        let target = self
            .formations
            .get_mut(&formation)
            .ok_or(FormationError::FormationNotFound(formation))?;
        let outcome = target.remove_members(&mut self.units, &self.passability, members, false);
        if outcome == MembershipOutcome::Disbanded {
            self.destroy_formation(formation);
        }
        Ok(outcome)
    }

    /// Disband and destroy a formation.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::FormationNotFound`] if the formation doesn't exist.
    pub fn disband_formation(&mut self, formation: EntityId) -> Result<()> {
        let target = self
            .formations
            .get_mut(&formation)
            .ok_or(FormationError::FormationNotFound(formation))?;
        target.disband(&mut self.units);
        self.destroy_formation(formation);
        Ok(())
    }

    /// Switch a formation to another template.
    ///
    /// A new controller takes over the same members; the old one is
    /// destroyed. Returns the new controller id.
    ///
    /// # Errors
    ///
    /// Returns an error if the formation doesn't exist, the template is
    /// invalid or requires more members than the formation has.
    pub fn reform(&mut self, formation: EntityId, template: FormationTemplate) -> Result<EntityId> {
        let current = self
            .formations
            .get(&formation)
            .ok_or(FormationError::FormationNotFound(formation))?;
        template.validate()?;
        if current.member_count() < template.required_member_count {
            return Err(FormationError::TooFewMembers {
                required: template.required_member_count,
                provided: current.member_count(),
            });
        }

        let members = current.members().to_vec();
        let owner = current.owner();
        self.disband_formation(formation)?;
        self.create_formation(template, owner, &members)
    }

    /// Allow or suppress relayout of a formation.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::FormationNotFound`] if the formation doesn't exist.
    pub fn set_rearrange(&mut self, formation: EntityId, rearrange: bool) -> Result<()> {
        self.formation_mut(formation)?.set_rearrange(rearrange);
        Ok(())
    }

    /// Link formations as twins of each other.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::FormationNotFound`] if any id is not a formation.
    pub fn register_twins(&mut self, formations: &[EntityId]) -> Result<()> {
        if let Some(&missing) = formations.iter().find(|id| !self.formations.contains_key(id)) {
            return Err(FormationError::FormationNotFound(missing));
        }
        for id in formations {
            if let Some(formation) = self.formations.get_mut(id) {
                formation.set_twin_formations(formations);
            }
        }
        Ok(())
    }

    /// Order a formation to walk along waypoints. An empty path stops it.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::FormationNotFound`] if the formation doesn't exist.
    pub fn order_move(
        &mut self,
        formation: EntityId,
        waypoints: Vec<Vec2Fixed>,
        variant: Option<String>,
    ) -> Result<()> {
        let target = self
            .formations
            .get_mut(&formation)
            .ok_or(FormationError::FormationNotFound(formation))?;
        if waypoints.is_empty() {
            target.clear_destination();
        } else {
            target.set_destination(waypoints);
        }
        target.move_members_into_formation(&mut self.units, false, true, variant);
        Ok(())
    }

    /// Turn a formation to face a new heading.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::FormationNotFound`] if the formation doesn't exist.
    pub fn turn_formation(&mut self, formation: EntityId, facing: Vec2Fixed) -> Result<()> {
        let target = self
            .formations
            .get_mut(&formation)
            .ok_or(FormationError::FormationNotFound(formation))?;
        target.turn_to(&mut self.units, facing);
        Ok(())
    }

    /// Mark a member as having reached its slot.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::FormationNotFound`] if the formation doesn't exist.
    pub fn set_finished(&mut self, formation: EntityId, member: EntityId) -> Result<()> {
        self.formation_mut(formation)?.set_finished(member);
        Ok(())
    }

    fn formation_mut(&mut self, formation: EntityId) -> Result<&mut Formation> {
        self.formations
            .get_mut(&formation)
            .ok_or(FormationError::FormationNotFound(formation))
    }

    fn checked_units(&self, ids: &[EntityId]) -> Result<Vec<EntityId>> {
        let mut checked = Vec::with_capacity(ids.len());
        for &id in ids {
            if !self.units.contains(id) {
                return Err(FormationError::UnitNotFound(id));
            }
            if !checked.contains(&id) {
                checked.push(id);
            }
        }
        Ok(checked)
    }

    fn destroy_formation(&mut self, formation: EntityId) {
        if self.formations.remove(&formation).is_none() {
            return;
        }
        for other in self.formations.values_mut() {
            other.remove_twin(formation);
        }
        tracing::debug!(formation, "Formation destroyed");
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the simulation clock.
    ///
    /// Every [`SHAPE_UPDATE_INTERVAL_MS`] of accumulated time runs one
    /// shape update over all formations in id order.
    pub fn tick(&mut self, delta_ms: u32) -> TickEvents {
        let mut events = TickEvents::default();
        self.tick += 1;

        self.shape_update_accumulator = self.shape_update_accumulator.saturating_add(delta_ms);
        while self.shape_update_accumulator >= SHAPE_UPDATE_INTERVAL_MS {
            self.shape_update_accumulator -= SHAPE_UPDATE_INTERVAL_MS;
            self.run_shape_update(&mut events);
        }

        #[cfg(feature = "debug-validation")]
        {
            let hash = self.state_hash();
            tracing::debug!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }

        events
    }

    fn run_shape_update(&mut self, events: &mut TickEvents) {
        events.shape_updates += 1;
        let ids: Vec<EntityId> = self.formations.keys().copied().collect();

        for id in ids {
            let Some(formation) = self.formations.get(&id) else {
                continue;
            };
            if !formation.is_rearranging() {
                continue;
            }

            let twins: Vec<EntityId> = formation.twins().range(id + 1..).copied().collect();
            for twin in twins {
                if let Some(merge) = self.try_merge(id, twin) {
                    events.destroyed.push(merge.absorbed);
                    events.merges.push(merge);
                }
            }

            if let Some(formation) = self.formations.get_mut(&id) {
                if formation.update_shape(&mut self.units) {
                    events.shape_changes.push((id, formation.is_columnar()));
                }
            }
        }
    }

    fn try_merge(&mut self, survivor: EntityId, twin: EntityId) -> Option<FormationMerge> {
        let a = self.formations.get(&survivor)?;
        let b = self.formations.get(&twin)?;

        let half_extent = |f: &Formation| {
            let (width, depth) = f.size();
            width.max(depth) / Fixed::from_num(2)
        };
        let reach = half_extent(a) + half_extent(b) + a.template().formation_separation;
        let distance = a.placement().position.distance(b.placement().position);
        if distance > reach {
            return None;
        }

        let mut absorbed = self.formations.remove(&twin)?;
        let members = absorbed.members().to_vec();
        absorbed.disband(&mut self.units);
        for other in self.formations.values_mut() {
            other.remove_twin(twin);
        }

        let target = self.formations.get_mut(&survivor)?;
        target.add_members(&mut self.units, &self.passability, &members);

        tracing::debug!(
            formation = survivor,
            twin,
            members = members.len(),
            "Twin formations merged"
        );
        Some(FormationMerge {
            survivor,
            absorbed: twin,
            members_moved: members.len(),
        })
    }

    // ------------------------------------------------------------------
    // Hashing and persistence
    // ------------------------------------------------------------------

    /// Calculate a hash of the current simulation state.
    ///
    /// Two simulations with identical state produce identical hashes.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);
        self.shape_update_accumulator.hash(&mut hasher);

        let ids = self.units.sorted_ids();
        ids.len().hash(&mut hasher);
        for id in ids {
            let Some(unit) = self.units.get(id) else {
                continue;
            };
            id.hash(&mut hasher);
            unit.owner.hash(&mut hasher);

            if let Some(placement) = &unit.placement {
                placement.hash(&mut hasher);
            }
            if let Some(ai) = &unit.ai {
                ai.formation_controller.hash(&mut hasher);
                ai.orders.len().hash(&mut hasher);
                if let Some(Order::FormationWalk(walk)) = ai.current() {
                    walk.x.to_bits().hash(&mut hasher);
                    walk.y.to_bits().hash(&mut hasher);
                }
            }
            if let Some(buffs) = &unit.aura_buffs {
                buffs.sources.len().hash(&mut hasher);
            }
        }

        self.formations.len().hash(&mut hasher);
        for formation in self.formations.values() {
            formation.id().hash(&mut hasher);
            formation.members().hash(&mut hasher);
            formation.placement().hash(&mut hasher);
            formation.is_columnar().hash(&mut hasher);
            let (width, depth) = formation.size();
            width.to_bits().hash(&mut hasher);
            depth.to_bits().hash(&mut hasher);
            for slot in formation.offsets().unwrap_or_default() {
                slot.offset.hash(&mut hasher);
                slot.owner.hash(&mut hasher);
            }
        }

        hasher.finish()
    }

    /// Capture the whole simulation as a save game.
    #[must_use]
    pub fn to_save(&self) -> SaveGame {
        SaveGame {
            version: SAVE_VERSION,
            tick: self.tick,
            seed: self.seed,
            shape_update_accumulator: self.shape_update_accumulator,
            next_id: self.units.next_id(),
            units: self.units.sorted_entities().into_iter().cloned().collect(),
            formations: self.formations.values().map(Formation::snapshot).collect(),
            players: self.players.clone(),
            passability: self.passability.clone(),
        }
    }

    /// Rebuild a simulation from a save game.
    #[must_use]
    pub fn from_save(save: SaveGame) -> Self {
        Self {
            tick: save.tick,
            seed: save.seed,
            shape_update_accumulator: save.shape_update_accumulator,
            units: EntityStorage::from_parts(save.units, save.next_id),
            formations: save
                .formations
                .into_iter()
                .map(|snapshot| (snapshot.id, Formation::from_snapshot(snapshot)))
                .collect(),
            players: save.players,
            passability: save.passability,
        }
    }

    /// Serialize the simulation state.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        self.to_save().encode()
    }

    /// Deserialize simulation state from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or from another save version.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        SaveGame::decode(data).map(Self::from_save)
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soldier(sim: &mut Simulation, x: i32, y: i32, owner: PlayerId) -> EntityId {
        sim.spawn_unit(EntitySpawnParams {
            position: Some(Vec2Fixed::from_ints(x, y)),
            owner: Some(owner),
            motion: Some(UnitMotion::new(Fixed::from_num(9), Fixed::ONE)),
            ..Default::default()
        })
    }

    fn squad(sim: &mut Simulation, count: i32, x: i32) -> Vec<EntityId> {
        (0..count).map(|i| soldier(sim, x + i, 0, 1)).collect()
    }

    #[test]
    fn test_spawn_unit_components() {
        let mut sim = Simulation::new();
        let id = soldier(&mut sim, 3, 4, 2);
        let unit = sim.get_unit(id).expect("spawned");
        assert_eq!(unit.owner, Some(2));
        assert!(unit.ai.is_some());
        assert!(unit.visual.is_some());
        assert_eq!(unit.placement.map(|p| p.position), Some(Vec2Fixed::from_ints(3, 4)));

        let rock = sim.spawn_unit(EntitySpawnParams::default());
        assert!(sim.get_unit(rock).is_some_and(|u| u.ai.is_none() && u.placement.is_none()));
    }

    #[test]
    fn test_create_formation_rejects_bad_input() {
        let mut sim = Simulation::new();
        let ids = squad(&mut sim, 1, 0);

        assert!(matches!(
            sim.create_formation(FormationTemplate::new("Box"), Some(1), &ids),
            Err(FormationError::TooFewMembers { required: 2, provided: 1 })
        ));
        assert!(matches!(
            sim.create_formation(FormationTemplate::new("Box"), Some(1), &[ids[0], 404]),
            Err(FormationError::UnitNotFound(404))
        ));
        let broken = FormationTemplate {
            required_member_count: 0,
            ..FormationTemplate::new("Broken")
        };
        assert!(matches!(
            sim.create_formation(broken, Some(1), &ids),
            Err(FormationError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn test_units_belong_to_one_formation() {
        let mut sim = Simulation::new();
        let ids = squad(&mut sim, 4, 0);
        let first = sim
            .create_formation(FormationTemplate::new("Box"), Some(1), &ids)
            .expect("created");

        let second = sim
            .create_formation(FormationTemplate::new("Box"), Some(1), &ids[..2])
            .expect("created");

        assert_eq!(sim.formation(first).map(Formation::member_count), Some(2));
        assert_eq!(sim.formation(second).map(Formation::member_count), Some(2));
        assert_eq!(sim.formation_of(ids[0]), Some(second));
        assert_eq!(sim.formation_of(ids[3]), Some(first));
    }

    #[test]
    fn test_stealing_last_members_destroys_old_formation() {
        let mut sim = Simulation::new();
        let ids = squad(&mut sim, 2, 0);
        let first = sim
            .create_formation(FormationTemplate::new("Box"), Some(1), &ids)
            .expect("created");
        let extra = squad(&mut sim, 1, 10);

        let second = sim
            .create_formation(FormationTemplate::new("Box"), Some(1), &[ids[0], extra[0]])
            .expect("created");

        assert!(sim.formation(first).is_none());
        assert_eq!(sim.formation_of(ids[1]), None);
        assert_eq!(sim.formation_of(ids[0]), Some(second));
    }

    #[test]
    fn test_owner_change_removes_member() {
        let mut sim = Simulation::new();
        let ids = squad(&mut sim, 3, 0);
        let formation = sim
            .create_formation(FormationTemplate::new("Box"), Some(1), &ids)
            .expect("created");

        sim.change_owner(ids[0], Some(2)).expect("unit exists");

        assert_eq!(sim.formation(formation).map(Formation::member_count), Some(2));
        assert_eq!(sim.formation_of(ids[0]), None);
    }

    #[test]
    fn test_owner_change_of_formation_sets_civ_variant() {
        let mut sim = Simulation::new();
        sim.set_player_civ(1, "athen");
        sim.set_player_civ(2, "spart");
        let ids = squad(&mut sim, 2, 0);
        let formation = sim
            .create_formation(FormationTemplate::new("Box"), Some(1), &ids)
            .expect("created");
        assert_eq!(
            sim.formation(formation).and_then(|f| f.visual().variant.clone()),
            Some("athen".to_string())
        );

        sim.change_owner(formation, Some(2)).expect("formation exists");

        let formation = sim.formation(formation).expect("still there");
        assert_eq!(formation.owner(), Some(2));
        assert_eq!(formation.visual().variant.as_deref(), Some("spart"));
    }

    #[test]
    fn test_despawn_member_disbands_pair() {
        let mut sim = Simulation::new();
        let ids = squad(&mut sim, 2, 0);
        let formation = sim
            .create_formation(FormationTemplate::new("Box"), Some(1), &ids)
            .expect("created");

        sim.despawn_unit(ids[0]).expect("unit exists");

        assert!(sim.formation(formation).is_none());
        assert_eq!(sim.formation_of(ids[1]), None);
        assert!(matches!(sim.despawn_unit(ids[0]), Err(FormationError::UnitNotFound(_))));
    }

    #[test]
    fn test_shape_update_runs_once_per_interval() {
        let mut sim = Simulation::new();
        assert_eq!(sim.tick(400).shape_updates, 0);
        assert_eq!(sim.tick(400).shape_updates, 0);
        assert_eq!(sim.tick(400).shape_updates, 1);
        assert_eq!(sim.tick(2000).shape_updates, 2);
        assert_eq!(sim.get_tick(), 4);
    }

    #[test]
    fn test_long_move_goes_columnar() {
        let mut sim = Simulation::new();
        let ids = squad(&mut sim, 6, 0);
        let formation = sim
            .create_formation(FormationTemplate::box_formation(), Some(1), &ids)
            .expect("created");

        sim.order_move(formation, vec![Vec2Fixed::from_ints(0, 400)], None)
            .expect("formation exists");
        let events = sim.tick(SHAPE_UPDATE_INTERVAL_MS);

        assert_eq!(events.shape_changes, vec![(formation, true)]);
        assert!(sim.formation(formation).is_some_and(Formation::is_columnar));
    }

    #[test]
    fn test_reform_moves_members_to_new_controller() {
        let mut sim = Simulation::new();
        let ids = squad(&mut sim, 5, 0);
        let old = sim
            .create_formation(FormationTemplate::box_formation(), Some(1), &ids)
            .expect("created");

        let new = sim.reform(old, FormationTemplate::triangle()).expect("reformed");

        assert_ne!(old, new);
        assert!(sim.formation(old).is_none());
        let formation = sim.formation(new).expect("created");
        assert_eq!(formation.template().name, "Triangle");
        assert_eq!(formation.member_count(), 5);
        assert!(ids.iter().all(|&id| sim.formation_of(id) == Some(new)));
    }

    #[test]
    fn test_missing_formation_errors() {
        let mut sim = Simulation::new();
        assert!(matches!(sim.disband_formation(9), Err(FormationError::FormationNotFound(9))));
        assert!(matches!(sim.set_rearrange(9, false), Err(FormationError::FormationNotFound(9))));
        assert!(matches!(sim.register_twins(&[9]), Err(FormationError::FormationNotFound(9))));
        assert!(matches!(sim.change_owner(9, None), Err(FormationError::UnitNotFound(9))));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut sim = Simulation::with_seed(11);
        let ids = squad(&mut sim, 5, 0);
        let formation = sim
            .create_formation(FormationTemplate::box_formation(), Some(1), &ids)
            .expect("created");
        sim.set_finished(formation, ids[0]).expect("formation exists");
        sim.tick(500);

        let bytes = sim.serialize().expect("serializes");
        let restored = Simulation::deserialize(&bytes).expect("deserializes");

        assert_eq!(sim.state_hash(), restored.state_hash());
        assert_eq!(restored.formation(formation), sim.formation(formation));
        assert_eq!(restored.get_tick(), sim.get_tick());
    }
}

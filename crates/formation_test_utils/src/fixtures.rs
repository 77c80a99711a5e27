//! Test fixtures and helpers.
//!
//! Pre-built unit configurations and formation scenarios for consistent
//! testing.

use fixed::types::I32F32;
use formation_core::components::{ClassTags, EntityId, Footprint, FormationAura, PlayerId, UnitMotion};
use formation_core::data::FormationTemplate;
use formation_core::layout::LayoutMember;
use formation_core::math::Vec2Fixed;
use formation_core::simulation::{EntitySpawnParams, Simulation};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Spearman: walk speed 9, 1x1 footprint.
#[must_use]
pub fn infantry(position: Vec2Fixed, owner: PlayerId) -> EntitySpawnParams {
    EntitySpawnParams {
        position: Some(position),
        owner: Some(owner),
        motion: Some(UnitMotion::new(fixed(9), fixed(2))),
        footprint: Some(Footprint::new(fixed(1), fixed(1))),
        classes: Some(ClassTags::new(["Infantry", "Melee"])),
        ..Default::default()
    }
}

/// Archer: walk speed 9, 1x1 footprint, ranged.
#[must_use]
pub fn archer(position: Vec2Fixed, owner: PlayerId) -> EntitySpawnParams {
    EntitySpawnParams {
        classes: Some(ClassTags::new(["Infantry", "Ranged"])),
        ..infantry(position, owner)
    }
}

/// Horseman: fast, wider footprint.
#[must_use]
pub fn cavalry(position: Vec2Fixed, owner: PlayerId) -> EntitySpawnParams {
    EntitySpawnParams {
        position: Some(position),
        owner: Some(owner),
        motion: Some(UnitMotion::new(fixed(16), fixed(4))),
        footprint: Some(Footprint::new(fixed(2), fixed(3))),
        classes: Some(ClassTags::new(["Cavalry", "Melee"])),
        ..Default::default()
    }
}

/// Battering ram: slow, needs the `large` passability class.
#[must_use]
pub fn ram(position: Vec2Fixed, owner: PlayerId) -> EntitySpawnParams {
    EntitySpawnParams {
        position: Some(position),
        owner: Some(owner),
        motion: Some(UnitMotion::new(fixed(5), fixed(1)).with_passability("large")),
        footprint: Some(Footprint::new(fixed(4), fixed(6))),
        classes: Some(ClassTags::new(["Siege"])),
        ..Default::default()
    }
}

/// Standard bearer: infantry carrying a formation aura.
#[must_use]
pub fn standard_bearer(position: Vec2Fixed, owner: PlayerId) -> EntitySpawnParams {
    EntitySpawnParams {
        aura: Some(FormationAura::new("standard")),
        ..infantry(position, owner)
    }
}

/// Statue: placed in the world but cannot move, so it gets no AI.
#[must_use]
pub fn statue(position: Vec2Fixed, owner: PlayerId) -> EntitySpawnParams {
    EntitySpawnParams {
        position: Some(position),
        owner: Some(owner),
        footprint: Some(Footprint::new(fixed(1), fixed(1))),
        ..Default::default()
    }
}

/// Spawn `count` units on a row starting at `origin`, two units apart.
pub fn spawn_row<F>(sim: &mut Simulation, count: usize, origin: Vec2Fixed, make: F) -> Vec<EntityId>
where
    F: Fn(Vec2Fixed) -> EntitySpawnParams,
{
    (0..count)
        .map(|i| {
            let offset = Vec2Fixed::new(fixed(2) * I32F32::from_num(i), I32F32::ZERO);
            sim.spawn_unit(make(origin + offset))
        })
        .collect()
}

/// Identical layout members (same footprint, no classes) at the origin.
#[must_use]
pub fn uniform_layout_members(count: usize, footprint: Footprint) -> Vec<LayoutMember<'static>> {
    (0..count)
        .map(|i| LayoutMember {
            id: i as EntityId + 1,
            position: Vec2Fixed::ZERO,
            footprint: Some(footprint),
            classes: None,
        })
        .collect()
}

/// A simulation holding one formation.
#[derive(Debug)]
pub struct FormationScenario {
    /// The simulation.
    pub sim: Simulation,
    /// Formation controller id.
    pub formation: EntityId,
    /// Member ids in spawn order.
    pub members: Vec<EntityId>,
}

/// Builder for [`FormationScenario`].
#[derive(Debug, Clone)]
pub struct FormationScenarioBuilder {
    template: FormationTemplate,
    members: usize,
    origin: Vec2Fixed,
    owner: PlayerId,
    seed: u64,
}

impl FormationScenarioBuilder {
    /// Start a scenario with a template.
    #[must_use]
    pub fn new(template: FormationTemplate) -> Self {
        Self {
            template,
            members: 9,
            origin: Vec2Fixed::ZERO,
            owner: 1,
            seed: 0,
        }
    }

    /// Set the number of infantry members.
    #[must_use]
    pub fn members(mut self, count: usize) -> Self {
        self.members = count;
        self
    }

    /// Set where the first member stands.
    #[must_use]
    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.origin = Vec2Fixed::from_ints(x, y);
        self
    }

    /// Set the owning player.
    #[must_use]
    pub fn owner(mut self, owner: PlayerId) -> Self {
        self.owner = owner;
        self
    }

    /// Set the simulation seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Spawn the members and form them up.
    ///
    /// # Panics
    ///
    /// Panics if the formation cannot be created (invalid template or too
    /// few members).
    #[must_use]
    pub fn build(self) -> FormationScenario {
        let mut sim = Simulation::with_seed(self.seed);
        let owner = self.owner;
        let members = spawn_row(&mut sim, self.members, self.origin, |p| infantry(p, owner));
        let formation = sim
            .create_formation(self.template, Some(owner), &members)
            .expect("scenario formation should be valid");

        tracing::debug!(formation, members = members.len(), "Scenario built");
        FormationScenario {
            sim,
            formation,
            members,
        }
    }
}

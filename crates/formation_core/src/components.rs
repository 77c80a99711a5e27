//! Host component definitions.
//!
//! Components are pure data owned by the host entity arena. The formation
//! controller reads and writes them through the narrow capabilities it
//! needs: placement, motion, footprint, class tags, group auras, visuals
//! and the per-unit order queue.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::math::{fixed_serde, Fixed, Vec2Fixed};

/// Unique identifier for entities (units and formation controllers).
pub type EntityId = u64;

/// Player index. Entities without an owner are dead or unowned.
pub type PlayerId = u8;

/// Position and heading of an entity in world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    /// World position.
    pub position: Vec2Fixed,
    /// Unit facing vector `(sin θ, cos θ)`.
    pub facing: Vec2Fixed,
    /// Whether the entity is currently placed in the world.
    pub in_world: bool,
}

impl Placement {
    /// Create an in-world placement facing the default direction.
    #[must_use]
    pub const fn new(position: Vec2Fixed) -> Self {
        Self {
            position,
            facing: Vec2Fixed::FORWARD,
            in_world: true,
        }
    }

    /// Builder method to set the facing.
    ///
    /// A zero vector keeps the default facing.
    #[must_use]
    pub fn with_facing(mut self, facing: Vec2Fixed) -> Self {
        let facing = facing.normalize();
        if !facing.is_zero() {
            self.facing = facing;
        }
        self
    }

    /// Place the entity somewhere in the world.
    pub fn jump_to(&mut self, position: Vec2Fixed) {
        self.position = position;
        self.in_world = true;
    }

    /// Take the entity out of the world (garrisoned, destroyed, inert).
    pub fn move_out_of_world(&mut self) {
        self.in_world = false;
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::new(Vec2Fixed::ZERO)
    }
}

/// Default passability class name.
pub const DEFAULT_PASSABILITY: &str = "default";

/// Movement capability of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMotion {
    /// Walk speed in world units per second.
    #[serde(with = "fixed_serde")]
    pub walk_speed: Fixed,
    /// Acceleration in world units per second squared.
    #[serde(with = "fixed_serde")]
    pub acceleration: Fixed,
    /// Name of the terrain passability class the unit paths with.
    pub passability: String,
}

impl UnitMotion {
    /// Create a motion capability on the default passability class.
    #[must_use]
    pub fn new(walk_speed: Fixed, acceleration: Fixed) -> Self {
        Self {
            walk_speed,
            acceleration,
            passability: DEFAULT_PASSABILITY.to_string(),
        }
    }

    /// Builder method to set the passability class.
    #[must_use]
    pub fn with_passability(mut self, passability: impl Into<String>) -> Self {
        self.passability = passability.into();
        self
    }
}

/// Obstruction footprint used to space slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    /// Side-to-side extent.
    #[serde(with = "fixed_serde")]
    pub width: Fixed,
    /// Front-to-back extent.
    #[serde(with = "fixed_serde")]
    pub depth: Fixed,
}

impl Footprint {
    /// Create a footprint.
    #[must_use]
    pub const fn new(width: Fixed, depth: Fixed) -> Self {
        Self { width, depth }
    }

    /// Footprint of a circular obstruction.
    #[must_use]
    pub fn circle(radius: Fixed) -> Self {
        let diameter = radius * Fixed::from_num(2);
        Self::new(diameter, diameter)
    }

    /// Fallback used when a member has no footprint data.
    pub const UNIT: Self = Self {
        width: Fixed::ONE,
        depth: Fixed::ONE,
    };
}

/// Identity classes of a unit ("Infantry", "Cavalry", "Ranged", ...).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassTags {
    /// Class names.
    pub classes: Vec<String>,
}

impl ClassTags {
    /// Create a tag set from names.
    #[must_use]
    pub fn new<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    /// Check whether the unit carries a class.
    #[must_use]
    pub fn has(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

/// Group-bonus aura carried by a unit, granted to its formation-mates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationAura {
    /// Aura template name.
    pub name: String,
}

impl FormationAura {
    /// Create an aura capability.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Formation auras currently affecting a unit, keyed by the granting unit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuraBuffs {
    /// Holder id to aura name.
    pub sources: BTreeMap<EntityId, String>,
}

impl AuraBuffs {
    /// Number of auras currently received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if no aura affects the unit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Check whether the aura of `holder` affects the unit.
    #[must_use]
    pub fn has_from(&self, holder: EntityId) -> bool {
        self.sources.contains_key(&holder)
    }
}

/// Animation hook of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Visual {
    /// Current animation variant, if any.
    pub variant: Option<String>,
}

/// Walk order relative to a formation controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationWalkOrder {
    /// Formation controller the offset is relative to.
    pub target: EntityId,
    /// Local side offset.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Local forward offset.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
    /// Whether the slot layout changed since the previous order.
    pub offsets_changed: bool,
    /// Animation variant requested by the issuing order.
    pub variant: Option<String>,
}

/// An order queued on a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    /// Walk to a world position.
    Walk(Vec2Fixed),
    /// Attack an entity.
    Attack(EntityId),
    /// Walk to a slot of a formation.
    FormationWalk(FormationWalkOrder),
}

/// Per-unit AI: order queue plus the controlling formation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnitAi {
    /// Outstanding orders, front is current.
    pub orders: VecDeque<Order>,
    /// Formation currently controlling this unit.
    pub formation_controller: Option<EntityId>,
}

impl UnitAi {
    /// Create an idle AI outside any formation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an order: appended when `queued`, otherwise replaces the queue.
    pub fn add_order(&mut self, order: Order, queued: bool) {
        if !queued {
            self.orders.clear();
        }
        self.orders.push_back(order);
    }

    /// Get the current order.
    #[must_use]
    pub fn current(&self) -> Option<&Order> {
        self.orders.front()
    }

    /// Number of outstanding orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Attach to or detach from a formation controller.
    pub fn set_formation_controller(&mut self, controller: Option<EntityId>) {
        self.formation_controller = controller;
    }

    /// Drop work orders that only make sense inside `formation`.
    pub fn update_work_orders(&mut self, formation: EntityId) {
        self.orders.retain(|order| match order {
            Order::FormationWalk(walk) => walk.target != formation,
            _ => true,
        });
    }
}

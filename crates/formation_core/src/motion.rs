//! Formation motion parameters.
//!
//! A formation moves like its least capable member: slowest walk speed,
//! weakest acceleration, and the passability class of the bulkiest unit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::components::{EntityId, DEFAULT_PASSABILITY};
use crate::data::FormationTemplate;
use crate::math::{fixed_serde, Fixed};
use crate::simulation::EntityStorage;

/// Movement capability of the formation controller itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationMotion {
    /// Effective walk speed.
    #[serde(with = "fixed_serde")]
    pub walk_speed: Fixed,
    /// Effective acceleration.
    #[serde(with = "fixed_serde")]
    pub acceleration: Fixed,
    /// Passability class used for the formation's own path queries.
    pub passability: String,
}

/// Clearance per terrain passability class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassabilityClasses {
    clearances: BTreeMap<String, i64>,
}

impl PassabilityClasses {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clearances: BTreeMap::new(),
        }
    }

    /// Builder method to add a class.
    #[must_use]
    pub fn with_class(mut self, name: impl Into<String>, clearance: Fixed) -> Self {
        self.insert(name, clearance);
        self
    }

    /// Add or replace a class.
    pub fn insert(&mut self, name: impl Into<String>, clearance: Fixed) {
        self.clearances.insert(name.into(), clearance.to_bits());
    }

    /// Clearance of a class, if known.
    #[must_use]
    pub fn clearance(&self, name: &str) -> Option<Fixed> {
        self.clearances.get(name).copied().map(Fixed::from_bits)
    }

    /// Number of known classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clearances.len()
    }

    /// Check if no class is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clearances.is_empty()
    }
}

impl Default for PassabilityClasses {
    /// Infantry-sized `default` plus a `large` class for siege and elephants.
    fn default() -> Self {
        Self::new()
            .with_class(DEFAULT_PASSABILITY, Fixed::from_num(0.8))
            .with_class("large", Fixed::from_num(4))
    }
}

/// Aggregate the motion parameters of a member set.
///
/// Members without a motion capability are skipped with a warning. Returns
/// `None` if no member can move.
#[must_use]
pub fn compute_motion_parameters(
    formation: EntityId,
    members: &[EntityId],
    units: &EntityStorage,
    classes: &PassabilityClasses,
    template: &FormationTemplate,
) -> Option<FormationMotion> {
    let mut walk_speed: Option<Fixed> = None;
    let mut acceleration: Option<Fixed> = None;
    let mut widest: Option<(Fixed, &str)> = None;

    for &member in members {
        let Some(motion) = units.get(member).and_then(|unit| unit.motion.as_ref()) else {
            tracing::warn!(formation, member, "Formation member has no motion capability");
            continue;
        };

        walk_speed = Some(walk_speed.map_or(motion.walk_speed, |s| s.min(motion.walk_speed)));
        acceleration = Some(acceleration.map_or(motion.acceleration, |a| a.min(motion.acceleration)));

        let clearance = classes.clearance(&motion.passability).unwrap_or_else(|| {
            tracing::warn!(
                formation,
                member,
                passability = %motion.passability,
                "Unknown passability class"
            );
            Fixed::ZERO
        });
        if widest.map_or(true, |(best, _)| clearance > best) {
            widest = Some((clearance, motion.passability.as_str()));
        }
    }

    let multiplier = template.speed_multiplier.min(Fixed::ONE);

    Some(FormationMotion {
        walk_speed: walk_speed? * multiplier,
        acceleration: acceleration?,
        passability: widest?.1.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::UnitMotion;
    use crate::simulation::Entity;

    fn unit(units: &mut EntityStorage, motion: Option<UnitMotion>) -> EntityId {
        let mut entity = Entity::new(0);
        entity.motion = motion;
        units.insert(entity)
    }

    fn speed(v: f64) -> Fixed {
        Fixed::from_num(v)
    }

    #[test]
    fn test_minimum_speed_and_acceleration() {
        let mut units = EntityStorage::new();
        let a = unit(&mut units, Some(UnitMotion::new(speed(9.0), speed(3.0))));
        let b = unit(&mut units, Some(UnitMotion::new(speed(6.0), speed(5.0))));

        let motion = compute_motion_parameters(
            100,
            &[a, b],
            &units,
            &PassabilityClasses::default(),
            &FormationTemplate::new("Box"),
        )
        .expect("members can move");

        assert_eq!(motion.walk_speed, speed(6.0));
        assert_eq!(motion.acceleration, speed(3.0));
        assert_eq!(motion.passability, DEFAULT_PASSABILITY);
    }

    #[test]
    fn test_speed_multiplier_only_slows_down() {
        let mut units = EntityStorage::new();
        let a = unit(&mut units, Some(UnitMotion::new(speed(10.0), speed(1.0))));
        let classes = PassabilityClasses::default();

        let slow = FormationTemplate {
            speed_multiplier: speed(0.5),
            ..FormationTemplate::new("Slow")
        };
        let fast = FormationTemplate {
            speed_multiplier: speed(2.0),
            ..FormationTemplate::new("Fast")
        };

        let slowed = compute_motion_parameters(1, &[a], &units, &classes, &slow).expect("moves");
        let capped = compute_motion_parameters(1, &[a], &units, &classes, &fast).expect("moves");
        assert_eq!(slowed.walk_speed, speed(5.0));
        assert_eq!(capped.walk_speed, speed(10.0));
    }

    #[test]
    fn test_largest_clearance_wins() {
        let mut units = EntityStorage::new();
        let infantry = unit(&mut units, Some(UnitMotion::new(speed(9.0), speed(1.0))));
        let ram = unit(
            &mut units,
            Some(UnitMotion::new(speed(7.0), speed(1.0)).with_passability("large")),
        );

        let motion = compute_motion_parameters(
            1,
            &[infantry, ram],
            &units,
            &PassabilityClasses::default(),
            &FormationTemplate::new("Box"),
        )
        .expect("moves");
        assert_eq!(motion.passability, "large");
    }

    #[test]
    fn test_members_without_motion_are_skipped() {
        let mut units = EntityStorage::new();
        let statue = unit(&mut units, None);
        let a = unit(&mut units, Some(UnitMotion::new(speed(4.0), speed(2.0))));
        let classes = PassabilityClasses::default();
        let template = FormationTemplate::new("Box");

        let motion = compute_motion_parameters(1, &[statue, a, 999], &units, &classes, &template);
        assert_eq!(motion.map(|m| m.walk_speed), Some(speed(4.0)));

        assert!(compute_motion_parameters(1, &[statue], &units, &classes, &template).is_none());
        assert!(compute_motion_parameters(1, &[], &units, &classes, &template).is_none());
    }

    #[test]
    fn test_unknown_class_counts_as_zero_clearance() {
        let mut units = EntityStorage::new();
        let a = unit(
            &mut units,
            Some(UnitMotion::new(speed(4.0), speed(2.0)).with_passability("ship")),
        );
        let b = unit(&mut units, Some(UnitMotion::new(speed(4.0), speed(2.0))));

        let motion = compute_motion_parameters(
            1,
            &[a, b],
            &units,
            &PassabilityClasses::default(),
            &FormationTemplate::new("Box"),
        )
        .expect("moves");
        assert_eq!(motion.passability, DEFAULT_PASSABILITY);
    }
}

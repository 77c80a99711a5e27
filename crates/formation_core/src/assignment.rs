//! Assignment of members to slots.
//!
//! Buckets are consumed from the catch-all bucket upwards, each taking the
//! tail of the remaining sorted slot list. The first sorting class is
//! therefore left with the head of the list, i.e. the front rows, the
//! flanks or the outer ring depending on the sorting order. Inside a
//! bucket every member greedily takes the nearest free slot.

use crate::layout::{LayoutMember, Slot};
use crate::math::{Fixed, Vec2Fixed};

/// Bind every member to exactly one slot.
///
/// `slots` are local offsets in sorting order; `position` and `facing`
/// place them in the world for the distance comparisons. The returned
/// slots keep their local offsets with `owner` set.
#[must_use]
pub fn assign_slots(
    members: &[LayoutMember<'_>],
    buckets: &[Vec<usize>],
    slots: &[Slot],
    position: Vec2Fixed,
    facing: Vec2Fixed,
) -> Vec<Slot> {
    let mut free: Vec<Slot> = slots.to_vec();
    let mut world: Vec<Vec2Fixed> = free
        .iter()
        .map(|slot| Vec2Fixed::local_to_world(position, facing, slot.offset))
        .collect();
    let mut assigned = Vec::with_capacity(members.len());

    for bucket in buckets.iter().rev() {
        if bucket.is_empty() {
            continue;
        }

        let split = free.len().saturating_sub(bucket.len());
        let mut region = free.split_off(split);
        let mut region_world = world.split_off(split);

        for &index in bucket {
            let Some(member) = members.get(index) else {
                continue;
            };
            let Some(nearest) = nearest_index(member.position, &region_world) else {
                break;
            };
            region_world.remove(nearest);
            let mut slot = region.remove(nearest);
            slot.owner = Some(member.id);
            assigned.push(slot);
        }
    }

    assigned
}

/// Index of the point closest to `from`; ties go to the lowest index.
fn nearest_index(from: Vec2Fixed, points: &[Vec2Fixed]) -> Option<usize> {
    let mut best: Option<(usize, Fixed)> = None;
    for (index, point) in points.iter().enumerate() {
        let distance = from.distance_squared(*point);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((index, distance));
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ClassTags, EntityId};
    use std::collections::BTreeSet;

    fn slot(x: i32, y: i32) -> Slot {
        Slot {
            offset: Vec2Fixed::from_ints(x, y),
            row: 1,
            column: 1,
            owner: None,
        }
    }

    fn member(id: EntityId, x: i32, y: i32, classes: Option<&ClassTags>) -> LayoutMember<'_> {
        LayoutMember {
            id,
            position: Vec2Fixed::from_ints(x, y),
            footprint: None,
            classes,
        }
    }

    #[test]
    fn test_every_member_gets_one_slot() {
        let members = vec![member(1, 0, 0, None), member(2, 5, 5, None), member(3, -5, 0, None)];
        let slots = vec![slot(-1, 0), slot(0, 0), slot(1, 0)];
        let buckets = vec![vec![], vec![0, 1, 2]];

        let assigned = assign_slots(&members, &buckets, &slots, Vec2Fixed::ZERO, Vec2Fixed::FORWARD);

        assert_eq!(assigned.len(), 3);
        let owners: BTreeSet<EntityId> = assigned.iter().filter_map(|s| s.owner).collect();
        assert_eq!(owners, [1, 2, 3].into_iter().collect());
        let offsets: BTreeSet<Vec2Fixed> = assigned.iter().map(|s| s.offset).collect();
        assert_eq!(offsets.len(), 3);
    }

    #[test]
    fn test_nearest_slot_wins() {
        let members = vec![member(1, 10, 0, None), member(2, -10, 0, None)];
        let slots = vec![slot(-1, 0), slot(1, 0)];
        let buckets = vec![vec![0, 1]];

        let assigned = assign_slots(&members, &buckets, &slots, Vec2Fixed::ZERO, Vec2Fixed::FORWARD);

        let right = assigned.iter().find(|s| s.owner == Some(1)).expect("assigned");
        assert_eq!(right.offset, Vec2Fixed::from_ints(1, 0));
    }

    #[test]
    fn test_first_class_keeps_head_of_list() {
        let cavalry = ClassTags::new(["Cavalry"]);
        // Cavalry member stands near the tail slot but must take the head.
        let members = vec![member(1, 0, -10, Some(&cavalry)), member(2, 0, 10, None)];
        let slots = vec![slot(0, 1), slot(0, -1)];
        let buckets = vec![vec![0], vec![1]];

        let assigned = assign_slots(&members, &buckets, &slots, Vec2Fixed::ZERO, Vec2Fixed::FORWARD);

        let cav = assigned.iter().find(|s| s.owner == Some(1)).expect("assigned");
        assert_eq!(cav.offset, Vec2Fixed::from_ints(0, 1));
    }

    #[test]
    fn test_distance_uses_world_transform() {
        // Facing east: local forward (0, 1) lands at world (+1, 0).
        let facing = Vec2Fixed::from_ints(1, 0);
        let members = vec![member(1, 5, 0, None), member(2, -5, 0, None)];
        let slots = vec![slot(0, -1), slot(0, 1)];
        let buckets = vec![vec![0, 1]];

        let assigned = assign_slots(&members, &buckets, &slots, Vec2Fixed::ZERO, facing);

        let east = assigned.iter().find(|s| s.owner == Some(1)).expect("assigned");
        assert_eq!(east.offset, Vec2Fixed::from_ints(0, 1));
    }

    #[test]
    fn test_nearest_index_ties() {
        let points = vec![Vec2Fixed::from_ints(1, 0), Vec2Fixed::from_ints(-1, 0)];
        assert_eq!(nearest_index(Vec2Fixed::ZERO, &points), Some(0));
        assert_eq!(nearest_index(Vec2Fixed::ZERO, &[]), None);
    }
}

//! Formation controller.
//!
//! A [`Formation`] owns an ordered member list, the cached slot layout and
//! the status markers of its members. It never owns the units themselves:
//! every operation borrows the host [`EntityStorage`] and only touches the
//! components it needs.
//!
//! Lifecycle operations are infallible. Members lacking a capability are
//! skipped, degenerate geometry falls back to defaults, and dropping below
//! the template's minimum member count disbands the formation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::assignment::assign_slots;
use crate::aura::AuraLedger;
use crate::components::{EntityId, FormationWalkOrder, Order, Placement, PlayerId, Visual};
use crate::data::FormationTemplate;
use crate::error::{FormationError, Result};
use crate::layout::{compute_offsets, extents, LayoutMember, Slot, SlotRng};
use crate::math::{fixed_cos, fixed_serde, Fixed, Vec2Fixed};
use crate::motion::{compute_motion_parameters, FormationMotion, PassabilityClasses};
use crate::simulation::EntityStorage;

/// Walking distance above which a formation marches in columns.
pub const COLUMN_DISTANCE_THRESHOLD: Fixed = Fixed::from_bits(128 << 32);

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormationState {
    /// Controlling members.
    Active,
    /// Disbanded, waiting to be destroyed.
    Inert,
}

/// Result of a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOutcome {
    /// The formation still exists.
    Kept,
    /// The formation fell below its minimum member count and disbanded.
    Disbanded,
}

/// A group of units arranged into slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formation {
    id: EntityId,
    template: FormationTemplate,
    owner: Option<PlayerId>,
    state: FormationState,
    initialized: bool,
    placement: Placement,
    motion: Option<FormationMotion>,
    visual: Visual,
    members: Vec<EntityId>,
    member_positions: BTreeMap<EntityId, (usize, usize)>,
    offsets: Option<Vec<Slot>>,
    width: Fixed,
    depth: Fixed,
    columnar: bool,
    rearrange: bool,
    finished: BTreeSet<EntityId>,
    idle: BTreeSet<EntityId>,
    twins: BTreeSet<EntityId>,
    aura_holders: Vec<EntityId>,
    auras: AuraLedger,
    old_facing: Vec2Fixed,
    destination: Vec<Vec2Fixed>,
    last_order_variant: Option<String>,
    rows_used: usize,
    columns_used: Vec<usize>,
    rng: SlotRng,
}

impl Formation {
    /// Create an empty, out-of-world controller.
    #[must_use]
    pub fn new(id: EntityId, template: FormationTemplate, owner: Option<PlayerId>, seed: u64) -> Self {
        let mut placement = Placement::default();
        placement.move_out_of_world();

        Self {
            id,
            template,
            owner,
            state: FormationState::Active,
            initialized: false,
            placement,
            motion: None,
            visual: Visual::default(),
            members: Vec::new(),
            member_positions: BTreeMap::new(),
            offsets: None,
            width: Fixed::ZERO,
            depth: Fixed::ZERO,
            columnar: false,
            rearrange: true,
            finished: BTreeSet::new(),
            idle: BTreeSet::new(),
            twins: BTreeSet::new(),
            aura_holders: Vec::new(),
            auras: AuraLedger::new(),
            old_facing: Vec2Fixed::FORWARD,
            destination: Vec::new(),
            last_order_variant: None,
            rows_used: 0,
            columns_used: Vec::new(),
            rng: SlotRng::new(seed ^ id),
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Install the initial member set.
    ///
    /// Attaches every member, applies formation auras, centers the
    /// controller on its members and computes motion parameters. Unknown
    /// ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::AlreadyInitialized`] on a second call.
    pub fn set_members(
        &mut self,
        units: &mut EntityStorage,
        classes: &PassabilityClasses,
        ids: &[EntityId],
    ) -> Result<()> {
        if self.initialized {
            return Err(FormationError::AlreadyInitialized(self.id));
        }
        self.initialized = true;

        self.members = self.filter_new(units, ids);
        for &member in &self.members {
            if let Some(ai) = units.get_mut(member).and_then(|u| u.ai.as_mut()) {
                ai.set_formation_controller(Some(self.id));
            }
        }

        self.aura_holders = holders(units, &self.members);
        for &holder in &self.aura_holders {
            self.auras.grant_to_all(units, holder, &self.members);
        }

        self.move_to_members_center(units);
        self.compute_motion(units, classes);
        self.offsets = None;

        tracing::debug!(
            formation = self.id,
            members = self.members.len(),
            template = %self.template.name,
            "Formation members set"
        );
        Ok(())
    }

    /// Add units to the formation.
    ///
    /// Existing aura holders buff the newcomers, newcomer holders buff
    /// everyone. Newcomers without orders start idle. The group is laid out
    /// afresh unless rearranging is suppressed.
    pub fn add_members(&mut self, units: &mut EntityStorage, classes: &PassabilityClasses, ids: &[EntityId]) {
        let newcomers = self.filter_new(units, ids);
        if newcomers.is_empty() {
            return;
        }

        self.offsets = None;

        for &holder in &self.aura_holders {
            self.auras.grant_to_all(units, holder, &newcomers);
        }

        self.members.extend_from_slice(&newcomers);

        for &member in &newcomers {
            if let Some(ai) = units.get_mut(member).and_then(|u| u.ai.as_mut()) {
                ai.set_formation_controller(Some(self.id));
                if ai.order_count() == 0 {
                    self.idle.insert(member);
                }
            }
        }

        for holder in holders(units, &newcomers) {
            self.aura_holders.push(holder);
            self.auras.grant_to_all(units, holder, &self.members);
        }

        self.compute_motion(units, classes);

        tracing::debug!(
            formation = self.id,
            added = newcomers.len(),
            members = self.members.len(),
            "Formation members added"
        );

        if self.rearrange {
            let variant = self.last_order_variant.clone();
            self.move_members_into_formation(units, true, true, variant);
        }
    }

    /// Remove units from the formation.
    ///
    /// Departing members get their formation work orders dropped and their
    /// controller cleared; auras are revoked both ways. Falling below the
    /// minimum member count disbands, except during a rename.
    pub fn remove_members(
        &mut self,
        units: &mut EntityStorage,
        classes: &PassabilityClasses,
        ids: &[EntityId],
        is_rename: bool,
    ) -> MembershipOutcome {
        let leaving: Vec<EntityId> = ids
            .iter()
            .copied()
            .filter(|id| self.members.contains(id))
            .collect();
        if leaving.is_empty() {
            return MembershipOutcome::Kept;
        }

        self.offsets = None;
        self.members.retain(|id| !leaving.contains(id));

        for &member in &leaving {
            self.finished.remove(&member);
            self.idle.remove(&member);
            self.member_positions.remove(&member);
            if let Some(ai) = units.get_mut(member).and_then(|u| u.ai.as_mut()) {
                ai.update_work_orders(self.id);
                ai.set_formation_controller(None);
            }
        }

        for &holder in &self.aura_holders {
            self.auras.revoke_from_all(units, holder, &leaving);
        }
        for &holder in self.aura_holders.iter().filter(|h| leaving.contains(h)) {
            self.auras.revoke_from_all(units, holder, &self.members);
        }
        self.aura_holders.retain(|h| !leaving.contains(h));

        if self.members.len() < self.template.required_member_count && !is_rename {
            tracing::debug!(
                formation = self.id,
                members = self.members.len(),
                required = self.template.required_member_count,
                "Formation below minimum size"
            );
            self.disband(units);
            return MembershipOutcome::Disbanded;
        }

        self.compute_motion(units, classes);

        if self.rearrange && !self.members.is_empty() {
            let variant = self.last_order_variant.clone();
            self.move_members_into_formation(units, true, true, variant);
        }
        MembershipOutcome::Kept
    }

    /// Release every member and go inert.
    pub fn disband(&mut self, units: &mut EntityStorage) {
        for &member in &self.members {
            if let Some(ai) = units.get_mut(member).and_then(|u| u.ai.as_mut()) {
                ai.update_work_orders(self.id);
                ai.set_formation_controller(None);
            }
        }
        self.auras.revoke_everything(units);

        self.members.clear();
        self.member_positions.clear();
        self.aura_holders.clear();
        self.finished.clear();
        self.idle.clear();
        self.twins.clear();
        self.destination.clear();
        self.offsets = None;
        self.motion = None;
        self.width = Fixed::ZERO;
        self.depth = Fixed::ZERO;

        self.state = FormationState::Inert;
        self.placement.move_out_of_world();

        tracing::debug!(formation = self.id, "Formation disbanded");
    }

    /// Replace a member by its renamed entity, keeping its slot.
    ///
    /// Returns `false` if `old` is not a member, or if `new` could not join.
    /// In the latter case `old` is still gone and the group is laid out
    /// afresh.
    pub fn rename_member(
        &mut self,
        units: &mut EntityStorage,
        classes: &PassabilityClasses,
        old: EntityId,
        new: EntityId,
    ) -> bool {
        if !self.members.contains(&old) {
            return false;
        }

        let was_finished = self.finished.contains(&old);
        let was_idle = self.idle.contains(&old);
        let slot_position = self.member_positions.get(&old).copied();
        let offsets = self.offsets.clone();

        let rearrange = self.rearrange;
        self.rearrange = false;
        self.remove_members(units, classes, &[old], true);
        self.add_members(units, classes, &[new]);
        self.rearrange = rearrange;

        if !self.members.contains(&new) {
            tracing::warn!(formation = self.id, old, new, "Renamed member rejected");
            if self.rearrange && !self.members.is_empty() {
                let variant = self.last_order_variant.clone();
                self.move_members_into_formation(units, true, true, variant);
            }
            return false;
        }

        if was_finished {
            self.finished.insert(new);
        }
        if was_idle {
            self.idle.insert(new);
        }
        if let Some(position) = slot_position {
            self.member_positions.insert(new, position);
        }
        self.offsets = offsets.map(|slots| {
            slots
                .into_iter()
                .map(|mut slot| {
                    if slot.owner == Some(old) {
                        slot.owner = Some(new);
                    }
                    slot
                })
                .collect()
        });

        tracing::debug!(formation = self.id, old, new, "Formation member renamed");
        true
    }

    /// Allow or suppress relayout on membership changes.
    pub fn set_rearrange(&mut self, rearrange: bool) {
        self.rearrange = rearrange;
    }

    fn filter_new(&self, units: &EntityStorage, ids: &[EntityId]) -> Vec<EntityId> {
        let mut accepted: Vec<EntityId> = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.members.contains(&id) || accepted.contains(&id) {
                continue;
            }
            if !units.contains(id) {
                tracing::warn!(formation = self.id, member = id, "Unknown unit offered to formation");
                continue;
            }
            accepted.push(id);
        }
        accepted
    }

    fn compute_motion(&mut self, units: &EntityStorage, classes: &PassabilityClasses) {
        if let Some(motion) =
            compute_motion_parameters(self.id, &self.members, units, classes, &self.template)
        {
            self.motion = Some(motion);
        }
    }

    fn move_to_members_center(&mut self, units: &EntityStorage) {
        let placements: Vec<&Placement> = self
            .members
            .iter()
            .filter_map(|&m| units.get(m).and_then(|u| u.placement.as_ref()))
            .filter(|p| p.in_world)
            .collect();
        if placements.is_empty() {
            return;
        }

        let positions: Vec<Vec2Fixed> = placements.iter().map(|p| p.position).collect();
        let facings: Vec<Vec2Fixed> = placements.iter().map(|p| p.facing).collect();
        let facing = Vec2Fixed::average(&facings).normalize();

        self.placement.jump_to(Vec2Fixed::average(&positions));
        if !facing.is_zero() {
            self.placement.facing = facing;
        }
    }

    // ------------------------------------------------------------------
    // Layout and orders
    // ------------------------------------------------------------------

    /// Send every in-world member to its slot.
    ///
    /// Offsets are recomputed if missing, if `force` is set or if the
    /// heading turned more than the template's maximum turning angle since
    /// the last layout. Forced orders replace the members' queues; others
    /// are appended.
    pub fn move_members_into_formation(
        &mut self,
        units: &mut EntityStorage,
        move_center: bool,
        force: bool,
        variant: Option<String>,
    ) {
        if self.members.is_empty() {
            return;
        }
        self.last_order_variant.clone_from(&variant);

        let active: Vec<EntityId> = self
            .members
            .iter()
            .copied()
            .filter(|&m| {
                units
                    .get(m)
                    .and_then(|u| u.placement.as_ref())
                    .is_some_and(|p| p.in_world)
            })
            .collect();
        if active.is_empty() {
            return;
        }

        if move_center || !self.placement.in_world {
            self.move_to_members_center(units);
        }

        let facing = self.estimated_facing();
        let stale = self.offsets.as_ref().map_or(true, |slots| {
            active
                .iter()
                .any(|m| !slots.iter().any(|s| s.owner == Some(*m)))
        });
        let turned = !self.within_turning_angle(facing);

        let offsets_changed = stale || force || turned;
        if offsets_changed {
            self.compute_formation_offsets(units, &active, facing);
        }

        self.issue_walk_orders(units, &active, force, offsets_changed, variant);

        if let Some(slots) = &self.offsets {
            (self.width, self.depth) = extents(slots);
        }
    }

    /// Face a new heading.
    ///
    /// Within the maximum turning angle slots rotate in place; beyond it
    /// the layout is recomputed for the new heading.
    pub fn turn_to(&mut self, units: &mut EntityStorage, facing: Vec2Fixed) {
        let facing = facing.normalize();
        if facing.is_zero() {
            return;
        }

        let rotate_in_place = self.offsets.is_some() && self.within_turning_angle(facing);
        self.placement.facing = facing;
        let variant = self.last_order_variant.clone();

        if rotate_in_place {
            let active: Vec<EntityId> = self.members.clone();
            self.issue_walk_orders(units, &active, true, false, variant);
        } else {
            self.offsets = None;
            self.move_members_into_formation(units, false, true, variant);
        }
    }

    /// Switch between columnar and regular shape based on walking distance.
    ///
    /// Returns `true` if the shape changed. Does nothing while rearranging
    /// is suppressed.
    pub fn update_shape(&mut self, units: &mut EntityStorage) -> bool {
        if !self.rearrange {
            return false;
        }

        let columnar = self.walking_distance() > COLUMN_DISTANCE_THRESHOLD;
        if columnar == self.columnar {
            return false;
        }

        self.columnar = columnar;
        self.offsets = None;
        tracing::debug!(formation = self.id, columnar, "Formation shape switched");

        let variant = self.last_order_variant.clone();
        self.move_members_into_formation(units, false, true, variant);
        true
    }

    fn estimated_facing(&self) -> Vec2Fixed {
        self.destination
            .first()
            .and_then(|&target| Vec2Fixed::facing_towards(self.placement.position, target))
            .unwrap_or(self.placement.facing)
    }

    fn within_turning_angle(&self, facing: Vec2Fixed) -> bool {
        self.old_facing.dot(facing) >= fixed_cos(self.template.max_turning_angle)
    }

    fn compute_formation_offsets(&mut self, units: &EntityStorage, active: &[EntityId], facing: Vec2Fixed) {
        let members: Vec<LayoutMember<'_>> = active
            .iter()
            .filter_map(|&id| {
                let unit = units.get(id)?;
                Some(LayoutMember {
                    id,
                    position: unit.placement.as_ref()?.position,
                    footprint: unit.footprint,
                    classes: unit.classes.as_ref(),
                })
            })
            .collect();

        let plan = compute_offsets(&members, &self.template, self.columnar, &mut self.rng);
        let slots = assign_slots(&members, &plan.buckets, &plan.slots, self.placement.position, facing);

        self.member_positions = slots
            .iter()
            .filter_map(|slot| slot.owner.map(|owner| (owner, (slot.row, slot.column))))
            .collect();
        self.rows_used = plan.rows_used;
        self.columns_used = plan.columns_used;
        self.old_facing = facing;
        self.offsets = Some(slots);

        tracing::debug!(
            formation = self.id,
            members = members.len(),
            columnar = self.columnar,
            rows = self.rows_used,
            "Formation layout recomputed"
        );
    }

    fn issue_walk_orders(
        &self,
        units: &mut EntityStorage,
        active: &[EntityId],
        force: bool,
        offsets_changed: bool,
        variant: Option<String>,
    ) {
        let Some(slots) = &self.offsets else {
            return;
        };

        for slot in slots {
            let Some(member) = slot.owner.filter(|m| active.contains(m)) else {
                continue;
            };
            let animation = self.animation_variant(member);
            let Some(unit) = units.get_mut(member) else {
                continue;
            };

            if let Some(ai) = unit.ai.as_mut() {
                ai.add_order(
                    Order::FormationWalk(FormationWalkOrder {
                        target: self.id,
                        x: slot.offset.x,
                        y: slot.offset.y,
                        offsets_changed,
                        variant: variant.clone(),
                    }),
                    !force,
                );
            }
            if let Some(visual) = unit.visual.as_mut() {
                visual.variant = animation;
            }
        }
    }

    // ------------------------------------------------------------------
    // Movement state
    // ------------------------------------------------------------------

    /// Set the waypoints the formation is walking along.
    pub fn set_destination(&mut self, waypoints: Vec<Vec2Fixed>) {
        self.destination = waypoints;
    }

    /// Stop walking.
    pub fn clear_destination(&mut self) {
        self.destination.clear();
    }

    /// Remaining path length through all waypoints.
    #[must_use]
    pub fn walking_distance(&self) -> Fixed {
        let mut from = self.placement.position;
        let mut total = Fixed::ZERO;
        for &waypoint in &self.destination {
            total = total.saturating_add(from.distance(waypoint));
            from = waypoint;
        }
        total
    }

    /// Current waypoints.
    #[must_use]
    pub fn destination(&self) -> &[Vec2Fixed] {
        &self.destination
    }

    // ------------------------------------------------------------------
    // Twins and ownership
    // ------------------------------------------------------------------

    /// Register sibling formations this one may merge with.
    pub fn set_twin_formations(&mut self, twins: &[EntityId]) {
        self.twins = twins.iter().copied().filter(|&t| t != self.id).collect();
    }

    /// Forget a twin link.
    pub fn remove_twin(&mut self, twin: EntityId) {
        self.twins.remove(&twin);
    }

    /// Registered twin formations.
    #[must_use]
    pub fn twins(&self) -> &BTreeSet<EntityId> {
        &self.twins
    }

    /// Change the owning player.
    pub fn set_owner(&mut self, owner: Option<PlayerId>) {
        self.owner = owner;
    }

    /// Set the controller's own animation variant.
    pub fn set_visual_variant(&mut self, variant: Option<String>) {
        self.visual.variant = variant;
    }

    // ------------------------------------------------------------------
    // Status markers
    // ------------------------------------------------------------------

    /// Mark a member as having reached its slot.
    pub fn set_finished(&mut self, member: EntityId) {
        if self.members.contains(&member) {
            self.finished.insert(member);
        }
    }

    /// Clear the finished marker of a member.
    pub fn unset_finished(&mut self, member: EntityId) {
        self.finished.remove(&member);
    }

    /// Clear all finished markers.
    pub fn reset_finished(&mut self) {
        self.finished.clear();
    }

    /// Check whether every member reached its slot.
    #[must_use]
    pub fn all_members_finished(&self) -> bool {
        self.members.iter().all(|m| self.finished.contains(m))
    }

    /// Check whether a member reached its slot.
    #[must_use]
    pub fn is_finished(&self, member: EntityId) -> bool {
        self.finished.contains(&member)
    }

    /// Mark a member idle. Returns whether the whole group is idle now.
    pub fn set_idle(&mut self, member: EntityId) -> bool {
        if self.members.contains(&member) {
            self.idle.insert(member);
        }
        self.all_members_idle()
    }

    /// Clear the idle marker of a member.
    pub fn unset_idle(&mut self, member: EntityId) {
        self.idle.remove(&member);
    }

    /// Check whether every member is idle.
    #[must_use]
    pub fn all_members_idle(&self) -> bool {
        self.members.iter().all(|m| self.idle.contains(m))
    }

    /// Check whether a member is idle.
    #[must_use]
    pub fn is_idle(&self, member: EntityId) -> bool {
        self.idle.contains(&member)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Controller entity id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Template in use.
    #[must_use]
    pub fn template(&self) -> &FormationTemplate {
        &self.template
    }

    /// Owning player.
    #[must_use]
    pub const fn owner(&self) -> Option<PlayerId> {
        self.owner
    }

    /// Controller state.
    #[must_use]
    pub const fn state(&self) -> FormationState {
        self.state
    }

    /// Controller placement.
    #[must_use]
    pub const fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Aggregated motion capability.
    #[must_use]
    pub fn motion(&self) -> Option<&FormationMotion> {
        self.motion.as_ref()
    }

    /// Controller animation hook.
    #[must_use]
    pub const fn visual(&self) -> &Visual {
        &self.visual
    }

    /// Width and depth of the current layout.
    #[must_use]
    pub const fn size(&self) -> (Fixed, Fixed) {
        (self.width, self.depth)
    }

    /// Number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members in join order.
    #[must_use]
    pub fn members(&self) -> &[EntityId] {
        &self.members
    }

    /// Check membership.
    #[must_use]
    pub fn contains(&self, member: EntityId) -> bool {
        self.members.contains(&member)
    }

    /// Representative member (the first to join).
    #[must_use]
    pub fn primary_member(&self) -> Option<EntityId> {
        self.members.first().copied()
    }

    /// In-world member closest to `position` that passes `filter`.
    ///
    /// Ties go to the member that joined first.
    pub fn closest_member<F>(&self, units: &EntityStorage, position: Vec2Fixed, filter: F) -> Option<EntityId>
    where
        F: Fn(EntityId) -> bool,
    {
        let mut best: Option<(EntityId, Fixed)> = None;
        for &member in &self.members {
            if !filter(member) {
                continue;
            }
            let Some(placement) = units.get(member).and_then(|u| u.placement.as_ref()) else {
                continue;
            };
            if !placement.in_world {
                continue;
            }
            let distance = placement.position.distance_squared(position);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((member, distance));
            }
        }
        best.map(|(member, _)| member)
    }

    /// Animation variant for a member's row and column.
    ///
    /// `None` while columnar or when the template has no rules.
    #[must_use]
    pub fn animation_variant(&self, member: EntityId) -> Option<String> {
        if self.columnar || self.template.animations.is_empty() {
            return None;
        }
        let &(row, column) = self.member_positions.get(&member)?;
        let columns_in_row = self.columns_used.get(row.saturating_sub(1)).copied().unwrap_or(0);

        self.template
            .animations
            .iter()
            .find(|rule| rule.matches(row, column, self.rows_used, columns_in_row))
            .map(|rule| rule.variant.clone())
    }

    /// Whether the formation marches in columns.
    #[must_use]
    pub const fn is_columnar(&self) -> bool {
        self.columnar
    }

    /// Whether membership changes relayout the group.
    #[must_use]
    pub const fn is_rearranging(&self) -> bool {
        self.rearrange
    }

    /// Cached slots, `None` once invalidated.
    #[must_use]
    pub fn offsets(&self) -> Option<&[Slot]> {
        self.offsets.as_deref()
    }

    /// `(row, column)` of a member's slot.
    #[must_use]
    pub fn member_position(&self, member: EntityId) -> Option<(usize, usize)> {
        self.member_positions.get(&member).copied()
    }

    /// Members carrying a formation aura.
    #[must_use]
    pub fn aura_holders(&self) -> &[EntityId] {
        &self.aura_holders
    }

    /// Aura grants of this formation.
    #[must_use]
    pub const fn aura_ledger(&self) -> &AuraLedger {
        &self.auras
    }

    // ------------------------------------------------------------------
    // Save / load
    // ------------------------------------------------------------------

    /// Capture the complete controller state.
    #[must_use]
    pub fn snapshot(&self) -> FormationSnapshot {
        FormationSnapshot {
            id: self.id,
            template: self.template.clone(),
            owner: self.owner,
            state: self.state,
            initialized: self.initialized,
            placement: self.placement,
            motion: self.motion.clone(),
            visual: self.visual.clone(),
            members: self.members.clone(),
            member_positions: self.member_positions.clone(),
            offsets: self.offsets.clone(),
            width: self.width,
            depth: self.depth,
            columnar: self.columnar,
            rearrange: self.rearrange,
            finished: self.finished.clone(),
            idle: self.idle.clone(),
            twins: self.twins.clone(),
            aura_holders: self.aura_holders.clone(),
            auras: self.auras.clone(),
            old_facing: self.old_facing,
            destination: self.destination.clone(),
            last_order_variant: self.last_order_variant.clone(),
            rows_used: self.rows_used,
            columns_used: self.columns_used.clone(),
            rng: self.rng.clone(),
        }
    }

    /// Restore a controller from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: FormationSnapshot) -> Self {
        Self {
            id: snapshot.id,
            template: snapshot.template,
            owner: snapshot.owner,
            state: snapshot.state,
            initialized: snapshot.initialized,
            placement: snapshot.placement,
            motion: snapshot.motion,
            visual: snapshot.visual,
            members: snapshot.members,
            member_positions: snapshot.member_positions,
            offsets: snapshot.offsets,
            width: snapshot.width,
            depth: snapshot.depth,
            columnar: snapshot.columnar,
            rearrange: snapshot.rearrange,
            finished: snapshot.finished,
            idle: snapshot.idle,
            twins: snapshot.twins,
            aura_holders: snapshot.aura_holders,
            auras: snapshot.auras,
            old_facing: snapshot.old_facing,
            destination: snapshot.destination,
            last_order_variant: snapshot.last_order_variant,
            rows_used: snapshot.rows_used,
            columns_used: snapshot.columns_used,
            rng: snapshot.rng,
        }
    }
}

fn holders(units: &EntityStorage, ids: &[EntityId]) -> Vec<EntityId> {
    ids.iter()
        .copied()
        .filter(|&id| units.get(id).is_some_and(|u| u.aura.is_some()))
        .collect()
}

/// Serializable state of one formation controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct FormationSnapshot {
    pub id: EntityId,
    pub template: FormationTemplate,
    pub owner: Option<PlayerId>,
    pub state: FormationState,
    pub initialized: bool,
    pub placement: Placement,
    pub motion: Option<FormationMotion>,
    pub visual: Visual,
    pub members: Vec<EntityId>,
    pub member_positions: BTreeMap<EntityId, (usize, usize)>,
    pub offsets: Option<Vec<Slot>>,
    #[serde(with = "fixed_serde")]
    pub width: Fixed,
    #[serde(with = "fixed_serde")]
    pub depth: Fixed,
    pub columnar: bool,
    pub rearrange: bool,
    pub finished: BTreeSet<EntityId>,
    pub idle: BTreeSet<EntityId>,
    pub twins: BTreeSet<EntityId>,
    pub aura_holders: Vec<EntityId>,
    pub auras: AuraLedger,
    pub old_facing: Vec2Fixed,
    pub destination: Vec<Vec2Fixed>,
    pub last_order_variant: Option<String>,
    pub rows_used: usize,
    pub columns_used: Vec<usize>,
    pub rng: SlotRng,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ClassTags, FormationAura, UnitAi, UnitMotion};
    use crate::simulation::Entity;

    fn spawn(units: &mut EntityStorage, x: i32, y: i32) -> EntityId {
        let mut entity = Entity::new(0);
        entity.placement = Some(Placement::new(Vec2Fixed::from_ints(x, y)));
        entity.motion = Some(UnitMotion::new(Fixed::from_num(9), Fixed::ONE));
        entity.ai = Some(UnitAi::new());
        entity.visual = Some(Visual::default());
        units.insert(entity)
    }

    fn setup(count: i32) -> (EntityStorage, PassabilityClasses, Vec<EntityId>) {
        let mut units = EntityStorage::new();
        let ids = (0..count).map(|i| spawn(&mut units, i * 2, 0)).collect();
        (units, PassabilityClasses::default(), ids)
    }

    fn formed(units: &mut EntityStorage, classes: &PassabilityClasses, ids: &[EntityId]) -> Formation {
        let mut formation = Formation::new(1000, FormationTemplate::new("Box"), Some(1), 7);
        formation.set_members(units, classes, ids).expect("first call");
        formation.move_members_into_formation(units, false, true, None);
        formation
    }

    fn controller(units: &EntityStorage, id: EntityId) -> Option<EntityId> {
        units.get(id).and_then(|u| u.ai.as_ref()).and_then(|ai| ai.formation_controller)
    }

    #[test]
    fn test_set_members_once() {
        let (mut units, classes, ids) = setup(3);
        let mut formation = Formation::new(1000, FormationTemplate::new("Box"), None, 1);

        formation.set_members(&mut units, &classes, &ids).expect("first call");
        assert!(matches!(
            formation.set_members(&mut units, &classes, &ids),
            Err(FormationError::AlreadyInitialized(1000))
        ));

        assert_eq!(formation.member_count(), 3);
        assert!(formation.placement().in_world);
        assert_eq!(formation.placement().position, Vec2Fixed::from_ints(2, 0));
        assert!(ids.iter().all(|&id| controller(&units, id) == Some(1000)));
        assert!(formation.motion().is_some());
    }

    #[test]
    fn test_layout_binds_every_member() {
        let (mut units, classes, ids) = setup(6);
        let formation = formed(&mut units, &classes, &ids);

        let slots = formation.offsets().expect("laid out");
        assert_eq!(slots.len(), 6);
        for &id in &ids {
            assert!(slots.iter().any(|s| s.owner == Some(id)));
            assert!(formation.member_position(id).is_some());
            let ai = units.get(id).and_then(|u| u.ai.as_ref()).expect("ai");
            assert!(matches!(ai.current(), Some(Order::FormationWalk(w)) if w.target == 1000 && w.offsets_changed));
        }
        let (width, depth) = formation.size();
        assert!(width > Fixed::ZERO && depth > Fixed::ZERO);
    }

    #[test]
    fn test_add_members_relayouts_and_marks_idle() {
        let (mut units, classes, ids) = setup(4);
        let mut formation = formed(&mut units, &classes, &ids[..3]);

        formation.add_members(&mut units, &classes, &[ids[3], ids[3], 4242]);

        assert_eq!(formation.member_count(), 4);
        assert!(formation.is_idle(ids[3]));
        assert_eq!(formation.offsets().map(<[Slot]>::len), Some(4));
    }

    #[test]
    fn test_add_members_without_rearrange_keeps_offsets_invalid() {
        let (mut units, classes, ids) = setup(4);
        let mut formation = formed(&mut units, &classes, &ids[..3]);
        formation.set_rearrange(false);

        formation.add_members(&mut units, &classes, &[ids[3]]);

        assert!(formation.offsets().is_none());
    }

    #[test]
    fn test_remove_below_minimum_disbands() {
        let (mut units, classes, ids) = setup(2);
        let mut formation = formed(&mut units, &classes, &ids);

        let outcome = formation.remove_members(&mut units, &classes, &[ids[0]], false);

        assert_eq!(outcome, MembershipOutcome::Disbanded);
        assert_eq!(formation.state(), FormationState::Inert);
        assert_eq!(formation.member_count(), 0);
        assert!(!formation.placement().in_world);
        assert!(ids.iter().all(|&id| controller(&units, id).is_none()));
    }

    #[test]
    fn test_rename_does_not_disband() {
        let (mut units, classes, ids) = setup(2);
        let mut formation = formed(&mut units, &classes, &ids);
        let outcome = formation.remove_members(&mut units, &classes, &[ids[0]], true);
        assert_eq!(outcome, MembershipOutcome::Kept);
        assert_eq!(formation.state(), FormationState::Active);
    }

    #[test]
    fn test_removed_member_drops_formation_orders() {
        let (mut units, classes, ids) = setup(3);
        let mut formation = formed(&mut units, &classes, &ids);
        if let Some(ai) = units.get_mut(ids[0]).and_then(|u| u.ai.as_mut()) {
            ai.add_order(Order::Attack(77), true);
        }

        formation.remove_members(&mut units, &classes, &[ids[0]], false);

        let ai = units.get(ids[0]).and_then(|u| u.ai.as_ref()).expect("ai");
        assert_eq!(ai.current(), Some(&Order::Attack(77)));
        assert_eq!(ai.formation_controller, None);
    }

    #[test]
    fn test_rename_keeps_slot() {
        let (mut units, classes, ids) = setup(3);
        let mut formation = formed(&mut units, &classes, &ids);
        formation.set_finished(ids[1]);
        let before = formation.offsets().expect("laid out").to_vec();
        let position = formation.member_position(ids[1]);

        let renamed = spawn(&mut units, 2, 0);
        assert!(formation.rename_member(&mut units, &classes, ids[1], renamed));

        assert_eq!(formation.member_position(renamed), position);
        assert!(formation.is_finished(renamed));
        assert!(formation.is_rearranging());
        let after = formation.offsets().expect("kept");
        assert_eq!(after.len(), before.len());
        for (old, new) in before.iter().zip(after) {
            assert_eq!(old.offset, new.offset);
            let expected = if old.owner == Some(ids[1]) { Some(renamed) } else { old.owner };
            assert_eq!(new.owner, expected);
        }
    }

    #[test]
    fn test_rename_to_unknown_entity() {
        let (mut units, classes, ids) = setup(3);
        let mut formation = formed(&mut units, &classes, &ids);
        formation.set_finished(ids[1]);
        formation.set_idle(ids[1]);

        assert!(!formation.rename_member(&mut units, &classes, ids[1], 9999));

        assert_eq!(formation.members(), &[ids[0], ids[2]]);
        assert!(!formation.is_finished(9999));
        assert!(!formation.is_idle(9999));
        assert_eq!(formation.member_position(9999), None);
        let slots = formation.offsets().expect("laid out again");
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.owner != Some(9999) && s.owner != Some(ids[1])));
    }

    #[test]
    fn test_auras_follow_membership() {
        let (mut units, classes, ids) = setup(3);
        if let Some(unit) = units.get_mut(ids[0]) {
            unit.aura = Some(FormationAura::new("testudo"));
        }
        let mut formation = formed(&mut units, &classes, &ids);
        assert_eq!(formation.aura_ledger().len(), 3);

        formation.remove_members(&mut units, &classes, &[ids[0]], false);

        assert!(formation.aura_ledger().is_empty());
        for id in ids {
            let buffed = units
                .get(id)
                .and_then(|u| u.aura_buffs.as_ref())
                .is_some_and(|b| !b.is_empty());
            assert!(!buffed);
        }
    }

    #[test]
    fn test_turn_within_angle_rotates_in_place() {
        let (mut units, classes, ids) = setup(4);
        let mut formation = formed(&mut units, &classes, &ids);
        let before = formation.offsets().expect("laid out").to_vec();

        // ~14 degrees
        formation.turn_to(&mut units, Vec2Fixed::new(Fixed::from_num(0.25), Fixed::ONE));

        assert_eq!(formation.offsets().expect("kept"), before.as_slice());
        let ai = units.get(ids[0]).and_then(|u| u.ai.as_ref()).expect("ai");
        assert!(matches!(ai.current(), Some(Order::FormationWalk(w)) if !w.offsets_changed));
    }

    #[test]
    fn test_turn_beyond_angle_recomputes() {
        let (mut units, classes, ids) = setup(4);
        let mut formation = formed(&mut units, &classes, &ids);

        formation.turn_to(&mut units, Vec2Fixed::from_ints(0, -1));

        let ai = units.get(ids[0]).and_then(|u| u.ai.as_ref()).expect("ai");
        assert!(matches!(ai.current(), Some(Order::FormationWalk(w)) if w.offsets_changed));
        assert_eq!(formation.placement().facing, Vec2Fixed::from_ints(0, -1));
    }

    #[test]
    fn test_update_shape_goes_columnar_on_long_walks() {
        let (mut units, classes, ids) = setup(6);
        let mut formation = formed(&mut units, &classes, &ids);

        formation.set_destination(vec![Vec2Fixed::from_ints(5, 300)]);
        assert!(formation.update_shape(&mut units));
        assert!(formation.is_columnar());
        assert!(!formation.update_shape(&mut units));

        formation.set_destination(vec![Vec2Fixed::from_ints(5, 20)]);
        assert!(formation.update_shape(&mut units));
        assert!(!formation.is_columnar());
    }

    #[test]
    fn test_update_shape_respects_rearrange() {
        let (mut units, classes, ids) = setup(3);
        let mut formation = formed(&mut units, &classes, &ids);
        formation.set_destination(vec![Vec2Fixed::from_ints(0, 500)]);
        formation.set_rearrange(false);
        assert!(!formation.update_shape(&mut units));
        assert!(!formation.is_columnar());
    }

    #[test]
    fn test_status_markers() {
        let (mut units, classes, ids) = setup(2);
        let mut formation = formed(&mut units, &classes, &ids);

        formation.set_finished(ids[0]);
        assert!(!formation.all_members_finished());
        formation.set_finished(ids[1]);
        assert!(formation.all_members_finished());
        formation.reset_finished();
        assert!(!formation.is_finished(ids[0]));

        formation.unset_idle(ids[0]);
        formation.unset_idle(ids[1]);
        assert!(!formation.set_idle(ids[0]));
        assert!(formation.set_idle(ids[1]));
        formation.set_idle(999);
        assert!(!formation.is_idle(999));
    }

    #[test]
    fn test_closest_member_and_primary() {
        let (mut units, classes, ids) = setup(3);
        let formation = formed(&mut units, &classes, &ids);

        assert_eq!(formation.primary_member(), Some(ids[0]));
        let target = Vec2Fixed::from_ints(10, 0);
        assert_eq!(formation.closest_member(&units, target, |_| true), Some(ids[2]));
        assert_eq!(formation.closest_member(&units, target, |id| id != ids[2]), Some(ids[1]));
        assert_eq!(formation.closest_member(&units, target, |_| false), None);
    }

    #[test]
    fn test_animation_variant_front_row() {
        let (mut units, classes, ids) = setup(9);
        let mut formation = Formation::new(1000, FormationTemplate::line_closed(), None, 1);
        formation.set_members(&mut units, &classes, &ids).expect("first call");
        formation.move_members_into_formation(&mut units, false, true, None);

        let front: Vec<EntityId> = ids
            .iter()
            .copied()
            .filter(|&id| formation.member_position(id).is_some_and(|(row, _)| row == 1))
            .collect();
        assert!(!front.is_empty());
        for id in &ids {
            let expected = front.contains(id).then(|| "formation_front".to_string());
            assert_eq!(formation.animation_variant(*id), expected);
            let visual = units.get(*id).and_then(|u| u.visual.as_ref()).expect("visual");
            assert_eq!(visual.variant, expected);
        }
    }

    #[test]
    fn test_first_class_takes_front_row() {
        let mut units = EntityStorage::new();
        let classes = PassabilityClasses::default();
        let mut ids = Vec::new();
        for i in 0..6 {
            let id = spawn(&mut units, i * 2, -10);
            if let Some(unit) = units.get_mut(id) {
                let class = if i < 3 { "Ranged" } else { "Cavalry" };
                unit.classes = Some(ClassTags::new([class]));
            }
            ids.push(id);
        }
        let template = FormationTemplate {
            width_depth_ratio: Fixed::from_num(1.5),
            ..FormationTemplate::new("Two ranks")
        };
        let mut formation = Formation::new(1000, template, None, 1);
        formation.set_members(&mut units, &classes, &ids).expect("first call");
        formation.move_members_into_formation(&mut units, false, true, None);

        for (i, id) in ids.iter().enumerate() {
            let (row, _) = formation.member_position(*id).expect("placed");
            let expected_row = if i < 3 { 2 } else { 1 };
            assert_eq!(row, expected_row);
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let (mut units, classes, ids) = setup(4);
        let mut formation = formed(&mut units, &classes, &ids);
        formation.set_finished(ids[2]);
        formation.set_twin_formations(&[1000, 2000]);

        let restored = Formation::from_snapshot(formation.snapshot());
        assert_eq!(restored, formation);
        assert_eq!(restored.twins().len(), 1);
    }
}

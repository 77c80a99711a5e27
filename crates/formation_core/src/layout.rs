//! Slot layout engine.
//!
//! Turns a set of members into formation-local slot offsets. The shape is
//! deterministic; slot positions carry seeded jitter ("sloppiness").
//!
//! Local coordinates: `y` runs along the formation facing (row 1 is the
//! front), `x` runs to the right. Offsets stay local until the assignment
//! matcher projects them into world space, so a rotation of the formation
//! is a transform rather than a re-layout.
//!
//! # Steps
//!
//! 1. Average footprint times the separation multipliers gives the spacing.
//! 2. Members are bucketed by their first matching sorting class.
//! 3. Column count from member count, width/depth ratio and bounds.
//! 4. Rows are filled alternating left and right of the center line.
//! 5. All slots are recentered so their mean is the origin.
//! 6. Slots are sorted by the template's sorting order.

use serde::{Deserialize, Serialize};

use crate::components::{ClassTags, EntityId, Footprint};
use crate::data::{FormationShape, FormationTemplate, SortingOrder};
use crate::math::{fixed_serde, fixed_sqrt, Fixed, Vec2Fixed};

/// Columns used while marching in columnar mode.
pub const COLUMNAR_COLUMNS: usize = 3;

/// Scatter area side per `sqrt(member)` and unit of spacing.
const SCATTER_SPREAD: Fixed = Fixed::from_bits(5 << 31);

/// Seeded generator for slot jitter and scatter placement.
///
/// Stored inside each formation so saved games reproduce their layouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRng {
    state: u64,
}

impl SlotRng {
    /// Create a generator from a seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0x9E37_79B9_7F4A_7C15),
        }
    }

    fn next(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }

    /// Uniform value in `[0, 1)`.
    pub fn next_unit(&mut self) -> Fixed {
        Fixed::from_bits((self.next() >> 32) as i64)
    }

    /// Uniform value in `[-1, 1)`.
    pub fn next_signed(&mut self) -> Fixed {
        self.next_unit() * Fixed::from_num(2) - Fixed::ONE
    }
}

/// A member as seen by the layout engine.
#[derive(Debug, Clone, Copy)]
pub struct LayoutMember<'a> {
    /// Member entity.
    pub id: EntityId,
    /// Current world position.
    pub position: Vec2Fixed,
    /// Obstruction footprint, if the unit has one.
    pub footprint: Option<Footprint>,
    /// Identity classes, if the unit has any.
    pub classes: Option<&'a ClassTags>,
}

/// A formation slot in local coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Offset from the formation position.
    pub offset: Vec2Fixed,
    /// 1-based row, front first.
    pub row: usize,
    /// 1-based column, left to right.
    pub column: usize,
    /// Member occupying the slot once assigned.
    pub owner: Option<EntityId>,
}

/// Unassigned slots plus the bucketing that decides who gets which region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPlan {
    /// Slots sorted by the template's sorting order.
    pub slots: Vec<Slot>,
    /// Member indices per bucket, most important first; last is the catch-all.
    pub buckets: Vec<Vec<usize>>,
    /// Spacing between neighbouring slots.
    pub spacing: Spacing,
    /// Number of rows laid out.
    pub rows_used: usize,
    /// Slots per row (index 0 is row 1).
    pub columns_used: Vec<usize>,
}

/// Distance between neighbouring slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Spacing {
    /// Side-to-side distance.
    #[serde(with = "fixed_serde")]
    pub width: Fixed,
    /// Front-to-back distance.
    #[serde(with = "fixed_serde")]
    pub depth: Fixed,
}

/// Compute the slot plan for a member set.
///
/// Returns an empty plan for an empty member set.
pub fn compute_offsets(
    members: &[LayoutMember<'_>],
    template: &FormationTemplate,
    columnar: bool,
    rng: &mut SlotRng,
) -> SlotPlan {
    let count = members.len();
    if count == 0 {
        return SlotPlan::default();
    }

    let spacing = slot_spacing(members, template);
    let buckets = bucket_members(members, &template.sorting_classes);

    let mut plan = if columnar {
        let rows = RowParams {
            shape: FormationShape::Square,
            columns: count.min(COLUMNAR_COLUMNS),
            shift_rows: false,
            center_gap: Fixed::ZERO,
            sloppiness: template.sloppiness,
        };
        row_slots(count, &rows, spacing, rng)
    } else if template.is_scatter() {
        scatter_slots(count, spacing, rng)
    } else {
        let rows = RowParams {
            shape: template.shape,
            columns: column_count(count, template),
            shift_rows: template.shift_rows,
            center_gap: template.center_gap,
            sloppiness: template.sloppiness,
        };
        row_slots(count, &rows, spacing, rng)
    };

    recenter(&mut plan.slots);

    if !columnar && !template.is_scatter() {
        sort_slots(&mut plan.slots, template.sorting_order);
    }

    plan.buckets = buckets;
    plan.spacing = spacing;
    plan
}

/// Average member footprint scaled by the separation multipliers.
///
/// Members without footprint data count as 1x1.
#[must_use]
pub fn slot_spacing(members: &[LayoutMember<'_>], template: &FormationTemplate) -> Spacing {
    if members.is_empty() {
        return Spacing::default();
    }

    let (width, depth) = members.iter().fold((Fixed::ZERO, Fixed::ZERO), |(w, d), m| {
        let fp = m.footprint.unwrap_or(Footprint::UNIT);
        (w + fp.width, d + fp.depth)
    });
    let count = Fixed::from_num(members.len());

    Spacing {
        width: width / count * template.separation_width_multiplier,
        depth: depth / count * template.separation_depth_multiplier,
    }
}

/// Bucket member indices by the first sorting class they carry.
///
/// Returns one bucket per sorting class plus a trailing catch-all bucket.
#[must_use]
pub fn bucket_members(members: &[LayoutMember<'_>], sorting_classes: &[String]) -> Vec<Vec<usize>> {
    let mut buckets = vec![Vec::new(); sorting_classes.len() + 1];
    let catch_all = sorting_classes.len();

    for (index, member) in members.iter().enumerate() {
        let bucket = member
            .classes
            .and_then(|tags| sorting_classes.iter().position(|class| tags.has(class)))
            .unwrap_or(catch_all);
        buckets[bucket].push(index);
    }

    buckets
}

/// Number of columns for a non-columnar layout.
#[must_use]
pub fn column_count(count: usize, template: &FormationTemplate) -> usize {
    if count == 0 {
        return 0;
    }

    let mut depth = fixed_sqrt(Fixed::from_num(count) / template.width_depth_ratio);
    let mut depth_clipped = false;
    if let Some(max_rows) = template.max_rows {
        let max_rows = Fixed::from_num(max_rows);
        if depth > max_rows {
            depth = max_rows;
            depth_clipped = true;
        }
    }

    let rows = depth.ceil().max(Fixed::ONE);
    let shift = if template.shift_rows {
        Fixed::from_num(0.5)
    } else {
        Fixed::ZERO
    };
    let mut columns = (Fixed::from_num(count) / rows + shift).ceil().to_num::<usize>();

    if columns < template.min_columns {
        columns = count.min(template.min_columns);
    }
    if let Some(max_columns) = template.max_columns {
        if columns > max_columns && !depth_clipped {
            columns = max_columns;
        }
    }

    columns.max(1)
}

struct RowParams {
    shape: FormationShape,
    columns: usize,
    shift_rows: bool,
    center_gap: Fixed,
    sloppiness: Fixed,
}

fn row_slots(count: usize, params: &RowParams, spacing: Spacing, rng: &mut SlotRng) -> SlotPlan {
    let mut slots = Vec::with_capacity(count);
    let mut columns_used = Vec::new();
    let half = Fixed::from_num(0.5);
    let mut left = count;
    let mut row = 0usize;

    while left > 0 {
        let z = -(Fixed::from_num(row) * spacing.depth);

        let mut n = match params.shape {
            FormationShape::Triangle if params.shift_rows => row + 1,
            FormationShape::Triangle => row * 2 + 1,
            _ if params.shift_rows => params.columns - row % 2,
            _ => params.columns,
        };
        if !params.shift_rows && n > left {
            n = left;
        }

        let mut side = Fixed::ONE;
        let mut c = 0usize;
        let mut placed = 0usize;
        let mut skipped_center = false;
        while c < n && left > 0 {
            side = -side;
            let steps = if n % 2 == 0 {
                Fixed::from_num(c / 2) + half
            } else {
                Fixed::from_num((c + 1) / 2)
            };
            let mut x = side * steps * spacing.width;

            if params.center_gap > Fixed::ZERO && n > 1 {
                if x == Fixed::ZERO {
                    skipped_center = true;
                    c += 1;
                    continue;
                }
                x += side * params.center_gap / Fixed::from_num(2);
            }

            let half_row = (n + 1) / 2;
            let step = (c + 1) / 2;
            // Columns stay contiguous when the center slot is left open.
            let column = if side > Fixed::ZERO {
                half_row + step - usize::from(skipped_center)
            } else {
                half_row - step
            };

            let mut offset = Vec2Fixed::new(x, z);
            if params.sloppiness > Fixed::ZERO {
                offset.x += rng.next_signed() * params.sloppiness;
                offset.y += rng.next_signed() * params.sloppiness;
            }

            slots.push(Slot {
                offset,
                row: row + 1,
                column,
                owner: None,
            });
            left -= 1;
            placed += 1;
            c += 1;
        }

        row += 1;
        columns_used.push(placed);
    }

    SlotPlan {
        slots,
        rows_used: row,
        columns_used,
        ..SlotPlan::default()
    }
}

fn scatter_slots(count: usize, spacing: Spacing, rng: &mut SlotRng) -> SlotPlan {
    let side = fixed_sqrt(Fixed::from_num(count)) * (spacing.width + spacing.depth) * SCATTER_SPREAD;

    let slots = (0..count)
        .map(|i| Slot {
            offset: Vec2Fixed::new(rng.next_unit() * side, rng.next_unit() * side),
            row: 1,
            column: i + 1,
            owner: None,
        })
        .collect();

    SlotPlan {
        slots,
        rows_used: 1,
        columns_used: vec![count],
        ..SlotPlan::default()
    }
}

/// Shift slots so that their mean offset is the origin.
pub fn recenter(slots: &mut [Slot]) {
    let offsets: Vec<Vec2Fixed> = slots.iter().map(|s| s.offset).collect();
    let mean = Vec2Fixed::average(&offsets);
    for slot in slots.iter_mut() {
        slot.offset = slot.offset - mean;
    }
}

/// Stable sort of slots by the template's sorting order.
pub fn sort_slots(slots: &mut [Slot], order: SortingOrder) {
    match order {
        SortingOrder::Default => {}
        SortingOrder::FillFromTheSides => {
            slots.sort_by(|a, b| b.offset.x.abs().cmp(&a.offset.x.abs()));
        }
        SortingOrder::FillToTheCenter => {
            let ring = |s: &Slot| s.offset.x.abs().max(s.offset.y.abs());
            slots.sort_by(|a, b| ring(b).cmp(&ring(a)));
        }
    }
}

/// Side-to-side and front-to-back extent of a set of slots.
#[must_use]
pub fn extents(slots: &[Slot]) -> (Fixed, Fixed) {
    let mut min = Vec2Fixed::ZERO;
    let mut max = Vec2Fixed::ZERO;
    for slot in slots {
        min.x = min.x.min(slot.offset.x);
        min.y = min.y.min(slot.offset.y);
        max.x = max.x.max(slot.offset.x);
        max.y = max.y.max(slot.offset.y);
    }
    (max.x - min.x, max.y - min.y)
}

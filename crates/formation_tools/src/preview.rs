//! Slot layout preview.
//!
//! Lays out a number of identical 1x1 members with a template and renders
//! the result as an ASCII grid (front row on top) or as JSON.

use std::fmt::Write as _;
use std::path::Path;

use formation_core::assignment::assign_slots;
use formation_core::components::{EntityId, Footprint};
use formation_core::data::FormationTemplate;
use formation_core::layout::{compute_offsets, extents, LayoutMember, SlotRng};
use formation_core::math::Vec2Fixed;
use serde::Serialize;

use crate::error::{Result, ToolError};
use crate::validate::validate_template_file;

/// Options for a preview run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewOptions {
    /// Number of members to lay out.
    pub members: usize,
    /// Use the marching column layout.
    pub columnar: bool,
    /// Seed for slot jitter.
    pub seed: u64,
}

/// One laid-out slot, in display units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewSlot {
    /// Member occupying the slot.
    pub member: EntityId,
    /// Side offset.
    pub x: f64,
    /// Forward offset.
    pub y: f64,
    /// 1-based row, front first.
    pub row: usize,
    /// 1-based column.
    pub column: usize,
}

/// A complete preview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    /// Template name.
    pub template: String,
    /// Whether the columnar layout was used.
    pub columnar: bool,
    /// Rows laid out.
    pub rows: usize,
    /// Width of the layout.
    pub width: f64,
    /// Depth of the layout.
    pub depth: f64,
    /// Slots in assignment order.
    pub slots: Vec<PreviewSlot>,
}

/// Resolve a template argument: a preset name or a path to a RON file.
///
/// # Errors
///
/// Returns an error if the argument is neither a preset nor a valid file.
pub fn load_template(name_or_path: &str) -> Result<FormationTemplate> {
    if let Some(template) = FormationTemplate::preset(name_or_path) {
        return Ok(template);
    }
    let path = Path::new(name_or_path);
    if path.is_file() {
        return validate_template_file(path);
    }
    Err(ToolError::UnknownTemplate(name_or_path.to_string()))
}

/// Lay out members with a template.
///
/// # Errors
///
/// Returns [`ToolError::NoMembers`] for an empty preview.
pub fn build_preview(template: &FormationTemplate, options: &PreviewOptions) -> Result<Preview> {
    if options.members == 0 {
        return Err(ToolError::NoMembers);
    }

    let members: Vec<LayoutMember<'_>> = (1..=options.members)
        .map(|i| LayoutMember {
            id: i as EntityId,
            position: Vec2Fixed::ZERO,
            footprint: Some(Footprint::UNIT),
            classes: None,
        })
        .collect();

    let mut rng = SlotRng::new(options.seed);
    let plan = compute_offsets(&members, template, options.columnar, &mut rng);
    let slots = assign_slots(&members, &plan.buckets, &plan.slots, Vec2Fixed::ZERO, Vec2Fixed::FORWARD);
    let (width, depth) = extents(&slots);

    tracing::debug!(
        template = %template.name,
        members = options.members,
        rows = plan.rows_used,
        "Preview laid out"
    );

    Ok(Preview {
        template: template.name.clone(),
        columnar: options.columnar,
        rows: plan.rows_used,
        width: width.to_num(),
        depth: depth.to_num(),
        slots: slots
            .iter()
            .map(|slot| PreviewSlot {
                member: slot.owner.unwrap_or_default(),
                x: slot.offset.x.to_num(),
                y: slot.offset.y.to_num(),
                row: slot.row,
                column: slot.column,
            })
            .collect(),
    })
}

/// Render a preview as an ASCII grid at half-slot resolution.
///
/// `o` marks a slot, `+` the formation origin when it is not covered.
#[must_use]
pub fn render_ascii(preview: &Preview) -> String {
    let cell = |v: f64| (v * 2.0).round() as i64;

    let cells: Vec<(i64, i64)> = preview.slots.iter().map(|s| (cell(s.x), cell(s.y))).collect();
    let min_x = cells.iter().map(|c| c.0).chain([0]).min().unwrap_or(0);
    let max_x = cells.iter().map(|c| c.0).chain([0]).max().unwrap_or(0);
    let min_y = cells.iter().map(|c| c.1).chain([0]).min().unwrap_or(0);
    let max_y = cells.iter().map(|c| c.1).chain([0]).max().unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({} members, {} rows{})",
        preview.template,
        preview.slots.len(),
        preview.rows,
        if preview.columnar { ", columnar" } else { "" }
    );

    for y in (min_y..=max_y).rev() {
        let line: String = (min_x..=max_x)
            .map(|x| {
                if cells.contains(&(x, y)) {
                    'o'
                } else if x == 0 && y == 0 {
                    '+'
                } else {
                    ' '
                }
            })
            .collect();
        let _ = writeln!(out, "{}", line.trim_end());
    }

    out
}

/// Render a preview as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_json(preview: &Preview) -> Result<String> {
    Ok(serde_json::to_string_pretty(preview)?)
}

//! Formation template definitions.

use serde::{Deserialize, Serialize};

use crate::error::{FormationError, Result};
use crate::math::{fixed_decimal, Fixed, PI};

/// Minimum member count of the stock templates.
pub const DEFAULT_REQUIRED_MEMBER_COUNT: usize = 2;

/// Base shape rows are laid out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FormationShape {
    /// Rows of equal length (box, line, column).
    #[default]
    Square,
    /// Each row wider than the one in front of it.
    Triangle,
    /// No rows at all: members are scattered over a square area.
    Special,
}

/// Order in which slot regions are handed to sorting-class buckets.
///
/// The first sorting class receives the front of the sorted slot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SortingOrder {
    /// Row-major from the front row.
    #[default]
    Default,
    /// Flank slots first.
    FillFromTheSides,
    /// Outermost ring first, center last.
    FillToTheCenter,
}

/// Maps a block of rows and columns to an animation variant.
///
/// Bounds are 1-based and inclusive. Negative bounds count from the end:
/// `-1` is the last row in use, or the last column of that row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationRule {
    /// Variant name handed to the visual hook.
    pub variant: String,
    /// Inclusive row range.
    pub rows: (i32, i32),
    /// Inclusive column range.
    pub columns: (i32, i32),
}

impl AnimationRule {
    /// Check whether a slot falls inside this rule.
    #[must_use]
    pub fn matches(&self, row: usize, column: usize, rows_used: usize, columns_in_row: usize) -> bool {
        let resolve = |bound: i32, count: usize| -> i64 {
            if bound < 0 {
                i64::from(bound) + count as i64 + 1
            } else {
                i64::from(bound)
            }
        };

        let row = row as i64;
        if row < resolve(self.rows.0, rows_used) || row > resolve(self.rows.1, rows_used) {
            return false;
        }

        let column = column as i64;
        column >= resolve(self.columns.0, columns_in_row)
            && column <= resolve(self.columns.1, columns_in_row)
    }
}

/// Data-driven formation definition.
///
/// # Example RON
///
/// ```ron
/// FormationTemplate(
///     name: "Box",
///     shape: Square,
///     sorting_classes: ["Hero", "Champion", "Cavalry", "Melee", "Ranged"],
///     sorting_order: FillToTheCenter,
///     width_depth_ratio: 1.0,
///     sloppiness: 0.2,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationTemplate {
    /// Display and lookup name. `Scatter` templates use the special shape.
    pub name: String,

    /// Row shape.
    #[serde(default)]
    pub shape: FormationShape,

    /// Below this many members the formation disbands.
    #[serde(default = "default_required_member_count")]
    pub required_member_count: usize,

    /// Class priority list; members matching none share a final bucket.
    #[serde(default = "default_sorting_classes")]
    pub sorting_classes: Vec<String>,

    /// Slot ordering handed to the sorting buckets.
    #[serde(default)]
    pub sorting_order: SortingOrder,

    /// Alternate rows are shifted half a slot sideways.
    #[serde(default)]
    pub shift_rows: bool,

    /// Side-to-side spacing multiplier on the average footprint.
    #[serde(with = "fixed_decimal", default = "one")]
    pub separation_width_multiplier: Fixed,

    /// Front-to-back spacing multiplier on the average footprint.
    #[serde(with = "fixed_decimal", default = "one")]
    pub separation_depth_multiplier: Fixed,

    /// Maximum random jitter per slot axis.
    #[serde(with = "fixed_decimal", default = "zero")]
    pub sloppiness: Fixed,

    /// Preferred width over depth.
    #[serde(with = "fixed_decimal", default = "one")]
    pub width_depth_ratio: Fixed,

    /// Lower bound on columns.
    #[serde(default)]
    pub min_columns: usize,

    /// Upper bound on columns.
    #[serde(default)]
    pub max_columns: Option<usize>,

    /// Upper bound on rows.
    #[serde(default)]
    pub max_rows: Option<usize>,

    /// Gap left open in the middle of each row.
    #[serde(with = "fixed_decimal", default = "zero")]
    pub center_gap: Fixed,

    /// Cohesion overhead applied to the slowest member's speed.
    #[serde(with = "fixed_decimal", default = "one")]
    pub speed_multiplier: Fixed,

    /// Largest heading change (radians) handled by rotating slots in place.
    #[serde(with = "fixed_decimal", default = "default_max_turning_angle")]
    pub max_turning_angle: Fixed,

    /// Extra margin when checking whether twin formations collide.
    #[serde(with = "fixed_decimal", default = "zero")]
    pub formation_separation: Fixed,

    /// Row/column animation variants.
    #[serde(default)]
    pub animations: Vec<AnimationRule>,
}

const fn default_required_member_count() -> usize {
    DEFAULT_REQUIRED_MEMBER_COUNT
}

fn default_sorting_classes() -> Vec<String> {
    ["Hero", "Champion", "Cavalry", "Melee", "Ranged"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn one() -> Fixed {
    Fixed::ONE
}

fn zero() -> Fixed {
    Fixed::ZERO
}

fn default_max_turning_angle() -> Fixed {
    PI / Fixed::from_num(4)
}

impl FormationTemplate {
    /// Create a square template with stock settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: FormationShape::Square,
            required_member_count: DEFAULT_REQUIRED_MEMBER_COUNT,
            sorting_classes: default_sorting_classes(),
            sorting_order: SortingOrder::Default,
            shift_rows: false,
            separation_width_multiplier: Fixed::ONE,
            separation_depth_multiplier: Fixed::ONE,
            sloppiness: Fixed::ZERO,
            width_depth_ratio: Fixed::ONE,
            min_columns: 0,
            max_columns: None,
            max_rows: None,
            center_gap: Fixed::ZERO,
            speed_multiplier: Fixed::ONE,
            max_turning_angle: default_max_turning_angle(),
            formation_separation: Fixed::ZERO,
            animations: Vec::new(),
        }
    }

    /// Loose box, heavier classes on the outside.
    #[must_use]
    pub fn box_formation() -> Self {
        Self {
            sorting_order: SortingOrder::FillToTheCenter,
            sloppiness: Fixed::from_num(0.2),
            ..Self::new("Box")
        }
    }

    /// Narrow marching column, three abreast.
    #[must_use]
    pub fn column_closed() -> Self {
        Self {
            width_depth_ratio: Fixed::from_num(0.1),
            max_columns: Some(3),
            speed_multiplier: Fixed::from_num(0.9),
            ..Self::new("Column Closed")
        }
    }

    /// Wide line, at most three ranks deep.
    #[must_use]
    pub fn line_closed() -> Self {
        Self {
            width_depth_ratio: Fixed::from_num(6),
            max_rows: Some(3),
            animations: vec![AnimationRule {
                variant: "formation_front".to_string(),
                rows: (1, 1),
                columns: (1, -1),
            }],
            ..Self::new("Line Closed")
        }
    }

    /// Wedge with the first sorting class at the tip.
    #[must_use]
    pub fn triangle() -> Self {
        Self {
            shape: FormationShape::Triangle,
            ..Self::new("Triangle")
        }
    }

    /// Loose dispersal over a square area.
    #[must_use]
    pub fn scatter() -> Self {
        Self {
            shape: FormationShape::Special,
            ..Self::new("Scatter")
        }
    }

    /// Stock templates shipped with the crate.
    #[must_use]
    pub fn presets() -> Vec<Self> {
        vec![
            Self::box_formation(),
            Self::column_closed(),
            Self::line_closed(),
            Self::triangle(),
            Self::scatter(),
        ]
    }

    /// Look up a stock template by name (case-insensitive).
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        Self::presets()
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Whether members are scattered instead of laid out in rows.
    #[must_use]
    pub fn is_scatter(&self) -> bool {
        self.shape == FormationShape::Special
    }

    /// Parse and validate a template from RON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid template.
    pub fn from_ron(text: &str) -> Result<Self> {
        let template: Self =
            ron::from_str(text).map_err(|e| FormationError::TemplateParse(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    /// Check the template for values the layout cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::InvalidTemplate`] naming the first problem.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(FormationError::InvalidTemplate {
                name: self.name.clone(),
                reason: reason.to_string(),
            })
        };

        if self.name.trim().is_empty() {
            return fail("name must not be empty");
        }
        if self.required_member_count < DEFAULT_REQUIRED_MEMBER_COUNT {
            return fail("required_member_count must be at least 2");
        }
        if self.width_depth_ratio <= Fixed::ZERO {
            return fail("width_depth_ratio must be positive");
        }
        if self.separation_width_multiplier <= Fixed::ZERO
            || self.separation_depth_multiplier <= Fixed::ZERO
        {
            return fail("separation multipliers must be positive");
        }
        if self.sloppiness < Fixed::ZERO || self.center_gap < Fixed::ZERO {
            return fail("sloppiness and center_gap must not be negative");
        }
        if self.formation_separation < Fixed::ZERO {
            return fail("formation_separation must not be negative");
        }
        if self.speed_multiplier <= Fixed::ZERO {
            return fail("speed_multiplier must be positive");
        }
        if self.max_turning_angle <= Fixed::ZERO || self.max_turning_angle > PI {
            return fail("max_turning_angle must be in (0, pi]");
        }
        if self.max_columns == Some(0) || self.max_rows == Some(0) {
            return fail("max_columns and max_rows must be at least 1 when set");
        }
        if let Some(max) = self.max_columns {
            if max < self.min_columns {
                return fail("max_columns is below min_columns");
            }
        }
        if self.animations.iter().any(|a| a.variant.is_empty()) {
            return fail("animation variants need a name");
        }

        Ok(())
    }
}

impl Default for FormationTemplate {
    fn default() -> Self {
        Self::new("Formation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        for template in FormationTemplate::presets() {
            assert!(template.validate().is_ok(), "{} failed", template.name);
        }
    }

    #[test]
    fn test_preset_lookup_ignores_case() {
        assert_eq!(
            FormationTemplate::preset("scatter").map(|t| t.name),
            Some("Scatter".to_string())
        );
        assert!(FormationTemplate::preset("phalanx").is_none());
    }

    #[test]
    fn test_from_ron_with_defaults() {
        let template = FormationTemplate::from_ron(
            r#"FormationTemplate(
                name: "Wide",
                width_depth_ratio: 2.5,
                sloppiness: 0.25,
                max_rows: Some(4),
            )"#,
        )
        .expect("template should parse");

        assert_eq!(template.width_depth_ratio, Fixed::from_num(2.5));
        assert_eq!(template.sloppiness, Fixed::from_num(0.25));
        assert_eq!(template.max_rows, Some(4));
        assert_eq!(template.required_member_count, 2);
        assert_eq!(template.sorting_classes.len(), 5);
    }

    #[test]
    fn test_from_ron_rejects_invalid_values() {
        let err = FormationTemplate::from_ron(
            r#"FormationTemplate(name: "Bad", required_member_count: 1)"#,
        )
        .unwrap_err();
        assert!(matches!(err, FormationError::InvalidTemplate { .. }));

        let err = FormationTemplate::from_ron("FormationTemplate(").unwrap_err();
        assert!(matches!(err, FormationError::TemplateParse(_)));
    }

    #[test]
    fn test_validate_column_bounds() {
        let template = FormationTemplate {
            min_columns: 4,
            max_columns: Some(3),
            ..FormationTemplate::new("Odd")
        };
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_animation_rule_negative_bounds() {
        let rule = AnimationRule {
            variant: "back".to_string(),
            rows: (-1, -1),
            columns: (1, -1),
        };
        // Three rows used, four columns in the last row.
        assert!(rule.matches(3, 1, 3, 4));
        assert!(rule.matches(3, 4, 3, 4));
        assert!(!rule.matches(2, 1, 3, 4));
        assert!(!rule.matches(3, 5, 3, 4));
    }
}

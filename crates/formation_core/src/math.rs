//! Fixed-point math utilities for deterministic simulation.
//!
//! All formation geometry uses fixed-point arithmetic so that layouts,
//! assignments and merges come out bit-identical on every machine.
//! Headings are unit facing vectors `(sin θ, cos θ)` rather than angles,
//! which keeps slot rotation free of trigonometry.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Range: approximately -2,147,483,648 to 2,147,483,647
/// Precision: approximately 0.00000000023
pub type Fixed = I32F32;

/// π in 32.32 fixed point.
pub const PI: Fixed = Fixed::from_bits(13_493_037_705);

/// Fixed-point 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Serde support for human-written fixed-point values in data files.
///
/// Template files carry values like `sloppiness: 0.5`. The decimal is
/// converted to fixed point once at load time; save games keep using
/// [`fixed_serde`].
pub mod fixed_decimal {
    use super::Fixed;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a fixed-point number as a decimal literal.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.to_num::<f64>())
    }

    /// Deserialize a decimal literal into a fixed-point number.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Fixed::checked_from_num(value)
            .ok_or_else(|| D::Error::custom(format!("value {value} out of fixed-point range")))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Default facing: heading angle zero, pointing along +y.
    pub const FORWARD: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ONE,
    };

    /// Create a vector from integer coordinates.
    #[must_use]
    pub fn from_ints(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Dot product of two vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    /// Vector length.
    #[must_use]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.dot(self))
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == Fixed::ZERO {
            return Self::ZERO;
        }

        Self::new(self.x / len, self.y / len)
    }

    /// Whether both components are zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.x == Fixed::ZERO && self.y == Fixed::ZERO
    }

    /// Right-hand side vector of a facing: `(cos θ, -sin θ)` for `(sin θ, cos θ)`.
    #[must_use]
    pub fn right(self) -> Self {
        Self::new(self.y, -self.x)
    }

    /// Unit facing pointing from `from` towards `to`, if the points differ.
    #[must_use]
    pub fn facing_towards(from: Self, to: Self) -> Option<Self> {
        let dir = (to - from).normalize();
        if dir.is_zero() {
            None
        } else {
            Some(dir)
        }
    }

    /// Transform a formation-local offset into world space.
    ///
    /// `offset.y` runs along `facing`, `offset.x` along its right-hand side.
    #[must_use]
    pub fn local_to_world(position: Self, facing: Self, offset: Self) -> Self {
        position + facing * offset.y + facing.right() * offset.x
    }

    /// Arithmetic mean of a set of points (zero for an empty set).
    #[must_use]
    pub fn average(points: &[Self]) -> Self {
        if points.is_empty() {
            return Self::ZERO;
        }
        let count = Fixed::from_num(points.len());
        let sum = points.iter().fold(Self::ZERO, |acc, p| acc + *p);
        Self::new(sum.x / count, sum.y / count)
    }
}

/// Computes the square root of a fixed-point number using binary search.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = value.max(Fixed::ONE).saturating_add(Fixed::ONE);

    for _ in 0..64 {
        let mid = low + (high - low) / Fixed::from_num(2);
        let mid_sq = mid.saturating_mul(mid);

        if mid_sq <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

/// Cosine of an angle in radians, via range reduction and a Taylor series.
#[must_use]
pub fn fixed_cos(angle: Fixed) -> Fixed {
    let two_pi = PI * Fixed::from_num(2);
    let mut x = angle.abs() % two_pi;
    if x > PI {
        x = two_pi - x;
    }

    let x_sq = x * x;
    let mut term = Fixed::ONE;
    let mut sum = Fixed::ONE;
    for k in 1..=12i32 {
        let denom = Fixed::from_num((2 * k - 1) * (2 * k));
        term = -term * x_sq / denom;
        sum += term;
    }

    sum.clamp(-Fixed::ONE, Fixed::ONE)
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Neg for Vec2Fixed {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self {
            x: -self.x,
            y: -self.y,
        }
    }
}

impl std::ops::Mul<Fixed> for Vec2Fixed {
    type Output = Self;

    fn mul(self, rhs: Fixed) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epsilon() -> Fixed {
        Fixed::ONE / Fixed::from_num(10000)
    }

    #[test]
    fn test_vec2_distance_squared() {
        let a = Vec2Fixed::new(Fixed::from_num(3), Fixed::from_num(0));
        let b = Vec2Fixed::new(Fixed::from_num(0), Fixed::from_num(4));
        // 3² + 4² = 25
        assert_eq!(a.distance_squared(b), Fixed::from_num(25));
        assert!((a.distance(b) - Fixed::from_num(5)).abs() < epsilon());
    }

    #[test]
    fn test_vec2_normalize() {
        let v = Vec2Fixed::new(Fixed::from_num(3), Fixed::from_num(4));
        let norm = v.normalize();

        let len_sq = norm.dot(norm);
        assert!(
            (len_sq - Fixed::ONE).abs() < epsilon(),
            "normalized vector length² should be ~1, got {:?}",
            len_sq
        );

        let ratio_diff = (norm.x * Fixed::from_num(4)) - (norm.y * Fixed::from_num(3));
        assert!(ratio_diff.abs() < epsilon(), "direction not preserved");
    }

    #[test]
    fn test_normalize_zero_is_zero() {
        assert_eq!(Vec2Fixed::ZERO.normalize(), Vec2Fixed::ZERO);
        assert!(Vec2Fixed::facing_towards(Vec2Fixed::ZERO, Vec2Fixed::ZERO).is_none());
    }

    #[test]
    fn test_sqrt_of_large_value() {
        let root = fixed_sqrt(Fixed::from_num(1_000_000));
        assert!((root - Fixed::from_num(1000)).abs() < epsilon());
    }

    #[test]
    fn test_cos_known_angles() {
        assert!((fixed_cos(Fixed::ZERO) - Fixed::ONE).abs() < epsilon());
        assert!(fixed_cos(PI / Fixed::from_num(2)).abs() < epsilon());
        assert!((fixed_cos(PI) + Fixed::ONE).abs() < epsilon());
        // cos(π/3) = 0.5
        let third = fixed_cos(PI / Fixed::from_num(3));
        assert!((third - Fixed::from_num(0.5)).abs() < epsilon());
        // symmetric and periodic
        assert!((fixed_cos(-PI / Fixed::from_num(3)) - third).abs() < epsilon());
        let wrapped = fixed_cos(PI / Fixed::from_num(3) + PI * Fixed::from_num(2));
        assert!((wrapped - third).abs() < epsilon());
    }

    #[test]
    fn test_local_to_world_identity_facing() {
        let pos = Vec2Fixed::from_ints(10, 20);
        let offset = Vec2Fixed::from_ints(2, -3);
        let world = Vec2Fixed::local_to_world(pos, Vec2Fixed::FORWARD, offset);
        assert_eq!(world, Vec2Fixed::from_ints(12, 17));
    }

    #[test]
    fn test_local_to_world_quarter_turn() {
        // Facing +x: local forward (y) maps to +x, local right (x) maps to -y.
        let facing = Vec2Fixed::from_ints(1, 0);
        let world = Vec2Fixed::local_to_world(Vec2Fixed::ZERO, facing, Vec2Fixed::from_ints(1, 2));
        assert_eq!(world, Vec2Fixed::from_ints(2, -1));
    }

    #[test]
    fn test_average() {
        let points = [
            Vec2Fixed::from_ints(0, 0),
            Vec2Fixed::from_ints(4, 0),
            Vec2Fixed::from_ints(2, 6),
        ];
        assert_eq!(Vec2Fixed::average(&points), Vec2Fixed::from_ints(2, 2));
        assert_eq!(Vec2Fixed::average(&[]), Vec2Fixed::ZERO);
    }
}

//! # Core Data Structures
//!
//! This module defines the fundamental data types used throughout the library:
//!
//! - **Vector2D**: 2D position/velocity vector with arithmetic operations
//! - **OrcaLine**: Half-plane constraint in velocity space (an ORCA line)
//! - **AgentHandle**: Stable, generation-checked agent identity
//! - Scalar helpers: `sqr`, `det`, `left_of`, `dist_sq_point_segment`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Threshold below which lengths, determinants and denominators are treated as zero.
pub const EPSILON: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2D {
    pub x: f64,
    pub y: f64,
}

impl Vector2D {
    pub const ZERO: Vector2D = Vector2D { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Vector2D { x, y }
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude_squared().sqrt()
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    /// Unit vector in the same direction, or zero for a zero-length vector.
    pub fn normalize(&self) -> Vector2D {
        let mag = self.magnitude();
        if mag > 0.0 {
            Vector2D {
                x: self.x / mag,
                y: self.y / mag,
            }
        } else {
            Vector2D::ZERO
        }
    }

    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Counter-clockwise perpendicular.
    pub fn perpendicular(&self) -> Vector2D {
        Vector2D {
            x: -self.y,
            y: self.x,
        }
    }

    pub fn distance(&self, other: &Vector2D) -> f64 {
        (*self - *other).magnitude()
    }

    pub fn distance_squared(&self, other: &Vector2D) -> f64 {
        (*self - *other).magnitude_squared()
    }

    /// Scales the vector down so its length does not exceed `max_length`.
    pub fn clamp_magnitude(&self, max_length: f64) -> Vector2D {
        let mag_sq = self.magnitude_squared();
        if mag_sq > max_length * max_length {
            self.normalize() * max_length
        } else {
            *self
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl fmt::Display for Vector2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector2D({:.2}, {:.2})", self.x, self.y)
    }
}

impl Add for Vector2D {
    type Output = Vector2D;

    fn add(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl AddAssign for Vector2D {
    fn add_assign(&mut self, other: Vector2D) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;

    fn sub(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl SubAssign for Vector2D {
    fn sub_assign(&mut self, other: Vector2D) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl Mul<f64> for Vector2D {
    type Output = Vector2D;

    fn mul(self, scalar: f64) -> Vector2D {
        Vector2D {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }
}

impl Mul<Vector2D> for f64 {
    type Output = Vector2D;

    fn mul(self, vector: Vector2D) -> Vector2D {
        vector * self
    }
}

impl Div<f64> for Vector2D {
    type Output = Vector2D;

    fn div(self, scalar: f64) -> Vector2D {
        Vector2D {
            x: self.x / scalar,
            y: self.y / scalar,
        }
    }
}

impl Neg for Vector2D {
    type Output = Vector2D;

    fn neg(self) -> Vector2D {
        Vector2D {
            x: -self.x,
            y: -self.y,
        }
    }
}

pub fn sqr(value: f64) -> f64 {
    value * value
}

/// Determinant of the 2x2 matrix with rows `a` and `b` (the 2D cross product).
pub fn det(a: Vector2D, b: Vector2D) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Positive when `c` lies to the left of the directed line `a -> b`.
pub fn left_of(a: Vector2D, b: Vector2D, c: Vector2D) -> f64 {
    det(a - c, b - a)
}

/// Squared distance from point `c` to the segment `a`-`b`.
pub fn dist_sq_point_segment(a: Vector2D, b: Vector2D, c: Vector2D) -> f64 {
    let ab = b - a;
    let len_sq = ab.magnitude_squared();
    if len_sq <= 0.0 {
        return c.distance_squared(&a);
    }
    let r = (c - a).dot(&ab) / len_sq;
    if r < 0.0 {
        c.distance_squared(&a)
    } else if r > 1.0 {
        c.distance_squared(&b)
    } else {
        c.distance_squared(&(a + ab * r))
    }
}

/// A half-plane constraint in velocity space.
///
/// The permitted velocities lie to the left of `direction` through `point`:
/// `v` is permitted iff `det(direction, point - v) <= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrcaLine {
    /// A point on the boundary of the half-plane
    pub point: Vector2D,
    /// Unit direction of the boundary
    pub direction: Vector2D,
}

impl OrcaLine {
    pub fn new(point: Vector2D, direction: Vector2D) -> Self {
        OrcaLine { point, direction }
    }

    /// Unit normal pointing into the permitted side.
    pub fn normal(&self) -> Vector2D {
        self.direction.perpendicular()
    }

    /// Signed distance by which `v` violates the half-plane (negative when permitted).
    pub fn violation(&self, v: Vector2D) -> f64 {
        det(self.direction, self.point - v)
    }

    pub fn permits(&self, v: Vector2D) -> bool {
        self.violation(v) <= 0.0
    }
}

impl fmt::Display for OrcaLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrcaLine(point={}, direction={})", self.point, self.direction)
    }
}

/// Identity of an agent inside a [`crate::Simulator`].
///
/// Slots are reused after removal, but every reuse bumps `generation`, so a
/// handle to a removed agent never resolves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl AgentHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        AgentHandle { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Agent({}v{})", self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // ==================== Vector2D Tests ====================

    #[test]
    fn test_vector2d_magnitude_345() {
        let v = Vector2D::new(3.0, 4.0);
        assert_eq!(v.magnitude(), 5.0);
        assert_eq!(v.magnitude_squared(), 25.0);
    }

    #[test]
    fn test_vector2d_normalize_zero() {
        let n = Vector2D::ZERO.normalize();
        assert_eq!(n, Vector2D::ZERO);
    }

    #[test]
    fn test_vector2d_normalize_345() {
        let n = Vector2D::new(3.0, 4.0).normalize();
        assert_relative_eq!(n.x, 0.6, epsilon = 1e-12);
        assert_relative_eq!(n.y, 0.8, epsilon = 1e-12);
        assert_relative_eq!(n.magnitude(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vector2d_perpendicular() {
        let v = Vector2D::new(3.0, 4.0);
        let p = v.perpendicular();
        assert_eq!(p, Vector2D::new(-4.0, 3.0));
        assert_eq!(v.dot(&p), 0.0);
    }

    #[test]
    fn test_vector2d_operators() {
        let a = Vector2D::new(1.0, 2.0);
        let b = Vector2D::new(3.0, 4.0);
        assert_eq!(a + b, Vector2D::new(4.0, 6.0));
        assert_eq!(b - a, Vector2D::new(2.0, 2.0));
        assert_eq!(a * 2.0, Vector2D::new(2.0, 4.0));
        assert_eq!(2.0 * a, Vector2D::new(2.0, 4.0));
        assert_eq!(b / 2.0, Vector2D::new(1.5, 2.0));
        assert_eq!(-a, Vector2D::new(-1.0, -2.0));

        let mut c = a;
        c += b;
        c -= Vector2D::new(1.0, 1.0);
        assert_eq!(c, Vector2D::new(3.0, 5.0));
    }

    #[test]
    fn test_vector2d_clamp_magnitude() {
        let v = Vector2D::new(3.0, 4.0);
        assert_eq!(v.clamp_magnitude(10.0), v);
        let clamped = v.clamp_magnitude(1.0);
        assert_relative_eq!(clamped.magnitude(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(clamped.x, 0.6, epsilon = 1e-12);
        assert_eq!(v.clamp_magnitude(0.0), Vector2D::ZERO);
    }

    #[test]
    fn test_vector2d_display() {
        assert_eq!(Vector2D::new(1.5, 2.5).to_string(), "Vector2D(1.50, 2.50)");
    }

    // ==================== Scalar Helper Tests ====================

    #[test]
    fn test_det_sign() {
        let x = Vector2D::new(1.0, 0.0);
        let y = Vector2D::new(0.0, 1.0);
        assert_eq!(det(x, y), 1.0);
        assert_eq!(det(y, x), -1.0);
        assert_eq!(det(x, x * 3.0), 0.0);
    }

    #[test]
    fn test_left_of() {
        let a = Vector2D::new(0.0, 0.0);
        let b = Vector2D::new(1.0, 0.0);
        assert!(left_of(a, b, Vector2D::new(0.5, 1.0)) > 0.0);
        assert!(left_of(a, b, Vector2D::new(0.5, -1.0)) < 0.0);
        assert_eq!(left_of(a, b, Vector2D::new(2.0, 0.0)), 0.0);
    }

    #[test]
    fn test_dist_sq_point_segment() {
        let a = Vector2D::new(0.0, 0.0);
        let b = Vector2D::new(4.0, 0.0);
        assert_eq!(dist_sq_point_segment(a, b, Vector2D::new(2.0, 3.0)), 9.0);
        assert_eq!(dist_sq_point_segment(a, b, Vector2D::new(-3.0, 4.0)), 25.0);
        assert_eq!(dist_sq_point_segment(a, b, Vector2D::new(5.0, 0.0)), 1.0);
        assert_eq!(dist_sq_point_segment(a, a, Vector2D::new(0.0, 2.0)), 4.0);
    }

    // ==================== OrcaLine Tests ====================

    #[test]
    fn test_line_permits_left_side() {
        let line = OrcaLine::new(Vector2D::new(0.0, 1.0), Vector2D::new(1.0, 0.0));
        assert_eq!(line.normal(), Vector2D::new(0.0, 1.0));
        assert!(line.permits(Vector2D::new(5.0, 2.0)));
        assert!(line.permits(Vector2D::new(-5.0, 1.0)));
        assert!(!line.permits(Vector2D::new(0.0, 0.0)));
        assert_relative_eq!(line.violation(Vector2D::new(3.0, -1.0)), 2.0);
    }

    #[test]
    fn test_line_display() {
        let s = OrcaLine::new(Vector2D::ZERO, Vector2D::new(0.0, 1.0)).to_string();
        assert!(s.contains("OrcaLine"));
        assert!(s.contains("direction="));
    }

    // ==================== AgentHandle Tests ====================

    #[test]
    fn test_handle_ordering() {
        let a = AgentHandle::new(1, 0);
        let b = AgentHandle::new(1, 1);
        let c = AgentHandle::new(2, 0);
        assert!(a < b);
        assert!(b < c);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "Agent(1v0)");
    }
}

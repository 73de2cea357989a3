//! # Constrained Velocity Solver
//!
//! Finds the velocity closest to a preferred velocity inside the intersection
//! of a set of half-planes ([`OrcaLine`]s) and the max-speed disk.
//!
//! ## Algorithm
//!
//! 1. **Incremental 2D LP** (`linear_program_2`): lines are processed in
//!    priority order. Whenever the current optimum violates a line, the
//!    optimum is recomputed on that line's boundary (`linear_program_1`, a
//!    closed-form 1D problem against the earlier lines and the disk).
//! 2. **Penetration fallback** (`linear_program_3`): if the 1D problem has no
//!    solution at line `k`, lines after `k` are dropped and the velocity that
//!    minimizes the largest violation of lines `0..=k` is chosen instead.
//!    Obstacle lines (the first `num_obstacle_lines`) stay hard constraints.
//!
//! Both stages are pure functions of their inputs. The caller can tell them
//! apart through [`Solution`].

use crate::structs::{det, sqr, OrcaLine, Vector2D, EPSILON};

/// Outcome of [`solve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Solution {
    /// All lines were satisfied; the velocity is the optimum.
    Feasible(Vector2D),
    /// The lines were infeasible from `failed_line` on; the velocity
    /// minimizes penetration of lines `0..=failed_line`.
    Fallback {
        velocity: Vector2D,
        failed_line: usize,
    },
}

impl Solution {
    pub fn velocity(&self) -> Vector2D {
        match *self {
            Solution::Feasible(velocity) => velocity,
            Solution::Fallback { velocity, .. } => velocity,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Solution::Fallback { .. })
    }
}

/// What the 2D program optimizes.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Objective {
    /// Closest point to this velocity.
    Closest(Vector2D),
    /// Furthest point along this unit direction.
    Direction(Vector2D),
}

/// Result of the incremental 2D program.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Lp2Result {
    Feasible(Vector2D),
    /// `partial` satisfies every line before `failed_line`.
    Infeasible { failed_line: usize, partial: Vector2D },
}

/// Solves for the velocity nearest `preferred` subject to `lines` and
/// `|v| <= max_speed`. Always returns a velocity within the speed disk.
pub fn solve(
    lines: &[OrcaLine],
    num_obstacle_lines: usize,
    max_speed: f64,
    preferred: Vector2D,
) -> Solution {
    let max_speed = max_speed.max(0.0);

    match linear_program_2(lines, max_speed, Objective::Closest(preferred)) {
        Lp2Result::Feasible(velocity) => Solution::Feasible(velocity.clamp_magnitude(max_speed)),
        Lp2Result::Infeasible {
            failed_line,
            partial,
        } => {
            let relevant = &lines[..=failed_line];
            let velocity = linear_program_3(
                relevant,
                num_obstacle_lines.min(failed_line),
                failed_line,
                max_speed,
                partial,
            );
            Solution::Fallback {
                velocity: velocity.clamp_magnitude(max_speed),
                failed_line,
            }
        }
    }
}

/// Optimizes on the boundary of `lines[line_no]`, respecting the disk of
/// `radius` and every earlier line. `None` when that segment is empty.
fn linear_program_1(
    lines: &[OrcaLine],
    line_no: usize,
    radius: f64,
    objective: Objective,
) -> Option<Vector2D> {
    let line = &lines[line_no];
    let dot_product = line.point.dot(&line.direction);
    let discriminant = sqr(dot_product) + sqr(radius) - line.point.magnitude_squared();

    if discriminant < 0.0 {
        // Max speed disk fully invalidates this line.
        return None;
    }

    let sqrt_discriminant = discriminant.sqrt();
    let mut t_left = -dot_product - sqrt_discriminant;
    let mut t_right = -dot_product + sqrt_discriminant;

    for earlier in &lines[..line_no] {
        let denominator = det(line.direction, earlier.direction);
        let numerator = det(earlier.direction, line.point - earlier.point);

        if denominator.abs() <= EPSILON {
            // Parallel lines: either the earlier one covers this one or
            // nothing on this line is permitted.
            if numerator < 0.0 {
                return None;
            }
            continue;
        }

        let t = numerator / denominator;
        if denominator >= 0.0 {
            t_right = t_right.min(t);
        } else {
            t_left = t_left.max(t);
        }

        if t_left > t_right {
            return None;
        }
    }

    let t = match objective {
        Objective::Direction(direction) => {
            if direction.dot(&line.direction) > 0.0 {
                t_right
            } else {
                t_left
            }
        }
        Objective::Closest(target) => line.direction.dot(&(target - line.point)).clamp(t_left, t_right),
    };

    Some(line.point + line.direction * t)
}

fn linear_program_2(lines: &[OrcaLine], radius: f64, objective: Objective) -> Lp2Result {
    let mut result = match objective {
        Objective::Direction(direction) => direction * radius,
        Objective::Closest(target) => target.clamp_magnitude(radius),
    };

    for (i, line) in lines.iter().enumerate() {
        if line.violation(result) > 0.0 {
            match linear_program_1(lines, i, radius, objective) {
                Some(on_line) => result = on_line,
                None => {
                    return Lp2Result::Infeasible {
                        failed_line: i,
                        partial: result,
                    }
                }
            }
        }
    }

    Lp2Result::Feasible(result)
}

/// Moves every soft line outwards at the same rate until a velocity inside
/// the disk satisfies them all, starting from `partial` which already
/// satisfies `lines[..begin_line]`.
fn linear_program_3(
    lines: &[OrcaLine],
    num_obstacle_lines: usize,
    begin_line: usize,
    radius: f64,
    partial: Vector2D,
) -> Vector2D {
    let mut result = partial;
    let mut distance = 0.0;

    for i in begin_line..lines.len() {
        let line_i = &lines[i];
        if line_i.violation(result) <= distance {
            continue;
        }

        let mut projected: Vec<OrcaLine> = lines[..num_obstacle_lines].to_vec();

        for line_j in &lines[num_obstacle_lines..i] {
            let determinant = det(line_i.direction, line_j.direction);

            let point = if determinant.abs() <= EPSILON {
                if line_i.direction.dot(&line_j.direction) > 0.0 {
                    // Same direction: line j adds nothing here.
                    continue;
                }
                (line_i.point + line_j.point) * 0.5
            } else {
                line_i.point
                    + line_i.direction
                        * (det(line_j.direction, line_i.point - line_j.point) / determinant)
            };

            projected.push(OrcaLine::new(
                point,
                (line_j.direction - line_i.direction).normalize(),
            ));
        }

        let objective = Objective::Direction(line_i.normal());
        // The previous result is feasible for the projected program by
        // construction; a failure here is rounding error and keeps it.
        if let Lp2Result::Feasible(candidate) = linear_program_2(&projected, radius, objective) {
            result = candidate;
        }

        distance = line_i.violation(result);
    }

    result
}

/// Largest violation of any line by `velocity` (0 when all are satisfied).
pub fn max_violation(lines: &[OrcaLine], velocity: Vector2D) -> f64 {
    lines
        .iter()
        .map(|line| line.violation(velocity))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Half-plane `v . normal >= offset`.
    fn half_plane(normal: Vector2D, offset: f64) -> OrcaLine {
        let normal = normal.normalize();
        OrcaLine::new(normal * offset, Vector2D::new(normal.y, -normal.x))
    }

    #[test]
    fn test_half_plane_helper_orientation() {
        let line = half_plane(Vector2D::new(0.0, 1.0), 0.5);
        assert!(line.permits(Vector2D::new(0.0, 1.0)));
        assert!(!line.permits(Vector2D::new(0.0, 0.0)));
        assert_relative_eq!(line.normal().y, 1.0);
    }

    // ==================== Feasible Tests ====================

    #[test]
    fn test_no_lines_returns_preferred() {
        let pref = Vector2D::new(0.3, -0.4);
        let solution = solve(&[], 0, 1.0, pref);
        assert_eq!(solution, Solution::Feasible(pref));
    }

    #[test]
    fn test_no_lines_clamps_to_max_speed() {
        let solution = solve(&[], 0, 2.0, Vector2D::new(30.0, 40.0));
        let v = solution.velocity();
        assert!(!solution.is_fallback());
        assert_relative_eq!(v.magnitude(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(v.x, 1.2, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_max_speed_returns_zero() {
        let lines = [half_plane(Vector2D::new(1.0, 0.0), -1.0)];
        let v = solve(&lines, 0, 0.0, Vector2D::new(1.0, 1.0)).velocity();
        assert_eq!(v, Vector2D::ZERO);
    }

    #[test]
    fn test_satisfied_line_is_ignored() {
        let lines = [half_plane(Vector2D::new(0.0, 1.0), -0.5)];
        let pref = Vector2D::new(0.5, 0.0);
        assert_eq!(solve(&lines, 0, 1.0, pref), Solution::Feasible(pref));
    }

    #[test]
    fn test_single_violated_line_projects_onto_boundary() {
        // Require vy >= 0.5 while preferring straight right.
        let lines = [half_plane(Vector2D::new(0.0, 1.0), 0.5)];
        let v = solve(&lines, 0, 2.0, Vector2D::new(1.0, 0.0)).velocity();
        assert_relative_eq!(v.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(v.y, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_projection_limited_by_speed_disk() {
        // Boundary vy = 0.6 inside a unit disk; preferred far to the right.
        let lines = [half_plane(Vector2D::new(0.0, 1.0), 0.6)];
        let v = solve(&lines, 0, 1.0, Vector2D::new(5.0, 0.0)).velocity();
        assert_relative_eq!(v.x, 0.8, epsilon = 1e-9);
        assert_relative_eq!(v.y, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_two_lines_meet_at_corner() {
        // vy >= 0.2 and vx <= -0.1, preferring (1, 0).
        let lines = [
            half_plane(Vector2D::new(0.0, 1.0), 0.2),
            half_plane(Vector2D::new(-1.0, 0.0), 0.1),
        ];
        let solution = solve(&lines, 0, 2.0, Vector2D::new(1.0, 0.0));
        assert!(!solution.is_fallback());
        let v = solution.velocity();
        assert_relative_eq!(v.x, -0.1, epsilon = 1e-9);
        assert_relative_eq!(v.y, 0.2, epsilon = 1e-9);
        assert!(max_violation(&lines, v) < 1e-9);
    }

    #[test]
    fn test_parallel_compatible_lines() {
        let lines = [
            half_plane(Vector2D::new(0.0, 1.0), 0.1),
            half_plane(Vector2D::new(0.0, 1.0), 0.3),
        ];
        let v = solve(&lines, 0, 1.0, Vector2D::ZERO).velocity();
        assert_relative_eq!(v.y, 0.3, epsilon = 1e-9);
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-9);
    }

    // ==================== Fallback Tests ====================

    #[test]
    fn test_opposing_lines_trigger_fallback() {
        // vy >= 0.5 and vy <= -0.5 cannot both hold.
        let lines = [
            half_plane(Vector2D::new(0.0, 1.0), 0.5),
            half_plane(Vector2D::new(0.0, -1.0), 0.5),
        ];
        let solution = solve(&lines, 0, 2.0, Vector2D::new(1.0, 0.0));
        match solution {
            Solution::Fallback { velocity, failed_line } => {
                assert_eq!(failed_line, 1);
                // Equal penetration of both lines: vy = 0.
                assert_relative_eq!(velocity.y, 0.0, epsilon = 1e-9);
                assert!(velocity.magnitude() <= 2.0 + 1e-12);
                assert_relative_eq!(max_violation(&lines, velocity), 0.5, epsilon = 1e-9);
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_line_outside_speed_disk_triggers_fallback() {
        // vx >= 3 is unreachable at max speed 1.
        let lines = [half_plane(Vector2D::new(1.0, 0.0), 3.0)];
        let solution = solve(&lines, 0, 1.0, Vector2D::ZERO);
        assert!(solution.is_fallback());
        let v = solution.velocity();
        assert_relative_eq!(v.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fallback_drops_lower_priority_lines() {
        let lines = [
            half_plane(Vector2D::new(0.0, 1.0), 0.5),
            half_plane(Vector2D::new(0.0, -1.0), 0.5),
            // Lower priority than the failure point; must not influence the result.
            half_plane(Vector2D::new(1.0, 0.0), 0.9),
        ];
        let with_extra = solve(&lines, 0, 2.0, Vector2D::ZERO);
        let without_extra = solve(&lines[..2], 0, 2.0, Vector2D::ZERO);
        assert_eq!(with_extra, without_extra);
    }

    #[test]
    fn test_fallback_keeps_obstacle_lines_hard() {
        // Obstacle line: vy >= 0.4. Agent lines: vy <= -0.5 conflicts with it.
        let lines = [
            half_plane(Vector2D::new(0.0, 1.0), 0.4),
            half_plane(Vector2D::new(0.0, -1.0), 0.5),
        ];
        let solution = solve(&lines, 1, 2.0, Vector2D::ZERO);
        assert!(solution.is_fallback());
        let v = solution.velocity();
        assert!(lines[0].permits(v) || lines[0].violation(v) < 1e-9);
        assert_relative_eq!(v.y, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn test_fallback_minimizes_max_violation_of_three_lines() {
        // Three lines whose permitted regions form an empty triangle around
        // the origin; by symmetry the fallback sits at the origin.
        let lines: Vec<OrcaLine> = (0..3)
            .map(|k| {
                let angle = k as f64 * 2.0 * std::f64::consts::PI / 3.0;
                half_plane(Vector2D::new(angle.cos(), angle.sin()), 0.3)
            })
            .collect();
        let solution = solve(&lines, 0, 1.0, Vector2D::new(0.2, 0.1));
        assert!(solution.is_fallback());
        let v = solution.velocity();
        assert!(v.magnitude() < 1e-6, "expected the origin, got {}", v);
        assert_relative_eq!(max_violation(&lines, v), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_solver_is_deterministic() {
        let lines: Vec<OrcaLine> = (0..8)
            .map(|k| {
                let angle = k as f64 * 0.7;
                half_plane(Vector2D::new(angle.cos(), angle.sin()), 0.05 * k as f64)
            })
            .collect();
        let a = solve(&lines, 0, 1.5, Vector2D::new(1.0, 0.3));
        let b = solve(&lines, 0, 1.5, Vector2D::new(1.0, 0.3));
        assert_eq!(a, b);
        assert!(a.velocity().magnitude() <= 1.5);
    }
}

//! # ORCA - Optimal Reciprocal Collision Avoidance
//!
//! Builds the half-plane constraints ("ORCA lines") of one agent from the
//! agents and obstacle edges around it, following
//! "Reciprocal n-body Collision Avoidance" by van den Berg et al. (ISRR 2011).
//!
//! ## Algorithm Overview
//!
//! For every neighbor the truncated velocity obstacle (VO) is the set of
//! relative velocities that lead to a collision within the time horizon:
//! a cone from the origin towards the neighbor, cut off by a disk of radius
//! `combined_radius / tau` centered at `relative_position / tau`.
//!
//! 1. Find `u`, the smallest change to the relative velocity that leaves
//!    the VO (projection onto the cut-off circle or one of the two legs).
//! 2. The agent takes `avoidance_share` of that change (half by default);
//!    the neighbor is assumed to take the rest. The line passes through
//!    `velocity + share * u` with outward normal `u / |u|`.
//! 3. Static obstacles cannot reciprocate, so their lines take the full
//!    correction and are computed against the obstacle time horizon.
//!
//! ## Overlapping Agents
//!
//! When two agents already overlap, the cone is undefined. The line is then
//! built against the cut-off circle of a single time step, which yields a
//! bounded correction that pushes the agents apart along the line connecting
//! their centers. When the relative velocity exactly cancels that push, the
//! line pushes straight away from the neighbor instead. Agents at the very
//! same spot with the same velocity have no separating direction at all; they
//! are split along the x axis, the lower handle going left.
//!
//! ## Symmetry Breaking
//!
//! Perfectly symmetric crowds (agents on a circle heading for the antipodal
//! points) can settle into a ring where every agent stands still against
//! its two neighbors: each line is satisfied at zero velocity and ORCA has
//! no reason to move. This is the **symmetry deadlock**.
//!
//! A pair is degenerate when both its correction `u` and its relative
//! velocity are shorter than [`PERTURBATION_EPSILON`]. For such a pair the
//! split of responsibility is shifted: both agents move their line point by
//! the same vector, `perturbation_epsilon` along the line between them. One
//! of the two gains room towards the other and the other has to yield by the
//! same amount, so the reciprocal guarantee of the pair is unchanged.
//!
//! Which agent yields is decided from the pair's shared heading (the sum of
//! both preferred velocities):
//! - the agent with the neighbor on the left of the heading gains room,
//! - the agent with the neighbor on the right yields.
//!
//! Both agents compute the same shift from the same inputs, so no
//! coordination is needed. Pairs that are not degenerate are left untouched.
//!
//! ## Line Ordering
//!
//! Obstacle lines come first, then agent lines, each group in the order the
//! spatial index returned the neighbors (nearest first, ties by id). The
//! solver treats obstacle lines as hard constraints and gives earlier lines
//! priority when it has to relax constraints.

use crate::linear_program::{solve, Solution};
use crate::obstacle::{ObstacleSet, ObstacleVertex};
use crate::structs::{det, sqr, AgentHandle, OrcaLine, Vector2D, EPSILON};

/// Smallest lookahead used in place of a zero time horizon.
pub const MIN_TIME_HORIZON: f64 = 1e-6;

/// Default threshold and shift of the symmetry breaking.
pub const PERTURBATION_EPSILON: f64 = 0.1;

/// Read-only view of an agent as seen by the constraint builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentState {
    pub handle: AgentHandle,
    pub position: Vector2D,
    pub velocity: Vector2D,
    pub radius: f64,
    pub pref_velocity: Vector2D,
    pub max_speed: f64,
}

impl AgentState {
    pub fn new(
        handle: AgentHandle,
        position: Vector2D,
        velocity: Vector2D,
        radius: f64,
        pref_velocity: Vector2D,
        max_speed: f64,
    ) -> Self {
        AgentState {
            handle,
            position,
            velocity,
            radius,
            pref_velocity,
            max_speed,
        }
    }
}

/// Per-agent lookahead and the global tuning shared by every agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvoidanceParams {
    pub time_horizon: f64,
    pub time_horizon_obst: f64,
    pub time_step: f64,
    /// Fraction of the avoidance an agent takes on itself against another agent.
    pub avoidance_share: f64,
    /// Symmetry breaking threshold and shift; 0 disables it.
    pub perturbation_epsilon: f64,
}

impl AvoidanceParams {
    fn inv_time_horizon(&self) -> f64 {
        1.0 / self.time_horizon.max(MIN_TIME_HORIZON)
    }

    fn inv_time_horizon_obst(&self) -> f64 {
        1.0 / self.time_horizon_obst.max(MIN_TIME_HORIZON)
    }
}

/// Ordered constraints of one agent; the first `num_obstacle_lines` come
/// from static obstacles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    pub lines: Vec<OrcaLine>,
    pub num_obstacle_lines: usize,
}

impl ConstraintSet {
    pub fn agent_lines(&self) -> &[OrcaLine] {
        &self.lines[self.num_obstacle_lines..]
    }

    pub fn obstacle_lines(&self) -> &[OrcaLine] {
        &self.lines[..self.num_obstacle_lines]
    }

    /// Best velocity for `pref_velocity` under these lines and `max_speed`.
    pub fn solve(&self, max_speed: f64, pref_velocity: Vector2D) -> Solution {
        solve(&self.lines, self.num_obstacle_lines, max_speed, pref_velocity)
    }
}

/// Builds the agent's constraints and solves them in one go.
pub fn compute_new_velocity(
    agent: &AgentState,
    neighbors: &[&AgentState],
    obstacle_neighbors: &[usize],
    obstacles: &ObstacleSet,
    params: &AvoidanceParams,
) -> (ConstraintSet, Solution) {
    let constraints = build_constraints(agent, neighbors, obstacle_neighbors, obstacles, params);
    let solution = constraints.solve(agent.max_speed, agent.pref_velocity);
    (constraints, solution)
}

/// Builds the ordered ORCA lines for `agent`. `obstacle_neighbors` holds
/// the ids of the vertices whose outgoing edges are near the agent.
pub fn build_constraints(
    agent: &AgentState,
    neighbors: &[&AgentState],
    obstacle_neighbors: &[usize],
    obstacles: &ObstacleSet,
    params: &AvoidanceParams,
) -> ConstraintSet {
    let mut lines = Vec::with_capacity(obstacle_neighbors.len() + neighbors.len());

    let inv_time_horizon_obst = params.inv_time_horizon_obst();
    for &vertex in obstacle_neighbors {
        if let Some(line) =
            compute_orca_line_for_obstacle(agent, vertex, obstacles, &lines, inv_time_horizon_obst)
        {
            lines.push(line);
        }
    }
    let num_obstacle_lines = lines.len();

    for &neighbor in neighbors {
        lines.push(compute_orca_line_for_agent(agent, neighbor, params));
    }

    ConstraintSet {
        lines,
        num_obstacle_lines,
    }
}

/// Computes an ORCA line constraint for agent-agent interaction
fn compute_orca_line_for_agent(
    agent: &AgentState,
    neighbor: &AgentState,
    params: &AvoidanceParams,
) -> OrcaLine {
    let relative_position = neighbor.position - agent.position;
    let relative_velocity = agent.velocity - neighbor.velocity;
    let dist_sq = relative_position.magnitude_squared();
    let combined_radius = agent.radius + neighbor.radius;
    let combined_radius_sq = sqr(combined_radius);

    let (direction, u) = if dist_sq > combined_radius_sq {
        let inv_time_horizon = params.inv_time_horizon();

        // Vector from cut-off center to relative velocity
        let w = relative_velocity - relative_position * inv_time_horizon;
        let w_length_sq = w.magnitude_squared();
        let dot_product1 = w.dot(&relative_position);

        if dot_product1 < 0.0 && sqr(dot_product1) > combined_radius_sq * w_length_sq {
            // Project on cut-off circle
            let w_length = w_length_sq.sqrt();
            let unit_w = w / w_length;
            (
                Vector2D::new(unit_w.y, -unit_w.x),
                unit_w * (combined_radius * inv_time_horizon - w_length),
            )
        } else {
            // Project on legs
            let leg = (dist_sq - combined_radius_sq).sqrt();
            let direction = if det(relative_position, w) > 0.0 {
                // Left leg
                Vector2D::new(
                    relative_position.x * leg - relative_position.y * combined_radius,
                    relative_position.x * combined_radius + relative_position.y * leg,
                ) / dist_sq
            } else {
                // Right leg
                -Vector2D::new(
                    relative_position.x * leg + relative_position.y * combined_radius,
                    -relative_position.x * combined_radius + relative_position.y * leg,
                ) / dist_sq
            };
            let dot_product2 = relative_velocity.dot(&direction);
            (direction, direction * dot_product2 - relative_velocity)
        }
    } else {
        // Already overlapping: resolve within one time step
        let inv_time_step = 1.0 / params.time_step;
        let w = relative_velocity - relative_position * inv_time_step;
        let w_length = w.magnitude();

        let unit_w = if w_length >= EPSILON {
            w / w_length
        } else if dist_sq > sqr(EPSILON) {
            // Relative velocity cancels the push: separate along the centers
            (-relative_position).normalize()
        } else if agent.handle < neighbor.handle {
            // Same spot, same velocity: split deterministically by handle
            Vector2D::new(-1.0, 0.0)
        } else {
            Vector2D::new(1.0, 0.0)
        };

        return OrcaLine::new(
            agent.velocity + unit_w * (combined_radius * inv_time_step - w_length) * params.avoidance_share,
            Vector2D::new(unit_w.y, -unit_w.x),
        );
    };

    let mut point = agent.velocity + u * params.avoidance_share;
    let epsilon = params.perturbation_epsilon;
    if epsilon > 0.0
        && u.magnitude_squared() < sqr(epsilon)
        && relative_velocity.magnitude_squared() < sqr(epsilon)
    {
        if let Some(shift) = symmetry_shift(agent, neighbor, relative_position, epsilon) {
            point += shift;
        }
    }

    OrcaLine::new(point, direction)
}

/// Shift of the line point for a degenerate pair. Both agents of the pair
/// get the same vector: the one with the neighbor on the left of the shared
/// heading gains room towards it, the other yields. `None` when the heading
/// gives no side.
fn symmetry_shift(
    agent: &AgentState,
    neighbor: &AgentState,
    relative_position: Vector2D,
    epsilon: f64,
) -> Option<Vector2D> {
    let heading = agent.pref_velocity + neighbor.pref_velocity;
    if heading.magnitude_squared() <= sqr(EPSILON) {
        return None;
    }

    let towards_neighbor = relative_position.normalize();
    let side = det(heading, towards_neighbor);
    if side.abs() <= EPSILON {
        return None;
    }

    Some(towards_neighbor * epsilon.copysign(side))
}

/// Left and right tangent directions from the agent to a disk of `radius`
/// around a vertex at `relative_position`.
fn tangent_legs(relative_position: Vector2D, dist_sq: f64, radius: f64) -> (Vector2D, Vector2D) {
    let leg = (dist_sq - sqr(radius)).sqrt();
    let left = Vector2D::new(
        relative_position.x * leg - relative_position.y * radius,
        relative_position.x * radius + relative_position.y * leg,
    ) / dist_sq;
    let right = Vector2D::new(
        relative_position.x * leg + relative_position.y * radius,
        -relative_position.x * radius + relative_position.y * leg,
    ) / dist_sq;
    (left, right)
}

/// Computes the ORCA line for the obstacle edge leaving `vertex`, or `None`
/// when the edge adds nothing (already covered, behind a non-convex corner,
/// or handled by a neighboring edge).
fn compute_orca_line_for_obstacle(
    agent: &AgentState,
    vertex: usize,
    obstacles: &ObstacleSet,
    existing: &[OrcaLine],
    inv_time_horizon_obst: f64,
) -> Option<OrcaLine> {
    let radius = agent.radius;
    let radius_sq = sqr(radius);

    let mut obstacle1: &ObstacleVertex = obstacles.get(vertex);
    let mut obstacle2: &ObstacleVertex = obstacles.get(obstacle1.next);

    let relative_position1 = obstacle1.point - agent.position;
    let relative_position2 = obstacle2.point - agent.position;

    // Skip edges whose cut-off disks already lie behind an existing line
    let already_covered = existing.iter().any(|line| {
        det(relative_position1 * inv_time_horizon_obst - line.point, line.direction)
            - inv_time_horizon_obst * radius
            >= -EPSILON
            && det(relative_position2 * inv_time_horizon_obst - line.point, line.direction)
                - inv_time_horizon_obst * radius
                >= -EPSILON
    });
    if already_covered {
        return None;
    }

    let dist_sq1 = relative_position1.magnitude_squared();
    let dist_sq2 = relative_position2.magnitude_squared();

    let obstacle_vector = obstacle2.point - obstacle1.point;
    let s = (-relative_position1).dot(&obstacle_vector) / obstacle_vector.magnitude_squared();
    let dist_sq_line = (-relative_position1 - obstacle_vector * s).magnitude_squared();

    // Collisions with the edge or its endpoints
    if s < 0.0 && dist_sq1 <= radius_sq {
        return obstacle1.is_convex.then(|| {
            OrcaLine::new(
                Vector2D::ZERO,
                Vector2D::new(-relative_position1.y, relative_position1.x).normalize(),
            )
        });
    } else if s > 1.0 && dist_sq2 <= radius_sq {
        // The next edge takes care of the right vertex when it faces the agent
        return (obstacle2.is_convex && det(relative_position2, obstacle2.unit_dir) >= 0.0).then(
            || {
                OrcaLine::new(
                    Vector2D::ZERO,
                    Vector2D::new(-relative_position2.y, relative_position2.x).normalize(),
                )
            },
        );
    } else if (0.0..1.0).contains(&s) && dist_sq_line <= radius_sq {
        return Some(OrcaLine::new(Vector2D::ZERO, -obstacle1.unit_dir));
    }

    let (mut left_leg_direction, mut right_leg_direction) = if s < 0.0 && dist_sq_line <= radius_sq {
        // Seen obliquely: the left vertex alone defines the velocity obstacle
        if !obstacle1.is_convex {
            return None;
        }
        obstacle2 = obstacle1;
        tangent_legs(relative_position1, dist_sq1, radius)
    } else if s > 1.0 && dist_sq_line <= radius_sq {
        // Seen obliquely: the right vertex alone defines the velocity obstacle
        if !obstacle2.is_convex {
            return None;
        }
        obstacle1 = obstacle2;
        tangent_legs(relative_position2, dist_sq2, radius)
    } else {
        // Non-convex endpoints extend the cut-off line instead of a tangent
        let left = if obstacle1.is_convex {
            tangent_legs(relative_position1, dist_sq1, radius).0
        } else {
            -obstacle1.unit_dir
        };
        let right = if obstacle2.is_convex {
            tangent_legs(relative_position2, dist_sq2, radius).1
        } else {
            obstacle1.unit_dir
        };
        (left, right)
    };

    // A leg pointing into the neighboring edge is replaced by that edge's
    // cut-off line, which the neighboring edge contributes itself.
    let left_neighbor = obstacles.get(obstacle1.prev);
    let mut is_left_leg_foreign = false;
    let mut is_right_leg_foreign = false;

    if obstacle1.is_convex && det(left_leg_direction, -left_neighbor.unit_dir) >= 0.0 {
        left_leg_direction = -left_neighbor.unit_dir;
        is_left_leg_foreign = true;
    }
    if obstacle2.is_convex && det(right_leg_direction, obstacle2.unit_dir) <= 0.0 {
        right_leg_direction = obstacle2.unit_dir;
        is_right_leg_foreign = true;
    }

    let left_cutoff = (obstacle1.point - agent.position) * inv_time_horizon_obst;
    let right_cutoff = (obstacle2.point - agent.position) * inv_time_horizon_obst;
    let cutoff_vector = right_cutoff - left_cutoff;
    let same_vertex = obstacle1.id == obstacle2.id;

    let velocity = agent.velocity;
    let t = if same_vertex {
        0.5
    } else {
        (velocity - left_cutoff).dot(&cutoff_vector) / cutoff_vector.magnitude_squared()
    };
    let t_left = (velocity - left_cutoff).dot(&left_leg_direction);
    let t_right = (velocity - right_cutoff).dot(&right_leg_direction);

    let cutoff_radius = radius * inv_time_horizon_obst;

    if (t < 0.0 && t_left < 0.0) || (same_vertex && t_left < 0.0 && t_right < 0.0) {
        let unit_w = (velocity - left_cutoff).normalize();
        return Some(OrcaLine::new(
            left_cutoff + unit_w * cutoff_radius,
            Vector2D::new(unit_w.y, -unit_w.x),
        ));
    } else if t > 1.0 && t_right < 0.0 {
        let unit_w = (velocity - right_cutoff).normalize();
        return Some(OrcaLine::new(
            right_cutoff + unit_w * cutoff_radius,
            Vector2D::new(unit_w.y, -unit_w.x),
        ));
    }

    let dist_sq_cutoff = if t < 0.0 || t > 1.0 || same_vertex {
        f64::INFINITY
    } else {
        (velocity - (left_cutoff + cutoff_vector * t)).magnitude_squared()
    };
    let dist_sq_left = if t_left < 0.0 {
        f64::INFINITY
    } else {
        (velocity - (left_cutoff + left_leg_direction * t_left)).magnitude_squared()
    };
    let dist_sq_right = if t_right < 0.0 {
        f64::INFINITY
    } else {
        (velocity - (right_cutoff + right_leg_direction * t_right)).magnitude_squared()
    };

    let (direction, anchor) = if dist_sq_cutoff <= dist_sq_left && dist_sq_cutoff <= dist_sq_right {
        (-obstacle1.unit_dir, left_cutoff)
    } else if dist_sq_left <= dist_sq_right {
        if is_left_leg_foreign {
            return None;
        }
        (left_leg_direction, left_cutoff)
    } else {
        if is_right_leg_foreign {
            return None;
        }
        (-right_leg_direction, right_cutoff)
    };

    Some(OrcaLine::new(
        anchor + Vector2D::new(-direction.y, direction.x) * cutoff_radius,
        direction,
    ))
}

//! # Simulation Orchestrator
//!
//! [`Simulator`] owns the agent registry, the static obstacles and the
//! global clock. Each [`Simulator::step`] runs in two phases:
//!
//! 1. **Solve**: an immutable snapshot of every live agent is taken and the
//!    agent k-d tree is rebuilt from it. Every agent then queries its
//!    neighbors, builds its ORCA lines and solves for a new velocity. Agents
//!    only read the snapshot, so this phase runs in parallel with rayon.
//! 2. **Commit**: all new velocities are written back at once and positions
//!    advance by `velocity * time_step`.
//!
//! Agents are identified by generational [`AgentHandle`]s. A removed agent's
//! slot may be reused, but its old handle keeps failing with
//! [`SimError::InvalidHandle`].

use crate::error::{require_finite, require_non_negative, require_positive, Result, SimError};
use crate::kdtree::{AgentNeighbor, AgentTree, ObstacleTree};
use crate::obstacle::{ObstacleSet, ObstacleVertex};
use crate::orca::{compute_new_velocity, AgentState, AvoidanceParams, ConstraintSet, PERTURBATION_EPSILON};
use crate::structs::{AgentHandle, OrcaLine, Vector2D};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Per-agent parameters, fixed at registration and adjustable between steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentParams {
    /// Maximum distance at which other agents are considered.
    pub neighbor_dist: f64,
    /// Maximum number of agents considered.
    pub max_neighbors: usize,
    /// Lookahead against other agents.
    pub time_horizon: f64,
    /// Lookahead against static obstacles.
    pub time_horizon_obst: f64,
    pub radius: f64,
    pub max_speed: f64,
    /// Initial velocity.
    pub velocity: Vector2D,
}

impl Default for AgentParams {
    fn default() -> Self {
        AgentParams {
            neighbor_dist: 15.0,
            max_neighbors: 10,
            time_horizon: 10.0,
            time_horizon_obst: 10.0,
            radius: 1.5,
            max_speed: 2.0,
            velocity: Vector2D::ZERO,
        }
    }
}

impl AgentParams {
    pub fn validate(&self) -> Result<()> {
        require_positive("neighbor_dist", self.neighbor_dist)?;
        require_non_negative("time_horizon", self.time_horizon)?;
        require_non_negative("time_horizon_obst", self.time_horizon_obst)?;
        require_positive("radius", self.radius)?;
        require_positive("max_speed", self.max_speed)?;
        require_finite("velocity", self.velocity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub time_step: f64,
    /// Parameters used by [`Simulator::add_agent`].
    pub agent_defaults: AgentParams,
    /// Share of the avoidance each agent takes on against another agent.
    pub avoidance_share: f64,
    /// Symmetry breaking for deadlocked pairs, see [`crate::orca`]. 0 disables it.
    pub perturbation_epsilon: f64,
    /// Solve agents on the rayon thread pool.
    pub parallel: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            time_step: 0.25,
            agent_defaults: AgentParams::default(),
            avoidance_share: 0.5,
            perturbation_epsilon: PERTURBATION_EPSILON,
            parallel: true,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        require_positive("time_step", self.time_step)?;
        self.agent_defaults.validate()?;
        require_non_negative("avoidance_share", self.avoidance_share)?;
        if self.avoidance_share > 1.0 {
            return Err(SimError::InvalidArgument {
                name: "avoidance_share",
                value: self.avoidance_share,
                reason: "must be <= 1",
            });
        }
        require_non_negative("perturbation_epsilon", self.perturbation_epsilon)
    }
}

#[derive(Debug, Clone)]
struct Agent {
    position: Vector2D,
    velocity: Vector2D,
    pref_velocity: Vector2D,
    params: AgentParams,
    // Results of the last step, kept for inspection.
    neighbors: Vec<AgentNeighbor>,
    constraints: ConstraintSet,
    fallback: bool,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    agent: Option<Agent>,
}

/// Snapshot entry read by the solve phase.
struct StepInput {
    state: AgentState,
    params: AgentParams,
}

struct StepOutput {
    velocity: Vector2D,
    neighbors: Vec<AgentNeighbor>,
    constraints: ConstraintSet,
    fallback: bool,
}

#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulatorConfig,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    num_agents: usize,
    obstacles: ObstacleSet,
    obstacle_tree: ObstacleTree,
    global_time: f64,
    step_count: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::with_config(SimulatorConfig::default())
    }
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Simulator::with_config(config))
    }

    fn with_config(config: SimulatorConfig) -> Self {
        Simulator {
            config,
            slots: Vec::new(),
            free_slots: Vec::new(),
            num_agents: 0,
            obstacles: ObstacleSet::new(),
            obstacle_tree: ObstacleTree::default(),
            global_time: 0.0,
            step_count: 0,
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    // ==================== Registry ====================

    /// Adds an agent at `position` with the default parameters.
    pub fn add_agent(&mut self, position: Vector2D) -> Result<AgentHandle> {
        let params = self.config.agent_defaults;
        self.add_agent_with(position, params)
    }

    pub fn add_agent_with(&mut self, position: Vector2D, params: AgentParams) -> Result<AgentHandle> {
        require_finite("position", position)?;
        params.validate()?;

        let agent = Agent {
            position,
            velocity: params.velocity,
            pref_velocity: Vector2D::ZERO,
            params,
            neighbors: Vec::new(),
            constraints: ConstraintSet::default(),
            fallback: false,
        };

        let handle = match self.free_slots.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.agent = Some(agent);
                AgentHandle::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| SimError::InvalidArgument {
                    name: "num_agents",
                    value: self.slots.len() as f64,
                    reason: "agent capacity exhausted",
                })?;
                self.slots.push(Slot {
                    generation: 0,
                    agent: Some(agent),
                });
                AgentHandle::new(index, 0)
            }
        };

        self.num_agents += 1;
        debug!("Added {} at {}", handle, position);
        Ok(handle)
    }

    pub fn remove_agent(&mut self, handle: AgentHandle) -> Result<()> {
        self.agent(handle)?;
        let slot = &mut self.slots[handle.index() as usize];
        slot.agent = None;
        // A slot whose generation is exhausted is retired for good
        match slot.generation.checked_add(1) {
            Some(generation) => {
                slot.generation = generation;
                self.free_slots.push(handle.index());
            }
            None => debug!("Retired slot {}", handle.index()),
        }
        self.num_agents -= 1;
        debug!("Removed {}", handle);
        Ok(())
    }

    pub fn num_agents(&self) -> usize {
        self.num_agents
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<AgentHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.agent.is_some())
            .map(|(index, slot)| AgentHandle::new(index as u32, slot.generation))
            .collect()
    }

    fn agent(&self, handle: AgentHandle) -> Result<&Agent> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.agent.as_ref())
            .ok_or(SimError::InvalidHandle(handle))
    }

    fn agent_mut(&mut self, handle: AgentHandle) -> Result<&mut Agent> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.agent.as_mut())
            .ok_or(SimError::InvalidHandle(handle))
    }

    // ==================== Agent Getters ====================

    pub fn position(&self, handle: AgentHandle) -> Result<Vector2D> {
        Ok(self.agent(handle)?.position)
    }

    pub fn velocity(&self, handle: AgentHandle) -> Result<Vector2D> {
        Ok(self.agent(handle)?.velocity)
    }

    pub fn preferred_velocity(&self, handle: AgentHandle) -> Result<Vector2D> {
        Ok(self.agent(handle)?.pref_velocity)
    }

    pub fn radius(&self, handle: AgentHandle) -> Result<f64> {
        Ok(self.agent(handle)?.params.radius)
    }

    pub fn max_speed(&self, handle: AgentHandle) -> Result<f64> {
        Ok(self.agent(handle)?.params.max_speed)
    }

    /// Current parameters; `velocity` holds the current velocity.
    pub fn params(&self, handle: AgentHandle) -> Result<AgentParams> {
        let agent = self.agent(handle)?;
        Ok(AgentParams {
            velocity: agent.velocity,
            ..agent.params
        })
    }

    /// Agent neighbors considered in the last step, nearest first.
    pub fn agent_neighbors(&self, handle: AgentHandle) -> Result<&[AgentNeighbor]> {
        Ok(&self.agent(handle)?.neighbors)
    }

    /// ORCA lines built in the last step, obstacle lines first.
    pub fn orca_lines(&self, handle: AgentHandle) -> Result<&[OrcaLine]> {
        Ok(&self.agent(handle)?.constraints.lines)
    }

    pub fn num_obstacle_lines(&self, handle: AgentHandle) -> Result<usize> {
        Ok(self.agent(handle)?.constraints.num_obstacle_lines)
    }

    /// True when the last solve had to relax infeasible constraints.
    pub fn last_solution_was_fallback(&self, handle: AgentHandle) -> Result<bool> {
        Ok(self.agent(handle)?.fallback)
    }

    // ==================== Agent Setters ====================

    pub fn set_preferred_velocity(&mut self, handle: AgentHandle, velocity: Vector2D) -> Result<()> {
        require_finite("preferred_velocity", velocity)?;
        self.agent_mut(handle)?.pref_velocity = velocity;
        Ok(())
    }

    pub fn set_velocity(&mut self, handle: AgentHandle, velocity: Vector2D) -> Result<()> {
        require_finite("velocity", velocity)?;
        self.agent_mut(handle)?.velocity = velocity;
        Ok(())
    }

    pub fn set_position(&mut self, handle: AgentHandle, position: Vector2D) -> Result<()> {
        require_finite("position", position)?;
        self.agent_mut(handle)?.position = position;
        Ok(())
    }

    pub fn set_radius(&mut self, handle: AgentHandle, radius: f64) -> Result<()> {
        require_positive("radius", radius)?;
        self.agent_mut(handle)?.params.radius = radius;
        Ok(())
    }

    pub fn set_max_speed(&mut self, handle: AgentHandle, max_speed: f64) -> Result<()> {
        require_non_negative("max_speed", max_speed)?;
        self.agent_mut(handle)?.params.max_speed = max_speed;
        Ok(())
    }

    pub fn set_neighbor_dist(&mut self, handle: AgentHandle, neighbor_dist: f64) -> Result<()> {
        require_positive("neighbor_dist", neighbor_dist)?;
        self.agent_mut(handle)?.params.neighbor_dist = neighbor_dist;
        Ok(())
    }

    pub fn set_max_neighbors(&mut self, handle: AgentHandle, max_neighbors: usize) -> Result<()> {
        self.agent_mut(handle)?.params.max_neighbors = max_neighbors;
        Ok(())
    }

    pub fn set_time_horizon(&mut self, handle: AgentHandle, time_horizon: f64) -> Result<()> {
        require_non_negative("time_horizon", time_horizon)?;
        self.agent_mut(handle)?.params.time_horizon = time_horizon;
        Ok(())
    }

    pub fn set_time_horizon_obst(&mut self, handle: AgentHandle, time_horizon_obst: f64) -> Result<()> {
        require_non_negative("time_horizon_obst", time_horizon_obst)?;
        self.agent_mut(handle)?.params.time_horizon_obst = time_horizon_obst;
        Ok(())
    }

    // ==================== Global Parameters ====================

    pub fn set_agent_defaults(&mut self, params: AgentParams) -> Result<()> {
        params.validate()?;
        self.config.agent_defaults = params;
        debug!("Agent defaults set to {:?}", params);
        Ok(())
    }

    pub fn agent_defaults(&self) -> &AgentParams {
        &self.config.agent_defaults
    }

    pub fn set_time_step(&mut self, time_step: f64) -> Result<()> {
        require_positive("time_step", time_step)?;
        self.config.time_step = time_step;
        debug!("Time step set to {}", time_step);
        Ok(())
    }

    pub fn time_step(&self) -> f64 {
        self.config.time_step
    }

    pub fn global_time(&self) -> f64 {
        self.global_time
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    // ==================== Obstacles ====================

    /// Adds a polygon (counter-clockwise) and returns the id of its first
    /// vertex. It takes effect at the next [`Simulator::process_obstacles`].
    pub fn add_obstacle(&mut self, vertices: &[Vector2D]) -> Result<usize> {
        let first = self.obstacles.add_obstacle(vertices)?;
        debug!("Added obstacle with {} vertices at id {}", vertices.len(), first);
        Ok(first)
    }

    /// Builds the obstacle tree over every obstacle added so far.
    pub fn process_obstacles(&mut self) {
        let before = self.obstacles.len();
        self.obstacle_tree = ObstacleTree::build(&mut self.obstacles);
        debug!(
            "Processed obstacles: {} vertices ({} from edge splits)",
            self.obstacles.len(),
            self.obstacles.len() - before
        );
    }

    pub fn num_obstacle_vertices(&self) -> usize {
        self.obstacles.len()
    }

    pub fn obstacle_vertex(&self, id: usize) -> Result<Vector2D> {
        Ok(self.obstacle(id)?.point)
    }

    pub fn next_obstacle_vertex_id(&self, id: usize) -> Result<usize> {
        Ok(self.obstacle(id)?.next)
    }

    pub fn prev_obstacle_vertex_id(&self, id: usize) -> Result<usize> {
        Ok(self.obstacle(id)?.prev)
    }

    fn obstacle(&self, id: usize) -> Result<&ObstacleVertex> {
        self.obstacles
            .vertex(id)
            .ok_or_else(|| SimError::InvalidObstacle(format!("no obstacle vertex with id {}", id)))
    }

    /// True when a disk of `radius` can travel from `p1` to `p2` without
    /// touching a processed obstacle.
    pub fn query_visibility(&self, p1: Vector2D, p2: Vector2D, radius: f64) -> bool {
        self.obstacle_tree
            .query_visibility(&self.obstacles, p1, p2, radius)
    }

    // ==================== Step ====================

    /// Advances every agent by one time step.
    pub fn step(&mut self) {
        let time_step = self.config.time_step;
        let avoidance_share = self.config.avoidance_share;
        let perturbation_epsilon = self.config.perturbation_epsilon;

        let mut state_index = vec![usize::MAX; self.slots.len()];
        let inputs: Vec<StepInput> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.agent.as_ref().map(|agent| (index, slot.generation, agent)))
            .enumerate()
            .map(|(position_in_snapshot, (index, generation, agent))| {
                state_index[index] = position_in_snapshot;
                StepInput {
                    state: AgentState::new(
                        AgentHandle::new(index as u32, generation),
                        agent.position,
                        agent.velocity,
                        agent.params.radius,
                        agent.pref_velocity,
                        agent.params.max_speed,
                    ),
                    params: agent.params,
                }
            })
            .collect();

        let agent_tree = AgentTree::build(inputs.iter().map(|i| (i.state.handle, i.state.position)).collect());
        let obstacles = &self.obstacles;
        let obstacle_tree = &self.obstacle_tree;

        let solve_agent = |input: &StepInput| -> StepOutput {
            let state = &input.state;
            let params = &input.params;

            let obstacle_neighbors: Vec<usize> = if obstacle_tree.is_empty() {
                Vec::new()
            } else {
                let range = params.time_horizon_obst * params.max_speed + params.radius;
                obstacle_tree
                    .query(obstacles, state.position, range)
                    .into_iter()
                    .map(|n| n.vertex)
                    .collect()
            };

            let neighbors = agent_tree.query(
                state.position,
                params.neighbor_dist,
                params.max_neighbors,
                Some(state.handle),
            );
            let neighbor_states: Vec<&AgentState> = neighbors
                .iter()
                .map(|n| &inputs[state_index[n.handle.index() as usize]].state)
                .collect();

            let avoidance = AvoidanceParams {
                time_horizon: params.time_horizon,
                time_horizon_obst: params.time_horizon_obst,
                time_step,
                avoidance_share,
                perturbation_epsilon,
            };
            let (constraints, solution) =
                compute_new_velocity(state, &neighbor_states, &obstacle_neighbors, obstacles, &avoidance);

            StepOutput {
                velocity: solution.velocity(),
                fallback: solution.is_fallback(),
                neighbors,
                constraints,
            }
        };

        let outputs: Vec<StepOutput> = if self.config.parallel {
            inputs.par_iter().map(solve_agent).collect()
        } else {
            inputs.iter().map(solve_agent).collect()
        };

        let mut fallbacks = 0;
        for (input, output) in inputs.iter().zip(outputs) {
            let slot = &mut self.slots[input.state.handle.index() as usize];
            if let Some(agent) = slot.agent.as_mut() {
                agent.velocity = output.velocity;
                agent.position += output.velocity * time_step;
                agent.neighbors = output.neighbors;
                agent.constraints = output.constraints;
                agent.fallback = output.fallback;
                fallbacks += output.fallback as usize;
            }
        }

        self.global_time += time_step;
        self.step_count += 1;
        trace!(
            "Step {} done: {} agents, {} solver fallbacks, t = {:.3}",
            self.step_count,
            inputs.len(),
            fallbacks,
            self.global_time
        );
    }
}

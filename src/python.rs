//! Python bindings, built with `--features python`.
//!
//! Vectors cross the boundary as `(x, y)` tuples. Invalid handles raise
//! `KeyError`, every other malformed call raises `ValueError`.

use crate::error::SimError;
use crate::orca::PERTURBATION_EPSILON;
use crate::simulator::{AgentParams, Simulator, SimulatorConfig};
use crate::structs::{AgentHandle, Vector2D};
use pyo3::exceptions::{PyKeyError, PyValueError};
use pyo3::prelude::*;

impl From<SimError> for PyErr {
    fn from(err: SimError) -> PyErr {
        match err {
            SimError::InvalidHandle(_) => PyKeyError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

fn vec2(v: (f64, f64)) -> Vector2D {
    Vector2D::new(v.0, v.1)
}

fn tuple(v: Vector2D) -> (f64, f64) {
    (v.x, v.y)
}

fn count(name: &'static str, value: i64) -> PyResult<usize> {
    usize::try_from(value).map_err(|_| {
        SimError::InvalidArgument {
            name,
            value: value as f64,
            reason: "must be >= 0",
        }
        .into()
    })
}

#[pyclass(name = "AgentHandle", frozen, eq, hash)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PyAgentHandle {
    inner: AgentHandle,
}

#[pymethods]
impl PyAgentHandle {
    #[getter]
    fn index(&self) -> u32 {
        self.inner.index()
    }

    #[getter]
    fn generation(&self) -> u32 {
        self.inner.generation()
    }

    fn __repr__(&self) -> String {
        self.inner.to_string()
    }
}

impl From<AgentHandle> for PyAgentHandle {
    fn from(inner: AgentHandle) -> Self {
        PyAgentHandle { inner }
    }
}

#[pyclass(name = "Simulator")]
pub struct PySimulator {
    inner: Simulator,
}

#[pymethods]
impl PySimulator {
    #[new]
    #[pyo3(signature = (
        time_step = 0.25,
        avoidance_share = 0.5,
        perturbation_epsilon = PERTURBATION_EPSILON,
        parallel = true
    ))]
    fn new(time_step: f64, avoidance_share: f64, perturbation_epsilon: f64, parallel: bool) -> PyResult<Self> {
        let config = SimulatorConfig {
            time_step,
            avoidance_share,
            perturbation_epsilon,
            parallel,
            ..SimulatorConfig::default()
        };
        Ok(PySimulator {
            inner: Simulator::new(config)?,
        })
    }

    /// Adds an agent; unspecified parameters use the simulator defaults.
    #[pyo3(signature = (
        position,
        radius = None,
        max_speed = None,
        neighbor_dist = None,
        max_neighbors = None,
        time_horizon = None,
        time_horizon_obst = None,
        velocity = None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn add_agent(
        &mut self,
        position: (f64, f64),
        radius: Option<f64>,
        max_speed: Option<f64>,
        neighbor_dist: Option<f64>,
        max_neighbors: Option<i64>,
        time_horizon: Option<f64>,
        time_horizon_obst: Option<f64>,
        velocity: Option<(f64, f64)>,
    ) -> PyResult<PyAgentHandle> {
        let defaults = *self.inner.agent_defaults();
        let params = AgentParams {
            radius: radius.unwrap_or(defaults.radius),
            max_speed: max_speed.unwrap_or(defaults.max_speed),
            neighbor_dist: neighbor_dist.unwrap_or(defaults.neighbor_dist),
            max_neighbors: match max_neighbors {
                Some(n) => count("max_neighbors", n)?,
                None => defaults.max_neighbors,
            },
            time_horizon: time_horizon.unwrap_or(defaults.time_horizon),
            time_horizon_obst: time_horizon_obst.unwrap_or(defaults.time_horizon_obst),
            velocity: velocity.map(vec2).unwrap_or(defaults.velocity),
        };
        Ok(self.inner.add_agent_with(vec2(position), params)?.into())
    }

    fn remove_agent(&mut self, handle: PyAgentHandle) -> PyResult<()> {
        Ok(self.inner.remove_agent(handle.inner)?)
    }

    fn handles(&self) -> Vec<PyAgentHandle> {
        self.inner.handles().into_iter().map(Into::into).collect()
    }

    #[getter]
    fn num_agents(&self) -> usize {
        self.inner.num_agents()
    }

    fn position(&self, handle: PyAgentHandle) -> PyResult<(f64, f64)> {
        Ok(tuple(self.inner.position(handle.inner)?))
    }

    fn velocity(&self, handle: PyAgentHandle) -> PyResult<(f64, f64)> {
        Ok(tuple(self.inner.velocity(handle.inner)?))
    }

    fn preferred_velocity(&self, handle: PyAgentHandle) -> PyResult<(f64, f64)> {
        Ok(tuple(self.inner.preferred_velocity(handle.inner)?))
    }

    fn radius(&self, handle: PyAgentHandle) -> PyResult<f64> {
        Ok(self.inner.radius(handle.inner)?)
    }

    fn max_speed(&self, handle: PyAgentHandle) -> PyResult<f64> {
        Ok(self.inner.max_speed(handle.inner)?)
    }

    fn set_preferred_velocity(&mut self, handle: PyAgentHandle, velocity: (f64, f64)) -> PyResult<()> {
        Ok(self.inner.set_preferred_velocity(handle.inner, vec2(velocity))?)
    }

    fn set_velocity(&mut self, handle: PyAgentHandle, velocity: (f64, f64)) -> PyResult<()> {
        Ok(self.inner.set_velocity(handle.inner, vec2(velocity))?)
    }

    fn set_position(&mut self, handle: PyAgentHandle, position: (f64, f64)) -> PyResult<()> {
        Ok(self.inner.set_position(handle.inner, vec2(position))?)
    }

    fn set_radius(&mut self, handle: PyAgentHandle, radius: f64) -> PyResult<()> {
        Ok(self.inner.set_radius(handle.inner, radius)?)
    }

    fn set_max_speed(&mut self, handle: PyAgentHandle, max_speed: f64) -> PyResult<()> {
        Ok(self.inner.set_max_speed(handle.inner, max_speed)?)
    }

    fn set_neighbor_dist(&mut self, handle: PyAgentHandle, neighbor_dist: f64) -> PyResult<()> {
        Ok(self.inner.set_neighbor_dist(handle.inner, neighbor_dist)?)
    }

    fn set_max_neighbors(&mut self, handle: PyAgentHandle, max_neighbors: i64) -> PyResult<()> {
        let max_neighbors = count("max_neighbors", max_neighbors)?;
        Ok(self.inner.set_max_neighbors(handle.inner, max_neighbors)?)
    }

    fn set_time_horizon(&mut self, handle: PyAgentHandle, time_horizon: f64) -> PyResult<()> {
        Ok(self.inner.set_time_horizon(handle.inner, time_horizon)?)
    }

    fn set_time_horizon_obst(&mut self, handle: PyAgentHandle, time_horizon_obst: f64) -> PyResult<()> {
        Ok(self.inner.set_time_horizon_obst(handle.inner, time_horizon_obst)?)
    }

    fn agent_neighbors(&self, handle: PyAgentHandle) -> PyResult<Vec<PyAgentHandle>> {
        Ok(self
            .inner
            .agent_neighbors(handle.inner)?
            .iter()
            .map(|n| n.handle.into())
            .collect())
    }

    /// Lines of the last step as `(point, direction)` pairs.
    fn orca_lines(&self, handle: PyAgentHandle) -> PyResult<Vec<((f64, f64), (f64, f64))>> {
        Ok(self
            .inner
            .orca_lines(handle.inner)?
            .iter()
            .map(|line| (tuple(line.point), tuple(line.direction)))
            .collect())
    }

    fn last_solution_was_fallback(&self, handle: PyAgentHandle) -> PyResult<bool> {
        Ok(self.inner.last_solution_was_fallback(handle.inner)?)
    }

    #[getter]
    fn time_step(&self) -> f64 {
        self.inner.time_step()
    }

    #[setter]
    fn set_time_step(&mut self, time_step: f64) -> PyResult<()> {
        Ok(self.inner.set_time_step(time_step)?)
    }

    #[getter]
    fn global_time(&self) -> f64 {
        self.inner.global_time()
    }

    #[getter]
    fn step_count(&self) -> u64 {
        self.inner.step_count()
    }

    fn add_obstacle(&mut self, vertices: Vec<(f64, f64)>) -> PyResult<usize> {
        let vertices: Vec<Vector2D> = vertices.into_iter().map(vec2).collect();
        Ok(self.inner.add_obstacle(&vertices)?)
    }

    fn process_obstacles(&mut self) {
        self.inner.process_obstacles();
    }

    #[getter]
    fn num_obstacle_vertices(&self) -> usize {
        self.inner.num_obstacle_vertices()
    }

    fn obstacle_vertex(&self, id: usize) -> PyResult<(f64, f64)> {
        Ok(tuple(self.inner.obstacle_vertex(id)?))
    }

    fn next_obstacle_vertex_id(&self, id: usize) -> PyResult<usize> {
        Ok(self.inner.next_obstacle_vertex_id(id)?)
    }

    fn prev_obstacle_vertex_id(&self, id: usize) -> PyResult<usize> {
        Ok(self.inner.prev_obstacle_vertex_id(id)?)
    }

    fn query_visibility(&self, p1: (f64, f64), p2: (f64, f64), radius: f64) -> bool {
        self.inner.query_visibility(vec2(p1), vec2(p2), radius)
    }

    /// Advances the simulation by one time step, releasing the GIL meanwhile.
    fn step(&mut self, py: Python<'_>) {
        let inner = &mut self.inner;
        py.allow_threads(|| inner.step());
    }

    fn __repr__(&self) -> String {
        format!(
            "Simulator(agents={}, time_step={}, global_time={:.3})",
            self.inner.num_agents(),
            self.inner.time_step(),
            self.inner.global_time()
        )
    }
}

#[pymodule]
fn orca_sim(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySimulator>()?;
    m.add_class::<PyAgentHandle>()?;
    Ok(())
}

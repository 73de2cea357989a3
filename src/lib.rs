//! # ORCA Simulation Core
//!
//! Fixed-step reciprocal collision avoidance for many disk-shaped agents in
//! a shared 2D plane.
//!
//! ## Pipeline
//!
//! Each [`Simulator::step`]:
//!
//! - rebuilds a k-d tree over the committed agent positions ([`kdtree`]),
//! - builds the ORCA half-planes of every agent from its nearest agents and
//!   obstacle edges ([`orca`]),
//! - solves a small 2D linear program per agent for the velocity closest to
//!   its preferred velocity ([`linear_program`]),
//! - commits every new velocity and position at once.
//!
//! The caller sets preferred velocities between steps and reads positions
//! and velocities back through [`Simulator`]'s getters.
//!
//! ## Usage
//!
//! ```
//! use orca_sim::{Simulator, Vector2D};
//!
//! let mut sim = Simulator::default();
//! let a = sim.add_agent(Vector2D::new(-10.0, 0.0)).unwrap();
//! let b = sim.add_agent(Vector2D::new(10.0, 0.0)).unwrap();
//! sim.set_preferred_velocity(a, Vector2D::new(1.0, 0.0)).unwrap();
//! sim.set_preferred_velocity(b, Vector2D::new(-1.0, 0.0)).unwrap();
//! sim.step();
//! assert!(sim.velocity(a).unwrap().magnitude() <= 2.0);
//! ```
//!
//! With the `python` feature the same API is available as a Python module.

pub mod error;
pub mod kdtree;
pub mod linear_program;
pub mod obstacle;
pub mod orca;
pub mod simulator;
pub mod structs;

#[cfg(feature = "python")]
mod python;

pub use error::{Result, SimError};
pub use linear_program::Solution;
pub use simulator::{AgentParams, Simulator, SimulatorConfig};
pub use structs::{AgentHandle, OrcaLine, Vector2D};

//! Error taxonomy for malformed simulator calls.
//!
//! Solver infeasibility is not represented here: the velocity solver always
//! produces a velocity (see [`crate::linear_program::Solution`]).

use crate::structs::{AgentHandle, Vector2D};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// The handle was never issued or its agent has been removed.
    #[error("invalid agent handle: {0}")]
    InvalidHandle(AgentHandle),

    /// A numeric parameter is out of its permitted range.
    #[error("invalid argument `{name}` = {value}: {reason}")]
    InvalidArgument {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// An obstacle polygon or vertex reference is malformed.
    #[error("invalid obstacle: {0}")]
    InvalidObstacle(String),
}

pub type Result<T> = std::result::Result<T, SimError>;

/// Fails unless `value` is finite and strictly positive.
pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidArgument {
            name,
            value,
            reason: "must be finite and > 0",
        })
    }
}

/// Fails unless `value` is finite and not negative.
pub(crate) fn require_non_negative(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidArgument {
            name,
            value,
            reason: "must be finite and >= 0",
        })
    }
}

/// Fails unless both components of `value` are finite.
pub(crate) fn require_finite(name: &'static str, value: Vector2D) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SimError::InvalidArgument {
            name,
            value: if value.x.is_finite() { value.y } else { value.x },
            reason: "must have finite components",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_positive() {
        assert!(require_positive("radius", 1.0).is_ok());
        assert!(require_positive("radius", 0.0).is_err());
        assert!(require_positive("radius", -1.0).is_err());
        assert!(require_positive("radius", f64::NAN).is_err());
        assert!(require_positive("radius", f64::INFINITY).is_err());
    }

    #[test]
    fn test_require_non_negative() {
        assert!(require_non_negative("time_horizon", 0.0).is_ok());
        assert!(require_non_negative("time_horizon", 3.0).is_ok());
        assert!(require_non_negative("time_horizon", -0.1).is_err());
    }

    #[test]
    fn test_require_finite() {
        assert!(require_finite("velocity", Vector2D::new(1.0, -2.0)).is_ok());
        let err = require_finite("velocity", Vector2D::new(0.0, f64::INFINITY)).unwrap_err();
        assert!(matches!(err, SimError::InvalidArgument { name: "velocity", .. }));
    }

    #[test]
    fn test_error_messages() {
        let err = SimError::InvalidHandle(AgentHandle::new(3, 1));
        assert_eq!(err.to_string(), "invalid agent handle: Agent(3v1)");

        let err = require_positive("time_step", -2.0).unwrap_err();
        assert!(err.to_string().contains("time_step"));
        assert!(err.to_string().contains("> 0"));
    }
}

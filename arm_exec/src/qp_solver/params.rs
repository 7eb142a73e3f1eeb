//! Parameters structure for QpSolver

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Tuning of the interior point method.
///
/// The barrier weight starts at `barrier_init` and is multiplied by the decay
/// rate after every accepted step. The iteration cap bounds the cost of a
/// solve, which is what lets the solver run inside a control cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Initial weight on the log-barrier term.
    pub barrier_init: f64,

    /// Factor applied to the barrier weight for every violated constraint.
    pub barrier_increase: f64,

    /// Initial rate at which the barrier weight is decreased each step.
    ///
    /// Must be in (0, 1).
    pub barrier_decay_init: f64,

    /// Fraction of the remaining gap to 1 added to the decay rate when a
    /// constraint is violated, slowing the decrease of the barrier.
    ///
    /// Must be in (0, 1).
    pub barrier_decay_slowdown: f64,

    /// Slack substituted for a violated constraint when building the barrier
    /// gradient and Hessian.
    pub violation_slack: f64,

    /// Initial scalar on the Newton step for the line search.
    pub step_init: f64,

    /// Factor the step scalar is multiplied by while a constraint would be
    /// violated.
    ///
    /// Must be in (0, 1).
    pub step_shrink: f64,

    /// The solver stops once the scaled Newton step is smaller than this.
    pub step_tol: f64,

    /// Maximum number of Newton steps per solve.
    pub max_steps: usize,
}

/// Invalid tuning found by [`Params::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("{0} must be positive, found {1}")]
    NotPositive(&'static str, f64),

    #[error("{0} must be in the open range (0, 1), found {1}")]
    NotAFraction(&'static str, f64),

    #[error("max_steps must be at least 1")]
    NoSteps,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            barrier_init: 100.0,
            barrier_increase: 1.1,
            barrier_decay_init: 0.01,
            barrier_decay_slowdown: 0.5,
            violation_slack: 1e-2,
            step_init: 1.0,
            step_shrink: 0.5,
            step_tol: 1e-3,
            max_steps: 20,
        }
    }
}

impl Params {
    /// Check the tuning can be used by the solver.
    ///
    /// A shrink factor of 1 or more would stall the line search, so these
    /// are rejected here rather than in the solver loop.
    pub fn validate(&self) -> Result<(), ParamsError> {
        let positive = [
            ("barrier_init", self.barrier_init),
            ("barrier_increase", self.barrier_increase),
            ("violation_slack", self.violation_slack),
            ("step_init", self.step_init),
            ("step_tol", self.step_tol),
        ];
        for (name, value) in positive.iter() {
            if !(*value > 0.0) {
                return Err(ParamsError::NotPositive(*name, *value));
            }
        }

        let fractions = [
            ("barrier_decay_init", self.barrier_decay_init),
            ("barrier_decay_slowdown", self.barrier_decay_slowdown),
            ("step_shrink", self.step_shrink),
        ];
        for (name, value) in fractions.iter() {
            if !(*value > 0.0 && *value < 1.0) {
                return Err(ParamsError::NotAFraction(*name, *value));
            }
        }

        if self.max_steps == 0 {
            return Err(ParamsError::NoSteps);
        }

        Ok(())
    }
}

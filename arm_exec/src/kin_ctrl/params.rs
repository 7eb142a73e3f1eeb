//! Parameters structure for KinCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::qp_solver;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for kinematic control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Proportional gain on pose and joint position errors.
    ///
    /// Must be non-zero. A negative gain is made positive on load.
    ///
    /// Units: 1/seconds
    pub k_p: f64,

    /// Scalar on the singularity avoidance gradient used as the redundant
    /// task when none is commanded for an arm with more than 6 joints.
    pub singularity_scalar: f64,

    /// How joint rates are resolved from an endpoint twist.
    pub rate_solver: RateSolver,

    /// Tuning of the constrained QP solver.
    pub solver: qp_solver::Params,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Methods for resolving joint rates from an endpoint twist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateSolver {
    /// Solve a box constrained QP with the interior point method. Joint
    /// speed limits are enforced inside the optimisation.
    InteriorPoint,

    /// Solve the unconstrained problem through a QR decomposition and back
    /// substitution, then clamp each joint to its speed limits. Cheaper but
    /// clamping breaks the endpoint task when a limit is reached.
    BackSubstitution,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            k_p: 1.0,
            singularity_scalar: 0.5,
            rate_solver: RateSolver::default(),
            solver: qp_solver::Params::default(),
        }
    }
}

impl Default for RateSolver {
    fn default() -> Self {
        RateSolver::InteriorPoint
    }
}

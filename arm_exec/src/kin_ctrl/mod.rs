//! # Kinematic control module
//!
//! Resolved-rate control of a serial manipulator. Each cycle the module reads
//! a snapshot of the arm through the [`KinematicChain`] trait and computes a
//! joint velocity demand that:
//!
//! - realises the commanded endpoint motion (a twist, a pose, a Cartesian
//!   trajectory) or joint motion (a position or joint trajectory),
//! - respects the instantaneous joint speed limits derived from the position,
//!   velocity and acceleration limits of each joint,
//! - for redundant arms (more than 6 joints) uses the spare freedom to move
//!   away from joint limits and singular configurations.
//!
//! The optimisation itself is done by [`crate::qp_solver::QpSolver`].
//!
//! Control functions never fail. If they are given inputs of the wrong size
//! they log an error and return the damped fallback, 90% of the current joint
//! velocities, so the arm slows down smoothly rather than stopping dead.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod chain;
mod cmd;
mod limits;
mod params;
mod pose_error;
mod resolved_rate;
mod singularity;
mod state;
mod tracking;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::error;
use nalgebra::DVector;

// Internal
pub use chain::*;
pub use cmd::*;
pub use limits::*;
pub use params::*;
pub use pose_error::*;
pub use resolved_rate::*;
pub use singularity::*;
pub use state::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Degrees of freedom of the endpoint task (3 translational, 3 rotational).
pub const TASK_DOF: usize = 6;

/// Fraction of the current joint velocities kept by the damped fallback.
pub const FALLBACK_DAMPING: f64 = 0.9;

/// Diagonal entries of a triangular system smaller than this are treated as
/// a singular joint.
pub const SINGULAR_PIVOT: f64 = 1e-5;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during KinCtrl operation.
///
/// Apart from `ZeroGain` and `InvalidSnapshot` these are only logged, the
/// control functions substitute a degraded but usable demand.
#[derive(Debug, thiserror::Error)]
pub enum KinCtrlError {
    #[error("{op}(): expected {arg} to be {expected} but it was {found}")]
    DimensionMismatch {
        op: &'static str,
        arg: &'static str,
        expected: String,
        found: String,
    },

    #[error("The proportional gain must be non-zero and finite, found {0}")]
    ZeroGain(f64),

    #[error("{0}(): the scalar must be positive but it was {1}")]
    NonPositiveScalar(&'static str, f64),

    #[error("{0}(): joint {1} does not exist on a chain of {2} joints")]
    NoSuchJoint(&'static str, usize, usize),

    #[error("{0}(): {1}")]
    Numerical(&'static str, String),

    #[error("The chain snapshot is invalid: {0}")]
    InvalidSnapshot(#[from] SnapshotError),
}

/// Possible errors that can occur while initialising KinCtrl.
#[derive(Debug, thiserror::Error)]
pub enum KinCtrlInitError {
    #[error("Could not load the KinCtrl parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),

    #[error("Invalid proportional gain: {0}")]
    InvalidGain(KinCtrlError),

    #[error("The default singularity avoidance scalar must be positive, found {0}")]
    InvalidSingularityScalar(f64),

    #[error("Invalid solver tuning: {0}")]
    InvalidSolverParams(#[from] crate::qp_solver::ParamsError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// The fail-safe joint velocity demand: 90% of the current joint velocities.
///
/// Applied every cycle this brings the arm to rest smoothly.
pub fn damped_fallback<C>(chain: &C) -> DVector<f64>
where
    C: KinematicChain + ?Sized,
{
    chain.joint_velocities() * FALLBACK_DAMPING
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Log the error and hand back the damped fallback.
pub(crate) fn fallback_on<C>(chain: &C, err: KinCtrlError) -> DVector<f64>
where
    C: KinematicChain + ?Sized,
{
    error!("[KinCtrl] {}", err);
    damped_fallback(chain)
}

/// Build a dimension mismatch error for an n-vector argument.
pub(crate) fn vector_mismatch(
    op: &'static str,
    arg: &'static str,
    expected: usize,
    found: usize,
) -> KinCtrlError {
    KinCtrlError::DimensionMismatch {
        op,
        arg,
        expected: format!("{}x1", expected),
        found: format!("{}x1", found),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

//! Interface to the kinematic chain model
//!
//! KinCtrl does not model the arm itself. Forward kinematics, the Jacobian
//! and the inertia come from an external chain model, which is read through
//! the [`KinematicChain`] trait once per cycle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector, Isometry3};
use serde::{Deserialize, Serialize};

// Internal
use super::TASK_DOF;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Read access to the state of a serial kinematic chain for a single control
/// cycle.
///
/// Joint indices run from `0` to `joint_count() - 1`, base to tip.
/// Implementations may panic if given an index outside that range.
pub trait KinematicChain {
    /// Number of joints in the chain.
    fn joint_count(&self) -> usize;

    /// Current position of joint `i`.
    ///
    /// Units: radians
    fn joint_position(&self, i: usize) -> f64;

    /// Current velocity of joint `i`.
    ///
    /// Units: radians/second
    fn joint_velocity(&self, i: usize) -> f64;

    /// Current position of every joint.
    fn joint_positions(&self) -> DVector<f64> {
        DVector::from_fn(self.joint_count(), |i, _| self.joint_position(i))
    }

    /// Current velocity of every joint.
    fn joint_velocities(&self) -> DVector<f64> {
        DVector::from_fn(self.joint_count(), |i, _| self.joint_velocity(i))
    }

    /// `(lower, upper)` position limits of joint `i`.
    ///
    /// Units: radians
    fn position_limits(&self, i: usize) -> (f64, f64);

    /// Maximum speed of joint `i` in either direction.
    ///
    /// Units: radians/second
    fn velocity_limit(&self, i: usize) -> f64;

    /// Maximum acceleration (and braking) of joint `i`.
    ///
    /// Units: radians/second^2
    fn acceleration_limit(&self, i: usize) -> f64;

    /// Endpoint Jacobian, `6 x n`, mapping joint velocities to the endpoint
    /// twist (linear then angular velocity).
    fn jacobian(&self) -> DMatrix<f64>;

    /// Partial derivative of the Jacobian with respect to the position of
    /// joint `i`, `6 x n`.
    fn jacobian_partial_derivative(&self, i: usize) -> DMatrix<f64>;

    /// Joint space inertia matrix, `n x n`, used to weight redundancy
    /// resolution.
    fn inertia(&self) -> DMatrix<f64>;

    /// Pose of the endpoint in the base frame.
    fn endpoint_pose(&self) -> Isometry3<f64>;

    /// Period of the control cycle.
    ///
    /// Units: seconds
    fn control_period(&self) -> f64;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A plain data copy of a chain's state for one cycle.
///
/// This is what the cyclic module and the replay tool pass around. Call
/// [`ChainSnapshot::validate`] before using a snapshot from an untrusted
/// source, the accessors index the vectors directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Joint positions.
    ///
    /// Units: radians
    pub pos_rad: Vec<f64>,

    /// Joint velocities.
    ///
    /// Units: radians/second
    pub vel_rads: Vec<f64>,

    /// Lower joint position limits.
    ///
    /// Units: radians
    pub min_pos_rad: Vec<f64>,

    /// Upper joint position limits.
    ///
    /// Units: radians
    pub max_pos_rad: Vec<f64>,

    /// Joint speed limits.
    ///
    /// Units: radians/second
    pub max_vel_rads: Vec<f64>,

    /// Joint acceleration limits.
    ///
    /// Units: radians/second^2
    pub max_acc_radss: Vec<f64>,

    /// Endpoint Jacobian, `6 x n`.
    pub jacobian: DMatrix<f64>,

    /// Partial derivatives of the Jacobian, one `6 x n` matrix per joint.
    ///
    /// If empty the derivatives are taken to be zero.
    #[serde(default)]
    pub jacobian_derivs: Vec<DMatrix<f64>>,

    /// Joint space inertia, `n x n`.
    pub inertia: DMatrix<f64>,

    /// Pose of the endpoint in the base frame.
    pub endpoint_pose: Isometry3<f64>,

    /// Units: seconds
    pub control_period_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Inconsistencies found in a [`ChainSnapshot`].
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("The chain has no joints")]
    NoJoints,

    #[error("{name} has {found} entries but the chain has {expected} joints")]
    VectorLength {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{name} is {}x{} but should be {}x{}", .found.0, .found.1, .expected.0, .expected.1)]
    MatrixShape {
        name: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Joint {joint} has a lower position limit ({min}) above its upper limit ({max})")]
    InvertedLimits { joint: usize, min: f64, max: f64 },

    #[error("{name} of joint {joint} must be positive, found {value}")]
    NonPositiveLimit {
        name: &'static str,
        joint: usize,
        value: f64,
    },

    #[error("{0} contains a non-finite value")]
    NonFinite(&'static str),

    #[error("The control period must be positive and finite, found {0} s")]
    InvalidControlPeriod(f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ChainSnapshot {
    /// Check that the snapshot describes a consistent chain.
    ///
    /// The number of joints is taken from `pos_rad`.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let n = self.pos_rad.len();

        if n == 0 {
            return Err(SnapshotError::NoJoints);
        }

        let vectors = [
            ("vel_rads", &self.vel_rads),
            ("min_pos_rad", &self.min_pos_rad),
            ("max_pos_rad", &self.max_pos_rad),
            ("max_vel_rads", &self.max_vel_rads),
            ("max_acc_radss", &self.max_acc_radss),
        ];
        for (name, v) in vectors.iter() {
            if v.len() != n {
                return Err(SnapshotError::VectorLength {
                    name: *name,
                    expected: n,
                    found: v.len(),
                });
            }
        }

        if self.pos_rad.iter().chain(self.vel_rads.iter()).any(|v| !v.is_finite()) {
            return Err(SnapshotError::NonFinite("the joint state"));
        }

        for i in 0..n {
            if self.min_pos_rad[i] > self.max_pos_rad[i] {
                return Err(SnapshotError::InvertedLimits {
                    joint: i,
                    min: self.min_pos_rad[i],
                    max: self.max_pos_rad[i],
                });
            }
            if !(self.max_vel_rads[i] > 0.0) {
                return Err(SnapshotError::NonPositiveLimit {
                    name: "max_vel_rads",
                    joint: i,
                    value: self.max_vel_rads[i],
                });
            }
            if !(self.max_acc_radss[i] > 0.0) {
                return Err(SnapshotError::NonPositiveLimit {
                    name: "max_acc_radss",
                    joint: i,
                    value: self.max_acc_radss[i],
                });
            }
        }

        check_shape("jacobian", &self.jacobian, (TASK_DOF, n))?;
        check_shape("inertia", &self.inertia, (n, n))?;

        if !self.jacobian_derivs.is_empty() {
            if self.jacobian_derivs.len() != n {
                return Err(SnapshotError::VectorLength {
                    name: "jacobian_derivs",
                    expected: n,
                    found: self.jacobian_derivs.len(),
                });
            }
            for (i, d) in self.jacobian_derivs.iter().enumerate() {
                check_shape(&format!("jacobian_derivs[{}]", i), d, (TASK_DOF, n))?;
            }
        }

        if !(self.control_period_s > 0.0 && self.control_period_s.is_finite()) {
            return Err(SnapshotError::InvalidControlPeriod(self.control_period_s));
        }

        Ok(())
    }
}

impl KinematicChain for ChainSnapshot {
    fn joint_count(&self) -> usize {
        self.pos_rad.len()
    }

    fn joint_position(&self, i: usize) -> f64 {
        self.pos_rad[i]
    }

    fn joint_velocity(&self, i: usize) -> f64 {
        self.vel_rads[i]
    }

    fn position_limits(&self, i: usize) -> (f64, f64) {
        (self.min_pos_rad[i], self.max_pos_rad[i])
    }

    fn velocity_limit(&self, i: usize) -> f64 {
        self.max_vel_rads[i]
    }

    fn acceleration_limit(&self, i: usize) -> f64 {
        self.max_acc_radss[i]
    }

    fn jacobian(&self) -> DMatrix<f64> {
        self.jacobian.clone()
    }

    fn jacobian_partial_derivative(&self, i: usize) -> DMatrix<f64> {
        match self.jacobian_derivs.get(i) {
            Some(d) => d.clone(),
            None => DMatrix::zeros(TASK_DOF, self.joint_count()),
        }
    }

    fn inertia(&self) -> DMatrix<f64> {
        self.inertia.clone()
    }

    fn endpoint_pose(&self) -> Isometry3<f64> {
        self.endpoint_pose
    }

    fn control_period(&self) -> f64 {
        self.control_period_s
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn check_shape(
    name: &str,
    m: &DMatrix<f64>,
    expected: (usize, usize),
) -> Result<(), SnapshotError> {
    if m.shape() != expected {
        return Err(SnapshotError::MatrixShape {
            name: name.to_string(),
            expected,
            found: m.shape(),
        });
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(SnapshotError::NonFinite("a chain matrix"));
    }
    Ok(())
}

/// A well conditioned chain of `n` joints at rest at zero, with wide open
/// limits, for use in tests.
///
/// The Jacobian is diagonally dominant so it has full row rank for any
/// `n >= 6` and full column rank for `n <= 6`.
#[cfg(test)]
pub(crate) fn test_chain(n: usize) -> ChainSnapshot {
    ChainSnapshot {
        pos_rad: vec![0.0; n],
        vel_rads: vec![0.0; n],
        min_pos_rad: vec![-3.0; n],
        max_pos_rad: vec![3.0; n],
        max_vel_rads: vec![100.0; n],
        max_acc_radss: vec![1000.0; n],
        jacobian: DMatrix::from_fn(TASK_DOF, n, |r, c| {
            if r == c {
                2.0
            } else {
                0.1 * ((r + 2 * c) % 5) as f64 - 0.2
            }
        }),
        jacobian_derivs: Vec::new(),
        inertia: DMatrix::identity(n, n),
        endpoint_pose: Isometry3::identity(),
        control_period_s: 0.01,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

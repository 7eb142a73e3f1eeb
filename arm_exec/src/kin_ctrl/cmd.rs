//! Commands passed into KinCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DVector, Isometry3, Vector6};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A command to KinCtrl.
///
/// A command stays active until it is replaced, so trajectory commands are
/// expected to be refreshed every cycle. Twists are ordered linear velocity
/// then angular velocity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ArmCmd {
    /// Move the endpoint at a constant twist.
    MoveAtSpeed {
        twist: Vector6<f64>,

        /// Joint velocities to stay close to in the null space of the task.
        /// Only used by arms with more than 6 joints.
        redundant: Option<DVector<f64>>,
    },

    /// Move the joints to a fixed position.
    MoveToPosition { pos_rad: DVector<f64> },

    /// Move the endpoint to a fixed pose.
    MoveToPose {
        pose: Isometry3<f64>,
        redundant: Option<DVector<f64>>,
    },

    /// Follow a reference pose and twist for the endpoint.
    TrackCartesian {
        pose: Isometry3<f64>,
        twist: Vector6<f64>,
        redundant: Option<DVector<f64>>,
    },

    /// Follow a reference position, velocity and optionally acceleration for
    /// the joints.
    TrackJoint {
        pos_rad: DVector<f64>,
        vel_rads: DVector<f64>,
        acc_radss: Option<DVector<f64>>,
    },

    /// Bring the arm to rest.
    Stop,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ArmCmd {
    /// Target pose of the endpoint, if this command has one.
    pub fn target_pose(&self) -> Option<&Isometry3<f64>> {
        match self {
            ArmCmd::MoveToPose { pose, .. } | ArmCmd::TrackCartesian { pose, .. } => Some(pose),
            _ => None,
        }
    }
}

//! Position, pose and trajectory tracking
//!
//! Each command is a feedforward velocity plus proportional feedback on the
//! error. Joint space commands are clamped joint by joint, Cartesian commands
//! go through [`KinCtrl::move_at_speed`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DVector, Isometry3, Vector6};

// Internal
use super::{
    fallback_on, limits::clamp_joint_rate, pose_error, resolved_rate::check_redundant,
    vector_mismatch, KinCtrl, KinematicChain,
};

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl KinCtrl {
    /// Get the joint velocities which move the joints towards `pos_rad`.
    pub fn move_to_position<C>(&self, chain: &C, pos_rad: &DVector<f64>) -> DVector<f64>
    where
        C: KinematicChain + ?Sized,
    {
        let n = chain.joint_count();

        if pos_rad.len() != n {
            return fallback_on(
                chain,
                vector_mismatch("move_to_position", "the position", n, pos_rad.len()),
            );
        }

        self.joint_feedback(chain, &DVector::zeros(n), pos_rad)
    }

    /// Get the joint velocities which move the endpoint towards `pose`.
    pub fn move_to_pose<C>(
        &self,
        chain: &C,
        pose: &Isometry3<f64>,
        redundant: Option<&DVector<f64>>,
    ) -> DVector<f64>
    where
        C: KinematicChain + ?Sized,
    {
        if let Err(e) = check_redundant("move_to_pose", chain, redundant) {
            return fallback_on(chain, e);
        }

        let twist = pose_error(pose, &chain.endpoint_pose()) * self.params.k_p;

        self.move_at_speed(chain, &twist, redundant)
    }

    /// Get the joint velocities which follow an endpoint trajectory, given
    /// the reference pose and twist for this cycle.
    pub fn track_cartesian_trajectory<C>(
        &self,
        chain: &C,
        pose: &Isometry3<f64>,
        twist: &Vector6<f64>,
        redundant: Option<&DVector<f64>>,
    ) -> DVector<f64>
    where
        C: KinematicChain + ?Sized,
    {
        if let Err(e) = check_redundant("track_cartesian_trajectory", chain, redundant) {
            return fallback_on(chain, e);
        }

        let twist = twist + pose_error(pose, &chain.endpoint_pose()) * self.params.k_p;

        self.move_at_speed(chain, &twist, redundant)
    }

    /// Get the joint velocities which follow a joint trajectory, given the
    /// reference position, velocity and optionally acceleration for this
    /// cycle.
    ///
    /// The acceleration is integrated over one control period and added to
    /// the velocity feedforward.
    pub fn track_joint_trajectory<C>(
        &self,
        chain: &C,
        pos_rad: &DVector<f64>,
        vel_rads: &DVector<f64>,
        acc_radss: Option<&DVector<f64>>,
    ) -> DVector<f64>
    where
        C: KinematicChain + ?Sized,
    {
        let n = chain.joint_count();

        if pos_rad.len() != n {
            return fallback_on(
                chain,
                vector_mismatch("track_joint_trajectory", "the position", n, pos_rad.len()),
            );
        }
        if vel_rads.len() != n {
            return fallback_on(
                chain,
                vector_mismatch("track_joint_trajectory", "the velocity", n, vel_rads.len()),
            );
        }

        let feedforward = match acc_radss {
            Some(acc) if acc.len() != n => {
                return fallback_on(
                    chain,
                    vector_mismatch("track_joint_trajectory", "the acceleration", n, acc.len()),
                )
            }
            Some(acc) => vel_rads + acc * chain.control_period(),
            None => vel_rads.clone(),
        };

        self.joint_feedback(chain, &feedforward, pos_rad)
    }

    /// `feedforward + k_p*(pos_rad - q)`, clamped to the speed limits.
    ///
    /// Both vectors must have one entry per joint.
    fn joint_feedback<C>(
        &self,
        chain: &C,
        feedforward: &DVector<f64>,
        pos_rad: &DVector<f64>,
    ) -> DVector<f64>
    where
        C: KinematicChain + ?Sized,
    {
        let error = pos_rad - chain.joint_positions();

        DVector::from_fn(chain.joint_count(), |i, _| {
            clamp_joint_rate(chain, i, feedforward[i] + self.params.k_p * error[i])
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

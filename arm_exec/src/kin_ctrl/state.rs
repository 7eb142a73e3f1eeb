//! Implementations for the KinCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, error, trace, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

// Internal
use super::{
    damped_fallback, manipulability, pose_error, speed_limits, ArmCmd, ChainSnapshot,
    KinCtrlError, KinCtrlInitError, KinematicChain, Params,
};
use crate::qp_solver::QpSolver;
use util::{module::State, params, session::Session};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// A joint is reported as speed limited when its demand is within this
/// fraction of the width of its speed limits from either limit.
const LIMITED_MARGIN: f64 = 1e-3;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Kinematic control module state
#[derive(Debug, Default)]
pub struct KinCtrl {
    pub(crate) params: Params,

    pub(crate) solver: QpSolver,

    pub(crate) report: StatusReport,

    pub(crate) current_cmd: Option<ArmCmd>,
}

/// Input data to Kinematic Control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputData {
    /// The command to be executed, or `None` if there is no new command on
    /// this cycle.
    pub cmd: Option<ArmCmd>,

    /// The state of the arm this cycle.
    pub chain: ChainSnapshot,
}

/// Output demand from KinCtrl that the joint drivers must execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputData {
    /// Joint velocity demands.
    ///
    /// Units: radians/second
    pub qdot_rads: DVector<f64>,
}

/// Status report for KinCtrl processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// True for each joint whose demand sits at one of its speed limits.
    pub speed_limited: Vec<bool>,

    /// Manipulability of the arm this cycle, zero at a singularity.
    pub manipulability: f64,

    /// True if the output is the damped fallback because there is no active
    /// motion command.
    pub coasting: bool,

    /// Distance from the endpoint to the target pose, for Cartesian commands.
    ///
    /// Units: meters
    pub pos_error_m: Option<f64>,

    /// Magnitude of the orientation error to the target pose, for Cartesian
    /// commands. This is `sin(angle/2)`.
    pub att_error: Option<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl KinCtrl {
    /// Create a new instance with the given parameters.
    ///
    /// The solver tuning and the default singularity avoidance scalar are
    /// checked and the gain is set with the same rules as
    /// [`KinCtrl::set_proportional_gain`].
    pub fn new(params: Params) -> Result<Self, KinCtrlInitError> {
        params.solver.validate()?;

        if !(params.singularity_scalar > 0.0) {
            return Err(KinCtrlInitError::InvalidSingularityScalar(
                params.singularity_scalar,
            ));
        }

        let k_p = params.k_p;

        let mut kin_ctrl = Self {
            solver: QpSolver::new(params.solver.clone()),
            params,
            ..Default::default()
        };

        kin_ctrl
            .set_proportional_gain(k_p)
            .map_err(KinCtrlInitError::InvalidGain)?;

        Ok(kin_ctrl)
    }

    /// Set the proportional gain used for pose and position feedback.
    ///
    /// A gain of zero (or a non-finite gain) is rejected and the current gain
    /// kept. A negative gain is made positive with a warning.
    pub fn set_proportional_gain(&mut self, k_p: f64) -> Result<(), KinCtrlError> {
        if k_p == 0.0 || !k_p.is_finite() {
            let err = KinCtrlError::ZeroGain(k_p);
            error!("[KinCtrl] set_proportional_gain(): {}, gain not set", err);
            return Err(err);
        }

        if k_p < 0.0 {
            warn!(
                "[KinCtrl] set_proportional_gain(): gain of {} cannot be negative, using {}",
                k_p, -k_p
            );
        }

        self.params.k_p = k_p.abs();

        Ok(())
    }

    /// Get the proportional gain.
    pub fn proportional_gain(&self) -> f64 {
        self.params.k_p
    }

    /// Get the parameters in use.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Get the command currently being executed.
    pub fn current_cmd(&self) -> Option<&ArmCmd> {
        self.current_cmd.as_ref()
    }

    /// Execute the current command on the given chain.
    fn exec_cmd(&mut self, chain: &ChainSnapshot) -> DVector<f64> {
        let cmd = match self.current_cmd.take() {
            Some(c) => c,
            None => {
                self.report.coasting = true;
                return damped_fallback(chain);
            }
        };

        let qdot = match &cmd {
            ArmCmd::Stop => {
                self.report.coasting = true;
                damped_fallback(chain)
            }
            ArmCmd::MoveAtSpeed { twist, redundant } => {
                self.move_at_speed(chain, twist, redundant.as_ref())
            }
            ArmCmd::MoveToPosition { pos_rad } => self.move_to_position(chain, pos_rad),
            ArmCmd::MoveToPose { pose, redundant } => {
                self.move_to_pose(chain, pose, redundant.as_ref())
            }
            ArmCmd::TrackCartesian {
                pose,
                twist,
                redundant,
            } => self.track_cartesian_trajectory(chain, pose, twist, redundant.as_ref()),
            ArmCmd::TrackJoint {
                pos_rad,
                vel_rads,
                acc_radss,
            } => self.track_joint_trajectory(chain, pos_rad, vel_rads, acc_radss.as_ref()),
        };

        if let Some(pose) = cmd.target_pose() {
            let err = pose_error(pose, &chain.endpoint_pose());
            self.report.pos_error_m = Some(err.rows(0, 3).norm());
            self.report.att_error = Some(err.rows(3, 3).norm());
        }

        self.current_cmd = Some(cmd);

        qdot
    }

    /// Flag each joint whose demand is at its speed limits.
    fn check_limited(&mut self, chain: &ChainSnapshot, qdot: &DVector<f64>) {
        let (lower, upper) = speed_limits(chain);

        self.report.speed_limited = (0..chain.joint_count())
            .map(|i| {
                let margin = LIMITED_MARGIN * (upper[i] - lower[i]).abs();
                qdot[i] <= lower[i] + margin || qdot[i] >= upper[i] - margin
            })
            .collect();
    }
}

impl State for KinCtrl {
    type InitData = &'static str;
    type InitError = KinCtrlInitError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = KinCtrlError;

    /// Initialise the KinCtrl module.
    ///
    /// Expected init data is the path to the parameter file
    fn init(&mut self, init_data: Self::InitData, session: &Session) -> Result<(), Self::InitError> {
        let params: Params = params::load(init_data)?;

        *self = KinCtrl::new(params)?;

        debug!(
            "[KinCtrl] Initialised in session {:?} with {:?}",
            session.session_root, self.params
        );

        Ok(())
    }

    /// Perform cyclic processing of Kinematic Control.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        // Clear the status report
        self.report = StatusReport::default();

        let chain = &input_data.chain;
        chain.validate()?;

        // Check to see if there's a new command
        if let Some(cmd) = &input_data.cmd {
            debug!("[KinCtrl] New command: {:?}", cmd);
            self.current_cmd = Some(cmd.clone());
        }

        let qdot = self.exec_cmd(chain);

        self.check_limited(chain, &qdot);
        self.report.manipulability = manipulability(&chain.jacobian);

        trace!("[KinCtrl] output: {:?}", qdot.as_slice());

        Ok((OutputData { qdot_rads: qdot }, self.report.clone()))
    }

    /// Latch a stop command, the arm coasts to rest until a new command
    /// arrives.
    fn make_safe(&mut self) {
        warn!("[KinCtrl] Made safe, stopping the arm");
        self.current_cmd = Some(ArmCmd::Stop);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::{test_chain, RateSolver, FALLBACK_DAMPING};
    use super::*;
    use crate::qp_solver;
    use nalgebra::{DMatrix, Isometry3, Translation3, UnitQuaternion, Vector6};

    fn input(cmd: Option<ArmCmd>, chain: &ChainSnapshot) -> InputData {
        InputData {
            cmd,
            chain: chain.clone(),
        }
    }

    #[test]
    fn test_new() {
        let kin_ctrl = KinCtrl::new(Params::default()).unwrap();
        assert_eq!(kin_ctrl.proportional_gain(), 1.0);
        assert_eq!(kin_ctrl.params().rate_solver, RateSolver::InteriorPoint);

        // Negative gains are corrected
        let kin_ctrl = KinCtrl::new(Params {
            k_p: -3.0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(kin_ctrl.proportional_gain(), 3.0);

        assert!(matches!(
            KinCtrl::new(Params {
                k_p: 0.0,
                ..Default::default()
            }),
            Err(KinCtrlInitError::InvalidGain(KinCtrlError::ZeroGain(_)))
        ));

        assert!(matches!(
            KinCtrl::new(Params {
                singularity_scalar: -0.5,
                ..Default::default()
            }),
            Err(KinCtrlInitError::InvalidSingularityScalar(_))
        ));

        assert!(matches!(
            KinCtrl::new(Params {
                solver: qp_solver::Params {
                    max_steps: 0,
                    ..Default::default()
                },
                ..Default::default()
            }),
            Err(KinCtrlInitError::InvalidSolverParams(_))
        ));
    }

    #[test]
    fn test_set_proportional_gain() {
        let mut kin_ctrl = KinCtrl::default();

        assert!(kin_ctrl.set_proportional_gain(2.0).is_ok());
        assert_eq!(kin_ctrl.proportional_gain(), 2.0);

        // Zero is rejected and the previous value kept
        assert!(matches!(
            kin_ctrl.set_proportional_gain(0.0),
            Err(KinCtrlError::ZeroGain(_))
        ));
        assert_eq!(kin_ctrl.proportional_gain(), 2.0);

        assert!(kin_ctrl.set_proportional_gain(std::f64::NAN).is_err());
        assert_eq!(kin_ctrl.proportional_gain(), 2.0);

        // Negative is made positive
        assert!(kin_ctrl.set_proportional_gain(-0.5).is_ok());
        assert_eq!(kin_ctrl.proportional_gain(), 0.5);
    }

    #[test]
    fn test_proc_no_cmd() {
        let mut kin_ctrl = KinCtrl::default();
        let mut chain = test_chain(6);
        chain.vel_rads = vec![1.0; 6];

        let (output, report) = kin_ctrl.proc(&input(None, &chain)).unwrap();

        assert_eq!(output.qdot_rads, chain.joint_velocities() * FALLBACK_DAMPING);
        assert!(report.coasting);
        assert_eq!(report.speed_limited, vec![false; 6]);
        assert!(report.manipulability > 0.0);
        assert!(report.pos_error_m.is_none());
    }

    #[test]
    fn test_proc_latches_cmd() {
        let mut kin_ctrl = KinCtrl::default();
        let mut chain = test_chain(3);
        let cmd = ArmCmd::MoveToPosition {
            pos_rad: DVector::from_vec(vec![0.5, 0.0, -0.5]),
        };

        let (output, report) = kin_ctrl.proc(&input(Some(cmd), &chain)).unwrap();
        assert_eq!(output.qdot_rads.as_slice(), &[0.5, 0.0, -0.5]);
        assert!(!report.coasting);

        // The command stays active without being resent
        chain.pos_rad = vec![0.25, 0.0, -0.25];
        let (output, _) = kin_ctrl.proc(&input(None, &chain)).unwrap();
        assert_eq!(output.qdot_rads.as_slice(), &[0.25, 0.0, -0.25]);
        assert!(matches!(
            kin_ctrl.current_cmd(),
            Some(ArmCmd::MoveToPosition { .. })
        ));
    }

    #[test]
    fn test_proc_speed_limited() {
        let mut kin_ctrl = KinCtrl::default();
        kin_ctrl.set_proportional_gain(1000.0).unwrap();
        let chain = test_chain(2);
        let cmd = ArmCmd::MoveToPosition {
            pos_rad: DVector::from_vec(vec![2.0, 0.0]),
        };

        let (output, report) = kin_ctrl.proc(&input(Some(cmd), &chain)).unwrap();

        assert_eq!(output.qdot_rads[0], 100.0);
        assert_eq!(report.speed_limited, vec![true, false]);
    }

    #[test]
    fn test_proc_pose_report() {
        let mut kin_ctrl = KinCtrl::default();
        let chain = test_chain(6);
        let cmd = ArmCmd::TrackCartesian {
            pose: Isometry3::from_parts(Translation3::new(0.0, 0.3, 0.4), UnitQuaternion::identity()),
            twist: Vector6::zeros(),
            redundant: None,
        };

        let (_, report) = kin_ctrl.proc(&input(Some(cmd), &chain)).unwrap();

        assert!((report.pos_error_m.unwrap() - 0.5).abs() < 1e-12);
        assert!(report.att_error.unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_proc_invalid_snapshot() {
        let mut kin_ctrl = KinCtrl::default();
        let mut chain = test_chain(6);
        chain.inertia = DMatrix::zeros(5, 5);

        assert!(matches!(
            kin_ctrl.proc(&input(None, &chain)),
            Err(KinCtrlError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_make_safe() {
        let mut kin_ctrl = KinCtrl::default();
        let mut chain = test_chain(2);
        chain.vel_rads = vec![2.0, -1.0];
        let cmd = ArmCmd::MoveToPosition {
            pos_rad: DVector::from_vec(vec![1.0, 1.0]),
        };
        kin_ctrl.proc(&input(Some(cmd), &chain)).unwrap();

        kin_ctrl.make_safe();
        let (output, report) = kin_ctrl.proc(&input(None, &chain)).unwrap();

        assert_eq!(output.qdot_rads, chain.joint_velocities() * FALLBACK_DAMPING);
        assert!(report.coasting);
        assert!(matches!(kin_ctrl.current_cmd(), Some(ArmCmd::Stop)));
    }
}

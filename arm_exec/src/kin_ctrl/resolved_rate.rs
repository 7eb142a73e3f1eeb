//! Resolved-rate control
//!
//! Turns a desired endpoint twist into joint velocities, following Whitney
//! (1969), "Resolved motion rate control of manipulators and human
//! prostheses". Rather than inverting the Jacobian directly the problem is
//! posed as a least-squares problem so that joint speed limits and, for
//! redundant arms, a secondary task can be included.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::warn;
use nalgebra::{DMatrix, DVector, Vector6};

// Internal
use super::{
    fallback_on, joint_penalty, limits::clamp_joint_rate, singularity_avoidance, speed_limits,
    vector_mismatch, KinCtrl, KinCtrlError, KinematicChain, RateSolver, FALLBACK_DAMPING,
    SINGULAR_PIVOT, TASK_DOF,
};
use crate::qp_solver::saddle_point_matrix;
use util::maths::near_zero;

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl KinCtrl {
    /// Get the joint velocities which move the endpoint at the given twist.
    ///
    /// For arms with up to 6 joints this solves
    ///
    /// ```text
    ///     min 0.5*|twist - J*qdot|^2    s.t.  lower <= qdot <= upper
    /// ```
    ///
    /// For redundant arms the endpoint twist is an equality constraint and
    /// the spare freedom is used to stay close to the `redundant` joint
    /// velocities:
    ///
    /// ```text
    ///     min 0.5*(redundant - qdot)'*W*(redundant - qdot)
    ///     s.t.  J*qdot = twist,  lower <= qdot <= upper
    /// ```
    ///
    /// where `W` is the joint inertia with the joint limit penalty minus one
    /// added to each diagonal entry. If no redundant task is given the
    /// singularity avoidance gradient is used.
    ///
    /// `lower` and `upper` are the instantaneous speed limits of each joint.
    ///
    /// If the rates can't be resolved to finite values the damped fallback is
    /// returned.
    pub fn move_at_speed<C>(
        &self,
        chain: &C,
        twist: &Vector6<f64>,
        redundant: Option<&DVector<f64>>,
    ) -> DVector<f64>
    where
        C: KinematicChain + ?Sized,
    {
        let qdot = self.resolve_rates(chain, twist, redundant);

        match check_finite("move_at_speed", &qdot) {
            Ok(()) => qdot,
            Err(e) => fallback_on(chain, e),
        }
    }

    fn resolve_rates<C>(
        &self,
        chain: &C,
        twist: &Vector6<f64>,
        redundant: Option<&DVector<f64>>,
    ) -> DVector<f64>
    where
        C: KinematicChain + ?Sized,
    {
        if let Err(e) = check_redundant("move_at_speed", chain, redundant) {
            return fallback_on(chain, e);
        }

        let n = chain.joint_count();
        let jacobian = chain.jacobian();

        if jacobian.shape() != (TASK_DOF, n) {
            return fallback_on(
                chain,
                KinCtrlError::DimensionMismatch {
                    op: "move_at_speed",
                    arg: "the Jacobian",
                    expected: format!("{}x{}", TASK_DOF, n),
                    found: format!("{}x{}", jacobian.nrows(), jacobian.ncols()),
                },
            );
        }

        let y = DVector::from_column_slice(twist.as_slice());

        if n <= TASK_DOF {
            return match self.params.rate_solver {
                RateSolver::InteriorPoint => {
                    let (lower, upper) = speed_limits(chain);
                    let start = (&lower + &upper) * 0.5;

                    self.solver.least_squares_bounded(
                        &y,
                        &jacobian,
                        &DMatrix::identity(TASK_DOF, TASK_DOF),
                        &lower,
                        &upper,
                        &start,
                    )
                }
                RateSolver::BackSubstitution => {
                    // J*qdot = y  =>  J'*J*qdot = J'*y  =>  R*qdot = Q'*J'*y
                    let jt = jacobian.transpose();
                    let qr = (&jt * &jacobian).qr();
                    solve_joint_control(chain, &(qr.q().transpose() * jt * y), &qr.r())
                }
            };
        }

        let inertia = chain.inertia();
        if inertia.shape() != (n, n) {
            return fallback_on(
                chain,
                KinCtrlError::DimensionMismatch {
                    op: "move_at_speed",
                    arg: "the inertia",
                    expected: format!("{}x{}", n, n),
                    found: format!("{}x{}", inertia.nrows(), inertia.ncols()),
                },
            );
        }

        let redundant = match redundant {
            Some(r) => r.clone(),
            None => singularity_avoidance(chain, self.params.singularity_scalar),
        };
        let w = redundancy_weight(chain, inertia);

        match self.params.rate_solver {
            RateSolver::InteriorPoint => {
                let (lower, upper) = speed_limits(chain);

                self.solver.least_distance_bounded(
                    &redundant,
                    &w,
                    &y,
                    &jacobian,
                    &lower,
                    &upper,
                    &chain.joint_velocities(),
                )
            }
            RateSolver::BackSubstitution => {
                // The joint rates only depend on the lower right block of the
                // QR decomposition of the saddle point matrix
                let qr = saddle_point_matrix(&jacobian, &w).qr();
                let q = qr.q();
                let r = qr.r();

                let q12 = DMatrix::from_fn(TASK_DOF, n, |i, j| q[(i, TASK_DOF + j)]);
                let q22 = DMatrix::from_fn(n, n, |i, j| q[(TASK_DOF + i, TASK_DOF + j)]);
                let r22 = DMatrix::from_fn(n, n, |i, j| r[(TASK_DOF + i, TASK_DOF + j)]);

                solve_joint_control(
                    chain,
                    &(q12.transpose() * y + q22.transpose() * (&w * redundant)),
                    &r22,
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Solve `U*qdot = y` for the joint velocities, where `U` is upper
/// triangular.
///
/// The joints are solved from the last to the first. A joint whose diagonal
/// entry is smaller than [`SINGULAR_PIVOT`] is locally singular and keeps 90%
/// of its current velocity instead. Every joint is then clamped to its speed
/// limits.
pub fn solve_joint_control<C>(chain: &C, y: &DVector<f64>, u: &DMatrix<f64>) -> DVector<f64>
where
    C: KinematicChain + ?Sized,
{
    let n = chain.joint_count();

    if y.len() != n {
        return fallback_on(chain, vector_mismatch("solve_joint_control", "y", n, y.len()));
    }
    if u.shape() != (n, n) {
        return fallback_on(
            chain,
            KinCtrlError::DimensionMismatch {
                op: "solve_joint_control",
                arg: "U",
                expected: format!("{}x{}", n, n),
                found: format!("{}x{}", u.nrows(), u.ncols()),
            },
        );
    }

    let mut qdot = DVector::zeros(n);

    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| u[(i, j)] * qdot[j]).sum();

        let rate = if near_zero(u[(i, i)], SINGULAR_PIVOT) {
            warn!(
                "[KinCtrl] solve_joint_control(): joint {} is singular, slowing it down",
                i
            );
            FALLBACK_DAMPING * chain.joint_velocity(i)
        } else {
            (y[i] - sum) / u[(i, i)]
        };

        qdot[i] = clamp_joint_rate(chain, i, rate);
    }

    match check_finite("solve_joint_control", &qdot) {
        Ok(()) => qdot,
        Err(e) => fallback_on(chain, e),
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Check an optional redundant task has one entry per joint.
pub(crate) fn check_redundant<C>(
    op: &'static str,
    chain: &C,
    redundant: Option<&DVector<f64>>,
) -> Result<(), KinCtrlError>
where
    C: KinematicChain + ?Sized,
{
    match redundant {
        Some(r) if r.len() != chain.joint_count() => Err(vector_mismatch(
            op,
            "the redundant task",
            chain.joint_count(),
            r.len(),
        )),
        _ => Ok(()),
    }
}

/// Check every resolved rate is finite.
fn check_finite(op: &'static str, qdot: &DVector<f64>) -> Result<(), KinCtrlError> {
    match qdot.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(KinCtrlError::Numerical(
            op,
            format!("the rate of joint {} is {}", i, qdot[i]),
        )),
        None => Ok(()),
    }
}

/// Weight for redundancy resolution: the inertia, for minimum effort, plus
/// the joint limit penalty less one on the diagonal, penalising motion
/// towards a limit.
fn redundancy_weight<C>(chain: &C, mut inertia: DMatrix<f64>) -> DMatrix<f64>
where
    C: KinematicChain + ?Sized,
{
    for i in 0..chain.joint_count() {
        inertia[(i, i)] += joint_penalty(chain, i) - 1.0;
    }
    inertia
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::{test_chain, Params};
    use super::*;
    use crate::qp_solver;

    fn precise_ctrl(rate_solver: RateSolver) -> KinCtrl {
        KinCtrl::new(Params {
            rate_solver,
            solver: qp_solver::Params {
                step_tol: 1e-10,
                max_steps: 50,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    fn twist() -> Vector6<f64> {
        Vector6::new(0.1, -0.2, 0.05, 0.3, 0.0, -0.1)
    }

    fn min_norm_solution(jacobian: &DMatrix<f64>, twist: &Vector6<f64>) -> DVector<f64> {
        let y = DVector::from_column_slice(twist.as_slice());
        let jjt = jacobian * jacobian.transpose();
        jacobian.transpose() * jjt.lu().solve(&y).unwrap()
    }

    #[test]
    fn test_6dof_matches_inverse() {
        let chain = test_chain(6);
        let expected = chain
            .jacobian
            .clone()
            .lu()
            .solve(&DVector::from_column_slice(twist().as_slice()))
            .unwrap();

        for rate_solver in [RateSolver::InteriorPoint, RateSolver::BackSubstitution].iter() {
            let qdot = precise_ctrl(*rate_solver).move_at_speed(&chain, &twist(), None);

            assert!(
                (&qdot - &expected).norm() < 1e-4,
                "{:?}: {} vs {}",
                rate_solver,
                qdot,
                expected
            );
        }
    }

    #[test]
    fn test_7dof_task_exact() {
        // Zero redundant task, identity inertia and a stationary arm give an
        // identity weight, so the result is the minimum norm solution
        let chain = test_chain(7);
        let y = DVector::from_column_slice(twist().as_slice());
        let expected = min_norm_solution(&chain.jacobian, &twist());

        for rate_solver in [RateSolver::InteriorPoint, RateSolver::BackSubstitution].iter() {
            let qdot = precise_ctrl(*rate_solver).move_at_speed(
                &chain,
                &twist(),
                Some(&DVector::zeros(7)),
            );

            assert_eq!(qdot.len(), 7);
            assert!(
                (&chain.jacobian * &qdot - &y).norm() < 1e-4,
                "{:?}: task error {}",
                rate_solver,
                (&chain.jacobian * &qdot - &y).norm()
            );
            assert!((&qdot - &expected).norm() < 1e-3);
        }
    }

    #[test]
    fn test_underactuated() {
        // Fewer joints than task freedoms gives the least squares fit
        let chain = test_chain(3);
        let y = DVector::from_column_slice(twist().as_slice());
        let jt = chain.jacobian.transpose();
        let expected = (&jt * &chain.jacobian).lu().solve(&(&jt * &y)).unwrap();

        let qdot = precise_ctrl(RateSolver::InteriorPoint).move_at_speed(&chain, &twist(), None);

        assert!((qdot - expected).norm() < 1e-4);
    }

    #[test]
    fn test_speed_limited() {
        // A twist far beyond what the joints can achieve must still give a
        // demand inside the speed limits
        let chain = test_chain(6);
        let fast = twist() * 1e4;

        let qdot = KinCtrl::default().move_at_speed(&chain, &fast, None);
        let (lower, upper) = speed_limits(&chain);

        for i in 0..6 {
            assert!(qdot[i] >= lower[i] && qdot[i] <= upper[i]);
        }

        let mut chain = test_chain(7);
        chain.pos_rad[3] = 2.9999;
        let qdot = KinCtrl::default().move_at_speed(&chain, &fast, None);
        let (lower, upper) = speed_limits(&chain);

        for i in 0..7 {
            assert!(qdot[i] >= lower[i] && qdot[i] <= upper[i]);
        }
    }

    #[test]
    fn test_mismatch_fallback() {
        let mut chain = test_chain(7);
        chain.vel_rads = vec![1.0, -1.0, 0.5, 0.0, 2.0, -2.0, 0.1];
        let fallback = chain.joint_velocities() * FALLBACK_DAMPING;
        let ctrl = KinCtrl::default();

        // Redundant task of the wrong size
        let qdot = ctrl.move_at_speed(&chain, &twist(), Some(&DVector::zeros(6)));
        assert_eq!(qdot, fallback);

        // Jacobian of the wrong size
        let mut bad = chain.clone();
        bad.jacobian = DMatrix::zeros(6, 6);
        assert_eq!(ctrl.move_at_speed(&bad, &twist(), None), fallback);

        // Inertia of the wrong size
        let mut bad = chain.clone();
        bad.inertia = DMatrix::identity(6, 6);
        assert_eq!(ctrl.move_at_speed(&bad, &twist(), None), fallback);
    }

    #[test]
    fn test_solve_joint_control() {
        let mut chain = test_chain(3);
        chain.vel_rads = vec![0.0, 1.0, 0.0];

        let u = DMatrix::from_row_slice(3, 3, &[2.0, 1.0, 1.0, 0.0, 1e-7, 3.0, 0.0, 0.0, 4.0]);
        let y = DVector::from_vec(vec![1.0, 5.0, 2.0]);

        let qdot = solve_joint_control(&chain, &y, &u);

        // Last joint solved normally, middle joint singular, first joint uses
        // both
        assert!((qdot[2] - 0.5).abs() < 1e-12);
        assert!((qdot[1] - 0.9).abs() < 1e-12);
        assert!((qdot[0] - (1.0 - 0.9 - 0.5) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_solve_joint_control_clamped() {
        let mut chain = test_chain(2);
        chain.vel_rads = vec![0.0, 500.0];

        // The singular joint keeps 90% of a speed above its limit, and the
        // other joint is demanded too fast
        let u = DMatrix::from_row_slice(2, 2, &[0.01, 0.0, 0.0, 0.0]);
        let y = DVector::from_vec(vec![5.0, 1.0]);

        let qdot = solve_joint_control(&chain, &y, &u);

        assert_eq!(qdot[1], 100.0);
        assert_eq!(qdot[0], 100.0);
    }

    #[test]
    fn test_solve_joint_control_mismatch() {
        let mut chain = test_chain(3);
        chain.vel_rads = vec![1.0, 2.0, 3.0];
        let fallback = chain.joint_velocities() * FALLBACK_DAMPING;

        let qdot = solve_joint_control(&chain, &DVector::zeros(2), &DMatrix::identity(3, 3));
        assert_eq!(qdot, fallback);

        let qdot = solve_joint_control(&chain, &DVector::zeros(3), &DMatrix::identity(2, 3));
        assert_eq!(qdot, fallback);
    }

    #[test]
    fn test_joint_at_limit() {
        // A joint on its upper limit and still moving towards it
        let mut chain = test_chain(7);
        chain.pos_rad[2] = 3.0;
        chain.vel_rads[2] = 0.5;
        let y = DVector::from_column_slice(twist().as_slice());
        let (lower, upper) = speed_limits(&chain);

        for rate_solver in [RateSolver::InteriorPoint, RateSolver::BackSubstitution].iter() {
            let qdot = precise_ctrl(*rate_solver).move_at_speed(
                &chain,
                &twist(),
                Some(&DVector::zeros(7)),
            );

            assert!(
                qdot.iter().all(|v| v.is_finite()),
                "{:?}: {}",
                rate_solver,
                qdot
            );
            for i in 0..7 {
                assert!(qdot[i] >= lower[i] && qdot[i] <= upper[i]);
            }
        }

        // The constrained solve still achieves the twist, with the joint on
        // its limit held back
        let qdot = precise_ctrl(RateSolver::InteriorPoint).move_at_speed(
            &chain,
            &twist(),
            Some(&DVector::zeros(7)),
        );
        assert!((&chain.jacobian * &qdot - &y).norm() < 1e-2);
        assert!(qdot[2] <= 0.0);
    }

    #[test]
    fn test_solve_joint_control_non_finite() {
        let mut chain = test_chain(2);
        chain.vel_rads = vec![0.4, -0.2];
        let fallback = chain.joint_velocities() * FALLBACK_DAMPING;

        let u = DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, 0.0, 1.0]);
        let y = DVector::from_vec(vec![1.0, 1.0]);

        assert_eq!(solve_joint_control(&chain, &y, &u), fallback);
    }

    #[test]
    fn test_redundancy_weight() {
        let mut chain = test_chain(7);
        chain.min_pos_rad[2] = -2.0;
        chain.max_pos_rad[2] = 2.0;
        chain.pos_rad[2] = 1.0;
        chain.vel_rads[2] = 0.5;

        let w = redundancy_weight(&chain, chain.inertia.clone());

        assert!((w[(2, 2)] - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(w[(0, 0)], 1.0);
        assert_eq!(w[(2, 3)], 0.0);

        // On the limit the weight stays finite
        chain.pos_rad[2] = 2.0;
        let w = redundancy_weight(&chain, chain.inertia.clone());
        assert!(w[(2, 2)].is_finite() && w[(2, 2)] > 1.0);
    }
}

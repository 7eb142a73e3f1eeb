//! Core QP routines: direct solve and log-barrier interior point method

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{trace, warn};
use nalgebra::{DMatrix, DVector};

// Internal
use super::{fallback, shape, QpSolver, QpSolverError, PIVOT_TOL};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Smallest step scalar the line search will try before giving up on a
/// direction.
const MIN_STEP: f64 = 1e-12;

/// Maximum number of passes over the constraints when moving an infeasible
/// initial guess into the feasible region.
const FEASIBILITY_SWEEPS: usize = 100;

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl QpSolver {
    /// Solve the unconstrained problem `min 0.5*x'*H*x - x'*f`.
    ///
    /// This is the linear system `H*x = f`. If `H` is singular the initial
    /// guess is returned, it is up to the caller to regularise `H`.
    pub fn solve(&self, h: &DMatrix<f64>, f: &DVector<f64>, x0: &DVector<f64>) -> DVector<f64> {
        let n = x0.len();

        if h.nrows() != n || h.ncols() != n || f.len() != n {
            return fallback(
                x0,
                QpSolverError::DimensionMismatch(
                    "solve",
                    format!(
                        "H matrix was {}, f vector was {}x1, and x0 vector was {}x1.",
                        shape(h),
                        f.len(),
                        n
                    ),
                ),
            );
        }

        match solve_linear_system(h.clone(), f) {
            Some(x) => x,
            None => fallback(x0, QpSolverError::Singular("solve")),
        }
    }

    /// Solve the constrained problem `min 0.5*x'*H*x - x'*f` subject to
    /// `B*x >= c`.
    ///
    /// The constraints are folded into the cost with a log barrier:
    ///
    /// ```text
    ///     min 0.5*x'*H*x - x'*f - u*sum(log(d_j)),    d_j = b_j*x - c_j
    /// ```
    ///
    /// where `b_j` is the jth row of `B`. Each iteration takes a Newton step
    /// using the gradient and Hessian
    ///
    /// ```text
    ///     g = H*x - f - u*sum(b_j'/d_j)
    ///     I = H + u*sum(b_j'*b_j/d_j^2)
    /// ```
    ///
    /// scaled back until no constraint would be crossed, then shrinks `u`.
    ///
    /// The iteration count is capped by `max_steps` and no convergence flag
    /// is raised: the last iterate is returned.
    ///
    /// The method needs a strictly feasible starting point. If `x0` is not
    /// one it is first projected onto each violated constraint in turn,
    /// see [`feasible_start`].
    pub fn solve_constrained(
        &self,
        h: &DMatrix<f64>,
        f: &DVector<f64>,
        b: &DMatrix<f64>,
        c: &DVector<f64>,
        x0: &DVector<f64>,
    ) -> DVector<f64> {
        let n = x0.len();

        if h.nrows() != n || h.ncols() != n || f.len() != n || b.ncols() != n || b.nrows() != c.len()
        {
            return fallback(
                x0,
                QpSolverError::DimensionMismatch(
                    "solve_constrained",
                    format!(
                        "H matrix was {}, f vector was {}x1, B matrix was {}, c vector was {}x1, \
                         and x0 vector was {}x1.",
                        shape(h),
                        f.len(),
                        shape(b),
                        c.len(),
                        n
                    ),
                ),
            );
        }

        let p = &self.params;
        let num_constraints = b.nrows();

        // Rows of B as column vectors, and their outer products, which don't
        // change between iterations
        let bt: Vec<DVector<f64>> = (0..num_constraints)
            .map(|j| b.row(j).transpose())
            .collect();
        let btb: Vec<DMatrix<f64>> = bt.iter().map(|b_j| b_j * b_j.transpose()).collect();

        let start = feasible_start(b, c, x0, p.violation_slack);

        let mut x = start.clone();
        let mut x_prev = start;
        let mut d = vec![0f64; num_constraints];

        let mut u = p.barrier_init;
        let mut beta = p.barrier_decay_init;

        for step in 0..p.max_steps {
            let mut violation = false;
            let mut g = DVector::zeros(n);
            let mut hess = h.clone();

            // Accumulate the barrier terms from the distance to each
            // constraint
            for j in 0..num_constraints {
                d[j] = bt[j].dot(&x) - c[j];

                if d[j] <= 0.0 {
                    violation = true;
                    d[j] = p.violation_slack;
                    u *= p.barrier_increase;
                }

                g -= &bt[j] * (u / d[j]);
                hess += &btb[j] * (u / (d[j] * d[j]));
            }

            // Don't accept a point outside the feasible region, go back to
            // the last one and slow down the barrier decay
            if violation {
                x.copy_from(&x_prev);
                beta += p.barrier_decay_slowdown * (1.0 - beta);

                // The line search must measure the slack from where the step
                // starts
                for j in 0..num_constraints {
                    d[j] = bt[j].dot(&x) - c[j];
                }
            }

            g += h * &x - f;

            let dx = match solve_linear_system(hess, &(-g)) {
                Some(dx) => dx,
                None => {
                    warn!(
                        "[QpSolver] solve_constrained(): Newton step is singular at step {}, \
                         returning the current iterate",
                        step
                    );
                    break;
                }
            };

            // Shrink the step until every constraint is still satisfied
            let mut alpha = p.step_init;
            for j in 0..num_constraints {
                let b_dx = bt[j].dot(&dx);
                while d[j] + alpha * b_dx < 0.0 && alpha > MIN_STEP {
                    alpha *= p.step_shrink;
                }
            }

            if alpha * dx.norm() < p.step_tol {
                trace!("[QpSolver] solve_constrained(): converged after {} steps", step);
                break;
            }

            x_prev.copy_from(&x);
            x += dx * alpha;
            u *= beta;
        }

        // The final step is never checked by the loop, so fall back to the
        // last accepted iterate if it crossed a constraint
        if violates(b, c, &x) && !violates(b, c, &x_prev) {
            trace!("[QpSolver] solve_constrained(): final step infeasible, using previous iterate");
            return x_prev;
        }

        x
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Solve the square system `A*x = y` by LU decomposition with partial
/// pivoting.
///
/// Returns `None` if any pivot is smaller than `PIVOT_TOL`.
fn solve_linear_system(a: DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let lu = a.lu();

    if lu.u().diagonal().iter().any(|p| p.abs() < PIVOT_TOL) {
        return None;
    }

    lu.solve(y).filter(|x| x.iter().all(|v| v.is_finite()))
}

/// Move `x0` strictly inside `B*x >= c`.
///
/// Each pass projects the point onto every violated (or active) constraint,
/// landing `margin` inside it. For a box this takes a single pass. If the
/// point isn't strictly feasible after `FEASIBILITY_SWEEPS` passes a warning
/// is raised and the last point is used anyway.
fn feasible_start(b: &DMatrix<f64>, c: &DVector<f64>, x0: &DVector<f64>, margin: f64) -> DVector<f64> {
    let mut x = x0.clone();

    for _ in 0..FEASIBILITY_SWEEPS {
        let mut moved = false;

        for j in 0..b.nrows() {
            let b_j = b.row(j).transpose();
            let d = b_j.dot(&x) - c[j];
            let b_norm_sqrd = b_j.norm_squared();

            if d <= 0.0 && b_norm_sqrd > 0.0 {
                x += b_j * ((margin - d) / b_norm_sqrd);
                moved = true;
            }
        }

        if !moved {
            return x;
        }
    }

    if (b * &x - c).iter().any(|d| *d <= 0.0) {
        warn!(
            "[QpSolver] solve_constrained(): could not find a strictly feasible starting point, \
             the constraints may be inconsistent"
        );
    }

    x
}

/// Check if `x` crosses any constraint in `B*x >= c`.
fn violates(b: &DMatrix<f64>, c: &DVector<f64>, x: &DVector<f64>) -> bool {
    (b * x - c).iter().any(|d| *d < 0.0)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

//! Least-squares and least-distance formulations
//!
//! Each function here only checks shapes and assembles the matrices for one
//! of the core routines in `interior_point.rs`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector};

// Internal
use super::{
    box_constraints, fallback, interior_start, shape, QpSolver, QpSolverError, PIVOT_TOL,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Fraction of the box width the warm start is kept away from each face.
const WARM_START_MARGIN: f64 = 0.01;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Split of a box `x_min <= x <= x_max` into coordinates free to move and
/// coordinates pinned by a box of zero (or negative) width.
///
/// A pinned coordinate has no strictly feasible interior, so the barrier
/// method can't be used on it. It is fixed at the middle of its box and
/// substituted out of the problem instead.
struct BoxSplit {
    /// Indices of the free coordinates.
    free: Vec<usize>,

    /// Pinned values, zero for the free coordinates.
    pinned: DVector<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl BoxSplit {
    fn new(x_min: &DVector<f64>, x_max: &DVector<f64>) -> Self {
        let is_free = |i: usize| x_max[i] - x_min[i] > 0.0;

        Self {
            free: (0..x_min.len()).filter(|i| is_free(*i)).collect(),
            pinned: DVector::from_fn(x_min.len(), |i, _| {
                if is_free(i) {
                    0.0
                } else {
                    0.5 * (x_min[i] + x_max[i])
                }
            }),
        }
    }

    /// The free entries of `v`.
    fn select(&self, v: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.free.len(), |k, _| v[self.free[k]])
    }

    /// The columns of `m` acting on the free coordinates.
    fn select_cols(&self, m: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(m.nrows(), self.free.len(), |r, k| m[(r, self.free[k])])
    }

    /// The block of the square `m` acting on the free coordinates.
    fn select_block(&self, m: &DMatrix<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(self.free.len(), self.free.len(), |r, k| {
            m[(self.free[r], self.free[k])]
        })
    }

    /// Put the free coordinates back alongside the pinned ones.
    fn expand(&self, x_free: &DVector<f64>) -> DVector<f64> {
        let mut x = self.pinned.clone();
        for (k, i) in self.free.iter().enumerate() {
            x[*i] = x_free[k];
        }
        x
    }
}

impl QpSolver {
    /// Minimise `0.5*(y - A*x)'*W*(y - A*x)`.
    ///
    /// Solved through the normal equations `A'*W*A*x = A'*W*y`. `W` must be
    /// `m x m` where `A` is `m x n`.
    pub fn least_squares(
        &self,
        y: &DVector<f64>,
        a: &DMatrix<f64>,
        w: &DMatrix<f64>,
        x0: &DVector<f64>,
    ) -> DVector<f64> {
        let (m, n) = a.shape();

        if y.len() != m || x0.len() != n {
            return fallback(
                x0,
                QpSolverError::DimensionMismatch(
                    "least_squares",
                    format!(
                        "The y vector was {}x1, the A matrix was {}, the W matrix was {}, and \
                         the x0 vector was {}x1.",
                        y.len(),
                        shape(a),
                        shape(w),
                        x0.len()
                    ),
                ),
            );
        }
        if w.shape() != (m, m) {
            return fallback(
                x0,
                QpSolverError::WeightMismatch("least_squares", w.nrows(), w.ncols(), m),
            );
        }

        let at_w = a.transpose() * w;
        self.solve(&(&at_w * a), &(at_w * y), x0)
    }

    /// Minimise `0.5*(y - A*x)'*W*(y - A*x)` subject to
    /// `x_min <= x <= x_max`.
    ///
    /// The box is written as `[-I; I]*x >= [-x_max; x_min]` and passed to the
    /// interior point method. `x0` is moved strictly inside the box before
    /// it is used as the starting point. Coordinates whose box has no width
    /// are held at its middle and removed from the problem.
    pub fn least_squares_bounded(
        &self,
        y: &DVector<f64>,
        a: &DMatrix<f64>,
        w: &DMatrix<f64>,
        x_min: &DVector<f64>,
        x_max: &DVector<f64>,
        x0: &DVector<f64>,
    ) -> DVector<f64> {
        let (m, n) = a.shape();

        if y.len() != m || x0.len() != n || x_min.len() != n || x_max.len() != n {
            return fallback(
                x0,
                QpSolverError::DimensionMismatch(
                    "least_squares_bounded",
                    format!(
                        "The y vector was {}x1, the A matrix was {}, the W matrix was {}, the \
                         x_min vector was {}x1, the x_max vector was {}x1, and the x0 vector \
                         was {}x1.",
                        y.len(),
                        shape(a),
                        shape(w),
                        x_min.len(),
                        x_max.len(),
                        x0.len()
                    ),
                ),
            );
        }
        if w.shape() != (m, m) {
            return fallback(
                x0,
                QpSolverError::WeightMismatch("least_squares_bounded", w.nrows(), w.ncols(), m),
            );
        }

        let split = BoxSplit::new(x_min, x_max);
        if split.free.is_empty() {
            return split.pinned;
        }

        let (x_min, x_max) = (split.select(x_min), split.select(x_max));
        let a_free = split.select_cols(a);
        let y_free = y - a * &split.pinned;

        let (b, c) = box_constraints(&x_min, &x_max, 0, split.free.len());
        let at_w = a_free.transpose() * w;

        let x = self.solve_constrained(
            &(&at_w * &a_free),
            &(at_w * y_free),
            &b,
            &c,
            &interior_start(&split.select(x0), &x_min, &x_max, WARM_START_MARGIN),
        );

        split.expand(&x)
    }

    /// Minimise `0.5*(xd - x)'*W*(xd - x)` subject to `A*x = y`.
    ///
    /// With multipliers `l` the optimum satisfies the saddle point system
    ///
    /// ```text
    ///     [ 0   A ] [ l ]   [  y   ]
    ///     [ A'  W ] [ x ] = [ W*xd ]
    /// ```
    ///
    /// A QR decomposition of the system matrix gives `R*[l; x] = Q'*[y; W*xd]`.
    /// Since `R` is upper triangular `x` only depends on the lower right block:
    ///
    /// ```text
    ///     R22*x = Q12'*y + Q22'*W*xd
    /// ```
    ///
    /// so the multipliers are never computed. `W` must be `n x n` where `A`
    /// is `m x n`.
    pub fn least_distance(
        &self,
        xd: &DVector<f64>,
        w: &DMatrix<f64>,
        y: &DVector<f64>,
        a: &DMatrix<f64>,
        x0: &DVector<f64>,
    ) -> DVector<f64> {
        let (m, n) = a.shape();

        if xd.len() != n || y.len() != m || x0.len() != n {
            return fallback(
                x0,
                QpSolverError::DimensionMismatch(
                    "least_distance",
                    format!(
                        "The xd vector was {}x1, the W matrix was {}, the y vector was {}x1, \
                         the A matrix was {}, and the x0 vector was {}x1.",
                        xd.len(),
                        shape(w),
                        y.len(),
                        shape(a),
                        x0.len()
                    ),
                ),
            );
        }
        if w.shape() != (n, n) {
            return fallback(
                x0,
                QpSolverError::WeightMismatch("least_distance", w.nrows(), w.ncols(), n),
            );
        }

        let qr = saddle_point_matrix(a, w).qr();
        let q = qr.q();
        let r = qr.r();

        let r22 = DMatrix::from_fn(n, n, |i, j| r[(m + i, m + j)]);
        if r22.diagonal().iter().any(|p| p.abs() < PIVOT_TOL) {
            return fallback(x0, QpSolverError::Singular("least_distance"));
        }

        let q12 = DMatrix::from_fn(m, n, |i, j| q[(i, m + j)]);
        let q22 = DMatrix::from_fn(n, n, |i, j| q[(m + i, m + j)]);
        let rhs = q12.transpose() * y + q22.transpose() * (w * xd);

        match r22.solve_upper_triangular(&rhs) {
            Some(x) => x,
            None => fallback(x0, QpSolverError::Singular("least_distance")),
        }
    }

    /// Minimise `0.5*(xd - x)'*W*(xd - x)` subject to `A*x = y` and
    /// `x_min <= x <= x_max`.
    ///
    /// The saddle point system from [`QpSolver::least_distance`] is solved
    /// with the interior point method over `[l; x]`, with the box acting on
    /// the `x` entries only. The multipliers start at zero. As in
    /// [`QpSolver::least_squares_bounded`] coordinates whose box has no width
    /// are held at its middle.
    #[allow(clippy::too_many_arguments)]
    pub fn least_distance_bounded(
        &self,
        xd: &DVector<f64>,
        w: &DMatrix<f64>,
        y: &DVector<f64>,
        a: &DMatrix<f64>,
        x_min: &DVector<f64>,
        x_max: &DVector<f64>,
        x0: &DVector<f64>,
    ) -> DVector<f64> {
        let (m, n) = a.shape();

        if xd.len() != n
            || y.len() != m
            || x0.len() != n
            || x_min.len() != n
            || x_max.len() != n
        {
            return fallback(
                x0,
                QpSolverError::DimensionMismatch(
                    "least_distance_bounded",
                    format!(
                        "The xd vector was {}x1, the W matrix was {}, the y vector was {}x1, \
                         the A matrix was {}, the x_min vector was {}x1, the x_max vector was \
                         {}x1, and the x0 vector was {}x1.",
                        xd.len(),
                        shape(w),
                        y.len(),
                        shape(a),
                        x_min.len(),
                        x_max.len(),
                        x0.len()
                    ),
                ),
            );
        }
        if w.shape() != (n, n) {
            return fallback(
                x0,
                QpSolverError::WeightMismatch("least_distance_bounded", w.nrows(), w.ncols(), n),
            );
        }

        let split = BoxSplit::new(x_min, x_max);
        let n_free = split.free.len();
        if n_free == 0 {
            return split.pinned;
        }

        // With x = x_free + pinned the pinned part moves to the right hand side
        let (x_min, x_max) = (split.select(x_min), split.select(x_max));
        let a_free = split.select_cols(a);
        let y_free = y - a * &split.pinned;
        let wxd = split.select(&(w * (xd - &split.pinned)));

        let h = saddle_point_matrix(&a_free, &split.select_block(w));
        let f = DVector::from_fn(m + n_free, |i, _| {
            if i < m {
                y_free[i]
            } else {
                wxd[i - m]
            }
        });

        let (b, c) = box_constraints(&x_min, &x_max, m, m + n_free);

        let x_start = interior_start(&split.select(x0), &x_min, &x_max, WARM_START_MARGIN);
        let state_0 = DVector::from_fn(m + n_free, |i, _| {
            if i < m {
                0.0
            } else {
                x_start[i - m]
            }
        });

        let state = self.solve_constrained(&h, &f, &b, &c, &state_0);

        // A fallback inside the solver hands back the padded start, so this is
        // always the x part
        split.expand(&state.rows(m, n_free).into_owned())
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Assemble the saddle point matrix `[0, A; A', W]` of an equality
/// constrained least distance problem.
pub fn saddle_point_matrix(a: &DMatrix<f64>, w: &DMatrix<f64>) -> DMatrix<f64> {
    let (m, n) = a.shape();

    DMatrix::from_fn(m + n, m + n, |r, c| match (r < m, c < m) {
        (true, true) => 0.0,
        (true, false) => a[(r, c - m)],
        (false, true) => a[(c, r - m)],
        (false, false) => w[(r - m, c - m)],
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::Params;
    use super::*;

    // A slower barrier decay keeps the iterates from stalling next to an
    // active constraint
    fn precise_solver() -> QpSolver {
        QpSolver::new(Params {
            barrier_decay_init: 0.3,
            step_tol: 1e-10,
            max_steps: 60,
            ..Default::default()
        })
    }

    #[test]
    fn test_saddle_point_matrix() {
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let w = DMatrix::from_row_slice(2, 2, &[3.0, 4.0, 5.0, 6.0]);

        let h = saddle_point_matrix(&a, &w);

        assert_eq!(
            h,
            DMatrix::from_row_slice(3, 3, &[0.0, 1.0, 2.0, 1.0, 3.0, 4.0, 2.0, 5.0, 6.0])
        );
    }

    #[test]
    fn test_least_squares_overdetermined() {
        // Fit a line y = p0 + p1*t through points lying exactly on y = 1 + 2t
        let solver = QpSolver::default();
        let a = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = DVector::from_vec(vec![1.0, 3.0, 5.0, 7.0]);

        let x = solver.least_squares(&y, &a, &DMatrix::identity(4, 4), &DVector::zeros(2));

        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_least_squares_weights() {
        // Two conflicting measurements of one value, the heavier one wins
        // proportionally
        let solver = QpSolver::default();
        let a = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
        let y = DVector::from_vec(vec![0.0, 4.0]);
        let w = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 3.0]));

        let x = solver.least_squares(&y, &a, &w, &DVector::zeros(1));

        assert!((x[0] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_least_squares_mismatch() {
        let solver = QpSolver::default();
        let x0 = DVector::from_vec(vec![0.5, 0.5]);
        let a = DMatrix::identity(2, 2);

        // Wrong y
        let x = solver.least_squares(&DVector::zeros(3), &a, &DMatrix::identity(2, 2), &x0);
        assert_eq!(x, x0);

        // Wrong weight
        let x = solver.least_squares(&DVector::zeros(2), &a, &DMatrix::identity(3, 3), &x0);
        assert_eq!(x, x0);
    }

    #[test]
    fn test_least_squares_bounded() {
        let solver = precise_solver();
        let y = DVector::from_vec(vec![3.0, -0.5, 0.0]);
        let x_min = DVector::from_element(3, -1.0);
        let x_max = DVector::from_element(3, 1.0);

        let x = solver.least_squares_bounded(
            &y,
            &DMatrix::identity(3, 3),
            &DMatrix::identity(3, 3),
            &x_min,
            &x_max,
            &DVector::zeros(3),
        );

        for i in 0..3 {
            assert!(x[i] >= x_min[i] && x[i] <= x_max[i]);
        }
        assert!((x[0] - 1.0).abs() < 1e-3);
        assert!((x[1] + 0.5).abs() < 1e-3);
        assert!(x[2].abs() < 1e-3);
    }

    #[test]
    fn test_least_squares_bounded_outside_start() {
        // Start well outside the box, the result must still be inside it
        let solver = QpSolver::default();
        let y = DVector::from_vec(vec![10.0, -10.0]);
        let x_min = DVector::from_vec(vec![0.0, -2.0]);
        let x_max = DVector::from_vec(vec![1.0, 2.0]);

        let x = solver.least_squares_bounded(
            &y,
            &DMatrix::identity(2, 2),
            &DMatrix::identity(2, 2),
            &x_min,
            &x_max,
            &DVector::from_vec(vec![50.0, -50.0]),
        );

        for i in 0..2 {
            assert!(x[i] >= x_min[i] && x[i] <= x_max[i]);
        }
    }

    #[test]
    fn test_least_squares_bounded_pinned() {
        // The first coordinate has a zero width box, the second must still
        // reach its upper limit
        let solver = precise_solver();
        let y = DVector::from_vec(vec![3.0, 3.0]);
        let x_min = DVector::from_vec(vec![0.5, -1.0]);
        let x_max = DVector::from_vec(vec![0.5, 1.0]);

        let x = solver.least_squares_bounded(
            &y,
            &DMatrix::identity(2, 2),
            &DMatrix::identity(2, 2),
            &x_min,
            &x_max,
            &DVector::zeros(2),
        );

        assert_eq!(x[0], 0.5);
        assert!(x[1] <= 1.0 && (x[1] - 1.0).abs() < 1e-3, "{}", x);

        // Coupled through A the pinned value still counts towards the fit
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let x = solver.least_squares_bounded(
            &DVector::from_vec(vec![1.0]),
            &a,
            &DMatrix::identity(1, 1),
            &x_min,
            &x_max,
            &DVector::zeros(2),
        );

        assert_eq!(x[0], 0.5);
        assert!((x[1] - 0.5).abs() < 1e-3, "{}", x);

        // Everything pinned
        let x = solver.least_squares_bounded(
            &y,
            &DMatrix::identity(2, 2),
            &DMatrix::identity(2, 2),
            &DVector::from_vec(vec![0.5, -1.0]),
            &DVector::from_vec(vec![0.5, -1.0]),
            &DVector::zeros(2),
        );
        assert_eq!(x.as_slice(), &[0.5, -1.0]);
    }

    #[test]
    fn test_least_squares_bounded_mismatch() {
        let solver = QpSolver::default();
        let x0 = DVector::from_vec(vec![0.5, 0.5]);

        let x = solver.least_squares_bounded(
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            &DMatrix::identity(2, 2),
            &DVector::zeros(3),
            &DVector::zeros(2),
            &x0,
        );

        assert_eq!(x, x0);
    }

    #[test]
    fn test_least_distance() {
        // Closest point to the origin on the line x0 + x1 = 2
        let solver = QpSolver::default();
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let y = DVector::from_vec(vec![2.0]);

        let x = solver.least_distance(
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            &y,
            &a,
            &DVector::zeros(2),
        );

        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_least_distance_weighted() {
        // Weighting the first entry more heavily moves the solution along the
        // constraint towards xd in that entry
        let solver = QpSolver::default();
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let y = DVector::from_vec(vec![2.0]);
        let w = DMatrix::from_diagonal(&DVector::from_vec(vec![3.0, 1.0]));

        let x = solver.least_distance(&DVector::zeros(2), &w, &y, &a, &DVector::zeros(2));

        assert!((x[0] + x[1] - 2.0).abs() < 1e-10);
        assert!((x[0] - 0.5).abs() < 1e-10);
        assert!((x[1] - 1.5).abs() < 1e-10);
    }

    #[test]
    fn test_least_distance_mismatch() {
        let solver = QpSolver::default();
        let x0 = DVector::from_vec(vec![0.25, -0.25]);
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);

        // Weight sized for the constraint rather than the unknowns
        let x = solver.least_distance(
            &DVector::zeros(2),
            &DMatrix::identity(1, 1),
            &DVector::from_vec(vec![2.0]),
            &a,
            &x0,
        );
        assert_eq!(x, x0);

        // Wrong y
        let x = solver.least_distance(
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            &DVector::zeros(2),
            &a,
            &x0,
        );
        assert_eq!(x, x0);
    }

    #[test]
    fn test_least_distance_bounded() {
        // As above but with x0 <= 0.8, which is active at the optimum
        let solver = precise_solver();
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let y = DVector::from_vec(vec![2.0]);
        let x_min = DVector::from_element(2, -5.0);
        let x_max = DVector::from_vec(vec![0.8, 5.0]);

        let x = solver.least_distance_bounded(
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            &y,
            &a,
            &x_min,
            &x_max,
            &DVector::zeros(2),
        );

        assert_eq!(x.len(), 2);
        assert!(x[0] <= 0.8 && x[0] >= -5.0);
        assert!(x[1] <= 5.0 && x[1] >= -5.0);
        assert!((x[0] + x[1] - 2.0).abs() < 1e-2);
        assert!((x[0] - 0.8).abs() < 1e-2);
    }

    #[test]
    fn test_least_distance_bounded_pinned() {
        // Closest point to the origin on x0 + x1 + x2 = 2 with x0 pinned at
        // 0.5, leaving 1.5 to share between the other two
        let solver = precise_solver();
        let a = DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 1.0]);
        let y = DVector::from_vec(vec![2.0]);
        let x_min = DVector::from_vec(vec![0.5, -5.0, -5.0]);
        let x_max = DVector::from_vec(vec![0.5, 5.0, 5.0]);

        let x = solver.least_distance_bounded(
            &DVector::zeros(3),
            &DMatrix::identity(3, 3),
            &y,
            &a,
            &x_min,
            &x_max,
            &DVector::zeros(3),
        );

        assert_eq!(x[0], 0.5);
        assert!((x[1] - 0.75).abs() < 1e-2, "{}", x);
        assert!((x[2] - 0.75).abs() < 1e-2, "{}", x);
    }

    #[test]
    fn test_least_distance_bounded_mismatch() {
        let solver = QpSolver::default();
        let x0 = DVector::from_vec(vec![0.25, -0.25]);

        let x = solver.least_distance_bounded(
            &DVector::zeros(2),
            &DMatrix::identity(2, 2),
            &DVector::from_vec(vec![2.0]),
            &DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
            &DVector::from_element(2, -1.0),
            &DVector::from_element(1, 1.0),
            &x0,
        );

        assert_eq!(x, x0);
    }
}

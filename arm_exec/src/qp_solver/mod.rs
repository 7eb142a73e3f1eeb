//! # Quadratic programming solver
//!
//! Dense solver for quadratic programs and weighted least-squares problems.
//! It has no knowledge of the arm. Three problem shapes are supported:
//!
//! - unconstrained QP, `min 0.5*x'*H*x - x'*f`, solved directly;
//! - inequality constrained QP, `B*x >= c`, solved by a primal log-barrier
//!   interior point method with a fixed iteration budget;
//! - equality constrained least distance, solved through the saddle point
//!   (KKT) system, optionally with box constraints.
//!
//! The least-squares entry points in `least_squares.rs` only assemble
//! matrices and delegate to the two core routines in `interior_point.rs`.
//!
//! None of the functions here return an error. If the inputs are malformed
//! a diagnostic is logged and the caller's initial guess `x0` is returned
//! untouched, so a control loop can always carry on with a usable value.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod interior_point;
mod least_squares;
mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::error;
use nalgebra::{DMatrix, DVector};

// Internal
pub use least_squares::saddle_point_matrix;
pub use params::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Pivots smaller than this are considered singular.
pub const PIVOT_TOL: f64 = 1e-10;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Problems the solver can detect in its inputs.
///
/// These are only ever logged, the solver itself falls back to the initial
/// guess.
#[derive(Debug, thiserror::Error)]
pub enum QpSolverError {
    #[error("{0}(): dimensions of input arguments do not match. {1}")]
    DimensionMismatch(&'static str, String),

    #[error("{0}(): weighting matrix W was {1}x{2}, but expected {3}x{3}")]
    WeightMismatch(&'static str, usize, usize, usize),

    #[error("{0}(): the system matrix is singular, returning the initial guess")]
    Singular(&'static str),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Quadratic programming solver.
///
/// The solver is stateless between calls apart from its tuning parameters.
#[derive(Debug, Clone, Default)]
pub struct QpSolver {
    params: Params,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl QpSolver {
    /// Create a new solver with the given tuning.
    pub fn new(params: Params) -> Self {
        Self { params }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Log the problem and hand back the initial guess.
fn fallback(x0: &DVector<f64>, err: QpSolverError) -> DVector<f64> {
    error!("[QpSolver] {}", err);
    x0.clone()
}

/// Describe the shape of a matrix, e.g. `3x4`.
fn shape(m: &DMatrix<f64>) -> String {
    format!("{}x{}", m.nrows(), m.ncols())
}

/// Build `B = [-I; I]` and `c = [-x_max; x_min]` for `x_min <= x <= x_max`,
/// where `x` sits in columns `offset..offset + n` of a vector with `cols`
/// entries.
fn box_constraints(
    x_min: &DVector<f64>,
    x_max: &DVector<f64>,
    offset: usize,
    cols: usize,
) -> (DMatrix<f64>, DVector<f64>) {
    let n = x_min.len();

    let b = DMatrix::from_fn(2 * n, cols, |r, c| {
        if c < offset {
            0.0
        } else if r < n && c - offset == r {
            -1.0
        } else if r >= n && c - offset == r - n {
            1.0
        } else {
            0.0
        }
    });

    let c = DVector::from_fn(2 * n, |r, _| if r < n { -x_max[r] } else { x_min[r - n] });

    (b, c)
}

/// Move a warm start strictly inside the box `[x_min, x_max]`.
///
/// Each entry is kept at least `margin` of the box width away from either
/// face. Degenerate boxes give the midpoint.
fn interior_start(
    x0: &DVector<f64>,
    x_min: &DVector<f64>,
    x_max: &DVector<f64>,
    margin: f64,
) -> DVector<f64> {
    DVector::from_fn(x0.len(), |i, _| {
        let width = x_max[i] - x_min[i];

        if width <= 0.0 || !width.is_finite() {
            // Open boxes are unchanged, degenerate ones go to the middle
            if width.is_infinite() {
                x0[i]
            } else {
                0.5 * (x_min[i] + x_max[i])
            }
        } else {
            util::maths::clamp(
                &x0[i],
                &(x_min[i] + margin * width),
                &(x_max[i] - margin * width),
            )
        }
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_box_constraints() {
        let x_min = DVector::from_vec(vec![-1.0, -2.0]);
        let x_max = DVector::from_vec(vec![1.0, 2.0]);

        let (b, c) = box_constraints(&x_min, &x_max, 1, 3);

        assert_eq!(b.shape(), (4, 3));
        assert_eq!(b.column(0).iter().filter(|v| **v != 0.0).count(), 0);
        assert_eq!(b[(0, 1)], -1.0);
        assert_eq!(b[(1, 2)], -1.0);
        assert_eq!(b[(2, 1)], 1.0);
        assert_eq!(b[(3, 2)], 1.0);
        assert_eq!(c.as_slice(), &[-1.0, -2.0, -1.0, -2.0]);

        // A point in the middle of the box satisfies every row
        let z = DVector::from_vec(vec![5.0, 0.0, 0.0]);
        assert!((&b * &z - &c).iter().all(|d| *d > 0.0));
    }

    #[test]
    fn test_interior_start() {
        let x_min = DVector::from_vec(vec![0.0, 0.0, 1.0]);
        let x_max = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let x0 = DVector::from_vec(vec![-3.0, 0.5, 7.0]);

        let x = interior_start(&x0, &x_min, &x_max, 0.01);

        assert!((x[0] - 0.01).abs() < 1e-12);
        assert_eq!(x[1], 0.5);
        assert_eq!(x[2], 1.0);
    }
}

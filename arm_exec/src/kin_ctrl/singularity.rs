//! Manipulability and singularity avoidance

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::error;
use nalgebra::{DMatrix, DVector};

// Internal
use super::{KinCtrlError, KinematicChain};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Singular values below this are dropped from the Jacobian pseudo-inverse.
const PINV_EPS: f64 = 1e-10;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Yoshikawa's manipulability measure, `sqrt(det(J*J'))`.
///
/// This is zero at a singular configuration.
pub fn manipulability(jacobian: &DMatrix<f64>) -> f64 {
    (jacobian * jacobian.transpose()).determinant().max(0.0).sqrt()
}

/// Gradient of the manipulability with respect to the joint positions, scaled
/// by `scalar`.
///
/// Moving the joints along this vector moves the arm away from singular
/// configurations. Each entry uses the identity
///
/// ```text
///     d(mu)/dq_i = mu * trace(dJ/dq_i * pinv(J))
/// ```
///
/// The first joint rotates the whole arm and can't change its manipulability,
/// so its entry is always zero.
///
/// A non-positive `scalar` is rejected and a zero vector is returned.
pub fn singularity_avoidance<C>(chain: &C, scalar: f64) -> DVector<f64>
where
    C: KinematicChain + ?Sized,
{
    let n = chain.joint_count();

    if !(scalar > 0.0) {
        error!(
            "[KinCtrl] {}",
            KinCtrlError::NonPositiveScalar("singularity_avoidance", scalar)
        );
        return DVector::zeros(n);
    }

    let jacobian = chain.jacobian();
    let mu = manipulability(&jacobian);

    let jacobian_inv = match jacobian.pseudo_inverse(PINV_EPS) {
        Ok(j) => j,
        Err(e) => {
            error!(
                "[KinCtrl] {}",
                KinCtrlError::Numerical("singularity_avoidance", e.to_string())
            );
            return DVector::zeros(n);
        }
    };

    let mut grad = DVector::zeros(n);
    for i in 1..n {
        let dj = chain.jacobian_partial_derivative(i);
        grad[i] = scalar * mu * (dj * &jacobian_inv).trace();
    }

    grad
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

//! Pose error for Cartesian feedback

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Isometry3, Vector6};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Compute the error between two poses as a 6-vector.
///
/// The first three entries are the translation from `actual` to `desired`.
/// The last three are the quaternion orientation error of Yuan (1988),
/// "Closed-loop manipulator control using quaternion feedback":
///
/// ```text
///     qe = qd * conj(qa)
/// ```
///
/// The vector part of `qe` is used directly if `qd . qa > 0`, and negated
/// otherwise, so the error always points along the shorter rotation.
pub fn pose_error(desired: &Isometry3<f64>, actual: &Isometry3<f64>) -> Vector6<f64> {
    let trans = desired.translation.vector - actual.translation.vector;

    let qd = desired.rotation.quaternion();
    let qa = actual.rotation.quaternion();
    let qe = qd * qa.conjugate();

    let rot = if qd.coords.dot(&qa.coords) > 0.0 {
        qe.imag()
    } else {
        -qe.imag()
    };

    Vector6::new(trans[0], trans[1], trans[2], rot[0], rot[1], rot[2])
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Limit a value to the range `[min, max]`.
///
/// Unlike `f64::clamp` this never panics: if the range is inverted the upper
/// limit is applied first and the lower limit wins.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float,
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Return `true` if the value is within `tol` of zero.
pub fn near_zero<T>(value: T, tol: T) -> bool
where
    T: Float,
{
    value.abs() < tol
}

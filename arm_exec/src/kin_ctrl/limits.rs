//! Joint limit handling
//!
//! Speed limits bound what the arm may do this cycle, the joint penalty only
//! biases how redundancy is resolved.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::error;
use nalgebra::DVector;

// Internal
use super::{KinCtrlError, KinematicChain};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Fraction of a joint's range inside each position limit at which the joint
/// penalty is evaluated once the joint reaches the limit. This caps the
/// penalty at about 250.
const PENALTY_MARGIN: f64 = 1e-3;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the `(lower, upper)` speed limits of joint `i` for the current cycle.
///
/// Each bound is the most restrictive of:
///
/// - the speed which would reach the position limit in one control period,
/// - the joint's velocity limit,
/// - the speed from which the joint can still brake to rest at the position
///   limit under its acceleration limit, `2*sqrt(a_max*distance)`.
///
/// See Flacco, De Luca & Khatib (2012), "Motion control of redundant robots
/// under joint constraints: Saturation in the null space".
///
/// An unknown joint gives `(0, 0)`.
pub fn speed_limit<C>(chain: &C, i: usize) -> (f64, f64)
where
    C: KinematicChain + ?Sized,
{
    let n = chain.joint_count();
    if i >= n {
        error!("[KinCtrl] {}", KinCtrlError::NoSuchJoint("speed_limit", i, n));
        return (0.0, 0.0);
    }

    let q = chain.joint_position(i);
    let (q_min, q_max) = chain.position_limits(i);
    let v_max = chain.velocity_limit(i);
    let a_max = chain.acceleration_limit(i);
    let dt = chain.control_period();

    // Outside the limits the braking distance is zero rather than imaginary
    let lower = ((q_min - q) / dt)
        .max(-v_max)
        .max(-2.0 * (a_max * (q - q_min)).max(0.0).sqrt());

    let upper = ((q_max - q) / dt)
        .min(v_max)
        .min(2.0 * (a_max * (q_max - q)).max(0.0).sqrt());

    (lower, upper)
}

/// Get the speed limits of every joint as `(lower, upper)` vectors.
pub fn speed_limits<C>(chain: &C) -> (DVector<f64>, DVector<f64>)
where
    C: KinematicChain + ?Sized,
{
    let n = chain.joint_count();
    let mut lower = DVector::zeros(n);
    let mut upper = DVector::zeros(n);

    for i in 0..n {
        let (l, u) = speed_limit(chain, i);
        lower[i] = l;
        upper[i] = u;
    }

    (lower, upper)
}

/// Limit a demanded rate of joint `i` to its speed limits for this cycle.
pub(crate) fn clamp_joint_rate<C>(chain: &C, i: usize, rate: f64) -> f64
where
    C: KinematicChain + ?Sized,
{
    let (lower, upper) = speed_limit(chain, i);
    util::maths::clamp(&rate, &lower, &upper)
}

/// Get the joint limit avoidance penalty of joint `i`.
///
/// Uses the penalty function of Chan & Dubey (1995), "A weighted least-norm
/// solution based scheme for avoiding joint limits for redundant joint
/// manipulators":
///
/// ```text
///     p = range^2 / (4*(q_max - q)*(q - q_min))
/// ```
///
/// which is 1 in the middle of the range and grows towards either limit. The
/// penalty is only applied while the joint is moving towards a limit, i.e.
/// when `dp/dq * qdot > 0`. Otherwise exactly 1 is returned.
///
/// A joint on or past one of its limits is treated as sitting
/// `PENALTY_MARGIN` of its range inside it, so the penalty is always finite
/// and at least 1.
pub fn joint_penalty<C>(chain: &C, i: usize) -> f64
where
    C: KinematicChain + ?Sized,
{
    let n = chain.joint_count();
    if i >= n {
        error!("[KinCtrl] {}", KinCtrlError::NoSuchJoint("joint_penalty", i, n));
        return 1.0;
    }

    let (q_min, q_max) = chain.position_limits(i);
    let range = q_max - q_min;

    if !(range > 0.0) {
        return 1.0;
    }

    let margin = PENALTY_MARGIN * range;
    let q = util::maths::clamp(&chain.joint_position(i), &(q_min + margin), &(q_max - margin));

    let lower = q - q_min;
    let upper = q_max - q;

    let dp_dq = range * range * (2.0 * q - q_max - q_min) / (4.0 * upper * upper * lower * lower);

    if dp_dq * chain.joint_velocity(i) > 0.0 {
        range * range / (4.0 * upper * lower)
    } else {
        1.0
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

//! # Arm library.
//!
//! This library allows other crates in the workspace, and the benchmarks, to access items defined
//! inside the arm crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Kinematic control module - converts endpoint and joint commands into joint velocity demands
pub mod kin_ctrl;

/// Quadratic programming solver - the optimiser behind kinematic control
pub mod qp_solver;

/// Replay - reads recorded control cycles for offline runs
pub mod replay;

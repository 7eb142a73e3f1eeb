//! # Replay module
//!
//! Reads recorded control cycles from a replay script so that KinCtrl can be
//! run offline against logged arm data.
//!
//! A script is a list of entries of the form
//!
//! ```text
//! <time_s>: <json>;
//! ```
//!
//! where `<json>` is a [`ReplayCycle`]. Entries must be in time order.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Internal
use crate::kin_ctrl::{ArmCmd, ChainSnapshot, InputData};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Matches one `<time_s>: <json>;` entry.
const ENTRY_PATTERN: &str = r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// One recorded control cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayCycle {
    /// The command received on this cycle, if any.
    #[serde(default)]
    pub cmd: Option<ArmCmd>,

    /// The state of the arm on this cycle.
    pub chain: ChainSnapshot,
}

/// A replay script loaded into memory.
///
/// Cycles are consumed in order with [`Replay::next_cycle`].
pub struct Replay {
    cycles: VecDeque<(f64, ReplayCycle)>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Could not find the replay script at {0}")]
    NotFound(String),

    #[error("Could not load the replay script: {0}")]
    LoadError(std::io::Error),

    #[error("The replay script is empty (or is so bad it can't be read)")]
    Empty,

    #[error(
        "Replay script contains an invalid timestamp: {0}. \
         Should be a float (like 1.0) no earlier than the one before it"
    )]
    InvalidTimestamp(String),

    #[error("Replay script contains an invalid cycle at {0} s: {1}")]
    InvalidCycle(f64, serde_json::Error),

    #[error("Could not build the replay entry pattern: {0}")]
    Regex(regex::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Replay {
    /// Load a replay script from the given path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ReplayError> {
        let path = script_path.as_ref();

        if !path.exists() {
            return Err(ReplayError::NotFound(path.display().to_string()));
        }

        let script = fs::read_to_string(path).map_err(ReplayError::LoadError)?;

        Self::parse(&script)
    }

    /// Parse a replay script held in a string.
    pub fn parse(script: &str) -> Result<Self, ReplayError> {
        let re = RegexBuilder::new(ENTRY_PATTERN)
            .multi_line(true)
            .build()
            .map_err(ReplayError::Regex)?;

        let mut cycles: VecDeque<(f64, ReplayCycle)> = VecDeque::new();

        for cap in re.captures_iter(script) {
            let (time, payload) = match (cap.get(1), cap.get(3)) {
                (Some(t), Some(p)) => (t.as_str(), p.as_str()),
                _ => continue,
            };

            let time_s: f64 = time
                .parse()
                .map_err(|e| ReplayError::InvalidTimestamp(format!("{} ({})", time, e)))?;

            if let Some((prev_s, _)) = cycles.back() {
                if time_s < *prev_s {
                    return Err(ReplayError::InvalidTimestamp(format!(
                        "{} comes after {}",
                        time, prev_s
                    )));
                }
            }

            let cycle: ReplayCycle = serde_json::from_str(payload)
                .map_err(|e| ReplayError::InvalidCycle(time_s, e))?;

            cycles.push_back((time_s, cycle));
        }

        if cycles.is_empty() {
            return Err(ReplayError::Empty);
        }

        Ok(Replay { cycles })
    }

    /// Take the next cycle and the time it was recorded at, or `None` at the
    /// end of the script.
    pub fn next_cycle(&mut self) -> Option<(f64, ReplayCycle)> {
        self.cycles.pop_front()
    }

    /// Get the number of cycles left in the script
    pub fn num_cycles(&self) -> usize {
        self.cycles.len()
    }

    /// Get the length of the script in seconds
    pub fn duration(&self) -> f64 {
        match self.cycles.back() {
            Some((t, _)) => *t,
            None => 0f64,
        }
    }
}

impl From<ReplayCycle> for InputData {
    fn from(cycle: ReplayCycle) -> Self {
        InputData {
            cmd: cycle.cmd,
            chain: cycle.chain,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

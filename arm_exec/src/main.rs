//! Offline arm executable entry point.
//!
//! # Usage
//!
//! ```text
//! arm_exec <replay_script>
//! ```
//!
//! # Architecture
//!
//! The executable replays recorded control cycles through KinCtrl:
//!
//!     - Initialise the session, logging and KinCtrl
//!     - Main loop, once per recorded cycle:
//!         - Wait for the cycle's recorded time
//!         - KinCtrl processing
//!         - Record the output and status report
//!     - Write all records to `replay_output.json` in the session directory

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::env;
use std::fs::File;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use arm_lib::{
    kin_ctrl::{InputData, KinCtrl, OutputData, StatusReport},
    replay::Replay,
};
use util::{
    logger::{logger_init, LevelFilter},
    module::State,
    session::{get_elapsed_seconds, Session},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Result of replaying one cycle.
#[derive(Serialize)]
struct CycleRecord {
    /// Recorded time of the cycle
    time_s: f64,

    /// Time KinCtrl took to process the cycle
    compute_time_s: f64,

    output: Option<OutputData>,

    report: Option<StatusReport>,

    error: Option<String>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("arm_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Arm Replay Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD REPLAY ----

    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    let script_path = replay_script_path(&args)?;

    info!("Loading replay from \"{}\"", script_path);

    let mut replay = Replay::new(script_path).wrap_err("Failed to load the replay script")?;

    info!(
        "Loaded replay lasts {:.02} s and contains {} cycles\n",
        replay.duration(),
        replay.num_cycles()
    );

    // ---- INITIALISE MODULES ----

    let mut kin_ctrl = KinCtrl::default();
    kin_ctrl
        .init("kin_ctrl.toml", &session)
        .wrap_err("Failed to initialise KinCtrl")?;
    info!("KinCtrl init complete\n");

    // ---- MAIN LOOP ----

    let mut records: Vec<CycleRecord> = Vec::with_capacity(replay.num_cycles());
    let start_s = get_elapsed_seconds();

    while let Some((time_s, cycle)) = replay.next_cycle() {
        // Pace the replay at the recorded times
        let wait_s = time_s - (get_elapsed_seconds() - start_s);
        if wait_s > 0.0 {
            thread::sleep(Duration::from_secs_f64(wait_s));
        }

        let period_s = cycle.chain.control_period_s;
        let input: InputData = cycle.into();

        let cycle_start = Instant::now();
        let result = kin_ctrl.proc(&input);
        let compute_time_s = cycle_start.elapsed().as_secs_f64();

        if compute_time_s > period_s {
            warn!(
                "Cycle at {:.03} s took {:.06} s, longer than its {:.06} s control period",
                time_s, compute_time_s, period_s
            );
        }

        let record = match result {
            Ok((output, report)) => CycleRecord {
                time_s,
                compute_time_s,
                output: Some(output),
                report: Some(report),
                error: None,
            },
            Err(e) => {
                error!("KinCtrl processing failed at {:.03} s: {}", time_s, e);
                kin_ctrl.make_safe();
                CycleRecord {
                    time_s,
                    compute_time_s,
                    output: None,
                    report: None,
                    error: Some(format!("{}", e)),
                }
            }
        };

        records.push(record);
    }

    info!("End of replay, {} cycles processed", records.len());

    // ---- SAVE OUTPUT ----

    let output_path = session.file_path("replay_output.json");
    let file = File::create(&output_path).wrap_err("Failed to create the replay output file")?;
    serde_json::to_writer_pretty(file, &records).wrap_err("Failed to write the replay output")?;

    info!("Replay output written to {:?}", output_path);

    Ok(())
}

/// Get the replay script path from the CLI arguments, which must hold exactly
/// one argument after the program name.
fn replay_script_path(args: &[String]) -> Result<&str, Report> {
    match args {
        [_, path] => Ok(path.as_str()),
        _ => Err(eyre!(
            "Expected a single argument, the path to the replay script, found {}",
            args.len().saturating_sub(1)
        )),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

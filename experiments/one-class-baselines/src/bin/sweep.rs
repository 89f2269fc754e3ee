//! Runs the training binary once per (target class, repeat) pair.

use std::process::ExitCode;

use anyhow::{Context, Result};
use ocml_core::driver::{plan, run_sweep, ProcessLauncher, SweepArgs, TARGET_CLASSES, USAGE};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let args = match SweepArgs::parse_from_env() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            return Ok(ExitCode::from(2));
        }
    };

    let mut launcher = ProcessLauncher::locate().context("failed to locate the training binary")?;
    let invocations = plan(&args, &TARGET_CLASSES);
    info!(
        runs = invocations.len(),
        repeats = args.repeats,
        tag = %args.tag,
        "starting sweep"
    );

    let summary = run_sweep(&mut launcher, &invocations);
    if summary.all_succeeded() {
        return Ok(ExitCode::SUCCESS);
    }

    for (invocation, outcome) in summary.failures() {
        warn!(
            class = invocation.class,
            repeat = invocation.repeat,
            outcome = ?outcome,
            "run failed"
        );
    }
    Ok(ExitCode::FAILURE)
}

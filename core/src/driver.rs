//! Sequential sweep over target classes and repeats.
//!
//! Each run is a separate training process configured through environment
//! variables. Runs are best-effort: a failed run is logged and recorded, and
//! the sweep moves on to the next one.

use std::{
    env,
    ffi::OsString,
    path::PathBuf,
    process::{Command, ExitStatus},
};

use tracing::{error, info};

use crate::error::{OcmlError, Result};
use crate::experiment::{ENV_CLASS, ENV_DATASET, ENV_REPEAT, ENV_RUN_GROUP};

/// MNIST digits the sweep trains a one-class model for.
pub const TARGET_CLASSES: [usize; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
pub const SWEEP_DATASET: &str = "mnist";
pub const ENV_TRAIN_BIN: &str = "OCML_TRAIN_BIN";
pub const TRAIN_BIN_NAME: &str = "one-class-baselines";

pub const USAGE: &str = "Usage: sweep <repeats> <tag>";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepArgs {
    pub repeats: u32,
    pub tag: String,
}

impl SweepArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    /// Exactly two positional arguments: a positive repeat count and a tag.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        let [repeats, tag] = args.as_slice() else {
            return Err(OcmlError::InvalidConfig(format!(
                "expected 2 arguments, got {}. {USAGE}",
                args.len()
            )));
        };

        let repeats = repeats
            .parse::<u32>()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                OcmlError::InvalidConfig(format!("repeats must be a positive integer, got {repeats}"))
            })?;
        if tag.trim().is_empty() {
            return Err(OcmlError::InvalidConfig("tag must not be empty".to_string()));
        }

        Ok(Self {
            repeats,
            tag: tag.clone(),
        })
    }
}

/// One planned training run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    pub class: usize,
    pub repeat: u32,
    pub run_group: String,
}

impl Invocation {
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_DATASET, SWEEP_DATASET.to_string()),
            (ENV_CLASS, self.class.to_string()),
            (ENV_REPEAT, self.repeat.to_string()),
            (ENV_RUN_GROUP, self.run_group.clone()),
        ]
    }
}

pub fn run_group(tag: &str, class: usize) -> String {
    format!("{tag}-class{class}")
}

/// Class-major order: every repeat of a class before the next class.
pub fn plan(args: &SweepArgs, classes: &[usize]) -> Vec<Invocation> {
    classes
        .iter()
        .flat_map(|&class| {
            (0..args.repeats).map(move |repeat| Invocation {
                class,
                repeat,
                run_group: run_group(&args.tag, class),
            })
        })
        .collect()
}

/// Runs one invocation to completion.
pub trait Launcher {
    fn launch(&mut self, invocation: &Invocation) -> Result<ExitStatus>;
}

/// Spawns the training binary as a child process.
#[derive(Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments passed to every run, ahead of the environment.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// `OCML_TRAIN_BIN` if set, otherwise the training binary next to this executable.
    pub fn locate() -> Result<Self> {
        if let Some(program) = env::var_os(ENV_TRAIN_BIN).filter(|p| !p.is_empty()) {
            return Ok(Self::new(program));
        }
        let current = env::current_exe()
            .map_err(|err| OcmlError::io("failed to locate current executable", "", err))?;
        let program = current.with_file_name(format!("{TRAIN_BIN_NAME}{}", env::consts::EXE_SUFFIX));
        Ok(Self::new(program))
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, invocation: &Invocation) -> Result<ExitStatus> {
        Command::new(&self.program)
            .args(&self.args)
            .envs(invocation.env())
            .status()
            .map_err(|err| OcmlError::io("failed to spawn training run", &self.program, err))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
}

#[derive(Clone, Debug, Default)]
pub struct SweepSummary {
    pub results: Vec<(Invocation, Outcome)>,
}

impl SweepSummary {
    pub fn failures(&self) -> impl Iterator<Item = &(Invocation, Outcome)> {
        self.results
            .iter()
            .filter(|(_, outcome)| matches!(outcome, Outcome::Failed(_)))
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count() == 0
    }
}

/// Launch every invocation in order, continuing past failures.
pub fn run_sweep<L: Launcher + ?Sized>(launcher: &mut L, invocations: &[Invocation]) -> SweepSummary {
    let total = invocations.len();
    let mut summary = SweepSummary::default();

    for (index, invocation) in invocations.iter().enumerate() {
        info!(
            run = index + 1,
            total,
            class = invocation.class,
            repeat = invocation.repeat,
            group = %invocation.run_group,
            "starting training run"
        );
        let outcome = match launcher.launch(invocation) {
            Ok(status) if status.success() => Outcome::Succeeded,
            Ok(status) => Outcome::Failed(format!("exited with {status}")),
            Err(err) => Outcome::Failed(err.to_string()),
        };
        if let Outcome::Failed(reason) = &outcome {
            error!(
                class = invocation.class,
                repeat = invocation.repeat,
                reason = %reason,
                "training run failed; continuing"
            );
        }
        summary.results.push((invocation.clone(), outcome));
    }

    info!(
        total,
        failed = summary.failure_count(),
        "sweep finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Records invocations and fails the ones listed in `fail`.
    #[derive(Default)]
    struct Recording {
        seen: Vec<Vec<(&'static str, String)>>,
        fail: Vec<(usize, u32)>,
    }

    impl Launcher for Recording {
        fn launch(&mut self, invocation: &Invocation) -> Result<ExitStatus> {
            self.seen.push(invocation.env());
            if self.fail.contains(&(invocation.class, invocation.repeat)) {
                return Err(OcmlError::InvalidConfig("simulated crash".to_string()));
            }
            Ok(success())
        }
    }

    #[cfg(unix)]
    fn success() -> ExitStatus {
        std::os::unix::process::ExitStatusExt::from_raw(0)
    }

    #[cfg(windows)]
    fn success() -> ExitStatus {
        std::os::windows::process::ExitStatusExt::from_raw(0)
    }

    fn env_value<'a>(env: &'a [(&'static str, String)], key: &str) -> &'a str {
        env.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn two_repeats_over_eight_classes_is_sixteen_runs() {
        let sweep = SweepArgs::parse(args(&["2", "baseline"])).unwrap();
        let invocations = plan(&sweep, &TARGET_CLASSES);
        let mut launcher = Recording::default();

        let summary = run_sweep(&mut launcher, &invocations);

        assert_eq!(launcher.seen.len(), 16);
        assert!(summary.all_succeeded());
        let pairs: HashSet<(String, String)> = launcher
            .seen
            .iter()
            .map(|env| {
                assert_eq!(env_value(env, ENV_DATASET), "mnist");
                (
                    env_value(env, ENV_CLASS).to_string(),
                    env_value(env, ENV_REPEAT).to_string(),
                )
            })
            .collect();
        assert_eq!(pairs.len(), 16);
    }

    #[test]
    fn runs_are_class_major_with_derived_groups() {
        let sweep = SweepArgs::parse(args(&["2", "tag"])).unwrap();
        let invocations = plan(&sweep, &[4, 9]);
        let order: Vec<(usize, u32, &str)> = invocations
            .iter()
            .map(|inv| (inv.class, inv.repeat, inv.run_group.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (4, 0, "tag-class4"),
                (4, 1, "tag-class4"),
                (9, 0, "tag-class9"),
                (9, 1, "tag-class9"),
            ]
        );
    }

    #[test]
    fn failures_do_not_stop_the_sweep() {
        let sweep = SweepArgs::parse(args(&["1", "t"])).unwrap();
        let invocations = plan(&sweep, &TARGET_CLASSES);
        let mut launcher = Recording {
            fail: vec![(2, 0), (5, 0)],
            ..Recording::default()
        };

        let summary = run_sweep(&mut launcher, &invocations);

        assert_eq!(launcher.seen.len(), 8);
        assert_eq!(summary.failure_count(), 2);
        assert!(!summary.all_succeeded());
        let failed: Vec<usize> = summary.failures().map(|(inv, _)| inv.class).collect();
        assert_eq!(failed, vec![2, 5]);
    }

    #[cfg(unix)]
    #[test]
    fn child_processes_see_the_run_environment() {
        let sweep = SweepArgs::parse(args(&["2", "env"])).unwrap();
        let invocations = plan(&sweep, &[3]);
        let script = r#"[ "$OCML_DATASET" = mnist ] && [ "$OCML_CLASS" = 3 ] && [ "$OCML_RUN_GROUP" = env-class3 ] && [ "$OCML_REPEAT" = 1 ]"#;
        let mut launcher = ProcessLauncher::new("sh").with_args(["-c", script]);

        let summary = run_sweep(&mut launcher, &invocations);

        let outcomes: Vec<(u32, &Outcome)> = summary
            .results
            .iter()
            .map(|(inv, outcome)| (inv.repeat, outcome))
            .collect();
        assert!(matches!(outcomes[0], (0, Outcome::Failed(_))));
        assert_eq!(outcomes[1], (1, &Outcome::Succeeded));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exits_and_missing_binaries_are_failures() {
        let sweep = SweepArgs::parse(args(&["1", "t"])).unwrap();
        let invocations = plan(&sweep, &[0]);

        let mut exits = ProcessLauncher::new("sh").with_args(["-c", "exit 3"]);
        let summary = run_sweep(&mut exits, &invocations);
        assert_eq!(summary.failure_count(), 1);
        assert!(matches!(&summary.results[0].1, Outcome::Failed(reason) if reason.contains('3')));

        let mut missing = ProcessLauncher::new("/nonexistent/one-class-baselines");
        let summary = run_sweep(&mut missing, &invocations);
        assert!(matches!(&summary.results[0].1, Outcome::Failed(reason) if reason.contains("spawn")));
    }

    #[test]
    fn argument_errors() {
        assert!(SweepArgs::parse(args(&[])).is_err());
        assert!(SweepArgs::parse(args(&["2"])).is_err());
        assert!(SweepArgs::parse(args(&["2", "tag", "extra"])).is_err());
        assert!(SweepArgs::parse(args(&["0", "tag"])).is_err());
        assert!(SweepArgs::parse(args(&["-1", "tag"])).is_err());
        assert!(SweepArgs::parse(args(&["two", "tag"])).is_err());
        assert!(SweepArgs::parse(args(&["3", " "])).is_err());
        assert_eq!(
            SweepArgs::parse(args(&["3", "nightly"])).unwrap(),
            SweepArgs {
                repeats: 3,
                tag: "nightly".to_string()
            }
        );
    }
}

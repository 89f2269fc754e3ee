//! Push-only run tracking.
//!
//! Records are grouped by run group for later aggregation; nothing in this
//! workspace reads them back during a run.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{OcmlError, Result};
use crate::metrics::{ScoreSummary, SeparationMetrics};
use crate::models::ModelKind;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_group: String,
    pub dataset: String,
    pub class: Option<usize>,
    pub repeat: u32,
    pub model: ModelKind,
    pub seed: u64,
    pub train_scores: ScoreSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separation: Option<SeparationMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub figure: Option<String>,
}

pub trait Tracker {
    fn log(&mut self, record: &RunRecord) -> Result<()>;
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonlTracker {
    path: PathBuf,
}

impl JsonlTracker {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| OcmlError::io("failed to create tracking directory", parent, err))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Tracker for JsonlTracker {
    fn log(&mut self, record: &RunRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|err| OcmlError::io("failed to append run record", &self.path, err))?;
        info!(
            group = %record.run_group,
            model = %record.model,
            repeat = record.repeat,
            "tracked run"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    pub records: Vec<RunRecord>,
}

impl Tracker for MemoryTracker {
    fn log(&mut self, record: &RunRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(repeat: u32) -> RunRecord {
        RunRecord {
            run_group: "baseline-class3".to_string(),
            dataset: "mnist".to_string(),
            class: Some(3),
            repeat,
            model: ModelKind::IsolationForest,
            seed: 1337,
            train_scores: ScoreSummary {
                count: 4,
                min: -0.2,
                mean: 0.1,
                max: 0.3,
            },
            separation: Some(SeparationMetrics {
                roc_auc: 0.91,
                threshold: 0.0,
                accuracy: 88.0,
            }),
            figure: None,
        }
    }

    #[test]
    fn records_append_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = JsonlTracker::new(dir.path().join("logs/runs.jsonl")).unwrap();
        tracker.log(&record(0)).unwrap();
        tracker.log(&record(1)).unwrap();

        let text = fs::read_to_string(tracker.path()).unwrap();
        let parsed: Vec<RunRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(parsed, vec![record(0), record(1)]);
        assert!(text.contains("\"model\":\"isolation-forest\""));
        assert!(!text.contains("figure"));
    }
}

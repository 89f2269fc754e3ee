use std::{fs, path::Path};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use crate::datasets::MnistLimits;
use crate::error::{OcmlError, Result};
use crate::experiment::ExperimentMode;
use crate::grid::Domain;
use crate::models::ModelParams;

/// Load a JSON configuration from disk, creating it with the provided initializer if missing.
pub fn load_or_init<T, F>(path: &Path, initializer: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> T,
{
    if path.exists() {
        let contents = fs::read_to_string(path)
            .map_err(|err| OcmlError::io("failed to read config", path, err))?;
        return Ok(serde_json::from_str(&contents)?);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| OcmlError::io("failed to create config directory", parent, err))?;
    }
    let value = initializer();
    fs::write(path, serde_json::to_string_pretty(&value)?)
        .map_err(|err| OcmlError::io("failed to write config", path, err))?;
    info!(path = %path.display(), "wrote default experiment config");
    Ok(value)
}

/// Sizes that differ between a full run and a quick smoke run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub resolution: usize,
    pub toy_samples: usize,
    pub mnist_train: usize,
    pub mnist_test_inliers: usize,
    pub mnist_test_outliers: usize,
}

/// Hyperparameters persisted next to a run's outputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub seed: u64,
    pub domain: Domain,
    pub toy_noise: f64,
    pub n_estimators: usize,
    pub max_samples: Option<usize>,
    pub svm_tolerance: f64,
    pub svm_max_iter: usize,
    /// Draw a score histogram panel next to each model's level sets.
    #[serde(default = "default_histogram")]
    pub histogram: bool,
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
    pub full: Budget,
    pub test: Budget,
}

fn default_histogram() -> bool {
    true
}

fn default_histogram_bins() -> usize {
    30
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 1337,
            domain: Domain::new(-3.0, 3.0),
            toy_noise: 0.08,
            n_estimators: 100,
            max_samples: None,
            svm_tolerance: 1e-3,
            svm_max_iter: 100_000,
            histogram: default_histogram(),
            histogram_bins: default_histogram_bins(),
            full: Budget {
                resolution: 300,
                toy_samples: 500,
                mnist_train: 1_000,
                mnist_test_inliers: 500,
                mnist_test_outliers: 2_000,
            },
            test: Budget {
                resolution: 60,
                toy_samples: 120,
                mnist_train: 150,
                mnist_test_inliers: 60,
                mnist_test_outliers: 240,
            },
        }
    }
}

impl ExperimentConfig {
    pub fn budget(&self, mode: ExperimentMode) -> &Budget {
        mode.select(&self.full, &self.test)
    }

    pub fn model_params(&self, seed: u64) -> ModelParams {
        ModelParams {
            seed,
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
            svm_tolerance: self.svm_tolerance,
            svm_max_iter: self.svm_max_iter,
        }
    }

    pub fn mnist_limits(&self, mode: ExperimentMode) -> MnistLimits {
        let budget = self.budget(mode);
        MnistLimits {
            train: budget.mnist_train,
            test_inliers: budget.mnist_test_inliers,
            test_outliers: budget.mnist_test_outliers,
        }
    }

    pub fn validate(&self, mode: ExperimentMode) -> Result<()> {
        self.domain.validate(self.budget(mode).resolution)?;
        if self.toy_noise < 0.0 {
            return Err(OcmlError::InvalidConfig(format!(
                "toy_noise {} must not be negative",
                self.toy_noise
            )));
        }
        if self.histogram && self.histogram_bins == 0 {
            return Err(OcmlError::InvalidConfig(
                "histogram_bins must be positive when histograms are enabled".to_string(),
            ));
        }
        Ok(())
    }
}

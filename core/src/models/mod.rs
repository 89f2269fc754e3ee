//! One-class anomaly detectors and the factory that builds them.
//!
//! Every model scores points with the same sign convention: positive
//! decision values are inliers, negative values are outliers, and zero is
//! the boundary fixed by the outlier fraction.

mod iforest;
mod svm;

use std::{fmt, str::FromStr};

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{OcmlError, Result};

pub use iforest::IsolationForest;
pub use svm::{Gamma, Kernel, OneClassSvm};

/// Expected share of outliers every baseline is configured with.
pub const CONTAMINATION: f64 = 0.05;

/// Anything that can produce a decision score for a batch of points.
pub trait AnomalyScorer {
    /// One score per row of `x`, in row order.
    fn decision_function(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>>;
}

/// A fittable one-class detector.
pub trait AnomalyModel: AnomalyScorer {
    fn kind(&self) -> ModelKind;

    fn fit(&mut self, x: &ArrayView2<f64>) -> Result<()>;

    fn hyperparameters(&self) -> Hyperparameters;

    /// `+1` for inliers, `-1` for outliers.
    fn predict(&self, x: &ArrayView2<f64>) -> Result<Array1<i8>> {
        Ok(self
            .decision_function(x)?
            .mapv(|score| if score >= 0.0 { 1 } else { -1 }))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    IsolationForest,
    OneClassSvm,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::IsolationForest, ModelKind::OneClassSvm];

    pub fn label(&self) -> &'static str {
        match self {
            Self::IsolationForest => "isolation-forest",
            Self::OneClassSvm => "one-class-svm",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::IsolationForest => "Isolation Forest",
            Self::OneClassSvm => "One-Class SVM",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ModelKind {
    type Err = OcmlError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "isolation-forest" => Ok(Self::IsolationForest),
            "one-class-svm" => Ok(Self::OneClassSvm),
            other => Err(OcmlError::UnknownModelKind(other.to_string())),
        }
    }
}

/// Configured values of a model, for reporting and inspection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "model", rename_all = "kebab-case")]
pub enum Hyperparameters {
    IsolationForest {
        contamination: f64,
        n_estimators: usize,
        max_samples: Option<usize>,
        seed: u64,
    },
    OneClassSvm {
        nu: f64,
        kernel: Kernel,
        gamma: Gamma,
    },
}

/// Knobs that vary between runs; the outlier fraction is not one of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub seed: u64,
    pub n_estimators: usize,
    /// Sub-sample size per tree; `None` means `min(256, n_samples)`.
    pub max_samples: Option<usize>,
    pub svm_tolerance: f64,
    pub svm_max_iter: usize,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            seed: 0,
            n_estimators: 100,
            max_samples: None,
            svm_tolerance: 1e-3,
            svm_max_iter: 100_000,
        }
    }
}

pub fn build_model(kind: ModelKind, params: &ModelParams) -> Box<dyn AnomalyModel> {
    match kind {
        ModelKind::IsolationForest => Box::new(
            IsolationForest::new(CONTAMINATION)
                .with_n_estimators(params.n_estimators)
                .with_max_samples(params.max_samples)
                .with_seed(params.seed),
        ),
        ModelKind::OneClassSvm => Box::new(
            OneClassSvm::new(CONTAMINATION)
                .with_gamma(Gamma::Auto)
                .with_tolerance(params.svm_tolerance)
                .with_max_iter(params.svm_max_iter),
        ),
    }
}

/// Build a model from its identifier, e.g. `"isolation-forest"`.
pub fn model_from_identifier(identifier: &str, params: &ModelParams) -> Result<Box<dyn AnomalyModel>> {
    let kind = identifier.parse::<ModelKind>()?;
    Ok(build_model(kind, params))
}

pub(crate) fn check_features(expected: usize, x: &ArrayView2<f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(OcmlError::DimensionMismatch {
            expected,
            actual: x.ncols(),
        });
    }
    Ok(())
}

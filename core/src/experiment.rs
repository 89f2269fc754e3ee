//! Per-process run configuration, read from environment variables.
//!
//! The driver injects these variables before spawning each training run; a
//! hand-launched run falls back to the defaults below.

use std::{collections::HashMap, env, path::PathBuf};

use crate::datasets::DatasetName;
use crate::error::{OcmlError, Result};
use crate::models::ModelKind;

pub const ENV_DATASET: &str = "OCML_DATASET";
pub const ENV_CLASS: &str = "OCML_CLASS";
pub const ENV_REPEAT: &str = "OCML_REPEAT";
pub const ENV_RUN_GROUP: &str = "OCML_RUN_GROUP";
pub const ENV_RENDER: &str = "OCML_RENDER";
pub const ENV_MODEL: &str = "OCML_MODEL";
pub const ENV_MODE: &str = "OCML_MODE";
pub const ENV_WORKDIR: &str = "OCML_WORKDIR";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExperimentMode {
    Full,
    Test,
}

impl ExperimentMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "full" => Ok(Self::Full),
            "test" => Ok(Self::Test),
            other => Err(OcmlError::InvalidConfig(format!("invalid mode: {other}"))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Test => "test",
        }
    }

    pub fn select<T>(&self, full: T, test: T) -> T {
        match self {
            Self::Full => full,
            Self::Test => test,
        }
    }
}

/// Where a rendered figure goes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RenderBackend {
    /// PNG file under the run's image directory.
    Png,
    /// Inline data URL in the report notebook.
    Report,
    /// Compute the surfaces but skip drawing.
    None,
}

impl RenderBackend {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "png" => Ok(Self::Png),
            "report" => Ok(Self::Report),
            "none" => Ok(Self::None),
            other => Err(OcmlError::InvalidConfig(format!("invalid render backend: {other}"))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Report => "report",
            Self::None => "none",
        }
    }
}

/// Everything a single training invocation needs to know about itself.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    pub dataset: DatasetName,
    pub class: Option<usize>,
    pub repeat: u32,
    pub run_group: String,
    pub render: RenderBackend,
    /// Models to fit; every kind when not narrowed by `OCML_MODEL`.
    pub models: Vec<ModelKind>,
    pub mode: ExperimentMode,
    pub workdir: PathBuf,
}

impl RunConfig {
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(key, _)| key.starts_with("OCML_"))
            .collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let dataset = get(ENV_DATASET).unwrap_or("moons").parse()?;
        let class = get(ENV_CLASS)
            .map(|value| {
                value.parse::<usize>().map_err(|_| {
                    OcmlError::InvalidConfig(format!("{ENV_CLASS} must be a class index, got {value}"))
                })
            })
            .transpose()?;
        let repeat = get(ENV_REPEAT)
            .map(|value| {
                value.parse::<u32>().map_err(|_| {
                    OcmlError::InvalidConfig(format!("{ENV_REPEAT} must be a repeat index, got {value}"))
                })
            })
            .transpose()?
            .unwrap_or(0);
        let models = match get(ENV_MODEL) {
            Some(identifier) => vec![identifier.parse::<ModelKind>()?],
            None => ModelKind::ALL.to_vec(),
        };

        if dataset == DatasetName::Mnist && class.is_none() {
            return Err(OcmlError::InvalidConfig(format!(
                "{ENV_CLASS} is required for the mnist dataset"
            )));
        }

        Ok(Self {
            dataset,
            class,
            repeat,
            run_group: get(ENV_RUN_GROUP).unwrap_or("default").to_string(),
            render: RenderBackend::parse(get(ENV_RENDER).unwrap_or("png"))?,
            models,
            mode: ExperimentMode::parse(get(ENV_MODE).unwrap_or("full"))?,
            workdir: PathBuf::from(get(ENV_WORKDIR).unwrap_or("runs")),
        })
    }
}

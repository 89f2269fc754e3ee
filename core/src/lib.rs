pub mod config;
pub mod datasets;
pub mod driver;
pub mod error;
pub mod experiment;
pub mod grid;
pub mod metrics;
pub mod models;
pub mod report;
pub mod rng;
pub mod tracking;
pub mod visualization;

pub use config::{load_or_init, ExperimentConfig};
pub use error::{OcmlError, Result};
pub use experiment::{ExperimentMode, RenderBackend, RunConfig};
pub use grid::{contour, Contour, Domain};
pub use metrics::{ScoreSummary, SeparationMetrics};
pub use models::{build_model, model_from_identifier, AnomalyModel, AnomalyScorer, ModelKind, CONTAMINATION};
pub use report::{Notebook, ReportSection, DEFAULT_NOTEBOOK_TEMPLATE};
pub use rng::{repeat_seed, seeded_rng};
pub use tracking::{JsonlTracker, RunRecord, Tracker};
pub use visualization::{encode_png_data_url, Figure, ScoreHistogram, ScoreSeries, CONTOUR_BANDS};

use std::{
    fmt::Write,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use ndarray::ArrayView2;
use ocml_core::{
    build_model, contour,
    datasets::{generate_toy, load_mnist_class, DatasetName, ToyShape},
    encode_png_data_url, load_or_init,
    models::Hyperparameters,
    repeat_seed, seeded_rng,
    visualization::DEFAULT_PANEL_SIZE,
    AnomalyModel, ExperimentConfig, Figure, JsonlTracker, ModelKind, Notebook, RenderBackend,
    ReportSection, RunConfig, RunRecord, ScoreHistogram, ScoreSeries, ScoreSummary,
    SeparationMetrics, Tracker, CONTOUR_BANDS, DEFAULT_NOTEBOOK_TEMPLATE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct ExperimentPaths {
    config: PathBuf,
    report: PathBuf,
    runs: PathBuf,
    images: PathBuf,
}

struct ModelResult {
    kind: ModelKind,
    hyperparameters: Hyperparameters,
    train_scores: ScoreSummary,
    separation: Option<SeparationMetrics>,
}

enum FigureOutput {
    Skipped,
    File(PathBuf),
    Inline(String),
}

struct ExperimentResult {
    dataset: String,
    samples: usize,
    seed: u64,
    models: Vec<ModelResult>,
    /// Title of each figure panel, left to right.
    panels: Vec<String>,
    figure: FigureOutput,
}

fn main() -> Result<()> {
    init_tracing();

    let run = RunConfig::from_env().context("failed to read run configuration")?;
    let paths = initialize_paths(&run.workdir)?;
    let config: ExperimentConfig = load_or_init(&paths.config, ExperimentConfig::default)?;
    config.validate(run.mode)?;
    let notebook = Notebook::open_or_create(&paths.report, DEFAULT_NOTEBOOK_TEMPLATE)?;
    let mut tracker = JsonlTracker::new(&paths.runs)?;

    let seed = repeat_seed(config.seed, run.repeat);
    info!(
        dataset = %run.dataset,
        class = ?run.class,
        repeat = run.repeat,
        group = %run.run_group,
        mode = run.mode.label(),
        seed,
        "running one-class baselines"
    );

    let result = match run.dataset {
        DatasetName::Toy(shape) => run_toy(shape, &run, &config, seed, &paths)?,
        DatasetName::Mnist => run_mnist(&run, &config, seed, &paths)?,
    };

    for record in run_records(&run, &result) {
        tracker.log(&record)?;
    }
    write_report(&notebook, &run, &config, &result)?;

    info!(report = %notebook.path().display(), "run complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn initialize_paths(workdir: &Path) -> Result<ExperimentPaths> {
    fs::create_dir_all(workdir)
        .with_context(|| format!("failed to create work directory {}", workdir.display()))?;

    Ok(ExperimentPaths {
        config: workdir.join("config.json"),
        report: workdir.join("report.md"),
        runs: workdir.join("runs.jsonl"),
        images: workdir.join("images"),
    })
}

fn run_toy(
    shape: ToyShape,
    run: &RunConfig,
    config: &ExperimentConfig,
    seed: u64,
    paths: &ExperimentPaths,
) -> Result<ExperimentResult> {
    let budget = config.budget(run.mode);
    let mut rng = seeded_rng(seed);
    let mut data = generate_toy(shape, budget.toy_samples, config.toy_noise, &mut rng)?;
    if let Some(class) = run.class {
        data = data
            .filter_class(class)
            .with_context(|| format!("no {} samples with class {}", shape.label(), class))?;
    }
    let samples = data.features.view();

    let per_model = if config.histogram { 2 } else { 1 };
    let mut figure = match run.render {
        RenderBackend::None => None,
        _ => Some(Figure::new(run.models.len() * per_model, DEFAULT_PANEL_SIZE)?),
    };

    let mut models = Vec::with_capacity(run.models.len());
    let mut panels = Vec::with_capacity(run.models.len() * per_model);
    for (index, &kind) in run.models.iter().enumerate() {
        let model = fit_model(kind, config, seed, &samples)?;
        let surface = contour(model.as_ref(), config.domain, budget.resolution)
            .with_context(|| format!("failed to evaluate {kind} over the domain"))?;
        let (lo, hi) = surface.score_range();
        info!(model = %kind, lo, hi, bands = CONTOUR_BANDS, "computed decision surface");

        let train_scores = model.decision_function(&samples)?.to_vec();
        let slot = index * per_model;
        panels.push(format!("{}: Level Sets", kind.title()));
        if let Some(figure) = figure.as_mut() {
            figure.draw_contour(slot, &surface, &samples)?;
        }
        if config.histogram {
            panels.push(format!("{}: Score Histogram", kind.title()));
            if let Some(figure) = figure.as_mut() {
                let histogram = ScoreHistogram::new(
                    &[(ScoreSeries::InDistribution, train_scores.as_slice())],
                    config.histogram_bins,
                )?;
                figure.draw_histogram(slot + 1, &histogram)?;
            }
        }

        models.push(ModelResult {
            kind,
            hyperparameters: model.hyperparameters(),
            train_scores: ScoreSummary::describe(&train_scores)?,
            separation: None,
        });
    }

    let name = figure_file_name("contour", &data.name, &run.run_group, run.repeat);
    let figure = emit_figure(figure, run, paths, &name)?;

    Ok(ExperimentResult {
        dataset: data.name.clone(),
        samples: data.len(),
        seed,
        models,
        panels,
        figure,
    })
}

fn run_mnist(
    run: &RunConfig,
    config: &ExperimentConfig,
    seed: u64,
    paths: &ExperimentPaths,
) -> Result<ExperimentResult> {
    let class = run
        .class
        .ok_or_else(|| anyhow!("mnist runs need a target class"))?;
    let subset = load_mnist_class(class, config.mnist_limits(run.mode))?;
    let train = subset.train.view();

    let mut figure = match run.render {
        RenderBackend::None => None,
        _ if !config.histogram => None,
        _ => Some(Figure::new(run.models.len(), DEFAULT_PANEL_SIZE)?),
    };

    let mut models = Vec::with_capacity(run.models.len());
    let mut panels = Vec::new();
    for (slot, &kind) in run.models.iter().enumerate() {
        let model = fit_model(kind, config, seed, &train)?;
        let inliers = model.decision_function(&subset.test_inliers.view())?.to_vec();
        let outliers = model.decision_function(&subset.test_outliers.view())?.to_vec();
        let separation = SeparationMetrics::evaluate(&inliers, &outliers)?;

        info!(
            model = %kind,
            class,
            roc_auc = separation.roc_auc,
            accuracy = separation.accuracy,
            threshold = separation.threshold,
            "evaluated class-vs-rest separation"
        );

        if config.histogram {
            panels.push(format!("{}: Score Histogram", kind.title()));
            if let Some(figure) = figure.as_mut() {
                let histogram = ScoreHistogram::new(
                    &[
                        (ScoreSeries::OutDistribution, outliers.as_slice()),
                        (ScoreSeries::InDistribution, inliers.as_slice()),
                    ],
                    config.histogram_bins,
                )?;
                figure.draw_histogram(slot, &histogram)?;
            }
        }

        let train_scores = model.decision_function(&train)?.to_vec();
        models.push(ModelResult {
            kind,
            hyperparameters: model.hyperparameters(),
            train_scores: ScoreSummary::describe(&train_scores)?,
            separation: Some(separation),
        });
    }

    let dataset = format!("mnist[class={class}]");
    let name = figure_file_name("histogram", &dataset, &run.run_group, run.repeat);
    let figure = emit_figure(figure, run, paths, &name)?;

    Ok(ExperimentResult {
        dataset,
        samples: subset.train.nrows(),
        seed,
        models,
        panels,
        figure,
    })
}

fn fit_model(
    kind: ModelKind,
    config: &ExperimentConfig,
    seed: u64,
    samples: &ArrayView2<f64>,
) -> Result<Box<dyn AnomalyModel>> {
    let mut model = build_model(kind, &config.model_params(seed));
    model
        .fit(samples)
        .with_context(|| format!("failed to fit {kind} on {} samples", samples.nrows()))?;
    Ok(model)
}

/// Save or inline a rendered figure according to the run's render backend.
fn emit_figure(
    figure: Option<Figure>,
    run: &RunConfig,
    paths: &ExperimentPaths,
    name: &str,
) -> Result<FigureOutput> {
    Ok(match (run.render, figure) {
        (RenderBackend::Png, Some(figure)) => {
            let path = paths.images.join(name);
            figure.save_png(&path)?;
            info!(path = %path.display(), "saved figure");
            FigureOutput::File(path)
        }
        (RenderBackend::Report, Some(figure)) => FigureOutput::Inline(encode_png_data_url(&figure.to_png()?)),
        _ => FigureOutput::Skipped,
    })
}

/// `<kind>_<dataset>_<run group>_<repeat>.png` with unsafe characters replaced.
fn figure_file_name(kind: &str, dataset: &str, run_group: &str, repeat: u32) -> String {
    let stem: String = format!("{kind}_{dataset}_{run_group}_{repeat}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{stem}.png")
}

fn run_records(run: &RunConfig, result: &ExperimentResult) -> Vec<RunRecord> {
    let figure = match &result.figure {
        FigureOutput::File(path) => Some(path.display().to_string()),
        _ => None,
    };
    result
        .models
        .iter()
        .map(|model| RunRecord {
            run_group: run.run_group.clone(),
            dataset: result.dataset.clone(),
            class: run.class,
            repeat: run.repeat,
            model: model.kind,
            seed: result.seed,
            train_scores: model.train_scores,
            separation: model.separation,
            figure: figure.clone(),
        })
        .collect()
}

fn write_report(
    notebook: &Notebook,
    run: &RunConfig,
    config: &ExperimentConfig,
    result: &ExperimentResult,
) -> Result<()> {
    let sections = [
        ReportSection::new("run", render_run_section(run, config, result)),
        ReportSection::new("models", render_models_section(&result.models)),
        ReportSection::new("scores", render_scores_section(&result.models)),
        ReportSection::new("figures", render_figure_section(&result.panels, &result.figure)),
    ];

    Ok(notebook.update(&sections)?)
}

fn render_run_section(run: &RunConfig, config: &ExperimentConfig, result: &ExperimentResult) -> String {
    let budget = config.budget(run.mode);
    format!(
        "- Dataset: {}\n- Samples: {}\n- Run group: {}\n- Repeat: {}\n- Seed: {}\n- Mode: {}\n- Domain: [{}, {}]\n- Resolution: {}\n",
        result.dataset,
        result.samples,
        run.run_group,
        run.repeat,
        result.seed,
        run.mode.label(),
        config.domain.min,
        config.domain.max,
        budget.resolution
    )
}

fn render_models_section(models: &[ModelResult]) -> String {
    let mut output = String::new();
    for model in models {
        let details = match &model.hyperparameters {
            Hyperparameters::IsolationForest {
                contamination,
                n_estimators,
                max_samples,
                seed,
            } => format!(
                "contamination {contamination}, {n_estimators} trees, max samples {}, seed {seed}",
                max_samples.map_or_else(|| "auto".to_string(), |n| n.to_string())
            ),
            Hyperparameters::OneClassSvm { nu, kernel, gamma } => {
                format!("nu {nu}, kernel {kernel:?}, gamma {gamma:?}")
            }
        };
        let _ = writeln!(&mut output, "- {}: {}", model.kind.title(), details);
    }
    output
}

fn render_scores_section(models: &[ModelResult]) -> String {
    let mut output = String::new();
    let _ = writeln!(&mut output, "| Model | Min | Mean | Max | ROC-AUC | Calibrated Accuracy (%) |");
    let _ = writeln!(&mut output, "| --- | --- | --- | --- | --- | --- |");
    for model in models {
        let (auc, accuracy) = match model.separation {
            Some(separation) => (
                format!("{:.3}", separation.roc_auc),
                format!("{:.2}", separation.accuracy),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        let _ = writeln!(
            &mut output,
            "| {} | {:.4} | {:.4} | {:.4} | {} | {} |",
            model.kind.title(),
            model.train_scores.min,
            model.train_scores.mean,
            model.train_scores.max,
            auc,
            accuracy
        );
    }
    output
}

fn render_figure_section(panels: &[String], figure: &FigureOutput) -> String {
    let panels = panels.join(" | ");
    match figure {
        FigureOutput::Skipped => "No figure rendered for this run.".to_string(),
        FigureOutput::File(path) => format!("Panels: {panels}\n\n![Scores]({})\n", path.display()),
        FigureOutput::Inline(url) => format!("Panels: {panels}\n\n![Scores]({url})\n"),
    }
}

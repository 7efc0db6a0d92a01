use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use log::{info, warn};

use crate::{
    config::RunConfig,
    dataset::{ClassLabels, DatasetBuilder, SkippedVideo},
    error::{Error, Result},
    fit::{evaluate, fit, Evaluation, History},
    models::ModelKind,
    utils::{seeded_rng, INIT_STREAM},
    video::FrameSampler,
    Float,
};

/// Outcome of a full [`run`].
#[derive(Debug)]
pub struct RunReport {
    pub classes: ClassLabels,
    /// Usable samples before the train/test split
    pub samples: usize,
    pub skipped: Vec<SkippedVideo>,
    pub history: History,
    pub evaluation: Evaluation,
    pub model_path: PathBuf,
    pub metrics_path: PathBuf,
    pub summary_path: PathBuf,
}

#[derive(serde::Serialize)]
struct Metrics<'a> {
    model: &'a str,
    classes: &'a [String],
    history: &'a History,
    evaluation: &'a Evaluation,
}

/// Formats a metric with three significant digits, the way Python's
/// `format(value, ".3")` does: `0.6931 -> 0.693`, `1.0 -> 1.0`,
/// `0.05123 -> 0.0512`, `123.4 -> 1.23e+02`.
pub fn format_metric(value: Float) -> String {
    let value = f64::from(value);
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0.0".to_string();
    }

    // rounding to three digits may bump the exponent (0.9999 -> 1.00e0)
    let scientific = format!("{value:.2e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return scientific;
    };

    if !(-4..2).contains(&exponent) {
        let mantissa = trim_zeros(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.abs());
    }

    let decimals = (2 - exponent).max(0) as usize;
    let fixed = format!("{value:.decimals$}");
    let fixed = trim_zeros(&fixed);
    if fixed.contains('.') {
        fixed.to_string()
    } else {
        format!("{fixed}.0")
    }
}

fn trim_zeros(number: &str) -> &str {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.')
    } else {
        number
    }
}

pub fn model_file_name(model: ModelKind, evaluation: &Evaluation) -> String {
    format!(
        "{}_model_loss_{}_acc_{}.bin",
        model.name(),
        format_metric(evaluation.loss),
        format_metric(evaluation.accuracy)
    )
}

pub fn metrics_file_name(model: ModelKind) -> String {
    format!("{}_metrics.json", model.name())
}

pub fn summary_file_name(model: ModelKind) -> String {
    format!("{}_model_str.txt", model.name())
}

fn write_metrics(path: &Path, metrics: &Metrics<'_>) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, metrics)?;
    Ok(())
}

/// Builds the dataset, trains and evaluates the chosen model and writes
/// the model, its training curves and its summary to the output directory.
pub fn run(config: &RunConfig) -> Result<RunReport> {
    config.validate()?;
    let train_config = &config.train;

    let classes = ClassLabels::from_dir(&config.dataset_dir)?;
    info!("Found {} classes: {}", classes.len(), classes.names().join(", "));

    let sampler = FrameSampler::new(config.sequence_length, config.image_size)?;
    let report = DatasetBuilder::new(sampler).build(&config.dataset_dir, &classes)?;
    if !report.skipped.is_empty() {
        warn!("{} videos could not be used", report.skipped.len());
    }

    let dataset = report.dataset;
    if dataset.is_empty() {
        return Err(Error::EmptyDataset(config.dataset_dir.clone()));
    }
    let samples = dataset.len();
    info!("Dataset has {samples} samples");

    let (train, test) = dataset.split(train_config.test_fraction, train_config.seed)?;
    info!("Split into {} train and {} test samples", train.len(), test.len());

    let mut rng = seeded_rng(train_config.seed, INIT_STREAM);
    let mut net = config
        .model
        .build(config.sequence_length, config.image_size, &classes, &mut rng)?;

    fs::create_dir_all(&config.output_dir)?;
    let summary_path = config.output_dir.join(summary_file_name(config.model));
    fs::write(&summary_path, net.summary())?;

    let history = fit(&mut net, &train, train_config)?;

    let evaluation = evaluate(&mut net, test.features(), &test.one_hot_labels())?;
    info!(
        "Test loss: {:.4} - test accuracy: {:.4}",
        evaluation.loss, evaluation.accuracy
    );

    let model_path = config.output_dir.join(model_file_name(config.model, &evaluation));
    net.save(&model_path)?;
    info!("Model saved to {}", model_path.display());

    let metrics_path = config.output_dir.join(metrics_file_name(config.model));
    write_metrics(
        &metrics_path,
        &Metrics {
            model: config.model.name(),
            classes: classes.names(),
            history: &history,
            evaluation: &evaluation,
        },
    )?;
    info!("Training curves saved to {}", metrics_path.display());

    Ok(RunReport {
        classes,
        samples,
        skipped: report.skipped,
        history,
        evaluation,
        model_path,
        metrics_path,
        summary_path,
    })
}

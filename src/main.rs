use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use actionnet_rust::{pipeline, ModelKind, RunConfig, TrainConfig};

/// Train a video action recognition model on a directory of labeled clips
#[derive(Parser, Debug)]
#[command(name = "actionnet", version, about, long_about = None)]
struct Cli {
    /// Dataset root, one subdirectory of clips per action
    #[arg(short = 'i', long = "dataset")]
    dataset: PathBuf,

    /// Frames sampled from every clip
    #[arg(short = 'l', long = "seq-len", default_value_t = 20)]
    seq_len: usize,

    /// Width and height frames are resized to
    #[arg(short = 's', long = "size", default_value_t = 64)]
    size: usize,

    /// Model to train: convLSTM or LRCN
    #[arg(short = 'm', long = "model", default_value = "LRCN")]
    model: ModelKind,

    /// Directory the model, metrics and summary are written to
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    output_dir: PathBuf,

    /// JSON file with training settings, missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the maximum number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut train = match &cli.config {
        Some(path) => TrainConfig::from_json_file(path)
            .with_context(|| format!("failed to load training config {}", path.display()))?,
        None => TrainConfig::default(),
    };
    if let Some(epochs) = cli.epochs {
        train.epochs = epochs;
    }
    if let Some(seed) = cli.seed {
        train.seed = seed;
    }

    let config = RunConfig {
        dataset_dir: cli.dataset,
        sequence_length: cli.seq_len,
        image_size: cli.size,
        model: cli.model,
        output_dir: cli.output_dir,
        train,
    };

    info!("Training {} on {}", config.model, config.dataset_dir.display());
    let report = pipeline::run(&config)
        .with_context(|| format!("training on {} failed", config.dataset_dir.display()))?;

    info!(
        "Done after {} epochs: test loss {:.4}, test accuracy {:.4}",
        report.history.epochs(),
        report.evaluation.loss,
        report.evaluation.accuracy
    );
    Ok(())
}

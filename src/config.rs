use std::{fs, path::Path, path::PathBuf};

use crate::{
    error::{Error, Result},
    models::ModelKind,
    trainer::Method,
    Float,
};

pub const DEFAULT_SEED: u64 = 27;

/// Hyperparameters of one training run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Upper bound on the number of passes over the training partition
    pub epochs: usize,
    pub batch_size: usize,
    /// Share of the dataset held out for the final evaluation
    pub test_fraction: f64,
    /// Share of the training partition, taken from its end, used for
    /// per-epoch validation
    pub validation_split: f64,
    /// Reshuffle the training order every epoch
    pub shuffle: bool,
    /// Epochs without a lower validation loss before stopping, `None`
    /// disables early stopping
    pub patience: Option<usize>,
    pub restore_best_weights: bool,
    pub learning_rate: Float,
    pub method: Method,
    pub l2_decay: Float,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 70,
            batch_size: 4,
            test_fraction: 0.2,
            validation_split: 0.2,
            shuffle: true,
            patience: Some(15),
            restore_best_weights: true,
            learning_rate: 1e-3,
            method: Method::adam(),
            l2_decay: 0.0,
            seed: DEFAULT_SEED,
        }
    }
}

impl TrainConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(Error::Config(format!(
                "test_fraction {} is not in (0, 1)",
                self.test_fraction
            )));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(Error::Config(format!(
                "validation_split {} is not in [0, 1)",
                self.validation_split
            )));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(Error::Config("learning_rate must be positive".to_string()));
        }
        if self.l2_decay < 0.0 {
            return Err(Error::Config("l2_decay must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Everything the pipeline needs: where the clips are, how to sample
/// them, which model to train and where to put the results.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub dataset_dir: PathBuf,
    /// Frames sampled per clip (N)
    pub sequence_length: usize,
    /// Square frame resolution (S)
    pub image_size: usize,
    pub model: ModelKind,
    pub output_dir: PathBuf,
    pub train: TrainConfig,
}

impl RunConfig {
    pub fn new<P: Into<PathBuf>>(dataset_dir: P) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            sequence_length: 20,
            image_size: 64,
            model: ModelKind::default(),
            output_dir: PathBuf::from("."),
            train: TrainConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sequence_length == 0 {
            return Err(Error::Config("sequence length must be at least 1".to_string()));
        }
        if self.image_size == 0 {
            return Err(Error::Config("image size must be at least 1".to_string()));
        }
        if !self.dataset_dir.is_dir() {
            return Err(Error::Config(format!(
                "dataset directory {} does not exist",
                self.dataset_dir.display()
            )));
        }
        self.train.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: TrainConfig = serde_json::from_str(r#"{"epochs": 3, "patience": null}"#).unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.patience, None);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.seed, DEFAULT_SEED);
        assert_eq!(config.method, Method::adam());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = TrainConfig::default();
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = TrainConfig {
            test_fraction: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn run_config_needs_an_existing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunConfig::new(dir.path()).validate().is_ok());
        assert!(RunConfig::new(dir.path().join("missing")).validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        fs::write(&path, r#"{"batch_size": 2, "method": {"type": "sgd"}}"#).unwrap();

        let config = TrainConfig::from_json_file(&path).unwrap();
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.method, Method::Sgd);

        fs::write(&path, r#"{"batch_size": 0}"#).unwrap();
        assert!(TrainConfig::from_json_file(&path).is_err());
    }

    #[test]
    fn unreadable_config_files_report_the_cause() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TrainConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(Error::Io(_))));

        let path = dir.path().join("broken.json");
        fs::write(&path, "{ epochs: ").unwrap();
        assert!(matches!(TrainConfig::from_json_file(&path), Err(Error::Json(_))));
    }
}

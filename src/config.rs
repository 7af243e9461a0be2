//! Runtime configuration for miml-re.

use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    classify::{Optimizer, TrainerConfig},
    data::LocalFilter,
    error::{MimlError, Result},
    model::{ymodel::YFitConfig, YFeatureKind},
};

/// Process settings resolved from `.env` and defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root folder for datasets and trained models.
    pub data_dir: PathBuf,
    /// Root folder for statistics and predictions.
    pub outputs_dir: PathBuf,
    /// Worker threads available to training.
    pub threads: usize,
}

impl Settings {
    /// Load configuration from environment with reasonable defaults.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let outputs_dir = env::var("OUTPUTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./outputs"));
        let threads = env::var("MIML_THREADS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            });

        std::fs::create_dir_all(&data_dir).context("creating data dir")?;
        std::fs::create_dir_all(&outputs_dir).context("creating outputs dir")?;

        Ok(Self {
            data_dir,
            outputs_dir,
            threads,
        })
    }

    /// Convenience helper for derived path segments.
    pub fn join_data<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.data_dir.join(path)
    }

    /// Convenience helper for derived output path segments.
    pub fn join_output<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.outputs_dir.join(path)
    }
}

/// Immutable training configuration threaded through the EM trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorConfig {
    /// Cross-validation folds for the local classifiers (at least 2).
    pub folds: usize,
    /// EM epoch budget.
    pub epochs: usize,
    pub z_regularization: f64,
    pub y_regularization: f64,
    pub optimizer: Optimizer,
    pub optimizer_iterations: usize,
    pub sgd_passes: usize,
    pub learning_rate: f64,
    /// Registered latent inference algorithm (`iterative` or `stable`).
    pub inference: String,
    pub y_features: Vec<YFeatureKind>,
    /// Treat every non-positive bag as a negative Y example.
    pub all_negatives: bool,
    pub relabel: bool,
    /// Target fraction of labelled bag-relation pairs that end up positive.
    pub relabel_fraction: f64,
    pub local_filter: LocalFilter,
    /// When false, training stops after the local classifiers.
    pub train_y: bool,
    pub merged_z: bool,
    pub squash_randomization: bool,
    /// Number of sibling models sharing the machine.
    pub ensemble_size: usize,
    pub feature_count_threshold: usize,
    /// Cache for the initial fold classifiers.
    pub initial_model: Option<PathBuf>,
    pub seed: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            epochs: 8,
            z_regularization: 1.0,
            y_regularization: 1.0,
            optimizer: Optimizer::QuasiNewton,
            optimizer_iterations: 200,
            sgd_passes: 5,
            learning_rate: 0.1,
            inference: "iterative".to_string(),
            y_features: vec![YFeatureKind::AtLeastOnce, YFeatureKind::None],
            all_negatives: false,
            relabel: false,
            relabel_fraction: 0.5,
            local_filter: LocalFilter::All,
            train_y: true,
            merged_z: true,
            squash_randomization: false,
            ensemble_size: 1,
            feature_count_threshold: 0,
            initial_model: None,
            seed: 1,
        }
    }
}

impl ExtractorConfig {
    /// Read a JSON configuration file; missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.folds < 2 {
            return Err(MimlError::config(format!(
                "at least 2 folds are required, got {}",
                self.folds
            )));
        }
        if !(0.0..=1.0).contains(&self.relabel_fraction) {
            return Err(MimlError::config(format!(
                "relabel_fraction must lie in [0, 1], got {}",
                self.relabel_fraction
            )));
        }
        if self.z_regularization < 0.0 || self.y_regularization < 0.0 {
            return Err(MimlError::config("regularization must be non-negative"));
        }
        if self.ensemble_size == 0 {
            return Err(MimlError::config("ensemble_size must be at least 1"));
        }
        if self.train_y && self.y_features.is_empty() {
            return Err(MimlError::config("y_features may not be empty"));
        }
        Ok(())
    }

    /// Local classifier settings; `seed` varies per epoch and fold.
    pub fn z_trainer(&self, seed: u64) -> TrainerConfig {
        TrainerConfig {
            optimizer: self.optimizer,
            regularization: self.z_regularization,
            max_iterations: self.optimizer_iterations,
            sgd_passes: self.sgd_passes,
            learning_rate: self.learning_rate,
            seed,
            ..TrainerConfig::default()
        }
    }

    pub fn y_fit(&self) -> YFitConfig {
        YFitConfig {
            alpha: self.y_regularization,
            max_iterations: self.optimizer_iterations as u64,
        }
    }

    /// Worker threads left for this model when `threads` are shared by the ensemble.
    pub fn threads_per_model(&self, threads: usize) -> usize {
        (threads / self.ensemble_size.max(1)).max(1)
    }
}

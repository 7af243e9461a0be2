//! CLI entry-point for EM training.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use miml_re::{
    config::{ExtractorConfig, Settings},
    data::Dataset,
    em::{JointBayesTrainer, TrainingOutcome},
    report,
};
use tracing::{info, instrument};

/// Args for the `train` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    /// JSONL bag file; relative paths resolve under DATA_DIR.
    #[arg(long)]
    pub dataset: PathBuf,
    /// JSON training configuration; defaults apply to missing keys.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Where to write the trained model (checkpoints get `.epochN`).
    #[arg(long, default_value = "model.miml")]
    pub model: PathBuf,
    /// Sentence statistics parquet, relative to OUTPUTS_DIR.
    #[arg(long, default_value = "sentence_stats.parquet")]
    pub stats: PathBuf,
    /// Override the configured epoch budget.
    #[arg(long)]
    pub epochs: Option<usize>,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let path = settings.join_data(path);
            ExtractorConfig::from_json_file(&path)
                .with_context(|| format!("reading config {}", path.display()))?
        }
        None => ExtractorConfig::default(),
    };
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }

    let dataset_path = settings.join_data(&args.dataset);
    let model_path = settings.join_data(&args.model);
    let stats_path = settings.join_output(&args.stats);
    let threads = settings.threads;

    let outcome = tokio::task::spawn_blocking(move || -> Result<TrainingOutcome> {
        let mut dataset = Dataset::load_jsonl(&dataset_path)
            .with_context(|| format!("loading bags from {}", dataset_path.display()))?;
        let trainer = JointBayesTrainer::new(config, threads)?.with_model_path(&model_path);
        let outcome = trainer.train(&mut dataset)?;
        outcome
            .model
            .save(&model_path)
            .with_context(|| format!("saving model to {}", model_path.display()))?;
        Ok(outcome)
    })
    .await
    .context("training task panicked")??;

    report::write_statistics(&outcome.statistics, &stats_path)?;
    info!(
        state = ?outcome.state,
        epochs = outcome.epochs_run,
        flips = ?outcome.flips_per_epoch,
        initial = %outcome.initial_evaluation,
        "training complete"
    );
    info!(
        sentences = ?outcome.statistics.least_confident(10),
        "least confident sentences for annotation"
    );
    Ok(())
}

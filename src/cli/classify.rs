//! CLI entry-point for bag classification with a trained model.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use miml_re::{
    config::Settings,
    data::read_records,
    model::{JointModel, OutputMode},
    report::{self, PredictionRow},
};
use tracing::{info, instrument};

use crate::cli::ModeArg;

/// Args for the `classify` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    /// JSONL bag file; label sets are ignored.
    #[arg(long)]
    pub dataset: PathBuf,
    #[arg(long, default_value = "model.miml")]
    pub model: PathBuf,
    /// Bag scoring rule.
    #[arg(long, default_value = "joint-bayes", value_enum)]
    pub mode: ModeArg,
    /// Predictions CSV, relative to OUTPUTS_DIR.
    #[arg(long, default_value = "predictions.csv")]
    pub out: PathBuf,
    /// Drop predictions below this probability.
    #[arg(long, default_value_t = 0.0)]
    pub min_probability: f64,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let dataset_path = settings.join_data(&args.dataset);
    let model_path = settings.join_data(&args.model);
    let out_path = settings.join_output(&args.out);
    let mode = OutputMode::from(args.mode);
    let min_probability = args.min_probability;

    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<PredictionRow>> {
        let model = JointModel::load(&model_path)
            .with_context(|| format!("loading model {}", model_path.display()))?;
        let records = read_records(&dataset_path)
            .with_context(|| format!("reading bags from {}", dataset_path.display()))?;
        let mut rows = Vec::new();
        for record in &records {
            let sentences: Vec<_> = record
                .sentences
                .iter()
                .map(|sentence| model.index_sentence(sentence))
                .collect();
            for prediction in model.classify_bag(&sentences, mode) {
                if prediction.probability < min_probability {
                    continue;
                }
                let provenance_id = prediction.provenance.map(|s| {
                    record
                        .sentence_ids
                        .as_ref()
                        .and_then(|ids| ids.get(s).cloned())
                        .unwrap_or_else(|| format!("{}|{}|{s}", record.entity, record.slot_value))
                });
                rows.push(PredictionRow {
                    entity: record.entity.clone(),
                    slot_value: record.slot_value.clone(),
                    prediction,
                    provenance_id,
                });
            }
        }
        info!(bags = records.len(), ?mode, "classified bags");
        Ok(rows)
    })
    .await
    .context("classification task panicked")??;

    report::write_predictions(&rows, &out_path)
}

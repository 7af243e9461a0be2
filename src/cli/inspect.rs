//! CLI entry-point printing a trained model summary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use miml_re::{config::Settings, model::{ymodel::HOLDS, JointModel}};
use tracing::instrument;

/// Args for the `inspect` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    #[arg(long, default_value = "model.miml")]
    pub model: PathBuf,
}

#[instrument(skip(settings))]
pub async fn run(args: Args, settings: Settings) -> Result<()> {
    let path = settings.join_data(&args.model);
    let model = JointModel::load(&path).with_context(|| format!("loading model {}", path.display()))?;

    println!("model: {}", path.display());
    println!(
        "relations: {}  features: {}  folds: {}  merged: {}  dependencies: {}",
        model.labels.len(),
        model.features.len(),
        model.z_classifiers.len(),
        model.merged_z.is_some(),
        model.dependencies.len()
    );
    println!("z labels: {}", model.z_label_names().join(", "));
    for (relation, y_model) in &model.y_models {
        let weights = y_model.classifier.weights().column(HOLDS);
        let described: Vec<String> = y_model
            .features
            .iter()
            .zip(weights.iter())
            .map(|(name, w)| format!("{name}={w:.3}"))
            .collect();
        println!(
            "{relation}: bias={:.3} {}",
            y_model.classifier.bias()[HOLDS],
            described.join(" ")
        );
    }
    Ok(())
}

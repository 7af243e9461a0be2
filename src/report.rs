//! Tabular outputs: sentence statistics for active learning and bag predictions.

use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use polars::prelude::{CsvWriter, DataFrame, NamedFrom, ParquetWriter, SerWriter, Series};
use tracing::{info, warn};

use crate::{em::TrainingStatistics, model::RelationPrediction};

/// One scored (bag, relation) pair.
#[derive(Debug, Clone)]
pub struct PredictionRow {
    pub entity: String,
    pub slot_value: String,
    pub prediction: RelationPrediction,
    /// Sentence id of the provenance sentence, when known.
    pub provenance_id: Option<String>,
}

/// Persist per-sentence statistics as parquet, one row per sentence.
pub fn write_statistics(statistics: &TrainingStatistics, path: &Path) -> Result<()> {
    if statistics.is_empty() {
        warn!("no sentence statistics collected; skipping parquet write");
        return Ok(());
    }
    let ids: Vec<&str> = statistics.sentences.keys().map(String::as_str).collect();
    let labels: Vec<&str> = statistics
        .sentences
        .values()
        .map(|s| s.label.as_str())
        .collect();
    let confidences: Vec<f64> = statistics.sentences.values().map(|s| s.confidence).collect();
    let distributions = statistics
        .sentences
        .values()
        .map(|s| serde_json::to_string(&s.distribution))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("encoding label distributions")?;
    let epochs = vec![statistics.epoch as i64; ids.len()];

    let mut df = DataFrame::new(vec![
        Series::new("sentence_id".into(), ids),
        Series::new("label".into(), labels),
        Series::new("confidence".into(), confidences),
        Series::new("distribution".into(), distributions),
        Series::new("epoch".into(), epochs),
    ])?;
    create_parent(path)?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    ParquetWriter::new(file).finish(&mut df)?;
    info!(path = %path.display(), rows = df.height(), "wrote sentence statistics");
    Ok(())
}

/// Persist bag-level predictions as CSV.
pub fn write_predictions(rows: &[PredictionRow], path: &Path) -> Result<()> {
    let mut df = DataFrame::new(vec![
        Series::new(
            "entity".into(),
            rows.iter().map(|r| r.entity.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "slot_value".into(),
            rows.iter().map(|r| r.slot_value.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "relation".into(),
            rows.iter()
                .map(|r| r.prediction.relation.as_str())
                .collect::<Vec<_>>(),
        ),
        Series::new(
            "probability".into(),
            rows.iter().map(|r| r.prediction.probability).collect::<Vec<_>>(),
        ),
        Series::new(
            "provenance".into(),
            rows.iter()
                .map(|r| r.prediction.provenance.map(|s| s as i64))
                .collect::<Vec<_>>(),
        ),
        Series::new(
            "provenance_id".into(),
            rows.iter()
                .map(|r| r.provenance_id.as_deref())
                .collect::<Vec<_>>(),
        ),
    ])?;
    create_parent(path)?;
    let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    CsvWriter::new(&mut file).finish(&mut df)?;
    info!(path = %path.display(), rows = df.height(), "wrote bag predictions");
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

//! Error types for the relation extraction engine.

use thiserror::Error;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, MimlError>;

/// Failures surfaced by dataset handling, training and model persistence.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MimlError {
    /// Invalid configuration detected at setup or epoch start.
    #[error("configuration error: {0}")]
    Config(String),

    /// A relation had no usable bag-level training examples.
    #[error("empty training set for relation `{relation}` in epoch {epoch}")]
    EmptyTrainingSet { relation: String, epoch: usize },

    /// A relation name was not present in the label index.
    #[error("unknown relation `{0}`")]
    UnknownRelation(String),

    /// No latent inference strategy is registered under this tag.
    #[error("unknown inference algorithm `{0}`")]
    UnknownInference(String),

    /// A worker task failed; the whole run is aborted.
    #[error("worker failed in fold {fold}, epoch {epoch}: {source}")]
    Worker {
        fold: usize,
        epoch: usize,
        #[source]
        source: Box<MimlError>,
    },

    /// Logistic regression fit failed.
    #[error("classifier fit failed: {0}")]
    Fit(String),

    /// Malformed or incompatible model file.
    #[error("model format error: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl MimlError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        MimlError::Config(msg.into())
    }

    /// Create a model format error.
    pub fn format(msg: impl Into<String>) -> Self {
        MimlError::Format(msg.into())
    }

    /// Attach fold/epoch context to a failure raised inside a worker.
    pub fn in_worker(self, fold: usize, epoch: usize) -> Self {
        MimlError::Worker {
            fold,
            epoch,
            source: Box::new(self),
        }
    }
}

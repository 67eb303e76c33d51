use std::path::PathBuf;

use thiserror::Error;

use crate::data::BatchShapes;

pub type Result<T> = std::result::Result<T, MortalityError>;

/// Ranking metrics that cannot be computed for the given labels.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricError {
    #[error("metric needs both classes but only label {present} is present")]
    SingleClass { present: usize },

    #[error("no samples to score")]
    Empty,

    #[error("{scores} scores for {labels} labels")]
    LengthMismatch { scores: usize, labels: usize },
}

#[derive(Debug, Error)]
pub enum MortalityError {
    #[error("unknown model type '{0}' (expected one of grud, ipnets, seft, transformer, mamba)")]
    UnknownModel(String),

    #[error("invalid arguments for model '{model}': {source}")]
    InvalidModelArgs {
        model: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid model configuration: {0}")]
    InvalidModelConfig(String),

    #[error("batch shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: BatchShapes, found: BatchShapes },

    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    #[error("patient record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("training loss became non-finite in epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize },

    #[error("data loader stopped after {delivered} of {expected} batches: {reason}")]
    Loader {
        delivered: usize,
        expected: usize,
        reason: String,
    },

    #[error("split '{0}' has no usable samples")]
    EmptySplit(&'static str),

    #[error("checkpoint not found at {}", .0.display())]
    CheckpointMissing(PathBuf),

    #[error("checkpoint {} could not be processed: {reason}", path.display())]
    Checkpoint { path: PathBuf, reason: String },

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error("tensor data extraction failed: {0}")]
    TensorData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to render training curves: {0}")]
    Plot(String),
}

pub mod data;
pub mod error;
pub mod model;
pub mod training;

// Re-exports for convenience
pub use data::{BatchShapes, DataLoader, MortalityBatch, MortalityDataset, PairedDataset, PatientRecord};
pub use error::{MetricError, MortalityError, Result};
pub use model::{ModelKind, ModelSpec, MortalityClassifier};
pub use training::{train_test, Accelerator, EarlyStopCriterion, Placement, TestSummary, TrainingConfig};

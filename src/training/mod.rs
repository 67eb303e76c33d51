pub mod checkpoint;
pub mod config;
pub mod device;
pub mod early_stopping;
pub mod evaluator;
pub mod log;
pub mod metrics;
pub mod pipeline;
pub mod state;
pub mod trainer;
pub mod validation;

pub use checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint, CHECKPOINT_FILE};
pub use config::{EarlyStopCriterion, TrainingConfig};
pub use device::{default_placement, Accelerator, ComputeBackend, Placement, TrainingBackend};
pub use early_stopping::{EarlyStopping, StoppingState};
pub use evaluator::{test, TestReport, TestSummary, TEST_RESULTS_FILE};
pub use log::{render_training_curves, EpochRecord, TrainingLog, TRAINING_CURVES_FILE, TRAINING_LOG_FILE};
pub use metrics::{accuracy, average_precision, roc_auc, ClassificationReport, ConfusionMatrix};
pub use pipeline::{train_test, Loaders, MetricStats, ModelConfig, RunAggregate, Splits, MODEL_CONFIG_FILE, SUMMARY_FILE};
pub use state::TrainingState;
pub use trainer::{train, TrainOutcome};
pub use validation::{predict, Predictions, ValidationScores};

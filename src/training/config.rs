use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MortalityError, Result};
use crate::model::{ModelKind, ModelSpec};
use crate::training::validation::ValidationScores;

/// Which validation quantity drives early stopping. Every criterion is
/// turned into a lower-is-better score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EarlyStopCriterion {
    #[serde(rename = "auroc")]
    Auroc,
    #[serde(rename = "auprc")]
    Auprc,
    #[serde(rename = "auprc+auroc")]
    AuprcAuroc,
    #[serde(rename = "loss")]
    Loss,
}

impl EarlyStopCriterion {
    pub fn score(&self, scores: &ValidationScores) -> f64 {
        match self {
            EarlyStopCriterion::Auroc => 1.0 - scores.auroc,
            EarlyStopCriterion::Auprc => 1.0 - scores.auprc,
            EarlyStopCriterion::AuprcAuroc => 1.0 - (scores.auprc + scores.auroc),
            EarlyStopCriterion::Loss => scores.loss,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    // Optimisation
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,

    // Early stopping
    pub patience: usize,
    pub early_stop_criterion: EarlyStopCriterion,

    // Model
    pub model: ModelSpec,

    // Data
    pub num_workers: usize,
    pub max_seq_len: Option<usize>,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let mut args = Map::new();
        args.insert("hidden_dim".to_string(), Value::from(64));
        args.insert("dropout".to_string(), Value::from(0.1));
        Self {
            batch_size: 64,
            epochs: 300,
            learning_rate: 1e-4,
            patience: 5,
            early_stop_criterion: EarlyStopCriterion::Auroc,
            model: ModelSpec {
                kind: ModelKind::Grud,
                args,
            },
            num_workers: 4,
            max_seq_len: None,
            seed: 0,
        }
    }
}

impl TrainingConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TrainingConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MortalityError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.patience == 0 {
            return Err(MortalityError::InvalidConfig("patience must be at least 1".into()));
        }
        if self.epochs == 0 {
            return Err(MortalityError::InvalidConfig("epochs must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(MortalityError::InvalidConfig(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.max_seq_len == Some(0) {
            return Err(MortalityError::InvalidConfig("max_seq_len must be positive".into()));
        }
        Ok(())
    }

    /// Size of each training request. Training items are (positive, negative)
    /// pairs, so every request yields twice this many samples.
    pub fn train_batch_size(&self) -> usize {
        (self.batch_size / 2).max(1)
    }
}

use crate::training::early_stopping::EarlyStopping;
use crate::training::log::EpochRecord;

/// Mutable bookkeeping of one training run, advanced once per epoch.
#[derive(Debug, Clone)]
pub struct TrainingState {
    pub epoch: usize,
    pub history: Vec<EpochRecord>,
    pub early_stopping: EarlyStopping,
}

impl TrainingState {
    pub fn new(early_stopping: EarlyStopping) -> Self {
        Self {
            epoch: 0,
            history: Vec::new(),
            early_stopping,
        }
    }

    /// Called at the end of every epoch, after the log row is written.
    pub fn push_epoch(&mut self, record: EpochRecord) {
        self.epoch = record.epoch;
        self.history.push(record);
    }

    pub fn epochs_completed(&self) -> usize {
        self.history.len()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.early_stopping.best()
    }
}

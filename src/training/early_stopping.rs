use std::path::PathBuf;

use burn::module::Module;
use burn::prelude::*;

use crate::error::Result;
use crate::training::checkpoint::save_checkpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppingState {
    Improving,
    Stalled,
    Stopped,
}

/// Tracks the best lower-is-better score seen so far and persists the model
/// every time it strictly improves.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    counter: usize,
    state: StoppingState,
    checkpoint: PathBuf,
}

impl EarlyStopping {
    /// A patience below one is raised to one.
    pub fn new(patience: usize, checkpoint: impl Into<PathBuf>) -> Self {
        Self {
            patience: patience.max(1),
            best: None,
            counter: 0,
            state: StoppingState::Improving,
            checkpoint: checkpoint.into(),
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn state(&self) -> StoppingState {
        self.state
    }

    pub fn should_stop(&self) -> bool {
        self.state == StoppingState::Stopped
    }

    /// Submits one score. `persist` runs only when the score strictly
    /// improves on the best so far; a failure there is returned as is.
    pub fn submit(&mut self, score: f64, persist: impl FnOnce() -> Result<()>) -> Result<StoppingState> {
        if self.should_stop() {
            return Ok(self.state);
        }

        let improved = match self.best {
            None => true,
            Some(best) => score < best,
        };

        if improved {
            match self.best {
                Some(best) => log::info!("Validation score improved ({best:.6} --> {score:.6}). Saving model ..."),
                None => log::info!("First validation score {score:.6}. Saving model ..."),
            }
            persist()?;
            self.best = Some(score);
            self.counter = 0;
            self.state = StoppingState::Improving;
        } else {
            self.counter += 1;
            log::info!("EarlyStopping counter: {} out of {}", self.counter, self.patience);
            if self.counter >= self.patience {
                self.state = StoppingState::Stopped;
                log::info!("Early stopping triggered: no improvement for {} epochs", self.counter);
            } else {
                self.state = StoppingState::Stalled;
            }
        }
        Ok(self.state)
    }

    /// Submits a score and writes `model` to the checkpoint path on
    /// improvement.
    pub fn step<B: Backend, M: Module<B>>(&mut self, score: f64, model: &M) -> Result<StoppingState> {
        let path = self.checkpoint.clone();
        self.submit(score, || save_checkpoint::<B, M>(model, &path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn run(scores: &[f64], patience: usize) -> (EarlyStopping, usize, Vec<usize>) {
        let mut stopper = EarlyStopping::new(patience, "unused.pt");
        let saves = Cell::new(0);
        let mut counters = Vec::new();
        let mut epochs = 0;
        for &score in scores {
            epochs += 1;
            stopper
                .submit(score, || {
                    saves.set(saves.get() + 1);
                    Ok(())
                })
                .unwrap();
            counters.push(stopper.counter());
            if stopper.should_stop() {
                break;
            }
        }
        assert_eq!(counters.len(), epochs);
        (stopper, saves.get(), counters)
    }

    #[test]
    fn stops_after_patience_non_improving_epochs() {
        let (stopper, saves, counters) = run(&[0.9, 0.7, 0.8, 0.85, 0.95], 2);
        assert!(stopper.should_stop());
        assert_eq!(counters, vec![0, 0, 1, 2]);
        assert_eq!(saves, 2);
        assert_eq!(stopper.best(), Some(0.7));
    }

    #[test]
    fn counter_resets_on_improvement() {
        let (stopper, saves, counters) = run(&[0.5, 0.6, 0.4, 0.45, 0.3], 3);
        assert_eq!(counters, vec![0, 1, 0, 1, 0]);
        assert_eq!(saves, 3);
        assert_eq!(stopper.state(), StoppingState::Improving);
    }

    #[test]
    fn equal_scores_do_not_count_as_improvement() {
        let (stopper, saves, _) = run(&[0.5, 0.5, 0.5], 5);
        assert_eq!(saves, 1);
        assert_eq!(stopper.counter(), 2);
        assert_eq!(stopper.state(), StoppingState::Stalled);
    }

    #[test]
    fn zero_patience_stops_on_first_stall() {
        let (stopper, saves, counters) = run(&[0.5, 0.6, 0.7], 0);
        assert!(stopper.should_stop());
        assert_eq!(counters, vec![0, 1]);
        assert_eq!(saves, 1);
    }

    #[test]
    fn stop_is_terminal() {
        let mut stopper = EarlyStopping::new(1, "unused.pt");
        stopper.submit(1.0, || Ok(())).unwrap();
        assert_eq!(stopper.submit(2.0, || Ok(())).unwrap(), StoppingState::Stopped);

        let state = stopper
            .submit(0.1, || panic!("no checkpoint after stopping"))
            .unwrap();
        assert_eq!(state, StoppingState::Stopped);
        assert_eq!(stopper.counter(), 1);
        assert_eq!(stopper.best(), Some(1.0));
    }

    #[test]
    fn failed_checkpoint_write_is_propagated() {
        let mut stopper = EarlyStopping::new(2, "unused.pt");
        let err = stopper
            .submit(0.3, || Err(std::io::Error::other("disk full").into()))
            .unwrap_err();
        assert!(matches!(err, crate::error::MortalityError::Io(_)));
        assert_eq!(stopper.best(), None);
    }

    #[test]
    fn checkpoint_is_rewritten_only_on_strict_improvement() {
        use crate::model::classifier::testing::StaticScoreModel;
        use burn::backend::NdArray;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.pt");
        let device = Default::default();
        let mut stopper = EarlyStopping::new(3, &path);

        stopper
            .step::<NdArray, _>(0.5, &StaticScoreModel::<NdArray>::new(&device, 1.0))
            .unwrap();
        let first = std::fs::read(&path).unwrap();

        for score in [0.5, 0.7] {
            stopper
                .step::<NdArray, _>(score, &StaticScoreModel::<NdArray>::new(&device, 2.0))
                .unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), first);
        }

        stopper
            .step::<NdArray, _>(0.4, &StaticScoreModel::<NdArray>::new(&device, 3.0))
            .unwrap();
        assert_ne!(std::fs::read(&path).unwrap(), first);
        assert_eq!(stopper.counter(), 0);
    }
}

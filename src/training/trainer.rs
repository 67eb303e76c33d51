use std::path::Path;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};

use crate::data::{BatchShapes, BatchSource, DataLoader};
use crate::error::{MortalityError, Result};
use crate::model::MortalityClassifier;
use crate::training::checkpoint::checkpoint_path;
use crate::training::config::TrainingConfig;
use crate::training::device::Placement;
use crate::training::early_stopping::EarlyStopping;
use crate::training::log::{render_training_curves, EpochRecord, TrainingLog};
use crate::training::state::TrainingState;
use crate::training::validation::{place_batch, predict, ValidationScores};

/// Result of a training run.
///
/// `model` holds the weights of the last epoch run, which are not
/// necessarily the best ones; the best weights are in `checkpoint.pt` and are
/// what evaluation must use.
#[derive(Debug)]
pub struct TrainOutcome<M> {
    pub model: M,
    pub val_loss: f64,
    pub epochs_completed: usize,
    pub best_score: Option<f64>,
    pub stopped_early: bool,
}

fn progress_bar(len: usize, epoch: usize, epochs: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {prefix} {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_prefix(format!("epoch {epoch}/{epochs}"));
    bar
}

/// Trains `model` with Adam for up to `config.epochs` epochs, validating
/// after each one and stopping early on the configured criterion. Writes
/// `training_log.csv`, `checkpoint.pt` and `train_curves.jpg` under
/// `output_dir`.
pub fn train<B, M, T, V>(
    train_loader: &mut DataLoader<T>,
    val_loader: &mut DataLoader<V>,
    model: M,
    config: &TrainingConfig,
    shapes: BatchShapes,
    placement: &Placement<B::Device>,
    output_dir: &Path,
) -> Result<TrainOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + MortalityClassifier<B>,
    M::InnerModule: MortalityClassifier<B::InnerBackend>,
    T: BatchSource,
    V: BatchSource,
{
    log::info!("Model has {} trainable parameters", model.num_params());
    log::info!(
        "Training for up to {} epochs on {placement}, early stopping on {:?} with patience {}",
        config.epochs,
        config.early_stop_criterion,
        config.patience
    );

    let mut optimizer = AdamConfig::new().init::<B, M>();
    let training_log = TrainingLog::create(output_dir)?;
    let mut state = TrainingState::new(EarlyStopping::new(config.patience, checkpoint_path(output_dir)));
    let mut model = model;
    let mut val_loss = f64::NAN;

    for epoch in 1..=config.epochs {
        let epoch_start = Instant::now();

        let (trained, train_loss) = train_epoch::<B, M, _, T>(
            model,
            &mut optimizer,
            train_loader,
            config,
            shapes,
            placement,
            epoch,
        )?;
        model = trained;

        let valid_model = model.valid();
        let predictions = predict::<B::InnerBackend, _, V>(&valid_model, val_loader, shapes, placement)?;
        let scores = ValidationScores::compute::<B::InnerBackend>(&predictions, &placement.host)?;
        val_loss = scores.loss;

        let record = EpochRecord {
            epoch,
            train_loss,
            val_loss: scores.loss,
            val_roc_auc_score: scores.auroc,
        };
        training_log.append(&record)?;
        state.push_epoch(record);

        log::info!(
            "Epoch {epoch}: train loss {train_loss:.4}, val loss {:.4}, val AUROC {:.4}, val AUPRC {:.4} ({:.1}s)",
            scores.loss,
            scores.auroc,
            scores.auprc,
            epoch_start.elapsed().as_secs_f32()
        );

        let criterion = config.early_stop_criterion.score(&scores);
        state
            .early_stopping
            .step::<B::InnerBackend, _>(criterion, &valid_model)?;
        if state.early_stopping.should_stop() {
            log::info!("Early stopping after epoch {epoch}");
            break;
        }
    }

    match render_training_curves(&state.history, output_dir) {
        Ok(path) => log::info!("Training curves saved to {}", path.display()),
        Err(e) => log::warn!("Could not render training curves: {e}"),
    }

    Ok(TrainOutcome {
        model,
        val_loss,
        epochs_completed: state.epochs_completed(),
        best_score: state.best_score(),
        stopped_early: state.early_stopping.should_stop(),
    })
}

fn train_epoch<B, M, O, T>(
    model: M,
    optimizer: &mut O,
    loader: &mut DataLoader<T>,
    config: &TrainingConfig,
    shapes: BatchShapes,
    placement: &Placement<B::Device>,
    epoch: usize,
) -> Result<(M, f64)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + MortalityClassifier<B>,
    O: Optimizer<M, B>,
    T: BatchSource,
{
    let progress = progress_bar(loader.len(), epoch, config.epochs);
    let criterion = CrossEntropyLossConfig::new().init(&placement.host);
    let mut model = model;
    let mut total_loss = 0.0;
    let mut count = 0usize;

    for collated in loader.iter() {
        let collated = collated?;
        let (input, labels) = place_batch::<B, M>(&collated, shapes, &model, placement)?;
        let output = model.forward(input);

        let aux_loss = output.aux_loss_or_zero(&placement.host);
        let logits = output.logits.to_device(&placement.host);
        let loss = criterion.forward(logits, labels) + aux_loss;

        let loss_value = loss.clone().into_scalar().elem::<f64>();
        if !loss_value.is_finite() {
            progress.abandon();
            return Err(MortalityError::NonFiniteLoss {
                epoch,
                batch: count + 1,
            });
        }
        total_loss += loss_value;
        count += 1;

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optimizer.step(config.learning_rate, model, grads);

        progress.set_message(format!("loss {loss_value:.4}"));
        progress.inc(1);
    }
    progress.finish_and_clear();

    if count == 0 {
        return Err(MortalityError::EmptySplit("train"));
    }
    Ok((model, total_loss / count as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MortalityDataset;
    use crate::model::classifier::testing::{scored_records, StaticScoreModel};
    use crate::training::checkpoint::load_checkpoint;
    use crate::training::config::EarlyStopCriterion;
    use crate::training::device::Accelerator;
    use crate::training::log::TRAINING_LOG_FILE;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn loader(samples: &[(f32, usize)], batch_size: usize) -> DataLoader<MortalityDataset> {
        let dataset = MortalityDataset::new(scored_records(samples), None).unwrap();
        DataLoader::new(dataset, batch_size, false, 0, 0)
    }

    #[test]
    fn stalled_ranking_stops_training_early() {
        let dir = tempfile::tempdir().unwrap();
        let device = <TestBackend as Backend>::Device::default();
        let placement = Placement::single(Accelerator::Cpu, device.clone());

        let mut train_loader = loader(
            &[(1.0, 1), (-1.0, 0), (0.5, 1), (-0.5, 0), (2.0, 1), (-2.0, 0), (0.2, 0), (-0.2, 1)],
            4,
        );
        let mut val_loader = loader(&[(1.5, 1), (-1.0, 0), (0.3, 0), (-0.4, 1), (0.8, 1), (-1.2, 0)], 4);
        let shapes = train_loader.probe_shapes().unwrap();

        // a positive scale never changes the ranking, so AUROC stays put
        let config = TrainingConfig {
            epochs: 10,
            patience: 1,
            learning_rate: 1e-4,
            early_stop_criterion: EarlyStopCriterion::Auroc,
            num_workers: 0,
            ..TrainingConfig::default()
        };
        let model = StaticScoreModel::<TestBackend>::new(&device, 1.0);
        let outcome = train::<TestBackend, _, _, _>(
            &mut train_loader,
            &mut val_loader,
            model,
            &config,
            shapes,
            &placement,
            dir.path(),
        )
        .unwrap();

        assert!(outcome.stopped_early);
        assert_eq!(outcome.epochs_completed, 1 + config.patience);

        let rows = TrainingLog::open(dir.path()).read_rows().unwrap();
        assert_eq!(rows.len(), outcome.epochs_completed);
        assert!(rows.len() < config.epochs);
        let header = std::fs::read_to_string(dir.path().join(TRAINING_LOG_FILE)).unwrap();
        assert_eq!(header.lines().count(), rows.len() + 1);

        // the checkpoint holds the first epoch's weights, not the last ones
        let restored = load_checkpoint::<NdArray, _>(
            StaticScoreModel::<NdArray>::new(&device, 0.0),
            &checkpoint_path(dir.path()),
            &device,
        )
        .unwrap();
        let last = outcome.model.valid().scale();
        assert!(restored.scale() > 0.0);
        assert_ne!(restored.scale(), last);
        assert_ne!(restored.scale(), 1.0);
    }
}

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::data::{BatchShapes, DataLoader, MortalityDataset, PairedDataset};
use crate::error::{MortalityError, Result};
use crate::model::{with_model, ModelRunner, ModelSpec, MortalityClassifier};
use crate::training::config::TrainingConfig;
use crate::training::device::Placement;
use crate::training::evaluator::{test, TestSummary};
use crate::training::trainer::train;

pub const MODEL_CONFIG_FILE: &str = "model_config.json";
pub const SUMMARY_FILE: &str = "summary.json";

/// Architecture of a run, written next to its checkpoint so the model can be
/// rebuilt for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: ModelSpec,
    pub shapes: BatchShapes,
}

impl ModelConfig {
    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(MODEL_CONFIG_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(output_dir: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(output_dir.join(MODEL_CONFIG_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Train, validation and test splits padded to one shared sequence length.
/// All three have the sensor and static attribute counts of the train split.
#[derive(Debug, Clone)]
pub struct Splits {
    pub train: MortalityDataset,
    pub val: MortalityDataset,
    pub test: MortalityDataset,
}

impl Splits {
    pub fn new(
        mut train: MortalityDataset,
        mut val: MortalityDataset,
        mut test: MortalityDataset,
        max_seq_len: Option<usize>,
    ) -> Result<Self> {
        let longest = [&train, &val, &test]
            .iter()
            .map(|split| split.longest_record())
            .max()
            .unwrap_or(1);
        let seq_len = max_seq_len.map_or(longest, |cap| longest.min(cap)).max(1);
        for split in [&mut train, &mut val, &mut test] {
            split.set_seq_len(seq_len);
        }

        let expected = train.shapes();
        for split in [&val, &test] {
            expected.check(split.shapes())?;
        }
        Ok(Self { train, val, test })
    }

    /// Reads `train.json`, `val.json` and `test.json` from `data_dir`.
    pub fn load(data_dir: &Path, max_seq_len: Option<usize>) -> Result<Self> {
        let split = |name: &str| MortalityDataset::from_json(data_dir.join(format!("{name}.json")), None);
        Self::new(split("train")?, split("val")?, split("test")?, max_seq_len)
    }

    pub fn seq_len(&self) -> usize {
        self.train.seq_len()
    }
}

pub struct Loaders {
    pub train: DataLoader<PairedDataset>,
    pub val: DataLoader<MortalityDataset>,
    pub test: DataLoader<MortalityDataset>,
}

impl Loaders {
    /// Training draws class-balanced pairs, so it requests half the
    /// configured batch size; validation and test use the full size.
    pub fn new(splits: Splits, config: &TrainingConfig) -> Result<Self> {
        let Splits { train, val, test } = splits;
        let paired = PairedDataset::new(train)?;
        Ok(Self {
            train: DataLoader::new(paired, config.train_batch_size(), true, config.num_workers, config.seed),
            val: DataLoader::new(val, config.batch_size, false, config.num_workers, config.seed),
            test: DataLoader::new(test, config.batch_size, false, config.num_workers, config.seed),
        })
    }
}

struct TrainAndTest<'a, D> {
    loaders: Loaders,
    config: &'a TrainingConfig,
    shapes: BatchShapes,
    placement: &'a Placement<D>,
    output_dir: &'a Path,
}

impl<B: AutodiffBackend> ModelRunner<B> for TrainAndTest<'_, B::Device> {
    type Output = Result<TestSummary>;

    fn run<M>(self, model: M) -> Self::Output
    where
        M: AutodiffModule<B> + MortalityClassifier<B> + 'static,
        M::InnerModule: MortalityClassifier<B::InnerBackend>,
    {
        let Loaders {
            train: mut train_loader,
            val: mut val_loader,
            test: mut test_loader,
        } = self.loaders;

        let outcome = train::<B, M, _, _>(
            &mut train_loader,
            &mut val_loader,
            model,
            self.config,
            self.shapes,
            self.placement,
            self.output_dir,
        )?;
        log::info!(
            "Training finished after {} epochs{} with final validation loss {:.4}",
            outcome.epochs_completed,
            if outcome.stopped_early { " (early stop)" } else { "" },
            outcome.val_loss
        );

        // the last-epoch weights are replaced by the best checkpoint here
        test::<B::InnerBackend, M::InnerModule, _>(
            &mut test_loader,
            self.output_dir,
            self.placement,
            self.config.model.kind,
            self.shapes,
            outcome.model.valid(),
        )
    }
}

/// One complete run: build the model from a probed batch, train it with
/// early stopping, then test the best checkpoint. All artifacts land in
/// `output_dir`.
pub fn train_test<B: AutodiffBackend>(
    splits: Splits,
    config: &TrainingConfig,
    placement: &Placement<B::Device>,
    output_dir: &Path,
) -> Result<TestSummary> {
    config.validate()?;
    std::fs::create_dir_all(output_dir)?;
    B::seed(config.seed);

    let loaders = Loaders::new(splits, config)?;
    log::info!(
        "Batches per epoch: {} train (size {} pairs), {} validation, {} test",
        loaders.train.len(),
        loaders.train.batch_size(),
        loaders.val.len(),
        loaders.test.len()
    );
    let shapes = loaders.train.probe_shapes().ok_or(MortalityError::EmptySplit("train"))?;
    shapes.check(loaders.val.probe_shapes().ok_or(MortalityError::EmptySplit("val"))?)?;
    shapes.check(loaders.test.probe_shapes().ok_or(MortalityError::EmptySplit("test"))?)?;

    ModelConfig {
        model: config.model.clone(),
        shapes,
    }
    .save(output_dir)?;

    let runner = TrainAndTest {
        loaders,
        config,
        shapes,
        placement,
        output_dir,
    };
    with_model::<B, _>(&config.model, shapes, &placement.compute, runner)?
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    pub std: f64,
}

impl MetricStats {
    /// Mean and population standard deviation.
    pub fn new(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { mean: f64::NAN, std: f64::NAN };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: variance.sqrt(),
        }
    }
}

/// Test metrics over repeated runs with different seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAggregate {
    pub runs: usize,
    #[serde(rename = "test_loss")]
    pub loss: MetricStats,
    pub accuracy: MetricStats,
    #[serde(rename = "AUPRC")]
    pub auprc: MetricStats,
    #[serde(rename = "AUROC")]
    pub auroc: MetricStats,
    pub per_run: Vec<TestSummary>,
}

impl RunAggregate {
    pub fn new(summaries: &[TestSummary]) -> Self {
        let stats = |metric: fn(&TestSummary) -> f64| {
            MetricStats::new(&summaries.iter().map(metric).collect::<Vec<_>>())
        };
        Self {
            runs: summaries.len(),
            loss: stats(|s| s.loss),
            accuracy: stats(|s| s.accuracy),
            auprc: stats(|s| s.auprc),
            auroc: stats(|s| s.auroc),
            per_run: summaries.to_vec(),
        }
    }

    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(SUMMARY_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BatchSource, PatientRecord};
    use crate::model::ModelKind;
    use approx::assert_relative_eq;

    fn records(lengths: &[usize], sensors: usize) -> Vec<PatientRecord> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| PatientRecord {
                times: (0..len).map(|t| t as f32).collect(),
                values: (0..sensors).map(|f| vec![f as f32; len]).collect(),
                mask: (0..sensors).map(|f| vec![f == 0; len]).collect(),
                static_features: vec![0.5],
                label: i % 2,
            })
            .collect()
    }

    fn dataset(lengths: &[usize], sensors: usize) -> MortalityDataset {
        MortalityDataset::new(records(lengths, sensors), None).unwrap()
    }

    fn splits(max_seq_len: Option<usize>) -> Splits {
        Splits::new(
            dataset(&[3; 100], 2),
            dataset(&[2, 7, 4, 1], 2),
            dataset(&[5, 2], 2),
            max_seq_len,
        )
        .unwrap()
    }

    #[test]
    fn splits_share_the_longest_sequence_length() {
        let splits = splits(None);
        assert_eq!(splits.seq_len(), 7);
        assert_eq!(splits.val.seq_len(), 7);
        assert_eq!(splits.test.seq_len(), 7);

        assert_eq!(self::splits(Some(4)).test.seq_len(), 4);
        assert_eq!(self::splits(Some(50)).seq_len(), 7);
    }

    #[test]
    fn splits_must_agree_on_sensor_count() {
        let err = Splits::new(
            dataset(&[3; 10], 2),
            dataset(&[4, 4], 2),
            dataset(&[5, 2], 3),
            None,
        )
        .unwrap_err();
        match err {
            MortalityError::ShapeMismatch { expected, found } => {
                assert_eq!(expected.sensor_count, 2);
                assert_eq!(found.sensor_count, 3);
                assert_eq!(expected.max_seq_len, found.max_seq_len);
            }
            other => panic!("expected a shape mismatch, got {other}"),
        }
    }

    #[test]
    fn training_requests_half_batches_of_pairs() {
        let config = TrainingConfig {
            num_workers: 0,
            ..TrainingConfig::default()
        };
        let loaders = Loaders::new(splits(None), &config).unwrap();

        assert_eq!(loaders.train.batch_size(), 32);
        assert_eq!(loaders.val.batch_size(), 64);
        assert_eq!(loaders.test.batch_size(), 64);

        let probe = loaders.train.probe().unwrap();
        assert_eq!(probe.batch_size, 64);
        assert_eq!(loaders.train.source().len(), 50);
    }

    #[test]
    fn model_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            model: ModelSpec::parse("mamba", serde_json::json!({"d_model": 8})).unwrap(),
            shapes: BatchShapes {
                max_seq_len: 12,
                sensor_count: 4,
                static_size: 2,
            },
        };
        config.save(dir.path()).unwrap();
        let loaded = ModelConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.model.kind, ModelKind::Mamba);
    }

    #[test]
    fn aggregate_uses_population_std() {
        let summary = |auroc: f64| TestSummary {
            loss: 0.5,
            accuracy: 0.75,
            auprc: 0.4,
            auroc,
        };
        let aggregate = RunAggregate::new(&[summary(0.6), summary(0.8)]);
        assert_eq!(aggregate.runs, 2);
        assert_relative_eq!(aggregate.auroc.mean, 0.7, epsilon = 1e-12);
        assert_relative_eq!(aggregate.auroc.std, 0.1, epsilon = 1e-12);
        assert_relative_eq!(aggregate.loss.std, 0.0);

        let json = serde_json::to_value(&aggregate).unwrap();
        assert!(json["AUROC"]["mean"].is_number());
        assert!(json["test_loss"]["std"].is_number());
    }
}

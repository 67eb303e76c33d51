use std::path::{Path, PathBuf};

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data::{BatchShapes, BatchSource, DataLoader};
use crate::error::{MortalityError, Result};
use crate::model::{ModelKind, MortalityClassifier};
use crate::training::checkpoint::{checkpoint_path, load_checkpoint};
use crate::training::device::Placement;
use crate::training::metrics::{accuracy, average_precision, roc_auc, ClassificationReport, ConfusionMatrix};
use crate::training::validation::predict;

pub const TEST_RESULTS_FILE: &str = "test_results.json";

/// Headline test metrics, returned for aggregation across runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub loss: f64,
    pub accuracy: f64,
    pub auprc: f64,
    pub auroc: f64,
}

/// Everything one test pass produces.
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub summary: TestSummary,
    pub classification: ClassificationReport,
    pub confusion_matrix: ConfusionMatrix,
}

impl TestReport {
    /// Flat document: the classification report's keys plus `test_loss`,
    /// `accuracy`, `AUPRC`, `AUROC` and `confusion_matrix`.
    pub fn to_json(&self) -> Result<Value> {
        let mut document = match serde_json::to_value(&self.classification)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        document.insert("test_loss".into(), Value::from(self.summary.loss));
        document.insert("accuracy".into(), Value::from(self.summary.accuracy));
        document.insert("AUPRC".into(), Value::from(self.summary.auprc));
        document.insert("AUROC".into(), Value::from(self.summary.auroc));
        document.insert("confusion_matrix".into(), serde_json::to_value(self.confusion_matrix)?);
        Ok(Value::Object(document))
    }

    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(TEST_RESULTS_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(&self.to_json()?)?)?;
        Ok(path)
    }
}

/// Loads `checkpoint.pt` from `output_dir` into `model`, runs one pass over
/// `loader` and writes `test_results.json` next to the checkpoint.
///
/// `model` only has to match the checkpoint's architecture; its current
/// weights are discarded. `shapes` are the ones the model was built for and
/// every test batch must match them.
pub fn test<B, M, S>(
    loader: &mut DataLoader<S>,
    output_dir: &Path,
    placement: &Placement<B::Device>,
    kind: ModelKind,
    shapes: BatchShapes,
    model: M,
) -> Result<TestSummary>
where
    B: Backend,
    M: MortalityClassifier<B>,
    S: BatchSource,
{
    if loader.is_empty() {
        return Err(MortalityError::EmptySplit("test"));
    }
    let model = load_checkpoint::<B, M>(model, &checkpoint_path(output_dir), &placement.compute)?;
    log::info!("Testing {kind} model on {} batches with inputs {shapes}", loader.len());

    let predictions = predict::<B, M, S>(&model, loader, shapes, placement)?;
    let loss = predictions.loss::<B>(&placement.host)?;
    let probabilities = predictions.probabilities::<B>(&placement.host)?;
    let labels = predictions.labels();

    let positive: Vec<f64> = probabilities.iter().map(|p| p[1]).collect();
    let predicted: Vec<usize> = probabilities.iter().map(|p| usize::from(p[1] > p[0])).collect();
    let confusion_matrix = ConfusionMatrix::from_predictions(&predicted, labels);

    let report = TestReport {
        summary: TestSummary {
            loss,
            accuracy: accuracy(&predicted, labels),
            auprc: average_precision(&positive, labels)?,
            auroc: roc_auc(&positive, labels)?,
        },
        classification: ClassificationReport::new(&confusion_matrix),
        confusion_matrix,
    };
    let path = report.save(output_dir)?;

    let summary = report.summary;
    log::info!("Test loss: {:.4}", summary.loss);
    log::info!("Confusion matrix: {confusion_matrix:?}");
    log::info!("Accuracy = {:.4}", summary.accuracy);
    log::info!("AUPRC = {:.4}", summary.auprc);
    log::info!("AUROC = {:.4}", summary.auroc);
    log::info!("Test results written to {}", path.display());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MortalityDataset;
    use crate::model::classifier::testing::{scored_records, StaticScoreModel};
    use crate::training::checkpoint::save_checkpoint;
    use crate::training::device::Accelerator;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn loader() -> DataLoader<MortalityDataset> {
        let scores = [2.0, -1.0, 1.5, -2.0, 0.5, -0.5, 1.0, -1.5, -0.3, 0.7];
        let samples: Vec<(f32, usize)> = scores
            .iter()
            .enumerate()
            .map(|(i, &s)| (s, if i % 2 == 0 { 1 } else { 0 }))
            .collect();
        let dataset = MortalityDataset::new(scored_records(&samples), None).unwrap();
        DataLoader::new(dataset, 4, false, 0, 0)
    }

    #[test]
    fn reloads_checkpoint_and_reports_accuracy() {
        let dir = tempfile::tempdir().unwrap();
        let device = <TestBackend as Backend>::Device::default();
        let placement = Placement::single(Accelerator::Cpu, device.clone());

        let best = StaticScoreModel::<TestBackend>::new(&device, 1.0);
        save_checkpoint::<TestBackend, _>(&best, &checkpoint_path(dir.path())).unwrap();

        // inverted scores would get every sample but two wrong
        let stale = StaticScoreModel::<TestBackend>::new(&device, -1.0);
        let mut loader = loader();
        let shapes = loader.probe_shapes().unwrap();
        let summary = test(&mut loader, dir.path(), &placement, ModelKind::Grud, shapes, stale).unwrap();
        assert_relative_eq!(summary.accuracy, 0.8);
        assert!(summary.auroc > 0.8);

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(TEST_RESULTS_FILE)).unwrap()).unwrap();
        assert_relative_eq!(written["accuracy"].as_f64().unwrap(), 0.8);
        for key in ["test_loss", "AUPRC", "AUROC", "0", "1", "macro avg", "weighted avg"] {
            assert!(written.get(key).is_some(), "missing {key}");
        }
        assert_eq!(written["confusion_matrix"], serde_json::json!([[4, 1], [1, 4]]));
        assert_eq!(written["1"]["support"], 5);
    }

    #[test]
    fn missing_checkpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let device = <TestBackend as Backend>::Device::default();
        let placement = Placement::single(Accelerator::Cpu, device.clone());
        let model = StaticScoreModel::<TestBackend>::new(&device, 1.0);
        let mut loader = loader();
        let shapes = loader.probe_shapes().unwrap();

        let err = test(&mut loader, dir.path(), &placement, ModelKind::Grud, shapes, model).unwrap_err();
        assert!(matches!(err, MortalityError::CheckpointMissing(_)));
        assert!(!dir.path().join(TEST_RESULTS_FILE).exists());
    }

    #[test]
    fn batches_must_match_the_trained_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let device = <TestBackend as Backend>::Device::default();
        let placement = Placement::single(Accelerator::Cpu, device.clone());
        let model = StaticScoreModel::<TestBackend>::new(&device, 1.0);
        save_checkpoint::<TestBackend, _>(&model, &checkpoint_path(dir.path())).unwrap();

        let mut loader = loader();
        let found = loader.probe_shapes().unwrap();
        let trained = BatchShapes {
            sensor_count: found.sensor_count + 1,
            ..found
        };

        let err = test(&mut loader, dir.path(), &placement, ModelKind::Grud, trained, model).unwrap_err();
        match err {
            MortalityError::ShapeMismatch { expected, found: actual } => {
                assert_eq!(expected, trained);
                assert_eq!(actual, found);
            }
            other => panic!("expected a shape mismatch, got {other}"),
        }
        assert!(!dir.path().join(TEST_RESULTS_FILE).exists());
    }
}

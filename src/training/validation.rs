use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::activation::softmax;

use crate::data::{BatchShapes, BatchSource, CollatedBatch, DataLoader, ModelInput};
use crate::error::{MetricError, MortalityError, Result};
use crate::model::{MortalityClassifier, NUM_CLASSES};
use crate::training::device::Placement;
use crate::training::metrics::{average_precision, roc_auc};

/// Checks a collated batch against the run's shapes, turns it into tensors
/// on the host device and moves the model inputs to the compute device
/// unless the model places them itself.
pub(crate) fn place_batch<B, M>(
    collated: &CollatedBatch,
    shapes: BatchShapes,
    model: &M,
    placement: &Placement<B::Device>,
) -> Result<(ModelInput<B>, Tensor<B, 1, Int>)>
where
    B: Backend,
    M: MortalityClassifier<B>,
{
    shapes.check(collated.shapes)?;
    let batch = collated.to_batch::<B>(&placement.host)?;
    let batch = if model.self_places() {
        batch
    } else {
        batch.inputs_to_device(&placement.compute)
    };
    Ok(batch.into_parts())
}

pub(crate) fn to_host_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| MortalityError::TensorData(format!("{e:?}")))
}

/// Raw logits and labels of a whole split, in loader order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predictions {
    logits: Vec<f32>,
    labels: Vec<usize>,
}

impl Predictions {
    pub fn new(logits: Vec<f32>, labels: Vec<usize>) -> Result<Self> {
        let mut predictions = Self::default();
        predictions.extend(logits, &labels)?;
        Ok(predictions)
    }

    pub fn extend(&mut self, logits: Vec<f32>, labels: &[usize]) -> Result<()> {
        if logits.len() != NUM_CLASSES * labels.len() {
            return Err(MortalityError::MalformedBatch(format!(
                "{} logits for {} labels",
                logits.len(),
                labels.len()
            )));
        }
        self.logits.extend(logits);
        self.labels.extend_from_slice(labels);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    fn logits_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(self.logits.clone(), [self.len(), NUM_CLASSES]), device)
    }

    /// Softmax over the class axis, one `[p(0), p(1)]` row per sample.
    pub fn probabilities<B: Backend>(&self, device: &B::Device) -> Result<Vec<[f64; 2]>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let probs = to_host_vec(softmax(self.logits_tensor::<B>(device), 1))?;
        Ok(probs
            .chunks_exact(NUM_CLASSES)
            .map(|row| [row[0] as f64, row[1] as f64])
            .collect())
    }

    /// Mean cross-entropy of the raw logits against the labels.
    pub fn loss<B: Backend>(&self, device: &B::Device) -> Result<f64> {
        if self.is_empty() {
            return Err(MetricError::Empty.into());
        }
        let labels: Vec<i64> = self.labels.iter().map(|&l| l as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [self.len()]), device);
        let loss = CrossEntropyLossConfig::new()
            .init(device)
            .forward(self.logits_tensor::<B>(device), targets);
        Ok(loss.into_scalar().elem::<f64>())
    }
}

/// Headline numbers of one validation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationScores {
    pub loss: f64,
    pub auroc: f64,
    pub auprc: f64,
}

impl ValidationScores {
    pub fn compute<B: Backend>(predictions: &Predictions, device: &B::Device) -> Result<Self> {
        let loss = predictions.loss::<B>(device)?;
        let positive: Vec<f64> = predictions
            .probabilities::<B>(device)?
            .iter()
            .map(|p| p[1])
            .collect();
        Ok(Self {
            loss,
            auroc: roc_auc(&positive, predictions.labels())?,
            auprc: average_precision(&positive, predictions.labels())?,
        })
    }
}

/// One full forward pass over `loader`, accumulating logits on the host.
/// Pass an inference-backend model (`model.valid()`) so no graph is built.
pub fn predict<B, M, S>(
    model: &M,
    loader: &mut DataLoader<S>,
    shapes: BatchShapes,
    placement: &Placement<B::Device>,
) -> Result<Predictions>
where
    B: Backend,
    M: MortalityClassifier<B>,
    S: BatchSource,
{
    let mut predictions = Predictions::default();
    for collated in loader.iter() {
        let collated = collated?;
        let (input, _) = place_batch::<B, M>(&collated, shapes, model, placement)?;
        let logits = model.forward(input).logits.to_device(&placement.host);
        predictions.extend(to_host_vec(logits)?, &collated.labels)?;
    }
    if predictions.is_empty() {
        return Err(MetricError::Empty.into());
    }
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MortalityDataset;
    use crate::model::classifier::testing::{scored_records, StaticScoreModel};
    use crate::training::device::Accelerator;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use proptest::prelude::*;

    type TestBackend = NdArray;

    fn placement() -> Placement<<TestBackend as Backend>::Device> {
        Placement::single(Accelerator::Cpu, Default::default())
    }

    #[test]
    fn loss_uses_raw_logits() {
        let predictions = Predictions::new(vec![0.0, 0.0, 0.0, 0.0], vec![0, 1]).unwrap();
        let loss = predictions.loss::<TestBackend>(&Default::default()).unwrap();
        assert_relative_eq!(loss, std::f64::consts::LN_2, epsilon = 1e-6);
    }

    #[test]
    fn separable_predictions_score_perfectly() {
        let predictions =
            Predictions::new(vec![0.0, 2.0, 0.0, 1.0, 0.0, -1.0, 0.0, -3.0], vec![1, 1, 0, 0]).unwrap();
        let scores = ValidationScores::compute::<TestBackend>(&predictions, &Default::default()).unwrap();
        assert_eq!(scores.auroc, 1.0);
        assert_eq!(scores.auprc, 1.0);
        assert!(scores.loss > 0.0);
    }

    #[test]
    fn single_class_split_fails_loudly() {
        let predictions = Predictions::new(vec![0.0, 1.0, 0.0, 2.0], vec![1, 1]).unwrap();
        let err = ValidationScores::compute::<TestBackend>(&predictions, &Default::default()).unwrap_err();
        assert!(matches!(err, MortalityError::Metric(MetricError::SingleClass { present: 1 })));
    }

    #[test]
    fn predict_accumulates_every_batch_in_order() {
        let device = Default::default();
        let samples = [(2.0, 1), (-1.0, 0), (0.5, 1), (-2.0, 0), (1.0, 1)];
        let dataset = MortalityDataset::new(scored_records(&samples), None).unwrap();
        let shapes = dataset.shapes();
        let mut loader = DataLoader::new(dataset, 2, false, 0, 0);

        let model = StaticScoreModel::<TestBackend>::new(&device, 1.0);
        let predictions = predict(&model, &mut loader, shapes, &placement()).unwrap();

        assert_eq!(predictions.labels(), &[1, 0, 1, 0, 1]);
        let positive: Vec<f64> = predictions
            .probabilities::<TestBackend>(&device)
            .unwrap()
            .iter()
            .map(|p| p[1])
            .collect();
        assert!(positive[0] > positive[2] && positive[2] > positive[1]);
    }

    #[test]
    fn mismatched_batches_are_rejected() {
        let device = Default::default();
        let dataset = MortalityDataset::new(scored_records(&[(1.0, 1), (0.0, 0)]), None).unwrap();
        let mut shapes = dataset.shapes();
        shapes.static_size += 1;
        let mut loader = DataLoader::new(dataset, 2, false, 0, 0);

        let model = StaticScoreModel::<TestBackend>::new(&device, 1.0);
        let err = predict(&model, &mut loader, shapes, &placement()).unwrap_err();
        assert!(matches!(err, MortalityError::ShapeMismatch { .. }));
    }

    proptest! {
        #[test]
        fn probabilities_sum_to_one(rows in prop::collection::vec((-60.0f32..60.0, -60.0f32..60.0), 1..32)) {
            let labels = vec![0; rows.len()];
            let logits = rows.iter().flat_map(|&(a, b)| [a, b]).collect();
            let predictions = Predictions::new(logits, labels).unwrap();
            for p in predictions.probabilities::<TestBackend>(&Default::default()).unwrap() {
                prop_assert!((p[0] + p[1] - 1.0).abs() < 1e-5);
                prop_assert!(p[0] >= 0.0 && p[1] >= 0.0);
            }
        }
    }
}

use burn::module::Param;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use super::blocks::GruCell;
use super::classifier::{ClassifierOutput, MortalityClassifier};
use crate::data::ModelInput;

const EPS: f32 = 1e-6;

fn default_ref_points() -> usize {
    24
}

fn default_recon_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpNetsArgs {
    pub hidden_dim: usize,
    #[serde(default = "default_ref_points")]
    pub ref_points: usize,
    #[serde(default = "default_recon_weight")]
    pub recon_weight: f64,
    #[serde(default)]
    pub dropout: f64,
}

/// Interpolation-prediction network: a per-sensor RBF interpolant resamples
/// every series onto evenly spaced reference points, a GRU reads the
/// resampled grid, and re-interpolating back onto the observed points gives
/// a reconstruction loss.
#[derive(Module, Debug)]
pub struct InterpolationPredictionModel<B: Backend> {
    log_bandwidth: Param<Tensor<B, 1>>,
    cell: GruCell<B>,
    dropout: Dropout,
    classifier: Linear<B>,
    ref_points: usize,
    recon_weight: f64,
}

impl<B: Backend> InterpolationPredictionModel<B> {
    pub fn new(device: &B::Device, output_dims: usize, sensor_count: usize, args: &IpNetsArgs) -> Self {
        Self {
            log_bandwidth: Param::from_tensor(Tensor::zeros([sensor_count], device)),
            cell: GruCell::new(device, 2 * sensor_count, args.hidden_dim),
            dropout: DropoutConfig::new(args.dropout).init(),
            classifier: LinearConfig::new(args.hidden_dim, output_dims).init(device),
            ref_points: args.ref_points.max(1),
            recon_weight: args.recon_weight,
        }
    }

    /// Reference grid spanning [0, last observation time] per sample: [N, R].
    fn reference_times(&self, time: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, _] = time.dims();
        let r = self.ref_points;
        let device = time.device();
        let fractions: Vec<f32> = (0..r)
            .map(|k| if r > 1 { k as f32 / (r - 1) as f32 } else { 0.0 })
            .collect();
        let fractions = Tensor::<B, 2>::from_data(TensorData::new(fractions, [1, r]), &device);
        time.max_dim(1).expand([n, r]) * fractions.expand([n, r])
    }
}

impl<B: Backend> MortalityClassifier<B> for InterpolationPredictionModel<B> {
    fn forward(&self, input: ModelInput<B>) -> ClassifierOutput<B> {
        let ModelInput {
            x,
            time,
            sensor_mask: mask,
            ..
        } = input;
        let [n, f, t] = x.dims();
        let r = self.ref_points;
        let grid = [n, f, r, t];

        let reference = self.reference_times(time.clone());
        let diff = reference.reshape([n, 1, r, 1]).expand(grid) - time.reshape([n, 1, 1, t]).expand(grid);
        let bandwidth = self.log_bandwidth.val().exp().reshape([1, f, 1, 1]).expand(grid);
        let kernel = (bandwidth * diff.clone() * diff).neg().exp();

        // interpolate observed values onto the reference grid
        let weights = kernel.clone() * mask.clone().reshape([n, f, 1, t]).expand(grid);
        let intensity = weights.clone().sum_dim(3).reshape([n, f, r]);
        let smooth = (weights * x.clone().reshape([n, f, 1, t]).expand(grid))
            .sum_dim(3)
            .reshape([n, f, r])
            / intensity.clone().clamp_min(EPS);

        let features = Tensor::cat(vec![smooth.clone(), intensity.add_scalar(1.0).log()], 1);
        let device = features.device();
        let mut h = self.cell.initial_state(n, &device);
        for k in 0..r {
            let step = features.clone().slice([0..n, 0..2 * f, k..k + 1]).reshape([n, 2 * f]);
            h = self.cell.forward(step, h);
        }
        let logits = self.classifier.forward(self.dropout.forward(h));

        // interpolate back onto the observed time points
        let back = kernel.swap_dims(2, 3);
        let recon = (back.clone() * smooth.reshape([n, f, 1, r]).expand([n, f, t, r]))
            .sum_dim(3)
            .reshape([n, f, t])
            / back.sum_dim(3).reshape([n, f, t]).clamp_min(EPS);
        let residual = (recon - x) * mask.clone();
        let recon_loss = (residual.clone() * residual).sum() / mask.sum().clamp_min(1.0);

        ClassifierOutput::with_aux_loss(logits, recon_loss.mul_scalar(self.recon_weight))
    }
}

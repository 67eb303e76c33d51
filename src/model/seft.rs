use burn::module::Param;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{relu, softmax};
use burn::tensor::Distribution;
use serde::{Deserialize, Serialize};

use super::classifier::{ClassifierOutput, MortalityClassifier};
use crate::data::ModelInput;

fn default_sensor_embedding_dim() -> usize {
    8
}

fn default_time_frequencies() -> usize {
    4
}

fn default_max_timescale() -> f64 {
    100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeftArgs {
    pub hidden_dim: usize,
    #[serde(default = "default_sensor_embedding_dim")]
    pub sensor_embedding_dim: usize,
    #[serde(default = "default_time_frequencies")]
    pub time_frequencies: usize,
    #[serde(default = "default_max_timescale")]
    pub max_timescale: f64,
    #[serde(default)]
    pub dropout: f64,
}

/// Set functions for time series: every observed (sensor, time, value)
/// triple is an element of a set, encoded independently and pooled with
/// attention.
#[derive(Module, Debug)]
pub struct DeepSetAttentionModel<B: Backend> {
    sensor_embedding: Param<Tensor<B, 2>>,
    phi_in: Linear<B>,
    phi_out: Linear<B>,
    attention: Linear<B>,
    dropout: Dropout,
    rho_hidden: Linear<B>,
    rho_out: Linear<B>,
    time_frequencies: usize,
    max_timescale: f64,
}

impl<B: Backend> DeepSetAttentionModel<B> {
    pub fn new(device: &B::Device, output_dims: usize, n_modalities: usize, args: &SeftArgs) -> Self {
        let hidden = args.hidden_dim;
        let element_dim = 1 + 2 * args.time_frequencies + args.sensor_embedding_dim;
        Self {
            sensor_embedding: Param::from_tensor(Tensor::random(
                [n_modalities, args.sensor_embedding_dim],
                Distribution::Normal(0.0, 1.0),
                device,
            )),
            phi_in: LinearConfig::new(element_dim, hidden).init(device),
            phi_out: LinearConfig::new(hidden, hidden).init(device),
            attention: LinearConfig::new(hidden, 1).init(device),
            dropout: DropoutConfig::new(args.dropout).init(),
            rho_hidden: LinearConfig::new(hidden, hidden).init(device),
            rho_out: LinearConfig::new(hidden, output_dims).init(device),
            time_frequencies: args.time_frequencies,
            max_timescale: args.max_timescale,
        }
    }

    /// sin/cos features of each observation time: [N, F*T, 2K].
    fn time_encoding(&self, time: Tensor<B, 2>, sensors: usize) -> Tensor<B, 3> {
        let [n, t] = time.dims();
        let k = self.time_frequencies;
        let set_size = sensors * t;
        let scales: Vec<f32> = (0..k)
            .map(|i| self.max_timescale.powf(-(i as f64) / k.max(1) as f64) as f32)
            .collect();
        let scales = Tensor::<B, 3>::from_data(TensorData::new(scales, [1, 1, k]), &time.device());

        let angles = time
            .reshape([n, 1, t])
            .expand([n, sensors, t])
            .reshape([n, set_size, 1])
            .expand([n, set_size, k])
            * scales.expand([n, set_size, k]);
        Tensor::cat(vec![angles.clone().sin(), angles.cos()], 2)
    }
}

impl<B: Backend> MortalityClassifier<B> for DeepSetAttentionModel<B> {
    fn forward(&self, input: ModelInput<B>) -> ClassifierOutput<B> {
        let [n, f, t] = input.x.dims();
        let [_, e] = self.sensor_embedding.val().dims();
        let set_size = f * t;

        let values = input.x.reshape([n, set_size, 1]);
        let times = self.time_encoding(input.time, f);
        let sensors = self
            .sensor_embedding
            .val()
            .reshape([1, f, 1, e])
            .expand([n, f, t, e])
            .reshape([n, set_size, e]);
        let elements = Tensor::cat(vec![values, times, sensors], 2);

        let encoded = relu(self.phi_out.forward(relu(self.phi_in.forward(elements))));
        let unobserved = input.sensor_mask.reshape([n, set_size, 1]).lower_elem(0.5);
        let scores = self.attention.forward(encoded.clone()).mask_fill(unobserved, -1e9);
        let weights = softmax(scores, 1);

        let [_, _, hidden] = encoded.dims();
        let pooled = (weights.expand([n, set_size, hidden]) * encoded)
            .sum_dim(1)
            .reshape([n, hidden]);
        let pooled = self.dropout.forward(pooled);
        ClassifierOutput::logits(self.rho_out.forward(relu(self.rho_hidden.forward(pooled))))
    }
}

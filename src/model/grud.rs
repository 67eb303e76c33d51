use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;
use serde::{Deserialize, Serialize};

use super::blocks::GruCell;
use super::classifier::{ClassifierOutput, MortalityClassifier};
use crate::data::ModelInput;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrudArgs {
    pub hidden_dim: usize,
    #[serde(default)]
    pub dropout: f64,
}

/// GRU-D: a GRU whose inputs decay towards zero and whose hidden state decays
/// with the time since each sensor was last observed.
#[derive(Module, Debug)]
pub struct GrudModel<B: Backend> {
    input_decay: Linear<B>,
    hidden_decay: Linear<B>,
    cell: GruCell<B>,
    static_proj: Linear<B>,
    dropout: Dropout,
    classifier: Linear<B>,
}

impl<B: Backend> GrudModel<B> {
    pub fn new(
        device: &B::Device,
        input_dim: usize,
        static_dim: usize,
        output_dims: usize,
        args: &GrudArgs,
    ) -> Self {
        let hidden = args.hidden_dim;
        Self {
            input_decay: LinearConfig::new(input_dim, input_dim).init(device),
            hidden_decay: LinearConfig::new(input_dim, hidden).init(device),
            cell: GruCell::new(device, 2 * input_dim, hidden),
            static_proj: LinearConfig::new(static_dim, hidden).init(device),
            dropout: DropoutConfig::new(args.dropout).init(),
            classifier: LinearConfig::new(2 * hidden, output_dims).init(device),
        }
    }

    fn device(&self) -> B::Device {
        self.classifier.weight.val().device()
    }
}

impl<B: Backend> MortalityClassifier<B> for GrudModel<B> {
    fn forward(&self, input: ModelInput<B>) -> ClassifierOutput<B> {
        let device = self.device();
        let x = input.x.to_device(&device);
        let mask = input.sensor_mask.to_device(&device);
        let delta = input.delta.to_device(&device);
        let static_features = input.static_features.to_device(&device);

        let [n, f, t] = x.dims();
        let step = |tensor: &Tensor<B, 3>, i: usize| tensor.clone().slice([0..n, 0..f, i..i + 1]).reshape([n, f]);

        let mut h = self.cell.initial_state(n, &device);
        let mut last_observed = Tensor::<B, 2>::zeros([n, f], &device);

        for i in 0..t {
            let (x_t, m_t, d_t) = (step(&x, i), step(&mask, i), step(&delta, i));
            let missing = m_t.clone().neg().add_scalar(1.0);

            let gamma_x = relu(self.input_decay.forward(d_t.clone())).neg().exp();
            let gamma_h = relu(self.hidden_decay.forward(d_t)).neg().exp();

            let imputed =
                m_t.clone() * x_t.clone() + missing.clone() * gamma_x * last_observed.clone();
            last_observed = m_t.clone() * x_t + missing * last_observed;

            h = self
                .cell
                .forward(Tensor::cat(vec![imputed, m_t], 1), gamma_h * h);
        }

        let static_embedding = relu(self.static_proj.forward(static_features));
        let features = Tensor::cat(vec![self.dropout.forward(h), static_embedding], 1);
        ClassifierOutput::logits(self.classifier.forward(features))
    }

    fn self_places(&self) -> bool {
        true
    }
}

use burn::module::Param;
use burn::nn::transformer::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::Distribution;
use serde::{Deserialize, Serialize};

use super::blocks::{masked_mean, observed_steps, step_features};
use super::classifier::{ClassifierOutput, MortalityClassifier};
use crate::data::ModelInput;
use crate::error::{MortalityError, Result};

fn default_heads() -> usize {
    2
}

fn default_layers() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformerArgs {
    pub d_model: usize,
    #[serde(default = "default_heads")]
    pub n_heads: usize,
    #[serde(default = "default_layers")]
    pub n_layers: usize,
    /// Feed-forward width, `4 * d_model` when absent.
    #[serde(default)]
    pub d_ff: Option<usize>,
    #[serde(default)]
    pub dropout: f64,
}

impl TransformerArgs {
    pub fn validate(&self) -> Result<()> {
        if self.n_heads == 0 || self.d_model % self.n_heads != 0 {
            return Err(MortalityError::InvalidModelConfig(format!(
                "d_model ({}) must be a positive multiple of n_heads ({})",
                self.d_model, self.n_heads
            )));
        }
        Ok(())
    }
}

/// Transformer encoder over time steps with a learned positional table, so
/// it must know the longest sequence it will see when it is built.
#[derive(Module, Debug)]
pub struct EncoderClassifierRegular<B: Backend> {
    input_proj: Linear<B>,
    time_proj: Linear<B>,
    positions: Param<Tensor<B, 2>>,
    encoder: TransformerEncoder<B>,
    static_proj: Linear<B>,
    dropout: Dropout,
    classifier: Linear<B>,
    max_timepoint_count: usize,
}

impl<B: Backend> EncoderClassifierRegular<B> {
    pub fn new(
        device: &B::Device,
        num_classes: usize,
        max_timepoint_count: usize,
        sensors_count: usize,
        static_count: usize,
        args: &TransformerArgs,
    ) -> Self {
        let d = args.d_model;
        Self {
            input_proj: LinearConfig::new(2 * sensors_count, d).init(device),
            time_proj: LinearConfig::new(1, d).init(device),
            positions: Param::from_tensor(Tensor::random(
                [max_timepoint_count, d],
                Distribution::Normal(0.0, 0.02),
                device,
            )),
            encoder: TransformerEncoderConfig::new(d, args.d_ff.unwrap_or(4 * d), args.n_heads, args.n_layers)
                .with_dropout(args.dropout)
                .init(device),
            static_proj: LinearConfig::new(static_count, d).init(device),
            dropout: DropoutConfig::new(args.dropout).init(),
            classifier: LinearConfig::new(2 * d, num_classes).init(device),
            max_timepoint_count,
        }
    }

    pub fn max_timepoint_count(&self) -> usize {
        self.max_timepoint_count
    }
}

impl<B: Backend> MortalityClassifier<B> for EncoderClassifierRegular<B> {
    fn forward(&self, input: ModelInput<B>) -> ClassifierOutput<B> {
        let [n, _, t] = input.x.dims();
        let [_, d] = self.positions.val().dims();

        let positions = self.positions.val().slice([0..t, 0..d]).reshape([1, t, d]).expand([n, t, d]);
        let tokens = self.input_proj.forward(step_features(input.x, input.sensor_mask.clone()))
            + self.time_proj.forward(input.time.reshape([n, t, 1]))
            + positions;

        let encoded = self.encoder.forward(TransformerEncoderInput::new(tokens));
        let pooled = masked_mean(encoded, observed_steps(input.sensor_mask));
        let static_embedding = relu(self.static_proj.forward(input.static_features));

        let features = self.dropout.forward(Tensor::cat(vec![pooled, static_embedding], 1));
        ClassifierOutput::logits(self.classifier.forward(features))
    }
}

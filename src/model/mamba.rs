use burn::module::Param;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{relu, silu};
use burn::tensor::Distribution;
use serde::{Deserialize, Serialize};

use super::blocks::{masked_mean, observed_steps, step_features};
use super::classifier::{ClassifierOutput, MortalityClassifier};
use crate::data::ModelInput;

fn default_layers() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MambaArgs {
    pub d_model: usize,
    #[serde(default = "default_layers")]
    pub n_layers: usize,
    #[serde(default)]
    pub dropout: f64,
}

/// Residual selective state-space block. The step size is computed from the
/// input, so each channel decides per time step how much history to keep.
#[derive(Module, Debug)]
pub struct SelectiveScanBlock<B: Backend> {
    norm: LayerNorm<B>,
    in_proj: Linear<B>,
    gate_proj: Linear<B>,
    step_proj: Linear<B>,
    input_gain: Linear<B>,
    out_proj: Linear<B>,
    log_decay: Param<Tensor<B, 1>>,
    skip: Param<Tensor<B, 1>>,
}

impl<B: Backend> SelectiveScanBlock<B> {
    pub fn new(device: &B::Device, d_model: usize) -> Self {
        Self {
            norm: LayerNormConfig::new(d_model).init(device),
            in_proj: LinearConfig::new(d_model, d_model).init(device),
            gate_proj: LinearConfig::new(d_model, d_model).init(device),
            step_proj: LinearConfig::new(d_model, d_model).init(device),
            input_gain: LinearConfig::new(d_model, d_model).init(device),
            out_proj: LinearConfig::new(d_model, d_model).init(device),
            log_decay: Param::from_tensor(Tensor::zeros([d_model], device)),
            skip: Param::from_tensor(Tensor::ones([d_model], device)),
        }
    }

    /// [N, T, D] -> [N, T, D]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [n, t, d] = x.dims();
        let normed = self.norm.forward(x.clone());
        let u = self.in_proj.forward(normed.clone());
        let gate = silu(self.gate_proj.forward(normed));

        // softplus keeps the step size positive
        let step = self.step_proj.forward(u.clone()).exp().add_scalar(1.0).log();
        let rate = self.log_decay.val().exp().reshape([1, 1, d]).expand([n, t, d]);
        let decay = (step * rate).neg().exp();
        let drive = self.input_gain.forward(u.clone());

        let mut h = Tensor::<B, 2>::zeros([n, d], &x.device());
        let mut states = Vec::with_capacity(t);
        for i in 0..t {
            let a = decay.clone().slice([0..n, i..i + 1, 0..d]).reshape([n, d]);
            let b = drive.clone().slice([0..n, i..i + 1, 0..d]).reshape([n, d]);
            h = a.clone() * h + a.neg().add_scalar(1.0) * b;
            states.push(h.clone());
        }
        let scanned: Tensor<B, 3> = Tensor::stack(states, 1);

        let skip = self.skip.val().reshape([1, 1, d]).expand([n, t, d]);
        let y = (scanned + u * skip) * gate;
        x + self.out_proj.forward(y)
    }
}

/// Stack of selective-scan blocks over the time axis, pooled over observed
/// steps and joined with the static attributes.
#[derive(Module, Debug)]
pub struct CustomMambaModel<B: Backend> {
    input_proj: Linear<B>,
    time_proj: Linear<B>,
    positions: Param<Tensor<B, 2>>,
    blocks: Vec<SelectiveScanBlock<B>>,
    norm: LayerNorm<B>,
    static_proj: Linear<B>,
    dropout: Dropout,
    classifier: Linear<B>,
    max_seq_length: usize,
}

impl<B: Backend> CustomMambaModel<B> {
    pub fn new(
        device: &B::Device,
        max_seq_length: usize,
        num_classes: usize,
        static_size: usize,
        sensor_count: usize,
        args: &MambaArgs,
    ) -> Self {
        let d = args.d_model;
        Self {
            input_proj: LinearConfig::new(2 * sensor_count, d).init(device),
            time_proj: LinearConfig::new(1, d).init(device),
            positions: Param::from_tensor(Tensor::random(
                [max_seq_length, d],
                Distribution::Normal(0.0, 0.02),
                device,
            )),
            blocks: (0..args.n_layers)
                .map(|_| SelectiveScanBlock::new(device, d))
                .collect(),
            norm: LayerNormConfig::new(d).init(device),
            static_proj: LinearConfig::new(static_size, d).init(device),
            dropout: DropoutConfig::new(args.dropout).init(),
            classifier: LinearConfig::new(2 * d, num_classes).init(device),
            max_seq_length,
        }
    }

    pub fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }
}

impl<B: Backend> MortalityClassifier<B> for CustomMambaModel<B> {
    fn forward(&self, input: ModelInput<B>) -> ClassifierOutput<B> {
        let [n, _, t] = input.x.dims();
        let [_, d] = self.positions.val().dims();

        let positions = self.positions.val().slice([0..t, 0..d]).reshape([1, t, d]).expand([n, t, d]);
        let mut hidden = self.input_proj.forward(step_features(input.x, input.sensor_mask.clone()))
            + self.time_proj.forward(input.time.reshape([n, t, 1]))
            + positions;
        for block in &self.blocks {
            hidden = block.forward(hidden);
        }
        let hidden = self.norm.forward(hidden);

        let pooled = masked_mean(hidden, observed_steps(input.sensor_mask));
        let static_embedding = relu(self.static_proj.forward(input.static_features));
        let features = self.dropout.forward(Tensor::cat(vec![pooled, static_embedding], 1));
        ClassifierOutput::logits(self.classifier.forward(features))
    }
}

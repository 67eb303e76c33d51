use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};

/// Single GRU step; the recurrent variants unroll it over time themselves so
/// they can rewrite the hidden state between steps.
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    input_gates: Linear<B>,
    hidden_gates: Linear<B>,
    hidden_size: usize,
}

impl<B: Backend> GruCell<B> {
    pub fn new(device: &B::Device, input_size: usize, hidden_size: usize) -> Self {
        Self {
            input_gates: LinearConfig::new(input_size, 3 * hidden_size).init(device),
            hidden_gates: LinearConfig::new(hidden_size, 3 * hidden_size).init(device),
            hidden_size,
        }
    }

    pub fn initial_state(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 2> {
        Tensor::zeros([batch_size, self.hidden_size], device)
    }

    /// `x`: [N, input], `h`: [N, hidden] -> [N, hidden]
    pub fn forward(&self, x: Tensor<B, 2>, h: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, _] = x.dims();
        let size = self.hidden_size;

        let gi = self.input_gates.forward(x);
        let gh = self.hidden_gates.forward(h.clone());
        let gate = |t: &Tensor<B, 2>, k: usize| t.clone().slice([0..n, k * size..(k + 1) * size]);

        let reset = sigmoid(gate(&gi, 0) + gate(&gh, 0));
        let update = sigmoid(gate(&gi, 1) + gate(&gh, 1));
        let candidate = tanh(gate(&gi, 2) + reset * gate(&gh, 2));

        update.clone().neg().add_scalar(1.0) * candidate + update * h
    }
}

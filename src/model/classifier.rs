use burn::prelude::*;

use crate::data::ModelInput;

/// What a forward pass yields: class logits and an optional auxiliary loss
/// (reconstruction terms and the like) that is added to the classification
/// loss during training.
#[derive(Debug, Clone)]
pub struct ClassifierOutput<B: Backend> {
    /// [N, 2]
    pub logits: Tensor<B, 2>,
    /// [1]
    pub aux_loss: Option<Tensor<B, 1>>,
}

impl<B: Backend> ClassifierOutput<B> {
    pub fn logits(logits: Tensor<B, 2>) -> Self {
        Self {
            logits,
            aux_loss: None,
        }
    }

    pub fn with_aux_loss(logits: Tensor<B, 2>, aux_loss: Tensor<B, 1>) -> Self {
        Self {
            logits,
            aux_loss: Some(aux_loss),
        }
    }

    /// Auxiliary loss on `device`, zero when the model has none.
    pub fn aux_loss_or_zero(&self, device: &B::Device) -> Tensor<B, 1> {
        match &self.aux_loss {
            Some(aux) => aux.clone().to_device(device),
            None => Tensor::zeros([1], device),
        }
    }
}

/// Capability shared by every mortality model.
pub trait MortalityClassifier<B: Backend>: Module<B> {
    fn forward(&self, input: ModelInput<B>) -> ClassifierOutput<B>;

    /// Models that move their inputs onto their own device; the training and
    /// evaluation loops skip the explicit transfer for them.
    fn self_places(&self) -> bool {
        false
    }
}

pub mod blocks;
pub mod classifier;
pub mod factory;
pub mod grud;
pub mod ipnets;
pub mod mamba;
pub mod seft;
pub mod transformer;

pub use classifier::{ClassifierOutput, MortalityClassifier};
pub use factory::{with_model, ModelKind, ModelRunner, ModelSpec, NUM_CLASSES};
pub use grud::{GrudArgs, GrudModel};
pub use ipnets::{InterpolationPredictionModel, IpNetsArgs};
pub use mamba::{CustomMambaModel, MambaArgs};
pub use seft::{DeepSetAttentionModel, SeftArgs};
pub use transformer::{EncoderClassifierRegular, TransformerArgs};

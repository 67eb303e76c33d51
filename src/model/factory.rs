use std::fmt;
use std::str::FromStr;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::classifier::MortalityClassifier;
use super::grud::{GrudArgs, GrudModel};
use super::ipnets::{InterpolationPredictionModel, IpNetsArgs};
use super::mamba::{CustomMambaModel, MambaArgs};
use super::seft::{DeepSetAttentionModel, SeftArgs};
use super::transformer::{EncoderClassifierRegular, TransformerArgs};
use crate::data::BatchShapes;
use crate::error::{MortalityError, Result};

/// Every model predicts survived / deceased.
pub const NUM_CLASSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Grud,
    IpNets,
    Seft,
    Transformer,
    Mamba,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Grud,
        ModelKind::IpNets,
        ModelKind::Seft,
        ModelKind::Transformer,
        ModelKind::Mamba,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Grud => "grud",
            ModelKind::IpNets => "ipnets",
            ModelKind::Seft => "seft",
            ModelKind::Transformer => "transformer",
            ModelKind::Mamba => "mamba",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = MortalityError;

    fn from_str(s: &str) -> Result<Self> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MortalityError::UnknownModel(s.to_string()))
    }
}

/// Model family plus its free-form architecture arguments, as written in the
/// training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub kind: ModelKind,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ModelSpec {
    pub fn new(kind: ModelKind, args: Value) -> Result<Self> {
        match args {
            Value::Object(args) => Ok(Self { kind, args }),
            Value::Null => Ok(Self {
                kind,
                args: Map::new(),
            }),
            other => Err(MortalityError::InvalidModelConfig(format!(
                "arguments for '{kind}' must be a mapping, got {other}"
            ))),
        }
    }

    /// Resolves a model name and argument map coming from untyped input.
    pub fn parse(kind: &str, args: Value) -> Result<Self> {
        Self::new(kind.parse()?, args)
    }

    fn args<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.args.clone())).map_err(|source| {
            MortalityError::InvalidModelArgs {
                model: self.kind.as_str(),
                source,
            }
        })
    }
}

/// Receives the concrete model once the factory has built it. Keeps the
/// strongly typed module intact for the optimizer and recorder without
/// boxing it behind a trait object.
pub trait ModelRunner<B: AutodiffBackend> {
    type Output;

    fn run<M>(self, model: M) -> Self::Output
    where
        M: AutodiffModule<B> + MortalityClassifier<B> + 'static,
        M::InnerModule: MortalityClassifier<B::InnerBackend>;
}

fn require_positive(kind: ModelKind, name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(MortalityError::InvalidModelConfig(format!(
            "'{kind}' needs {name} > 0"
        )));
    }
    Ok(())
}

fn init_grud<B: AutodiffBackend>(
    spec: &ModelSpec,
    device: &B::Device,
    sensor_count: usize,
    static_size: usize,
) -> Result<GrudModel<B>> {
    let args: GrudArgs = spec.args()?;
    require_positive(spec.kind, "hidden_dim", args.hidden_dim)?;
    Ok(GrudModel::new(device, sensor_count, static_size, NUM_CLASSES, &args))
}

fn init_ipnets<B: AutodiffBackend>(
    spec: &ModelSpec,
    device: &B::Device,
    sensor_count: usize,
) -> Result<InterpolationPredictionModel<B>> {
    let args: IpNetsArgs = spec.args()?;
    require_positive(spec.kind, "hidden_dim", args.hidden_dim)?;
    Ok(InterpolationPredictionModel::new(device, NUM_CLASSES, sensor_count, &args))
}

fn init_seft<B: AutodiffBackend>(
    spec: &ModelSpec,
    device: &B::Device,
    sensor_count: usize,
) -> Result<DeepSetAttentionModel<B>> {
    let args: SeftArgs = spec.args()?;
    require_positive(spec.kind, "hidden_dim", args.hidden_dim)?;
    Ok(DeepSetAttentionModel::new(device, NUM_CLASSES, sensor_count, &args))
}

fn init_transformer<B: AutodiffBackend>(
    spec: &ModelSpec,
    device: &B::Device,
    shapes: BatchShapes,
) -> Result<EncoderClassifierRegular<B>> {
    let args: TransformerArgs = spec.args()?;
    require_positive(spec.kind, "d_model", args.d_model)?;
    args.validate()?;
    Ok(EncoderClassifierRegular::new(
        device,
        NUM_CLASSES,
        shapes.max_seq_len,
        shapes.sensor_count,
        shapes.static_size,
        &args,
    ))
}

fn init_mamba<B: AutodiffBackend>(
    spec: &ModelSpec,
    device: &B::Device,
    shapes: BatchShapes,
) -> Result<CustomMambaModel<B>> {
    let args: MambaArgs = spec.args()?;
    require_positive(spec.kind, "d_model", args.d_model)?;
    Ok(CustomMambaModel::new(
        device,
        shapes.max_seq_len,
        NUM_CLASSES,
        shapes.static_size,
        shapes.sensor_count,
        &args,
    ))
}

/// Builds the model described by `spec` for batches of `shapes` and hands it
/// to `runner`. Configuration errors surface here, before any training.
pub fn with_model<B, R>(spec: &ModelSpec, shapes: BatchShapes, device: &B::Device, runner: R) -> Result<R::Output>
where
    B: AutodiffBackend,
    R: ModelRunner<B>,
{
    log::info!("Building {} model for inputs {}", spec.kind, shapes);
    if shapes.max_seq_len == 0 || shapes.sensor_count == 0 {
        return Err(MortalityError::InvalidModelConfig(format!(
            "cannot build a model for empty inputs {shapes}"
        )));
    }

    let output = match spec.kind {
        ModelKind::Grud => runner.run(init_grud::<B>(spec, device, shapes.sensor_count, shapes.static_size)?),
        ModelKind::IpNets => runner.run(init_ipnets::<B>(spec, device, shapes.sensor_count)?),
        ModelKind::Seft => runner.run(init_seft::<B>(spec, device, shapes.sensor_count)?),
        ModelKind::Transformer => runner.run(init_transformer::<B>(spec, device, shapes)?),
        ModelKind::Mamba => runner.run(init_mamba::<B>(spec, device, shapes)?),
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CollatedBatch;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::Module;
    use serde_json::json;

    type TestBackend = Autodiff<NdArray>;

    fn shapes() -> BatchShapes {
        BatchShapes {
            max_seq_len: 4,
            sensor_count: 3,
            static_size: 2,
        }
    }

    fn batch() -> CollatedBatch {
        let (n, f, t) = (2, 3, 4);
        let mask: Vec<f32> = (0..n * f * t).map(|i| if i % 3 == 0 { 0.0 } else { 1.0 }).collect();
        CollatedBatch {
            batch_size: n,
            shapes: shapes(),
            values: (0..n * f * t).map(|i| i as f32 / 10.0).collect(),
            times: vec![0.0, 0.5, 1.5, 3.0, 0.0, 1.0, 2.0, 0.0],
            static_features: vec![0.3, 1.0, -0.2, 0.0],
            labels: vec![1, 0],
            mask,
            delta: vec![0.5; n * f * t],
        }
    }

    struct LogitDims;

    impl ModelRunner<TestBackend> for LogitDims {
        type Output = ([usize; 2], usize);

        fn run<M>(self, model: M) -> Self::Output
        where
            M: AutodiffModule<TestBackend> + MortalityClassifier<TestBackend> + 'static,
            M::InnerModule: MortalityClassifier<<TestBackend as AutodiffBackend>::InnerBackend>,
        {
            let device = Default::default();
            let (input, _) = batch().to_batch::<TestBackend>(&device).unwrap().into_parts();
            (model.forward(input).logits.dims(), model.num_params())
        }
    }

    fn build(kind: &str, args: Value) -> Result<([usize; 2], usize)> {
        let spec = ModelSpec::parse(kind, args)?;
        with_model::<TestBackend, _>(&spec, shapes(), &Default::default(), LogitDims)
    }

    #[test]
    fn every_variant_yields_two_logits_per_sample() {
        let cases = [
            ("grud", json!({"hidden_dim": 8})),
            ("ipnets", json!({"hidden_dim": 8, "ref_points": 6})),
            ("seft", json!({"hidden_dim": 8})),
            ("transformer", json!({"d_model": 8, "n_heads": 2, "n_layers": 1})),
            ("mamba", json!({"d_model": 8, "n_layers": 1})),
        ];
        for (kind, args) in cases {
            let (dims, params) = build(kind, args).unwrap();
            assert_eq!(dims, [2, 2], "{kind}");
            assert!(params > 0, "{kind}");
        }
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = build("lstm", json!({})).unwrap_err();
        assert!(matches!(err, MortalityError::UnknownModel(name) if name == "lstm"));
    }

    #[test]
    fn missing_required_argument_is_a_configuration_error() {
        let err = build("grud", json!({"dropout": 0.1})).unwrap_err();
        assert!(matches!(err, MortalityError::InvalidModelArgs { model: "grud", .. }));
    }

    #[test]
    fn unexpected_argument_is_rejected() {
        let err = build("seft", json!({"hidden_dim": 4, "n_heads": 2})).unwrap_err();
        assert!(matches!(err, MortalityError::InvalidModelArgs { model: "seft", .. }));
    }

    #[test]
    fn transformer_heads_must_divide_width() {
        let err = build("transformer", json!({"d_model": 6, "n_heads": 4})).unwrap_err();
        assert!(matches!(err, MortalityError::InvalidModelConfig(_)));
    }

    #[test]
    fn names_round_trip_through_serde() {
        for kind in ModelKind::ALL {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, json!(kind.as_str()));
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
        }
    }
}

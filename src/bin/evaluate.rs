use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;

use mortality_classification::data::{BatchShapes, DataLoader, MortalityDataset};
use mortality_classification::model::{with_model, ModelKind, ModelRunner, MortalityClassifier};
use mortality_classification::training::{
    default_placement, test, ModelConfig, Placement, TestSummary, TrainingBackend,
};

/// Re-evaluate the best checkpoint of a finished run on a data split.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Run directory containing checkpoint.pt and model_config.json.
    #[arg(long)]
    run_dir: PathBuf,

    /// JSON file of patient records to evaluate on.
    #[arg(long)]
    data: PathBuf,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    #[arg(long, default_value_t = 0)]
    num_workers: usize,
}

struct Evaluate<'a, D> {
    loader: DataLoader<MortalityDataset>,
    run_dir: &'a Path,
    placement: &'a Placement<D>,
    kind: ModelKind,
    shapes: BatchShapes,
}

impl<B: AutodiffBackend> ModelRunner<B> for Evaluate<'_, B::Device> {
    type Output = mortality_classification::Result<TestSummary>;

    fn run<M>(self, model: M) -> Self::Output
    where
        M: AutodiffModule<B> + MortalityClassifier<B> + 'static,
        M::InnerModule: MortalityClassifier<B::InnerBackend>,
    {
        let mut loader = self.loader;
        test::<B::InnerBackend, M::InnerModule, _>(
            &mut loader,
            self.run_dir,
            self.placement,
            self.kind,
            self.shapes,
            model.valid(),
        )
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let model_config = ModelConfig::load(&args.run_dir)
        .with_context(|| format!("no model_config.json in {}", args.run_dir.display()))?;
    let placement = default_placement();

    let mut dataset = MortalityDataset::from_json(&args.data, None)?;
    dataset.set_seq_len(model_config.shapes.max_seq_len);
    let loader = DataLoader::new(dataset, args.batch_size, false, args.num_workers, 0);

    let runner = Evaluate {
        loader,
        run_dir: &args.run_dir,
        placement: &placement,
        kind: model_config.model.kind,
        shapes: model_config.shapes,
    };
    let summary = with_model::<TrainingBackend, _>(&model_config.model, model_config.shapes, &placement.compute, runner)??;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use mortality_classification::training::{
    default_placement, train_test, RunAggregate, Splits, TrainingBackend, TrainingConfig,
};

/// Train and test an in-hospital mortality classifier.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Training configuration (YAML). A default one is written if missing.
    #[arg(long, default_value = "configs/train_config.yaml")]
    config: PathBuf,

    /// Directory holding train.json, val.json and test.json.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Where run_<i>/ directories and summary.json are written.
    #[arg(long, default_value = "runs/mortality")]
    output_dir: PathBuf,

    /// Repetitions with seeds seed, seed + 1, ...
    #[arg(long, default_value_t = 1)]
    runs: usize,
}

fn load_or_create_config(path: &Path) -> anyhow::Result<TrainingConfig> {
    if path.exists() {
        log::info!("Loading config from {}", path.display());
        return TrainingConfig::from_yaml(path).with_context(|| format!("invalid config {}", path.display()));
    }
    let config = TrainingConfig::default();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(path)?;
    log::info!("Created default config at {}", path.display());
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let config = load_or_create_config(&args.config)?;
    let placement = default_placement();

    log::info!("Model: {} {:?}", config.model.kind, config.model.args);
    log::info!(
        "Epochs: {}, batch size: {}, learning rate: {}, patience: {}",
        config.epochs,
        config.batch_size,
        config.learning_rate,
        config.patience
    );
    log::info!("Device: {placement}");

    let splits = Splits::load(&args.data_dir, config.max_seq_len)
        .with_context(|| format!("failed to load splits from {}", args.data_dir.display()))?;
    log::info!(
        "Splits: {} train, {} validation, {} test records, {} time steps",
        splits.train.records().len(),
        splits.val.records().len(),
        splits.test.records().len(),
        splits.seq_len()
    );
    for (name, split) in [("train", &splits.train), ("val", &splits.val), ("test", &splits.test)] {
        let [survived, deceased] = split.class_counts();
        log::info!("{name}: {survived} survived, {deceased} deceased");
    }

    std::fs::create_dir_all(&args.output_dir)?;
    config.save(args.output_dir.join("config.yaml"))?;

    let mut summaries = Vec::with_capacity(args.runs);
    for run in 0..args.runs.max(1) {
        let run_config = TrainingConfig {
            seed: config.seed + run as u64,
            ..config.clone()
        };
        let run_dir = args.output_dir.join(format!("run_{run}"));
        log::info!("Run {run} (seed {}) -> {}", run_config.seed, run_dir.display());

        let summary = train_test::<TrainingBackend>(splits.clone(), &run_config, &placement, &run_dir)
            .with_context(|| format!("run {run} failed"))?;
        summaries.push(summary);
    }

    let aggregate = RunAggregate::new(&summaries);
    let path = aggregate.save(&args.output_dir)?;
    log::info!(
        "AUROC {:.4} ± {:.4}, AUPRC {:.4} ± {:.4} over {} runs",
        aggregate.auroc.mean,
        aggregate.auroc.std,
        aggregate.auprc.mean,
        aggregate.auprc.std,
        aggregate.runs
    );
    log::info!("Summary written to {}", path.display());
    Ok(())
}

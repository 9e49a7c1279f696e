/*
cargo run --release --bin download_resources

cargo run --release --bin download_resources -- \
    --cache-dir ./cache \
    --dataset frgfm/imagenette --dataset-config full_size \
    --model microsoft/resnet-50
*/

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use log::info;
use offline_cache::{CacheLayout, DatasetSpec, HfHub, ModelSpec, Pipeline, Reporter};
use simplelog::{Config as LogConfig, LevelFilter, WriteLogger};
use std::fs::{create_dir_all, File};
use std::path::PathBuf;

// Fetch the training dataset and pretrained model into a local cache (run once, needs network)
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    // Cache root; datasets/ and models/ are created below it
    #[arg(long, value_name = "DIR", default_value = "./cache")]
    cache_dir: PathBuf,

    // Hub dataset ID
    #[arg(long, default_value = "frgfm/imagenette")]
    dataset: String,

    // Dataset configuration variant
    #[arg(long, default_value = "full_size")]
    dataset_config: String,

    // Hub model ID
    #[arg(long, default_value = "microsoft/resnet-50")]
    model: String,

    // HF access token (falls back to cached credentials)
    #[arg(long, env = "HF_TOKEN")]
    token: Option<String>,

    // Where the hub client keeps its own blob cache (default: ~/.cache/huggingface/hub)
    #[arg(long, value_name = "DIR")]
    hub_cache: Option<PathBuf>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    // Hide per-file download bars
    #[arg(long)]
    quiet_progress: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // logging setup
    create_dir_all(&cli.log_dir)?;
    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let log_path = cli.log_dir.join(format!("download_resources_{ts}.log"));
    WriteLogger::init(
        LevelFilter::Info,
        LogConfig::default(),
        File::create(&log_path)?,
    )?;
    info!("Starting resource download");
    info!("Cache dir: {:?}", cli.cache_dir);
    info!("Dataset: {} ({}), model: {}", cli.dataset, cli.dataset_config, cli.model);

    let layout = CacheLayout::new(&cli.cache_dir);
    let hub = HfHub::new(cli.token.clone(), cli.hub_cache.clone(), !cli.quiet_progress)?;

    let mut pipeline = Pipeline::new(&hub, layout, Reporter::stdout())
        .dataset(DatasetSpec::new(&cli.dataset, &cli.dataset_config))
        .model(ModelSpec::new(&cli.model))
        .show_progress(!cli.quiet_progress);

    pipeline.provision()?;
    if pipeline.run().is_err() {
        // already reported on stdout and in the log
        std::process::exit(1);
    }
    Ok(())
}

//! Train a dependency parser.
//!
//! Usage:
//!   arbor-train --config config.json [--save-dir DIR] [--max-steps N] [--device cpu|cuda:N]
//!
//! Ctrl-C stops training after the current batch; `scores.txt` is still
//! written but `SUCCESS` is not.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use arbor_core::TrainConfig;
use arbor_trainer::{run_training, TrainingOutcome};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor-train")]
#[command(about = "Train a biaffine dependency parser on CoNLL-U treebanks")]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Override the output directory
    #[arg(short, long)]
    save_dir: Option<PathBuf>,

    /// Override the step budget
    #[arg(long)]
    max_steps: Option<usize>,

    /// Override the device (cpu or cuda:N)
    #[arg(long)]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = TrainConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(dir) = args.save_dir {
        config = config.with_save_dir(dir);
    }
    if let Some(steps) = args.max_steps {
        config = config.with_max_steps(steps);
    }
    if let Some(device) = args.device {
        config = config.with_device(device);
    }
    let config = config.resolve().context("invalid configuration")?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current batch");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let outcome = tokio::task::spawn_blocking(move || run_training(config, interrupt))
        .await
        .context("training task panicked")??;

    match outcome {
        TrainingOutcome::Completed(state) => tracing::info!(
            steps = state.step,
            epochs = state.epoch,
            best_moving_acc = state.best_accuracy,
            "done"
        ),
        TrainingOutcome::Interrupted(state) => {
            tracing::warn!(steps = state.step, "stopped by user before completion")
        }
    }
    Ok(())
}

//! End-to-end training run: files to vocabularies, datasets, model and loop.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context};
use arbor_core::config::ResolvedConfig;
use arbor_core::conllu::{self, ConlluReader};

use crate::controller::{TrainingController, TrainingData, TrainingOutcome};
use crate::dataset::{Dataset, Vocabs};
use crate::model::{self, BiaffineParser};
use crate::reporter::StatusBoard;

pub const CONFIG_FILE: &str = "config.json";

/// Train a biaffine parser as configured, writing everything under `save_dir`.
pub fn run_training(
    config: ResolvedConfig,
    interrupt: Arc<AtomicBool>,
) -> anyhow::Result<TrainingOutcome> {
    let raw = &config.raw;
    if raw.dev_files.is_empty() {
        bail!("no dev_files given; a held-out set is needed for early stopping");
    }

    std::fs::create_dir_all(&raw.save_dir)
        .with_context(|| format!("creating {}", raw.save_dir.display()))?;
    raw.save(raw.save_dir.join(CONFIG_FILE))
        .context("saving resolved configuration")?;

    let reader = ConlluReader::new()?;
    let train_files = conllu::discover(&raw.train_files).context("discovering train files")?;
    let mut parsed = Vec::with_capacity(train_files.len());
    for file in train_files {
        let sentences = reader
            .read_file(&file.path)
            .with_context(|| format!("reading {}", file.path.display()))?;
        parsed.push((file, sentences));
    }

    let vocabs = Vocabs::build(&config, parsed.iter().flat_map(|(_, s)| s.iter()))
        .context("building vocabularies")?;
    for vocab in &vocabs.inputs {
        tracing::info!(field = %vocab.field(), size = vocab.len(), "input vocabulary");
    }
    tracing::info!(labels = vocabs.n_labels(), "label vocabulary");

    let (buckets, batch_size) = (raw.max_buckets, raw.batch_size);
    let train = Dataset::from_sentences("train", parsed, &vocabs, buckets, batch_size)?;
    let dev_files = conllu::discover(&raw.dev_files).context("discovering dev files")?;
    let dev = Dataset::load("dev", dev_files, &vocabs, buckets, batch_size)?;
    let test = if raw.test_files.is_empty() {
        None
    } else {
        let files = conllu::discover(&raw.test_files).context("discovering test files")?;
        Some(Dataset::load("test", files, &vocabs, buckets, batch_size)?)
    };

    let device = model::device(config.device)
        .with_context(|| format!("opening device {}", config.device))?;
    let mut parser = BiaffineParser::new(&config, &vocabs, device)?;

    let data = TrainingData {
        train: &train,
        dev: &dev,
        test: test.as_ref(),
        labels: &vocabs.deprel,
    };
    let mut controller = TrainingController::new(config, StatusBoard::new(), interrupt);
    let outcome = controller.train(&mut parser, data)?;
    Ok(outcome)
}

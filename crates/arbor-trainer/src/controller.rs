//! # Training control loop
//!
//! [`TrainingController`] drives a [`ParserModel`] over shuffled training
//! batches. Every `print_every` steps it evaluates the held-out set, folds
//! the round's accuracy into an exponential moving average, and on a new
//! best saves the parameters and re-parses the held-out and test sets.
//!
//! Training stops when the step budget is spent or the moving accuracy has
//! not improved for `max_steps_without_improvement` steps. A `SUCCESS`
//! marker is written only on that normal path; an interrupt still flushes
//! `scores.txt`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arbor_core::config::ResolvedConfig;
use arbor_core::registry::OptimizerKind;
use arbor_core::vocab::Vocab;
use arbor_core::{ArborError, Result};
use oorandom::Rand32;

use crate::dataset::Dataset;
use crate::history::OutputHistory;
use crate::inference::InferenceRunner;
use crate::model::ParserModel;
use crate::reporter::{ProgressReporter, StatusSnapshot};

pub const SUCCESS_FILE: &str = "SUCCESS";
pub const SCORES_FILE: &str = "scores.txt";
pub const MODEL_FILE: &str = "model.safetensors";

/// Weight of the previous moving accuracy when a round is folded in.
const MOVING_DECAY: f64 = 0.75;
/// Fraction of the patience after which the secondary optimizer takes over.
const SWITCH_FRACTION: f64 = 0.1;

/// Phase of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Training,
    Evaluating,
    CheckpointFull,
    Stopped,
}

/// Counters carried across the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    pub step: usize,
    pub epoch: usize,
    pub best_accuracy: f64,
    /// Exponential moving average of held-out accuracy.
    pub current_accuracy: f64,
    pub steps_since_best: usize,
    pub optimizer: OptimizerKind,
}

impl TrainingState {
    pub fn new(optimizer: OptimizerKind) -> Self {
        Self {
            step: 0,
            epoch: 0,
            best_accuracy: 0.0,
            current_accuracy: 0.0,
            steps_since_best: 0,
            optimizer,
        }
    }

    /// Fold one evaluation round in. Returns true on a new best (ties count).
    pub fn record_round(&mut self, accuracy: f64, print_every: usize) -> bool {
        self.current_accuracy =
            MOVING_DECAY * self.current_accuracy + (1.0 - MOVING_DECAY) * accuracy;
        if self.current_accuracy >= self.best_accuracy {
            self.best_accuracy = self.current_accuracy;
            self.steps_since_best = 0;
            true
        } else {
            self.steps_since_best += print_every;
            false
        }
    }

    pub fn should_switch(&self, patience: usize) -> bool {
        self.steps_since_best as f64 > SWITCH_FRACTION * patience as f64
    }

    pub fn is_finished(&self, max_steps: usize, patience: usize) -> bool {
        self.step >= max_steps || self.steps_since_best >= patience
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingOutcome {
    Completed(TrainingState),
    Interrupted(TrainingState),
}

impl TrainingOutcome {
    pub fn state(&self) -> &TrainingState {
        match self {
            TrainingOutcome::Completed(state) | TrainingOutcome::Interrupted(state) => state,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TrainingOutcome::Completed(_))
    }
}

/// Datasets and label vocabulary the controller works over.
#[derive(Debug, Clone, Copy)]
pub struct TrainingData<'a> {
    pub train: &'a Dataset,
    pub dev: &'a Dataset,
    pub test: Option<&'a Dataset>,
    pub labels: &'a Vocab,
}

pub struct TrainingController<R: ProgressReporter> {
    config: ResolvedConfig,
    reporter: R,
    interrupt: Arc<AtomicBool>,
    inference: InferenceRunner,
    state: TrainingState,
    phase: ControllerState,
    rng: Rand32,
    train_history: OutputHistory,
    dev_history: OutputHistory,
}

impl<R: ProgressReporter> TrainingController<R> {
    pub fn new(config: ResolvedConfig, reporter: R, interrupt: Arc<AtomicBool>) -> Self {
        let inference = InferenceRunner::for_output(config.raw.output.tree, &config.raw.save_dir);
        Self {
            state: TrainingState::new(config.primary_optimizer),
            rng: Rand32::new(config.raw.seed),
            config,
            reporter,
            interrupt,
            inference,
            phase: ControllerState::Training,
            train_history: OutputHistory::new("train"),
            dev_history: OutputHistory::new("dev"),
        }
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn phase(&self) -> ControllerState {
        self.phase
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    fn save_dir(&self) -> &Path {
        &self.config.raw.save_dir
    }

    /// Run until the step budget, patience, or an interrupt ends training.
    pub fn train<M: ParserModel + ?Sized>(
        &mut self,
        model: &mut M,
        data: TrainingData<'_>,
    ) -> Result<TrainingOutcome> {
        let save_dir = self.save_dir().to_path_buf();
        fs::create_dir_all(&save_dir).map_err(|e| ArborError::io(&save_dir, e))?;
        let marker = save_dir.join(SUCCESS_FILE);
        if marker.exists() {
            fs::remove_file(&marker).map_err(|e| ArborError::io(&marker, e))?;
        }

        tracing::info!(
            save_dir = %save_dir.display(),
            train = data.train.len(),
            dev = data.dev.len(),
            test = data.test.map_or(0, Dataset::len),
            "starting training"
        );

        let max_steps = self.config.raw.max_steps;
        let patience = self.config.raw.max_steps_without_improvement;
        let completed = 'epochs: loop {
            let batches = data.train.shuffled_batches(&mut self.rng)?;
            if batches.is_empty() {
                return Err(ArborError::EmptyDataset(data.train.name().to_string()));
            }
            for group in batches {
                if self.interrupt.load(Ordering::SeqCst) {
                    break 'epochs false;
                }
                if self.state.is_finished(max_steps, patience) {
                    break 'epochs true;
                }
                self.phase = ControllerState::Training;
                let batch = data.train.batch(&group)?;
                self.train_history.restart_timer();
                let scores = model.train_batch(&batch, self.state.optimizer)?;
                self.train_history.update(&scores);
                self.state.step += 1;

                if self.state.step % self.config.raw.print_every == 0 {
                    self.evaluate(model, data)?;
                }
                if self.state.is_finished(max_steps, patience) {
                    break 'epochs true;
                }
            }
            self.state.epoch += 1;
            tracing::debug!(epoch = self.state.epoch, step = self.state.step, "epoch finished");
        };
        self.phase = ControllerState::Stopped;

        let scores = save_dir.join(SCORES_FILE);
        fs::write(&scores, self.reporter.transcript()).map_err(|e| ArborError::io(&scores, e))?;

        let state = self.state.clone();
        if completed {
            fs::write(&marker, b"").map_err(|e| ArborError::io(&marker, e))?;
            tracing::info!(
                step = state.step,
                best_moving_acc = state.best_accuracy,
                "training finished"
            );
            Ok(TrainingOutcome::Completed(state))
        } else {
            tracing::warn!(step = state.step, "training interrupted");
            Ok(TrainingOutcome::Interrupted(state))
        }
    }

    fn evaluate<M: ParserModel + ?Sized>(
        &mut self,
        model: &mut M,
        data: TrainingData<'_>,
    ) -> Result<()> {
        self.phase = ControllerState::Evaluating;
        let mut seen = 0;
        for file_index in 0..data.dev.files().len() {
            for group in data.dev.file_batches(file_index)? {
                let batch = data.dev.batch(&group)?;
                self.dev_history.restart_timer();
                let scores = model.eval_batch(&batch)?;
                self.dev_history.update(&scores);
                seen += 1;
            }
        }
        if seen == 0 {
            return Err(ArborError::EmptyDataset(data.dev.name().to_string()));
        }

        self.train_history.finish_round();
        let accuracy = self.dev_history.finish_round();
        let print_every = self.config.raw.print_every;
        if self.state.record_round(accuracy, print_every) {
            self.phase = ControllerState::CheckpointFull;
            self.checkpoint(model, data)?;
        }

        if self.config.raw.switch_optimizers
            && self.state.optimizer == self.config.primary_optimizer
            && self.state.should_switch(self.config.raw.max_steps_without_improvement)
        {
            self.state.optimizer = self.config.secondary_optimizer;
            tracing::info!(
                step = self.state.step,
                optimizer = %self.state.optimizer,
                "no recent improvement, switching optimizer"
            );
        }

        let snapshot = self.snapshot();
        self.reporter.report(&snapshot);
        self.phase = ControllerState::Training;
        Ok(())
    }

    fn checkpoint<M: ParserModel + ?Sized>(
        &mut self,
        model: &mut M,
        data: TrainingData<'_>,
    ) -> Result<Vec<PathBuf>> {
        let path = self.save_dir().join(MODEL_FILE);
        model.save(&path)?;
        let mut written = self.inference.run(model, data.dev, data.labels)?;
        if let Some(test) = data.test {
            written.extend(self.inference.run(model, test, data.labels)?);
        }
        tracing::info!(
            step = self.state.step,
            best_moving_acc = self.state.best_accuracy,
            files = written.len(),
            "new best, checkpoint saved"
        );
        Ok(written)
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            save_dir: self.save_dir().to_path_buf(),
            device: self.config.device.to_string(),
            optimizer: self.state.optimizer,
            epoch: self.state.epoch,
            step: self.state.step,
            current_accuracy: self.state.current_accuracy,
            best_accuracy: self.state.best_accuracy,
            steps_since_best: self.state.steps_since_best,
            history: vec![self.train_history.to_string(), self.dev_history.to_string()],
        }
    }
}

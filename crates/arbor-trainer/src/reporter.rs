//! Status display for the training loop.
//!
//! The controller hands a [`StatusSnapshot`] to a [`ProgressReporter`] after
//! every evaluation round. [`StatusBoard`] renders it as a small block of
//! text, logs each line through `tracing`, and keeps the latest block so it
//! can be written to `scores.txt` when training ends.

use std::path::PathBuf;

use arbor_core::registry::OptimizerKind;

/// Everything shown on the status board.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub save_dir: PathBuf,
    pub device: String,
    pub optimizer: OptimizerKind,
    pub epoch: usize,
    pub step: usize,
    pub current_accuracy: f64,
    pub best_accuracy: f64,
    pub steps_since_best: usize,
    /// Pre-rendered history lines (train, dev).
    pub history: Vec<String>,
}

/// Receives status updates from the controller.
pub trait ProgressReporter {
    fn report(&mut self, status: &StatusSnapshot);

    /// Text to persist as the final status.
    fn transcript(&self) -> String;
}

/// Renders status blocks and logs them.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    last: String,
    reports: usize,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> usize {
        self.reports
    }

    pub fn render(status: &StatusSnapshot) -> String {
        let mut out = format!(
            "\t{}\n\tDevice: {}\n\tCurrent optimizer: {}\n\tEpoch: {:3} | Step: {:5}\n\
             \tMoving acc: {:5.2} | Best moving acc: {:5.2}\n\tSteps since improvement: {:4}\n",
            status.save_dir.display(),
            status.device,
            status.optimizer,
            status.epoch,
            status.step,
            status.current_accuracy * 100.0,
            status.best_accuracy * 100.0,
            status.steps_since_best,
        );
        for line in &status.history {
            out.push('\t');
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

impl ProgressReporter for StatusBoard {
    fn report(&mut self, status: &StatusSnapshot) {
        tracing::info!(
            epoch = status.epoch,
            step = status.step,
            optimizer = %status.optimizer,
            moving_acc = status.current_accuracy,
            best_moving_acc = status.best_accuracy,
            steps_since_best = status.steps_since_best,
            "evaluation round"
        );
        for line in &status.history {
            tracing::debug!("{line}");
        }
        self.last = Self::render(status);
        self.reports += 1;
    }

    fn transcript(&self) -> String {
        self.last.clone()
    }
}

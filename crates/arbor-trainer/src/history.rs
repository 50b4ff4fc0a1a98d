//! Per-batch statistics and their running history.

use std::fmt;
use std::time::{Duration, Instant};

/// Counts produced by one training or evaluation batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchScores {
    pub loss: f64,
    pub n_tokens: usize,
    pub correct_heads: usize,
    pub correct_labels: usize,
    /// Tokens with both head and label right.
    pub correct: usize,
}

impl BatchScores {
    /// Attachment score over this batch, 0 when it had no tokens.
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.n_tokens)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Scores accumulated since the last report, plus lifetime totals.
#[derive(Debug, Clone)]
pub struct OutputHistory {
    name: String,
    round: BatchScores,
    round_batches: usize,
    total_batches: usize,
    started: Instant,
    elapsed: Duration,
    last: Option<RoundSummary>,
}

/// One reporting round, condensed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundSummary {
    pub loss: f64,
    pub uas: f64,
    pub las: f64,
    pub batches: usize,
    pub seconds: f64,
}

impl OutputHistory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            round: BatchScores::default(),
            round_batches: 0,
            total_batches: 0,
            started: Instant::now(),
            elapsed: Duration::ZERO,
            last: None,
        }
    }

    /// Start timing the next batch.
    pub fn restart_timer(&mut self) {
        self.started = Instant::now();
    }

    pub fn update(&mut self, scores: &BatchScores) {
        self.elapsed += self.started.elapsed();
        self.round.loss += scores.loss;
        self.round.n_tokens += scores.n_tokens;
        self.round.correct_heads += scores.correct_heads;
        self.round.correct_labels += scores.correct_labels;
        self.round.correct += scores.correct;
        self.round_batches += 1;
        self.total_batches += 1;
    }

    /// Close the current round, returning its labelled attachment score.
    pub fn finish_round(&mut self) -> f64 {
        let summary = RoundSummary {
            loss: if self.round_batches == 0 {
                0.0
            } else {
                self.round.loss / self.round_batches as f64
            },
            uas: ratio(self.round.correct_heads, self.round.n_tokens),
            las: self.round.accuracy(),
            batches: self.round_batches,
            seconds: self.elapsed.as_secs_f64(),
        };
        self.round = BatchScores::default();
        self.round_batches = 0;
        self.elapsed = Duration::ZERO;
        self.last = Some(summary);
        summary.las
    }

    pub fn last(&self) -> Option<RoundSummary> {
        self.last
    }

    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for OutputHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last {
            Some(r) => write!(
                f,
                "{:<5} | loss: {:8.4} | UAS: {:5.2} | LAS: {:5.2} | batches: {:4} | {:6.2}s",
                self.name,
                r.loss,
                r.uas * 100.0,
                r.las * 100.0,
                r.batches,
                r.seconds
            ),
            None => write!(f, "{:<5} | no rounds yet", self.name),
        }
    }
}

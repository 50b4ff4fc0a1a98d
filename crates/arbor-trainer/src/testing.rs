//! Shared fixtures for unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arbor_core::conllu::{ConlluReader, Sentence, SourceFile};
use arbor_core::decode::Probabilities;
use arbor_core::registry::OptimizerKind;
use arbor_core::Result;

use crate::dataset::Batch;
use crate::history::BatchScores;
use crate::model::ParserModel;

/// Four sentences; the third repeats the first, the fourth has a multiword token.
pub(crate) const TRAIN: &str = "\
# sent_id = 1
1\tthe\tthe\tDET\tDT\t_\t2\tdet\t_\t_
2\tcat\tcat\tNOUN\tNN\t_\t3\tnsubj\t_\t_
3\tsleeps\tsleep\tVERB\tVBZ\t_\t0\troot\t_\t_

1\tdogs\tdog\tNOUN\tNNS\t_\t2\tnsubj\t_\t_
2\tbark\tbark\tVERB\tVBP\t_\t0\troot\t_\t_

# sent_id = 1
1\tthe\tthe\tDET\tDT\t_\t2\tdet\t_\t_
2\tcat\tcat\tNOUN\tNN\t_\t3\tnsubj\t_\t_
3\tsleeps\tsleep\tVERB\tVBZ\t_\t0\troot\t_\t_

1-2\tdon't\t_\t_\t_\t_\t_\t_\t_\t_
1\tdo\tdo\tAUX\tVBP\t_\t3\taux\t_\t_
2\tn't\tnot\tPART\tRB\t_\t3\tadvmod\t_\t_
3\tgo\tgo\tVERB\tVB\t_\t0\troot\t_\t_
4\tnow\tnow\tADV\tRB\t_\t3\tadvmod\t_\t_

";

pub(crate) fn parsed(text: &str, relative: &str) -> (SourceFile, Vec<Sentence>) {
    let path = PathBuf::from("fixtures").join(relative);
    let sentences = ConlluReader::new()
        .unwrap()
        .parse_str(text, &path)
        .unwrap();
    let file = SourceFile {
        path,
        relative: PathBuf::from(relative),
    };
    (file, sentences)
}

/// Tokens credited per batch; large enough that scripted accuracies are exact.
const SCRIPT_TOKENS: usize = 10_000;

/// Model whose evaluation accuracy follows a script, one entry per round.
///
/// A round starts with the first `eval_batch` after any training step. Past
/// the end of the script every round scores zero.
#[derive(Debug, Default)]
pub(crate) struct ScriptedModel {
    script: Vec<f64>,
    rounds: usize,
    trained_since_eval: bool,
    pub trained_with: Vec<OptimizerKind>,
    pub interrupt: Option<(usize, Arc<AtomicBool>)>,
    pub drop_last_distribution: bool,
}

impl ScriptedModel {
    pub fn new(script: Vec<f64>) -> Self {
        Self {
            script,
            trained_since_eval: true,
            ..Self::default()
        }
    }
}

impl ParserModel for ScriptedModel {
    fn train_batch(&mut self, batch: &Batch, optimizer: OptimizerKind) -> Result<BatchScores> {
        self.trained_with.push(optimizer);
        self.trained_since_eval = true;
        if let Some((after, flag)) = &self.interrupt {
            if self.trained_with.len() >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(BatchScores {
            loss: 1.0,
            n_tokens: batch.n_tokens(),
            ..BatchScores::default()
        })
    }

    fn eval_batch(&mut self, _batch: &Batch) -> Result<BatchScores> {
        if self.trained_since_eval {
            self.rounds += 1;
            self.trained_since_eval = false;
        }
        let accuracy = self.script.get(self.rounds - 1).copied().unwrap_or(0.0);
        let correct = (accuracy * SCRIPT_TOKENS as f64).round() as usize;
        Ok(BatchScores {
            loss: 0.0,
            n_tokens: SCRIPT_TOKENS,
            correct_heads: correct,
            correct_labels: correct,
            correct,
        })
    }

    /// Every dependent prefers the previous position and label 3.
    fn probabilities(&mut self, batch: &Batch) -> Result<Vec<Probabilities>> {
        let mut out: Vec<Probabilities> = batch
            .lengths
            .iter()
            .map(|&n| {
                let heads = (0..n)
                    .map(|d| {
                        let mut row = vec![0.1 / n as f32; n];
                        row[d.saturating_sub(1)] += 0.9;
                        row
                    })
                    .collect();
                let labels = vec![vec![vec![0.1, 0.1, 0.1, 0.7]; n]; n];
                Probabilities::Factorized { heads, labels }
            })
            .collect();
        if self.drop_last_distribution {
            out.pop();
        }
        Ok(out)
    }

    fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, b"scripted").map_err(|e| arbor_core::ArborError::io(path, e))
    }
}

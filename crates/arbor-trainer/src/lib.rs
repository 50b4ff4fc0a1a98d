//! # Arbor Trainer
//!
//! Trains a biaffine dependency parser over bucketed CoNLL-U data and
//! re-parses held-out sets with the best model seen so far.
//!
//! - [`dataset`]: encoded sentences, one multibucket per input field, batches
//! - [`model`]: candle biaffine parser behind the [`ParserModel`] trait
//! - [`optimizer`]: Adam and AMSGrad sharing one set of moments
//! - [`controller`]: the training loop with moving-average early stopping
//! - [`inference`]: decoding and CoNLL-U output mirroring the input layout
//! - [`reporter`]: status display
//! - [`pipeline`]: wires it all together for the `arbor-train` binary

pub mod controller;
pub mod dataset;
pub mod history;
pub mod inference;
pub mod model;
pub mod optimizer;
pub mod pipeline;
pub mod reporter;

#[cfg(test)]
mod testing;

pub use controller::{
    ControllerState, TrainingController, TrainingData, TrainingOutcome, TrainingState,
    MODEL_FILE, SCORES_FILE, SUCCESS_FILE,
};
pub use dataset::{Batch, Dataset, Vocabs};
pub use history::{BatchScores, OutputHistory};
pub use inference::InferenceRunner;
pub use model::{BiaffineParser, ParserModel};
pub use optimizer::MomentOptimizer;
pub use pipeline::{run_training, CONFIG_FILE};
pub use reporter::{ProgressReporter, StatusBoard, StatusSnapshot};

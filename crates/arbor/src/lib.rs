//! # Arbor
//!
//! Biaffine dependency parser training with adaptive length bucketing.
//!
//! This crate re-exports the workspace:
//!
//! - [`core`]: multibucket batching, vocabularies, CoNLL-U, decoders, config
//! - [`trainer`]: the candle model, training controller and inference runner

pub use arbor_core as core;
pub use arbor_trainer as trainer;

pub use arbor_core::{ArborError, Multibucket, Result, TrainConfig};
pub use arbor_trainer::{run_training, TrainingController, TrainingOutcome};

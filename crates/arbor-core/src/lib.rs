//! # Arbor Core
//!
//! Data-side building blocks of the Arbor dependency parser: deduplicated,
//! padding-minimising bucketed batching, CoNLL-U reading and writing,
//! vocabularies, name registries and tree decoding.
//!
//! ## Quick Start
//!
//! ```rust
//! use arbor_core::buckets::Multibucket;
//!
//! let mut mb = Multibucket::new("form", 2).unwrap();
//! let a = mb.add(&["the", "cat"], vec![4, 5]).unwrap();
//! let b = mb.add(&["a", "very", "long", "sentence", "indeed"], vec![6, 7, 8, 9, 10]).unwrap();
//! mb.close().unwrap();
//!
//! let batch = mb.set_placeholders(&[b, a]).unwrap();
//! let rows = batch.to_request_order();
//! assert_eq!(rows.row(1), &[4, 5, 0, 0, 0]);
//! ```
pub mod buckets;
pub mod config;
pub mod conllu;
pub mod decode;
pub mod error;
pub mod registry;
pub mod vocab;

// Re-export primary API
pub use buckets::{
    BucketAllocator, Multibucket, MultibucketBatch, PaddedBatch, SequenceDeduplicator, Slot,
};
pub use config::{DeviceSpec, ModelConfig, OptimizerConfig, OutputConfig, ResolvedConfig, TrainConfig};
pub use conllu::{ConlluReader, Field, Sentence, SourceFile, TokenRecord};
pub use decode::{ArgmaxDecoder, Decoder, Prediction, Probabilities, TreeDecoder};
pub use error::{ArborError, Result};
pub use registry::{Nonlinearity, OptimizerKind, RecurrentCell, Registry};
pub use vocab::{Backing, Capability, PretrainedSpec, Vocab, VocabKind};

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in Arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    /// A configuration value is missing, inconsistent or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A name could not be resolved in one of the registries.
    #[error("unknown {registry} {name:?}; valid names are: {}", valid.join(", "))]
    UnknownName {
        /// Registry the name was looked up in.
        registry: &'static str,
        /// The offending identifier.
        name: String,
        /// Every name the registry knows about.
        valid: Vec<&'static str>,
    },

    /// A bucket or multibucket was used outside its open/closed lifecycle.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A batch request referenced a sequence id that was never added.
    #[error("unknown sequence id {id} (table holds {len} sequences)")]
    UnknownSequence {
        /// Requested id.
        id: usize,
        /// Number of sequences in the table.
        len: usize,
    },

    /// Probability tables did not have the shape the decoder expects.
    #[error("decode error: {0}")]
    Decode(String),

    /// A dataset produced no batches where at least one was required.
    #[error("dataset {0:?} produced no batches")]
    EmptyDataset(String),

    /// Malformed input data (CoNLL-U or word vectors).
    #[error("malformed input at {path}:{line}: {message}")]
    Malformed {
        /// File being read.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// What was wrong.
        message: String,
    },

    /// Filesystem failure with the path that caused it.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A regex pattern failed to compile (should not happen with static patterns).
    #[error("regex compilation error: {0}")]
    RegexError(#[from] regex::Error),

    /// JSON (de)serialisation failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl ArborError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArborError::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        ArborError::Protocol(message.into())
    }
}

/// Result type alias for Arbor operations.
pub type Result<T> = std::result::Result<T, ArborError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_lists_valid_entries() {
        let err = ArborError::UnknownName {
            registry: "nonlinearity",
            name: "swish".into(),
            valid: vec!["tanh", "relu"],
        };
        let msg = err.to_string();
        assert!(msg.contains("nonlinearity"));
        assert!(msg.contains("\"swish\""));
        assert!(msg.contains("tanh, relu"));
    }

    #[test]
    fn io_error_mentions_path() {
        let err = ArborError::io(
            "/no/such/vectors.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/no/such/vectors.txt"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ArborError>();
    }
}

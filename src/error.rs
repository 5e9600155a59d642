use thiserror::Error;

use crate::msi::{CacheId, Inconsistency};

/// Errors raised while configuring or running a simulation.
///
/// All of them are invalid-argument style: nothing is retried and a run that
/// hits one is aborted.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("{name} must be a positive power of 2, got {value}")]
    NotPowerOfTwo { name: &'static str, value: usize },

    #[error("address must be non-negative, got {0}")]
    NegativeAddress(i64),

    #[error("at least one processor is required")]
    NoProcessors,

    #[error("{name} must be positive for the TSO model")]
    InvalidWriteBuffer { name: &'static str },

    #[error("unknown consistency model '{0}' (expected SC or TSO)")]
    UnknownConsistencyModel(String),

    #[error("line {line}: unknown access type '{access}'")]
    UnknownAccessType { line: usize, access: String },

    #[error("line {line}: malformed trace entry '{entry}': {reason}")]
    MalformedTrace {
        line: usize,
        entry: String,
        reason: &'static str,
    },

    #[error("line {line}: processor P{processor} does not exist")]
    UnknownProcessor { line: usize, processor: CacheId },

    #[error("caches inconsistent after line {line} ({} violation(s))", .found.len())]
    Inconsistent {
        line: usize,
        found: Vec<Inconsistency>,
    },

    #[error("failed to read trace")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

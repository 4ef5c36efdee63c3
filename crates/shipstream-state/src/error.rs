//! Error types for the state store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the revisioned receiver state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Data directory {0} does not exist")]
    DataDirMissing(PathBuf),

    #[error("Mutation outside an undo scope")]
    NoActiveScope,

    #[error("An undo scope is already open")]
    ScopeAlreadyOpen,

    #[error("No open undo scope")]
    NoOpenScope,

    #[error("Nothing to undo: store is at the committed baseline (revision {revision})")]
    NothingToUndo { revision: u32 },

    #[error("State image is {used} bytes, exceeding the configured {capacity} byte capacity")]
    CapacityExceeded { used: u64, capacity: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

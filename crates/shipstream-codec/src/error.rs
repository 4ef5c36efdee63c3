//! Error types for the wire codec and ABI decoding.

use thiserror::Error;

/// Errors that can occur while decoding state-history wire data or
/// contract-defined payloads.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unexpected end of input: needed {needed} more bytes, {remaining} left")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("varuint32 longer than 5 bytes")]
    VarintOverflow,

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Unknown type '{name}'")]
    UnknownType { name: String },

    #[error("Type '{name}' is not a variant")]
    NotAVariant { name: String },

    #[error("Variant tag {tag} out of range for '{name}' ({count} alternatives)")]
    TagOutOfRange { name: String, tag: u32, count: usize },

    #[error("Expected variant '{expected}' of '{name}', got '{got}'")]
    WrongVariant {
        name: String,
        expected: String,
        got: String,
    },

    #[error("Unknown transaction status {0}")]
    UnknownTransactionStatus(u8),

    #[error("Unsupported ABI version '{0}'")]
    UnsupportedAbiVersion(String),

    #[error("Type '{name}' resolves through a typedef cycle")]
    TypedefCycle { name: String },

    #[error("Contract '{account}' has no ABI loaded")]
    AbiNotLoaded { account: String },

    #[error("Contract '{account}' defines no table '{table}'")]
    UnknownTable { account: String, table: String },

    #[error("ABI JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

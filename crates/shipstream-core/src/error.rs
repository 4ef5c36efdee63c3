//! Parse errors for the chain primitive types.

use thiserror::Error;

/// Errors from parsing a textual account/action name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameParseError {
    #[error("Name '{0}' is longer than 13 characters")]
    TooLong(String),

    #[error("Name '{name}' contains invalid character '{ch}'")]
    InvalidChar { name: String, ch: char },

    #[error("Name '{name}' has 13th character '{ch}' outside [.1-5a-j]")]
    InvalidThirteenth { name: String, ch: char },
}

/// Errors from parsing a hex-encoded 256-bit digest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestParseError {
    #[error("Digest must be 64 hex characters, got {0}")]
    Length(usize),

    #[error("Digest is not valid hex: {0}")]
    Hex(String),
}

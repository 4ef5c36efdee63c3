//! Error types for the receiver.

use thiserror::Error;

/// Fatal receiver errors. Everything here closes the connection; non-fatal
/// ABI problems travel as `abi_error` events instead.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("Decode error: {0}")]
    Decode(#[from] shipstream_codec::DecodeError),

    #[error("State store error: {0}")]
    State(#[from] shipstream_state::StateError),

    #[error("Block {block_num}: prev_block missing or does not match the current head")]
    PrevBlockMismatch { block_num: u32 },

    #[error("Cannot roll back to block {block_num}: undo stack exhausted at revision {revision}")]
    RollbackUnderflow { block_num: u32, revision: u32 },

    #[error("Expected the protocol ABI as the first (text) frame")]
    UnexpectedFirstFrame,

    #[error("Protocol ABI not received yet")]
    ProtocolAbiMissing,

    #[error("Connection closed before the protocol ABI arrived")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Misuse of the exporter acknowledgement interface. These are hard errors
/// to the caller, never events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AckError {
    #[error("Exporter acknowledgement already enabled")]
    AlreadyEnabled,

    #[error("Exporter acknowledgement window must be greater than zero")]
    WindowZero,

    #[error("Exporter acknowledgement not enabled")]
    NotEnabled,

    #[error("Acked block {block_num} is below previously acked {acked}")]
    Regression { block_num: u32, acked: u32 },
}

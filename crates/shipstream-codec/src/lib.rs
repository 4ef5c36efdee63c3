//! # shipstream-codec
//!
//! Binary wire codec for the state-history protocol: reader/writer
//! primitives, the ABI definition model (JSON and binary forms), the
//! resolved schema index used to verify variant-tagged envelopes, the typed
//! chain structures (blocks, traces, table deltas), and the per-contract
//! decode context that turns contract-defined payloads into JSON values.

pub mod abi;
pub mod chain;
pub mod context;
pub mod error;
pub mod reader;
pub mod value;
pub mod writer;

pub use abi::{AbiDef, AbiSchema};
pub use chain::{
    AccountObject, ActionTrace, BlockPosition, GetBlocksRequestV0, GetBlocksResultV0,
    KeyValueObject, Row, SignedBlock, TableDeltaV0, TransactionStatus, TransactionTrace,
};
pub use context::AbiDecodeContext;
pub use error::DecodeError;
pub use reader::ByteReader;
pub use writer::ByteWriter;

//! # shipstream-core
//!
//! Chain primitives shared by every shipstream crate: compressed account
//! names, 256-bit digests, chain timestamps, and key material. The wire
//! codec, state store, and receiver are all built on these types.

pub mod error;
pub mod types;

pub use error::{DigestParseError, NameParseError};
pub use types::{hex_bytes, BlockTimestamp, Checksum256, Name, PublicKey, Signature, TimePoint};

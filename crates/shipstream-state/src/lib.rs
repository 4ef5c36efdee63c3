//! # shipstream-state
//!
//! Revision-numbered, undoable, persistent storage for the receiver: the
//! head/irreversible state singleton, the received-block ring, and the
//! per-contract ABI records. See [`db::ReceiverDb`] for the undo/commit
//! contract.

pub mod db;
pub mod error;

pub use db::{ReceiverDb, ReceiverState};
pub use error::StateError;

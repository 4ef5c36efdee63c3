//! Typed event channels between the receiver and its exporters.
//!
//! One broadcast channel per event type, single producer (the receiver),
//! any number of subscribers. Events are published as `Arc`s so subscribers
//! may retain them past the frame that produced them. Publishers consult
//! [`Channel::has_subscribers`] before doing optional expensive decoding;
//! the aggregate [`EventBus::queue_depth`] feeds the backpressure gate.

use std::sync::Arc;

use serde::Serialize;
use shipstream_codec::abi::AbiDef;
use shipstream_codec::{KeyValueObject, SignedBlock, TableDeltaV0, TransactionTrace};
use shipstream_core::{hex_bytes, BlockTimestamp, Name};
use tokio::sync::broadcast;

/// Why the receiver rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkReason {
    /// The server announced a block at or below the known head.
    Network,
    /// Uncommitted revisions were unwound during startup recovery.
    Restart,
}

/// The chain forked (or the store was rewound on restart).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForkEvent {
    pub block_num: u32,
    pub depth: u32,
    pub reason: ForkReason,
}

/// A decoded signed block.
#[derive(Debug, Clone, Serialize)]
pub struct BlockEvent {
    pub block_num: u32,
    pub last_irreversible: u32,
    pub block: SignedBlock,
}

/// One table delta of a block, after per-row handling.
#[derive(Debug, Clone, Serialize)]
pub struct BlockTableDeltaEvent {
    pub block_num: u32,
    pub block_timestamp: BlockTimestamp,
    pub table_delta: TableDeltaV0,
}

/// One transaction trace of a block.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionTraceEvent {
    pub block_num: u32,
    pub block_timestamp: BlockTimestamp,
    pub trace: TransactionTrace,
}

/// A contract published a new or changed ABI.
#[derive(Debug, Clone, Serialize)]
pub struct AbiUpdateEvent {
    pub block_num: u32,
    pub block_timestamp: BlockTimestamp,
    pub account: Name,
    #[serde(with = "hex_bytes")]
    pub abi_bytes: Vec<u8>,
    pub abi: AbiDef,
}

/// A contract cleared its ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbiRemovalEvent {
    pub block_num: u32,
    pub block_timestamp: BlockTimestamp,
    pub account: Name,
}

/// A contract payload could not be decoded. Non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbiErrorEvent {
    pub block_num: u32,
    pub block_timestamp: BlockTimestamp,
    pub account: Name,
    pub error: String,
}

/// One contract table row was added, modified, or removed.
#[derive(Debug, Clone, Serialize)]
pub struct TableRowUpdateEvent {
    pub block_num: u32,
    pub block_timestamp: BlockTimestamp,
    /// `false` means the row was removed.
    pub added: bool,
    pub kvo: KeyValueObject,
}

/// The read loop paused waiting for the exporter to catch up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiverPauseEvent {
    pub head: u32,
    pub acknowledged: u32,
}

// ─── Channels ────────────────────────────────────────────────────────────────

/// A single named event channel.
#[derive(Debug)]
pub struct Channel<T> {
    tx: broadcast::Sender<Arc<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Channel<T> {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }

    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Events queued for the slowest subscriber.
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }

    /// Hand the event to subscribers. A send with no subscribers is not an
    /// error; the event is simply dropped.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(Arc::new(event));
    }
}

/// All receiver event channels.
#[derive(Debug, Clone)]
pub struct EventBus {
    pub forks: Channel<ForkEvent>,
    pub blocks: Channel<BlockEvent>,
    pub block_table_deltas: Channel<BlockTableDeltaEvent>,
    pub transaction_traces: Channel<TransactionTraceEvent>,
    pub abi_updates: Channel<AbiUpdateEvent>,
    pub abi_removals: Channel<AbiRemovalEvent>,
    pub abi_errors: Channel<AbiErrorEvent>,
    pub table_row_updates: Channel<TableRowUpdateEvent>,
    pub receiver_pauses: Channel<ReceiverPauseEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            forks: Channel::new(capacity),
            blocks: Channel::new(capacity),
            block_table_deltas: Channel::new(capacity),
            transaction_traces: Channel::new(capacity),
            abi_updates: Channel::new(capacity),
            abi_removals: Channel::new(capacity),
            abi_errors: Channel::new(capacity),
            table_row_updates: Channel::new(capacity),
            receiver_pauses: Channel::new(capacity),
        }
    }

    /// Largest per-channel backlog. Stand-in for the downstream queue depth
    /// in the backpressure gate.
    pub fn queue_depth(&self) -> usize {
        [
            self.forks.backlog(),
            self.blocks.backlog(),
            self.block_table_deltas.backlog(),
            self.transaction_traces.backlog(),
            self.abi_updates.backlog(),
            self.abi_removals.backlog(),
            self.abi_errors.backlog(),
            self.table_row_updates.backlog(),
            self.receiver_pauses.backlog(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

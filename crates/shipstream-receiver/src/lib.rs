//! # shipstream-receiver
//!
//! The fork-aware state-history receiver. Connects to a node's
//! state-history WebSocket endpoint, tracks head and irreversible positions
//! through forks with an undoable state store, maintains per-contract ABIs,
//! and publishes typed events (blocks, table deltas, transaction traces,
//! ABI lifecycle, pauses) to in-process exporters with
//! exporter-acknowledged backpressure.
//!
//! ```no_run
//! # async fn example() -> Result<(), shipstream_receiver::ReceiverError> {
//! use shipstream_receiver::{Receiver, ReceiverConfig};
//!
//! let mut receiver = Receiver::open(ReceiverConfig::new("/var/lib/shipstream"))?;
//! let mut blocks = receiver.bus().blocks.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = blocks.recv().await {
//!         println!("block {}", event.block_num);
//!     }
//! });
//! receiver.run().await
//! # }
//! ```

pub mod config;
mod demux;
pub mod error;
pub mod events;
pub mod pause;
pub mod receiver;
pub mod registry;

pub use config::ReceiverConfig;
pub use error::{AckError, ReceiverError};
pub use events::{
    AbiErrorEvent, AbiRemovalEvent, AbiUpdateEvent, BlockEvent, BlockTableDeltaEvent, Channel,
    EventBus, ForkEvent, ForkReason, ReceiverPauseEvent, TableRowUpdateEvent,
    TransactionTraceEvent,
};
pub use pause::{PauseController, PauseDecision, ReceiverControl};
pub use receiver::Receiver;
pub use registry::AbiRegistry;

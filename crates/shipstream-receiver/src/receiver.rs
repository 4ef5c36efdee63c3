//! The receiver: WebSocket lifecycle, fork adjudication, and the per-frame
//! state machine.
//!
//! One logical task drives everything: connect, read the protocol ABI,
//! request blocks, then loop pause-gate → read → decode → apply. Every
//! fatal error funnels through [`Receiver::run_session`], which logs once
//! and closes the socket. Reconnection belongs to the supervisor, not here.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use shipstream_codec::{
    AbiDef, AbiSchema, BlockPosition, ByteReader, ByteWriter, GetBlocksRequestV0,
    GetBlocksResultV0, SignedBlock, TransactionTrace,
};
use shipstream_core::{BlockTimestamp, Checksum256, Name};
use shipstream_state::{ReceiverDb, ReceiverState, StateError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, WebSocketStream};
use tracing::{debug, error, info};

use crate::config::ReceiverConfig;
use crate::demux::{zlib_decompress, DeltaDemux};
use crate::error::ReceiverError;
use crate::events::{
    BlockEvent, EventBus, ForkEvent, ForkReason, ReceiverPauseEvent, TransactionTraceEvent,
};
use crate::pause::{PauseController, PauseDecision, ReceiverControl};
use crate::registry::{AbiRegistry, EventStamp};

/// Upper bound on one WebSocket message: 1 GiB.
const MAX_FRAME_BYTES: usize = 1024 * 1024 * 1024;

/// The state-history receiver.
pub struct Receiver {
    config: ReceiverConfig,
    db: ReceiverDb,
    bus: EventBus,
    control: Arc<ReceiverControl>,
    registry: AbiRegistry,
    pause: PauseController,
    schema: Option<AbiSchema>,
    head: u32,
    head_id: Checksum256,
    irreversible: u32,
    irreversible_id: Checksum256,
    /// Timestamp of the block currently being processed; stamps the frame's
    /// delta and trace events.
    block_timestamp: BlockTimestamp,
}

impl Receiver {
    /// Open the persistent store and prepare a receiver. The configured
    /// data directory must exist.
    pub fn open(config: ReceiverConfig) -> Result<Self, ReceiverError> {
        if !config.data_dir.is_dir() {
            return Err(StateError::DataDirMissing(config.data_dir.clone()).into());
        }
        let db = ReceiverDb::open(
            config.data_dir.join("receiver-state"),
            config.receiver_state_db_size,
        )?;
        let bus = EventBus::new(config.channel_capacity);
        info!(host = %config.host, port = config.port, "initialized receiver");
        Ok(Self {
            config,
            db,
            bus,
            control: Arc::new(ReceiverControl::new()),
            registry: AbiRegistry::new(),
            pause: PauseController::new(),
            schema: None,
            head: 0,
            head_id: Checksum256::zero(),
            irreversible: 0,
            irreversible_id: Checksum256::zero(),
            block_timestamp: BlockTimestamp(0),
        })
    }

    /// The event bus. Subscribe before calling [`Receiver::run`].
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Shared control handle for acknowledgements, slowdown, and abort.
    pub fn control(&self) -> Arc<ReceiverControl> {
        Arc::clone(&self.control)
    }

    pub fn head(&self) -> u32 {
        self.head
    }

    pub fn irreversible(&self) -> u32 {
        self.irreversible
    }

    pub fn db(&self) -> &ReceiverDb {
        &self.db
    }

    /// Make `account` decodable if its ABI is known, then expose the decode
    /// context. For exporters that decode contract row values.
    pub fn decode_context(&mut self, account: Name) -> &shipstream_codec::AbiDecodeContext {
        self.registry.ensure_loaded(&self.db, account);
        self.registry.context()
    }

    /// Install the session protocol ABI used to decode envelopes.
    pub fn set_protocol_abi(&mut self, abi: &AbiDef) -> Result<(), ReceiverError> {
        self.schema = Some(AbiSchema::build(abi)?);
        Ok(())
    }

    /// Unwind any revisions that were pushed but never committed, then load
    /// the receiver position. Runs before connecting.
    pub fn recover(&mut self) -> Result<(), ReceiverError> {
        let pending = self.db.undo_stack_depth();
        if pending > 0 {
            info!(revisions = pending, "store has uncommitted revisions, reverting");
            for _ in 0..pending {
                self.db.undo()?;
            }
        }
        let state = self.db.state().clone();
        self.head = state.head_num;
        self.head_id = state.head_id;
        self.irreversible = state.irreversible_num;
        self.irreversible_id = state.irreversible_id;

        if pending > 0 {
            info!(head = self.head, "reverted, issuing an explicit fork event");
            self.bus.forks.publish(ForkEvent {
                block_num: self.head,
                depth: pending as u32,
                reason: ForkReason::Restart,
            });
        }
        if self.control.snapshot().enabled {
            self.control.reset_acked(self.head);
        }
        self.registry.rebuild();
        Ok(())
    }

    /// Connect to the configured endpoint and run until the connection
    /// closes, a fatal error occurs, or the receiver is aborted.
    pub async fn run(&mut self) -> Result<(), ReceiverError> {
        self.recover()?;
        let url = self.config.endpoint();
        info!(url = %url, "connecting");
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_FRAME_BYTES);
        ws_config.max_frame_size = Some(MAX_FRAME_BYTES);
        let (ws, _) = connect_async_with_config(url.as_str(), Some(ws_config), false).await?;
        self.run_session(ws).await
    }

    /// Drive a session over an established WebSocket. The single error
    /// funnel: log, close, return.
    pub async fn run_session<S>(
        &mut self,
        mut ws: WebSocketStream<S>,
    ) -> Result<(), ReceiverError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let outcome = self.drive(&mut ws).await;
        if let Err(err) = &outcome {
            error!(error = %err, "closing state-history connection");
        }
        let _ = ws.close(None).await;
        outcome
    }

    async fn drive<S>(&mut self, ws: &mut WebSocketStream<S>) -> Result<(), ReceiverError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // First frame: the protocol ABI as JSON text.
        let first = ws
            .next()
            .await
            .ok_or(ReceiverError::ConnectionClosed)??;
        let Message::Text(text) = first else {
            return Err(ReceiverError::UnexpectedFirstFrame);
        };
        let abi = AbiDef::from_json(&text)?;
        self.set_protocol_abi(&abi)?;

        ws.send(Message::Binary(self.encode_request()?)).await?;

        loop {
            if self.control.is_aborting() {
                return Ok(());
            }
            match self.pause.evaluate(
                self.head,
                &self.control,
                self.bus.queue_depth(),
                self.config.max_queue_size,
            ) {
                PauseDecision::Pause { delay, report } => {
                    if report {
                        let ack = self.control.snapshot();
                        info!(head = self.head, acknowledged = ack.acked_block, "pausing the reader");
                        self.bus.receiver_pauses.publish(ReceiverPauseEvent {
                            head: self.head,
                            acknowledged: ack.acked_block,
                        });
                    }
                    tokio::time::sleep(delay).await;
                    continue;
                }
                PauseDecision::ReadNow => {}
            }
            let Some(message) = ws.next().await else {
                info!("connection closed by server");
                return Ok(());
            };
            match message? {
                Message::Binary(raw) => {
                    if !self.apply_frame(&raw)? {
                        return Ok(());
                    }
                }
                Message::Close(_) => {
                    info!("connection closed by server");
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    /// Build the `get_blocks_request_v0` frame: resume from `head + 1`, with
    /// `have_positions` from the received-block ring so the server can find
    /// the fork point after a reconnect.
    pub fn encode_request(&self) -> Result<Vec<u8>, ReceiverError> {
        let schema = self.schema.as_ref().ok_or(ReceiverError::ProtocolAbiMissing)?;
        let have_positions: Vec<BlockPosition> = self
            .db
            .blocks_in_range(self.irreversible, self.head)
            .map(|(block_num, block_id)| BlockPosition {
                block_num,
                block_id: *block_id,
            })
            .collect();
        let request = GetBlocksRequestV0 {
            start_block_num: self.head + 1,
            end_block_num: u32::MAX,
            max_messages_in_flight: u32::MAX,
            have_positions,
            irreversible_only: false,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: true,
        };
        info!(start_block = request.start_block_num, "requesting blocks");

        let mut w = ByteWriter::new();
        w.write_varuint32(schema.variant_index("request", "get_blocks_request_v0")?);
        request.encode(&mut w);
        Ok(w.into_bytes())
    }

    /// Decode one binary frame and apply it. Returns `false` when the loop
    /// should stop.
    pub fn apply_frame(&mut self, raw: &[u8]) -> Result<bool, ReceiverError> {
        let schema = self.schema.as_ref().ok_or(ReceiverError::ProtocolAbiMissing)?;
        let mut rd = ByteReader::new(raw);
        schema.check_variant(&mut rd, "result", "get_blocks_result_v0")?;
        let result = GetBlocksResultV0::decode(&mut rd)?;
        self.process_result(result)
    }

    /// The fork-aware frame state machine. Returns `false` when aborting.
    pub fn process_result(&mut self, result: GetBlocksResultV0) -> Result<bool, ReceiverError> {
        let Some(this_block) = result.this_block else {
            return Ok(true);
        };
        let block_num = this_block.block_num;
        let lib = result.last_irreversible;

        if self.db.revision() < block_num {
            self.db.set_revision(block_num);
            debug!(revision = block_num, "set store revision");
        }

        if block_num > lib.block_num {
            // We are on the head branch.
            if block_num <= self.head {
                // The server went back to a lower block: a fork.
                info!(block = block_num, head = self.head, "fork detected");
                let depth = self.head - block_num;
                self.registry.rebuild();
                while self.db.revision() >= block_num {
                    self.db.undo().map_err(|_| ReceiverError::RollbackUnderflow {
                        block_num,
                        revision: self.db.revision(),
                    })?;
                }
                debug!(revision = self.db.revision(), "rolled back store");
                // Re-number so the new branch's scope lands on its block.
                self.db.set_revision(block_num);
                self.bus.forks.publish(ForkEvent {
                    block_num,
                    depth,
                    reason: ForkReason::Network,
                });
            } else if self.head > 0
                && result.prev_block.map(|p| p.block_id) != Some(self.head_id)
            {
                return Err(ReceiverError::PrevBlockMismatch { block_num });
            }
        }

        self.db.begin_undo_scope()?;

        if block_num > self.irreversible {
            self.db.insert_block(block_num, this_block.block_id)?;
            self.db.prune_blocks_through(lib.block_num)?;
        }

        self.head = block_num;
        self.head_id = this_block.block_id;
        self.irreversible = lib.block_num;
        self.irreversible_id = lib.block_id;

        if let Some(block) = &result.block {
            self.receive_block(block)?;
        }
        if let Some(deltas) = &result.deltas {
            self.receive_deltas(deltas)?;
        }
        if let Some(traces) = &result.traces {
            self.receive_traces(traces)?;
        }

        if self.control.is_aborting() {
            self.db.rollback_scope()?;
            return Ok(false);
        }

        self.db.set_state(ReceiverState {
            head_num: self.head,
            head_id: self.head_id,
            irreversible_num: self.irreversible,
            irreversible_id: self.irreversible_id,
        })?;
        self.db.push_scope()?;

        // Only commit what the exporter has confirmed.
        let ack = self.control.snapshot();
        let mut commit_rev = self.irreversible;
        if ack.enabled && ack.acked_block < commit_rev {
            commit_rev = ack.acked_block;
        }
        self.db.commit(commit_rev);
        self.db.flush()?;
        Ok(true)
    }

    fn receive_block(&mut self, raw: &[u8]) -> Result<(), ReceiverError> {
        if self.head == self.irreversible {
            info!(block = self.head, "crossing irreversible block");
        }
        if self.config.report_every > 0 && self.head % self.config.report_every == 0 {
            let ack = self.control.snapshot();
            if ack.enabled {
                info!(
                    head = self.head,
                    irreversible = self.irreversible,
                    queue_depth = self.bus.queue_depth(),
                    acknowledged = ack.acked_block,
                    "progress"
                );
            } else {
                info!(
                    head = self.head,
                    irreversible = self.irreversible,
                    queue_depth = self.bus.queue_depth(),
                    "progress"
                );
            }
        }

        let mut rd = ByteReader::new(raw);
        let block = SignedBlock::decode(&mut rd)?;
        // Stamp for the rest of this frame's events.
        self.block_timestamp = block.header.timestamp;
        self.bus.blocks.publish(BlockEvent {
            block_num: self.head,
            last_irreversible: self.irreversible,
            block,
        });
        Ok(())
    }

    fn receive_deltas(&mut self, compressed: &[u8]) -> Result<(), ReceiverError> {
        let schema = self.schema.as_ref().ok_or(ReceiverError::ProtocolAbiMissing)?;
        let mut demux = DeltaDemux {
            schema,
            registry: &mut self.registry,
            db: &mut self.db,
            bus: &self.bus,
            at: EventStamp {
                block_num: self.head,
                block_timestamp: self.block_timestamp,
            },
        };
        demux.run(compressed)
    }

    fn receive_traces(&mut self, compressed: &[u8]) -> Result<(), ReceiverError> {
        if !self.bus.transaction_traces.has_subscribers() {
            return Ok(());
        }
        let raw = zlib_decompress(compressed)?;
        let mut rd = ByteReader::new(&raw);
        let count = rd.read_varuint32()?;
        for _ in 0..count {
            let trace = TransactionTrace::decode(&mut rd)?;
            if self.is_blacklisted(&trace) {
                continue;
            }
            self.bus.transaction_traces.publish(TransactionTraceEvent {
                block_num: self.head,
                block_timestamp: self.block_timestamp,
                trace,
            });
        }
        Ok(())
    }

    fn is_blacklisted(&self, trace: &TransactionTrace) -> bool {
        trace.first_action().is_some_and(|action| {
            self.config
                .blacklist_actions
                .get(&action.account)
                .is_some_and(|names| names.contains(&action.name))
        })
    }
}

//! Typed structures of the state-history stream.
//!
//! Field layouts follow the v0 wire protocol: the envelope
//! (`get_blocks_request_v0` / `get_blocks_result_v0`), table deltas, chain
//! state rows, signed blocks, and transaction traces. Several structures are
//! variants on the wire with a single alternative; their decoders consume
//! the leading tag and require it to be zero.

use serde::Serialize;
use shipstream_core::{
    hex_bytes, BlockTimestamp, Checksum256, Name, PublicKey, Signature, TimePoint,
};

use crate::error::DecodeError;
use crate::reader::ByteReader;
use crate::writer::ByteWriter;

fn expect_zero_tag(rd: &mut ByteReader<'_>, type_name: &str) -> Result<(), DecodeError> {
    let tag = rd.read_varuint32()?;
    if tag != 0 {
        return Err(DecodeError::TagOutOfRange {
            name: type_name.to_string(),
            tag,
            count: 1,
        });
    }
    Ok(())
}

// ─── Envelope ────────────────────────────────────────────────────────────────

/// A `(block_num, block_id)` pair. Equal iff both fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BlockPosition {
    pub block_num: u32,
    pub block_id: Checksum256,
}

impl BlockPosition {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            block_num: rd.read_u32()?,
            block_id: rd.read_checksum256()?,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.block_num);
        w.write_checksum256(&self.block_id);
    }
}

/// The outbound block subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlocksRequestV0 {
    pub start_block_num: u32,
    pub end_block_num: u32,
    pub max_messages_in_flight: u32,
    pub have_positions: Vec<BlockPosition>,
    pub irreversible_only: bool,
    pub fetch_block: bool,
    pub fetch_traces: bool,
    pub fetch_deltas: bool,
}

impl GetBlocksRequestV0 {
    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.start_block_num);
        w.write_u32(self.end_block_num);
        w.write_u32(self.max_messages_in_flight);
        w.write_vec(&self.have_positions, |w, p| p.encode(w));
        w.write_bool(self.irreversible_only);
        w.write_bool(self.fetch_block);
        w.write_bool(self.fetch_traces);
        w.write_bool(self.fetch_deltas);
    }

    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            start_block_num: rd.read_u32()?,
            end_block_num: rd.read_u32()?,
            max_messages_in_flight: rd.read_u32()?,
            have_positions: rd.read_vec(BlockPosition::decode)?,
            irreversible_only: rd.read_bool()?,
            fetch_block: rd.read_bool()?,
            fetch_traces: rd.read_bool()?,
            fetch_deltas: rd.read_bool()?,
        })
    }
}

/// One inbound block frame. The `block`, `traces`, and `deltas` payloads are
/// opaque here; `traces` and `deltas` are zlib-compressed on the wire.
#[derive(Debug, Clone, Default)]
pub struct GetBlocksResultV0 {
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub this_block: Option<BlockPosition>,
    pub prev_block: Option<BlockPosition>,
    pub block: Option<Vec<u8>>,
    pub traces: Option<Vec<u8>>,
    pub deltas: Option<Vec<u8>>,
}

impl GetBlocksResultV0 {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            head: BlockPosition::decode(rd)?,
            last_irreversible: BlockPosition::decode(rd)?,
            this_block: rd.read_optional(BlockPosition::decode)?,
            prev_block: rd.read_optional(BlockPosition::decode)?,
            block: rd.read_optional(|r| r.read_bytes())?,
            traces: rd.read_optional(|r| r.read_bytes())?,
            deltas: rd.read_optional(|r| r.read_bytes())?,
        })
    }
}

// ─── Table deltas ────────────────────────────────────────────────────────────

/// One row of a table delta; `data` keeps its leading variant tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub present: bool,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// An ordered batch of row changes for one named chain table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDeltaV0 {
    pub name: String,
    pub rows: Vec<Row>,
}

impl TableDeltaV0 {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: rd.read_string()?,
            rows: rd.read_vec(|r| {
                Ok(Row {
                    present: r.read_bool()?,
                    data: r.read_bytes()?,
                })
            })?,
        })
    }
}

/// The `account` table row: contract metadata plus its serialized ABI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountObject {
    pub name: Name,
    pub vm_type: u8,
    pub vm_version: u8,
    pub privileged: bool,
    pub last_code_update: TimePoint,
    pub code_version: Checksum256,
    pub creation_date: BlockTimestamp,
    #[serde(with = "hex_bytes")]
    pub code: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub abi: Vec<u8>,
}

impl AccountObject {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: rd.read_name()?,
            vm_type: rd.read_u8()?,
            vm_version: rd.read_u8()?,
            privileged: rd.read_bool()?,
            last_code_update: rd.read_time_point()?,
            code_version: rd.read_checksum256()?,
            creation_date: rd.read_block_timestamp()?,
            code: rd.read_bytes()?,
            abi: rd.read_bytes()?,
        })
    }
}

/// The `contract_row` table row: one key/value entry of a contract table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValueObject {
    pub code: Name,
    pub scope: Name,
    pub table: Name,
    pub primary_key: u64,
    pub payer: Name,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

impl KeyValueObject {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            code: rd.read_name()?,
            scope: rd.read_name()?,
            table: rd.read_name()?,
            primary_key: rd.read_u64()?,
            payer: rd.read_name()?,
            value: rd.read_bytes()?,
        })
    }
}

// ─── Signed blocks ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerKey {
    pub producer_name: Name,
    pub block_signing_key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerSchedule {
    pub version: u32,
    pub producers: Vec<ProducerKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub ext_type: u16,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl Extension {
    fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            ext_type: rd.read_u16()?,
            data: rd.read_bytes()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    pub timestamp: BlockTimestamp,
    pub producer: Name,
    pub confirmed: u16,
    pub previous: Checksum256,
    pub transaction_mroot: Checksum256,
    pub action_mroot: Checksum256,
    pub schedule_version: u32,
    pub new_producers: Option<ProducerSchedule>,
    pub header_extensions: Vec<Extension>,
}

impl BlockHeader {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            timestamp: rd.read_block_timestamp()?,
            producer: rd.read_name()?,
            confirmed: rd.read_u16()?,
            previous: rd.read_checksum256()?,
            transaction_mroot: rd.read_checksum256()?,
            action_mroot: rd.read_checksum256()?,
            schedule_version: rd.read_u32()?,
            new_producers: rd.read_optional(|r| {
                Ok(ProducerSchedule {
                    version: r.read_u32()?,
                    producers: r.read_vec(|r| {
                        Ok(ProducerKey {
                            producer_name: r.read_name()?,
                            block_signing_key: r.read_public_key()?,
                        })
                    })?,
                })
            })?,
            header_extensions: rd.read_vec(Extension::decode)?,
        })
    }
}

/// Transaction body inside a receipt: either a digest or the packed form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransactionBody {
    Id(Checksum256),
    Packed(PackedTransaction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackedTransaction {
    pub signatures: Vec<Signature>,
    pub compression: u8,
    #[serde(with = "hex_bytes")]
    pub packed_context_free_data: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub packed_trx: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionReceipt {
    pub status: u8,
    pub cpu_usage_us: u32,
    /// varuint32 on the wire.
    pub net_usage_words: u32,
    pub trx: TransactionBody,
}

impl TransactionReceipt {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let status = rd.read_u8()?;
        let cpu_usage_us = rd.read_u32()?;
        let net_usage_words = rd.read_varuint32()?;
        let tag = rd.read_varuint32()?;
        let trx = match tag {
            0 => TransactionBody::Id(rd.read_checksum256()?),
            1 => TransactionBody::Packed(PackedTransaction {
                signatures: rd.read_vec(|r| r.read_signature())?,
                compression: rd.read_u8()?,
                packed_context_free_data: rd.read_bytes()?,
                packed_trx: rd.read_bytes()?,
            }),
            _ => {
                return Err(DecodeError::TagOutOfRange {
                    name: "transaction_variant".to_string(),
                    tag,
                    count: 2,
                })
            }
        };
        Ok(Self {
            status,
            cpu_usage_us,
            net_usage_words,
            trx,
        })
    }
}

/// A full signed block as carried in the `block` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedBlock {
    pub header: BlockHeader,
    pub producer_signature: Signature,
    pub transactions: Vec<TransactionReceipt>,
    pub block_extensions: Vec<Extension>,
}

impl SignedBlock {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            header: BlockHeader::decode(rd)?,
            producer_signature: rd.read_signature()?,
            transactions: rd.read_vec(TransactionReceipt::decode)?,
            block_extensions: rd.read_vec(Extension::decode)?,
        })
    }
}

// ─── Transaction traces ──────────────────────────────────────────────────────

/// Outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Executed,
    SoftFail,
    HardFail,
    Delayed,
    Expired,
}

impl TransactionStatus {
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::Executed),
            1 => Ok(Self::SoftFail),
            2 => Ok(Self::HardFail),
            3 => Ok(Self::Delayed),
            4 => Ok(Self::Expired),
            other => Err(DecodeError::UnknownTransactionStatus(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountAuthSequence {
    pub account: Name,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountDelta {
    pub account: Name,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReceipt {
    pub receiver: Name,
    pub act_digest: Checksum256,
    pub global_sequence: u64,
    pub recv_sequence: u64,
    pub auth_sequence: Vec<AccountAuthSequence>,
    pub code_sequence: u32,
    pub abi_sequence: u32,
}

impl ActionReceipt {
    fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        expect_zero_tag(rd, "action_receipt")?;
        Ok(Self {
            receiver: rd.read_name()?,
            act_digest: rd.read_checksum256()?,
            global_sequence: rd.read_u64()?,
            recv_sequence: rd.read_u64()?,
            auth_sequence: rd.read_vec(|r| {
                Ok(AccountAuthSequence {
                    account: r.read_name()?,
                    sequence: r.read_u64()?,
                })
            })?,
            code_sequence: rd.read_varuint32()?,
            abi_sequence: rd.read_varuint32()?,
        })
    }
}

/// One executed action. `inline_traces` nests arbitrarily deep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionTrace {
    pub receipt: ActionReceipt,
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub context_free: bool,
    pub elapsed: i64,
    pub console: String,
    pub account_ram_deltas: Vec<AccountDelta>,
    pub except: Option<String>,
    pub inline_traces: Vec<ActionTrace>,
}

impl ActionTrace {
    fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        expect_zero_tag(rd, "action_trace")?;
        Ok(Self {
            receipt: ActionReceipt::decode(rd)?,
            account: rd.read_name()?,
            name: rd.read_name()?,
            authorization: rd.read_vec(|r| {
                Ok(PermissionLevel {
                    actor: r.read_name()?,
                    permission: r.read_name()?,
                })
            })?,
            data: rd.read_bytes()?,
            context_free: rd.read_bool()?,
            elapsed: rd.read_i64()?,
            console: rd.read_string()?,
            account_ram_deltas: rd.read_vec(|r| {
                Ok(AccountDelta {
                    account: r.read_name()?,
                    delta: r.read_i64()?,
                })
            })?,
            except: rd.read_optional(|r| r.read_string())?,
            inline_traces: rd.read_vec(ActionTrace::decode)?,
        })
    }
}

/// A complete transaction trace, including traces of failed deferred
/// transactions it replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionTrace {
    pub id: Checksum256,
    pub status: TransactionStatus,
    pub cpu_usage_us: u32,
    pub net_usage_words: u32,
    pub elapsed: i64,
    pub net_usage: u64,
    pub scheduled: bool,
    pub traces: Vec<ActionTrace>,
    pub except: Option<String>,
    pub failed_dtrx_trace: Vec<TransactionTrace>,
}

impl TransactionTrace {
    pub fn decode(rd: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        expect_zero_tag(rd, "transaction_trace")?;
        Ok(Self {
            id: rd.read_checksum256()?,
            status: TransactionStatus::from_u8(rd.read_u8()?)?,
            cpu_usage_us: rd.read_u32()?,
            net_usage_words: rd.read_varuint32()?,
            elapsed: rd.read_i64()?,
            net_usage: rd.read_u64()?,
            scheduled: rd.read_bool()?,
            traces: rd.read_vec(ActionTrace::decode)?,
            except: rd.read_optional(|r| r.read_string())?,
            failed_dtrx_trace: rd.read_vec(TransactionTrace::decode)?,
        })
    }

    /// The first top-level action, if any. Used for action filtering.
    pub fn first_action(&self) -> Option<&ActionTrace> {
        self.traces.first()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

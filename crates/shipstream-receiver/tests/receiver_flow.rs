//! End-to-end receiver scenarios driven through the frame state machine.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use shipstream_codec::abi::{AbiDef, AbiTableDef, AbiVariantDef};
use shipstream_codec::{BlockPosition, ByteWriter, GetBlocksResultV0};
use shipstream_core::{BlockTimestamp, Checksum256, Name, TimePoint};
use shipstream_receiver::{ForkReason, Receiver, ReceiverConfig, ReceiverError};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn id(fill: u8) -> Checksum256 {
    Checksum256([fill; 32])
}

fn pos(block_num: u32, fill: u8) -> BlockPosition {
    BlockPosition {
        block_num,
        block_id: id(fill),
    }
}

/// Session ABI with the envelope and delta variants the receiver checks.
fn protocol_abi() -> AbiDef {
    let variant = |name: &str, types: &[&str]| AbiVariantDef {
        name: name.to_string(),
        types: types.iter().map(|t| t.to_string()).collect(),
    };
    AbiDef {
        version: "eosio::abi/1.1".to_string(),
        variants: vec![
            variant(
                "result",
                &["get_status_result_v0", "get_blocks_result_v0"],
            ),
            variant(
                "request",
                &["get_status_request_v0", "get_blocks_request_v0"],
            ),
            variant("table_delta", &["table_delta_v0"]),
            variant("account", &["account_v0"]),
            variant("contract_row", &["contract_row_v0"]),
        ],
        ..Default::default()
    }
}

fn make_receiver(dir: &tempfile::TempDir) -> Receiver {
    let mut receiver = Receiver::open(ReceiverConfig::new(dir.path())).unwrap();
    receiver.set_protocol_abi(&protocol_abi()).unwrap();
    receiver
}

/// A frame on the canonical branch: block ids are `[n; 32]`.
fn frame(block_num: u32, lib: u32) -> GetBlocksResultV0 {
    GetBlocksResultV0 {
        head: pos(block_num, block_num as u8),
        last_irreversible: pos(lib, lib as u8),
        this_block: Some(pos(block_num, block_num as u8)),
        prev_block: Some(pos(block_num - 1, (block_num - 1) as u8)),
        block: None,
        traces: None,
        deltas: None,
    }
}

fn compress(raw: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(raw).unwrap();
    enc.finish().unwrap()
}

fn contract_abi_bin() -> Vec<u8> {
    AbiDef {
        version: "eosio::abi/1.1".to_string(),
        tables: vec![AbiTableDef {
            name: "accounts".parse().unwrap(),
            index_type: "i64".to_string(),
            key_names: vec![],
            key_types: vec![],
            type_: "uint64".to_string(),
        }],
        ..Default::default()
    }
    .to_bin()
}

fn account_row(account: Name, abi: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_varuint32(0); // account_v0
    w.write_name(account);
    w.write_u8(0);
    w.write_u8(0);
    w.write_bool(false);
    w.write_time_point(TimePoint(0));
    w.write_checksum256(&Checksum256::zero());
    w.write_block_timestamp(BlockTimestamp(0));
    w.write_bytes(&[]);
    w.write_bytes(abi);
    w.into_bytes()
}

fn contract_row(code: Name) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_varuint32(0); // contract_row_v0
    w.write_name(code);
    w.write_name(code);
    w.write_name("accounts".parse().unwrap());
    w.write_u64(1);
    w.write_name(code);
    w.write_bytes(&[0x2a, 0, 0, 0, 0, 0, 0, 0]);
    w.into_bytes()
}

fn deltas_payload(deltas: &[(&str, Vec<(bool, Vec<u8>)>)]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_varuint32(deltas.len() as u32);
    for (name, rows) in deltas {
        w.write_varuint32(0); // table_delta_v0
        w.write_string(name);
        w.write_varuint32(rows.len() as u32);
        for (present, data) in rows {
            w.write_bool(*present);
            w.write_bytes(data);
        }
    }
    compress(&w.into_bytes())
}

/// One transaction trace whose first action is `account::action`.
fn trace_bytes(account: Name, action: Name) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_varuint32(0); // transaction_trace_v0
    w.write_checksum256(&id(0x77));
    w.write_u8(0); // executed
    w.write_u32(100);
    w.write_varuint32(12);
    w.write_i64(500);
    w.write_u64(96);
    w.write_bool(false);
    w.write_varuint32(1); // one action trace
    w.write_varuint32(0); // action_trace_v0
    w.write_varuint32(0); // action_receipt_v0
    w.write_name(account);
    w.write_checksum256(&id(9));
    w.write_u64(1);
    w.write_u64(2);
    w.write_varuint32(0);
    w.write_varuint32(1);
    w.write_varuint32(1);
    w.write_name(account);
    w.write_name(action);
    w.write_varuint32(0);
    w.write_bytes(&[]);
    w.write_bool(false);
    w.write_i64(50);
    w.write_string("");
    w.write_varuint32(0);
    w.write_bool(false);
    w.write_varuint32(0); // inline traces
    w.write_bool(false); // except
    w.write_varuint32(0); // failed_dtrx_trace
    w.into_bytes()
}

fn traces_payload(traces: &[Vec<u8>]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_varuint32(traces.len() as u32);
    for t in traces {
        w.write_raw(t);
    }
    compress(&w.into_bytes())
}

// ─── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn clean_advance() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);

    for block in 100..=103 {
        assert!(receiver.process_result(frame(block, block - 2)).unwrap());
        // revision follows the processed block
        assert_eq!(receiver.db().revision(), block);
    }

    assert_eq!(receiver.head(), 103);
    assert_eq!(receiver.irreversible(), 101);
    let ring: Vec<u32> = receiver.db().blocks_in_range(0, u32::MAX).map(|(n, _)| n).collect();
    assert_eq!(ring, vec![102, 103]);
    assert_eq!(receiver.db().undo_stack_depth(), 2);
    assert_eq!(receiver.db().baseline_revision(), 101);
}

#[test]
fn fork_correctness() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    let mut forks = receiver.bus().forks.subscribe();

    for block in 10..=12 {
        receiver.process_result(frame(block, block - 2)).unwrap();
    }
    assert!(forks.try_recv().is_err(), "no fork during clean advance");

    // block 11 arrives again on a new branch
    let new_branch = GetBlocksResultV0 {
        head: pos(11, 0x8b),
        last_irreversible: pos(10, 10),
        this_block: Some(pos(11, 0x8b)),
        prev_block: Some(pos(10, 10)),
        ..Default::default()
    };
    receiver.process_result(new_branch).unwrap();

    let fork = forks.try_recv().unwrap();
    assert_eq!(fork.block_num, 11);
    assert_eq!(fork.depth, 1);
    assert_eq!(fork.reason, ForkReason::Network);

    assert_eq!(receiver.head(), 11);
    assert_eq!(receiver.db().revision(), 11);
    // exactly one ring entry for 11, the new one
    assert_eq!(receiver.db().block_id(11), Some(&id(0x8b)));
    assert!(receiver.db().block_id(12).is_none());
}

#[test]
fn prev_hash_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    for block in 10..=11 {
        receiver.process_result(frame(block, block - 2)).unwrap();
    }

    let mut bad = frame(12, 10);
    bad.prev_block = Some(pos(11, 0x66)); // not our head id
    assert!(matches!(
        receiver.process_result(bad),
        Err(ReceiverError::PrevBlockMismatch { block_num: 12 })
    ));

    let mut missing = frame(13, 10);
    missing.prev_block = None;
    assert!(matches!(
        receiver.process_result(missing),
        Err(ReceiverError::PrevBlockMismatch { block_num: 13 })
    ));
}

#[test]
fn cold_start_accepts_missing_prev_block() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    let mut first = frame(1, 0);
    first.prev_block = None;
    assert!(receiver.process_result(first).unwrap());
    assert_eq!(receiver.head(), 1);
}

#[test]
fn fork_after_irreversible() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    let mut forks = receiver.bus().forks.subscribe();

    for block in 101..=120 {
        receiver.process_result(frame(block, block - 5)).unwrap();
    }
    assert_eq!(receiver.head(), 120);
    assert_eq!(receiver.irreversible(), 115);

    let new_branch = GetBlocksResultV0 {
        head: pos(118, 0x92),
        last_irreversible: pos(115, 115),
        this_block: Some(pos(118, 0x92)),
        prev_block: Some(pos(117, 117)),
        ..Default::default()
    };
    receiver.process_result(new_branch).unwrap();

    let fork = forks.try_recv().unwrap();
    assert_eq!(fork.block_num, 118);
    assert_eq!(fork.depth, 2);
    assert_eq!(receiver.db().block_id(118), Some(&id(0x92)));
    assert!(receiver.db().block_id(119).is_none());
    assert!(receiver.db().block_id(120).is_none());
}

#[test]
fn rollback_underflow_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    for block in 101..=120 {
        receiver.process_result(frame(block, block - 5)).unwrap();
    }

    // block 113 is at or below the frozen irreversible mark 115
    let impossible = GetBlocksResultV0 {
        head: pos(113, 0xa0),
        last_irreversible: pos(112, 0xa1),
        this_block: Some(pos(113, 0xa0)),
        prev_block: Some(pos(112, 112)),
        ..Default::default()
    };
    assert!(matches!(
        receiver.process_result(impossible),
        Err(ReceiverError::RollbackUnderflow { block_num: 113, .. })
    ));
}

#[test]
fn ring_never_holds_entries_below_irreversible() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    for block in 100..=140 {
        receiver.process_result(frame(block, block.saturating_sub(7))).unwrap();
        let irreversible = receiver.irreversible();
        assert!(receiver
            .db()
            .blocks_in_range(0, u32::MAX)
            .all(|(n, _)| n >= irreversible));
    }
}

#[test]
fn startup_recovery_unwinds_pending_scopes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut receiver = make_receiver(&dir);
        for block in 100..=106 {
            receiver.process_result(frame(block, block - 2)).unwrap();
        }
        // scopes 105 and 106 remain uncommitted
        assert_eq!(receiver.db().undo_stack_depth(), 2);
    }

    let mut receiver = make_receiver(&dir);
    let mut forks = receiver.bus().forks.subscribe();
    receiver.recover().unwrap();

    let fork = forks.try_recv().unwrap();
    assert_eq!(fork.block_num, 104);
    assert_eq!(fork.depth, 2);
    assert_eq!(fork.reason, ForkReason::Restart);
    assert_eq!(receiver.head(), 104);
    assert_eq!(receiver.db().undo_stack_depth(), 0);
}

#[test]
fn ack_gated_commit() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    let control = receiver.control();
    control.exporter_will_ack(1_000).unwrap();
    receiver.process_result(frame(100, 98)).unwrap();
    control.ack_block(100).unwrap();

    for block in 101..=130 {
        receiver.process_result(frame(block, block - 5)).unwrap();
    }
    assert_eq!(receiver.irreversible(), 125);
    // nothing beyond the acked block is committed
    assert_eq!(receiver.db().baseline_revision(), 100);
    assert_eq!(receiver.db().undo_stack_depth(), 30);

    control.ack_block(120).unwrap();
    receiver.process_result(frame(131, 126)).unwrap();
    assert_eq!(receiver.db().baseline_revision(), 120);
    assert_eq!(receiver.db().undo_stack_depth(), 11);
}

#[test]
fn abort_skips_the_scope_push() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    receiver.process_result(frame(100, 98)).unwrap();
    assert_eq!(receiver.db().undo_stack_depth(), 1);

    receiver.control().abort();
    assert!(!receiver.process_result(frame(101, 99)).unwrap());
    // the aborted frame left no scope behind
    assert_eq!(receiver.db().undo_stack_depth(), 1);
    assert!(!receiver.db().has_open_scope());
    assert_eq!(receiver.db().state().head_num, 100);
}

#[test]
fn abi_churn_over_frames() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    let bus = receiver.bus().clone();
    let mut updates = bus.abi_updates.subscribe();
    let mut removals = bus.abi_removals.subscribe();
    let mut rows = bus.table_row_updates.subscribe();
    let mut errors = bus.abi_errors.subscribe();
    let acc1: Name = "acc1".parse().unwrap();

    // frame A: set the ABI
    let mut a = frame(100, 98);
    a.deltas = Some(deltas_payload(&[(
        "account",
        vec![(true, account_row(acc1, &contract_abi_bin()))],
    )]));
    receiver.process_result(a).unwrap();
    assert_eq!(updates.try_recv().unwrap().account, acc1);

    // frame B: a contract row decodes
    let mut b = frame(101, 99);
    b.deltas = Some(deltas_payload(&[(
        "contract_row",
        vec![(true, contract_row(acc1))],
    )]));
    receiver.process_result(b).unwrap();
    let row = rows.try_recv().unwrap();
    assert_eq!(row.kvo.code, acc1);
    assert_eq!(row.block_num, 101);

    // the decode context can decode the row value against the stored ABI
    let decoded = receiver
        .decode_context(acc1)
        .decode_table_row(acc1, row.kvo.table, &row.kvo.value)
        .unwrap();
    assert_eq!(decoded, serde_json::json!("42"));

    // frame C: the ABI is cleared
    let mut c = frame(102, 100);
    c.deltas = Some(deltas_payload(&[(
        "account",
        vec![(true, account_row(acc1, &[]))],
    )]));
    receiver.process_result(c).unwrap();
    assert_eq!(removals.try_recv().unwrap().account, acc1);

    // frame D: the same contract row now fails with an ABI error
    let mut d = frame(103, 101);
    d.deltas = Some(deltas_payload(&[(
        "contract_row",
        vec![(true, contract_row(acc1))],
    )]));
    receiver.process_result(d).unwrap();
    assert!(rows.try_recv().is_err());
    assert_eq!(errors.try_recv().unwrap().account, acc1);
}

#[test]
fn blacklisted_trace_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    let mut traces = receiver.bus().transaction_traces.subscribe();

    let mut f = frame(100, 98);
    f.traces = Some(traces_payload(&[
        trace_bytes("eosio".parse().unwrap(), "onblock".parse().unwrap()),
        trace_bytes("somedapp".parse().unwrap(), "transfer".parse().unwrap()),
    ]));
    receiver.process_result(f).unwrap();

    let event = traces.try_recv().unwrap();
    assert_eq!(event.trace.first_action().unwrap().account.to_string(), "somedapp");
    assert!(traces.try_recv().is_err(), "the onblock trace must be dropped");
}

#[test]
fn traces_are_not_decoded_without_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);

    // garbage payload: would be a decode error if the path ran
    let mut f = frame(100, 98);
    f.traces = Some(compress(&[0xff, 0xff, 0xff]));
    assert!(receiver.process_result(f).unwrap());
}

#[test]
fn frame_without_this_block_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut receiver = make_receiver(&dir);
    let f = GetBlocksResultV0 {
        head: pos(50, 50),
        last_irreversible: pos(48, 48),
        ..Default::default()
    };
    assert!(receiver.process_result(f).unwrap());
    assert_eq!(receiver.head(), 0);
    assert_eq!(receiver.db().undo_stack_depth(), 0);
}

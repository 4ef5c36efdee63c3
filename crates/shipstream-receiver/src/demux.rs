//! The table-delta demultiplexer.
//!
//! Splits a block's decompressed delta stream into ABI registry updates
//! (`account` rows), typed contract-row events (`contract_row` rows), and
//! the raw per-table delta events every table gets.

use std::io::Read;

use shipstream_codec::{AbiSchema, AccountObject, ByteReader, KeyValueObject, TableDeltaV0};
use shipstream_state::ReceiverDb;
use tracing::trace;

use crate::error::ReceiverError;
use crate::events::{AbiErrorEvent, BlockTableDeltaEvent, EventBus, TableRowUpdateEvent};
use crate::registry::{AbiRegistry, EventStamp};

/// Inflate a zlib-compressed payload to a contiguous buffer.
pub(crate) fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// One frame's delta pass over the registry, store, and bus.
pub(crate) struct DeltaDemux<'a> {
    pub schema: &'a AbiSchema,
    pub registry: &'a mut AbiRegistry,
    pub db: &'a mut ReceiverDb,
    pub bus: &'a EventBus,
    pub at: EventStamp,
}

impl DeltaDemux<'_> {
    /// Process a compressed `deltas` payload: a varuint32 count of
    /// `table_delta` variants.
    pub fn run(&mut self, compressed: &[u8]) -> Result<(), ReceiverError> {
        let raw = zlib_decompress(compressed)?;
        let mut rd = ByteReader::new(&raw);
        let count = rd.read_varuint32()?;
        trace!(tables = count, "processing deltas");
        for _ in 0..count {
            self.schema
                .check_variant(&mut rd, "table_delta", "table_delta_v0")?;
            let delta = TableDeltaV0::decode(&mut rd)?;
            self.process_delta(delta)?;
        }
        Ok(())
    }

    fn process_delta(&mut self, delta: TableDeltaV0) -> Result<(), ReceiverError> {
        // The delta's declared type must be a known variant, and every row
        // payload must carry that variant with tag 0.
        self.schema.variant_alternatives(&delta.name)?;
        for row in &delta.rows {
            let mut row_rd = ByteReader::new(&row.data);
            self.schema
                .check_variant_index(&mut row_rd, &delta.name, 0)?;
        }

        match delta.name.as_str() {
            "account" => self.process_account_rows(&delta)?,
            "contract_row"
                if self.bus.table_row_updates.has_subscribers()
                    || self.bus.abi_errors.has_subscribers() =>
            {
                self.process_contract_rows(&delta)?
            }
            _ => {}
        }

        self.bus.block_table_deltas.publish(BlockTableDeltaEvent {
            block_num: self.at.block_num,
            block_timestamp: self.at.block_timestamp,
            table_delta: delta,
        });
        Ok(())
    }

    /// `account` rows carry contract metadata and ABIs; an empty ABI field
    /// clears the stored record.
    fn process_account_rows(&mut self, delta: &TableDeltaV0) -> Result<(), ReceiverError> {
        for row in &delta.rows {
            if !row.present {
                continue;
            }
            let mut rd = ByteReader::new(&row.data);
            rd.read_varuint32()?; // variant tag, verified above
            let account = AccountObject::decode(&mut rd)?;
            if account.abi.is_empty() {
                self.registry
                    .remove(self.db, self.bus, self.at, account.name)?;
            } else {
                self.registry
                    .update(self.db, self.bus, self.at, account.name, &account.abi)?;
            }
        }
        Ok(())
    }

    fn process_contract_rows(&mut self, delta: &TableDeltaV0) -> Result<(), ReceiverError> {
        for row in &delta.rows {
            let mut rd = ByteReader::new(&row.data);
            rd.read_varuint32()?; // variant tag, verified above
            let kvo = KeyValueObject::decode(&mut rd)?;
            if self.registry.ensure_loaded(self.db, kvo.code) {
                self.bus.table_row_updates.publish(TableRowUpdateEvent {
                    block_num: self.at.block_num,
                    block_timestamp: self.at.block_timestamp,
                    added: row.present,
                    kvo,
                });
            } else {
                self.bus.abi_errors.publish(AbiErrorEvent {
                    block_num: self.at.block_num,
                    block_timestamp: self.at.block_timestamp,
                    account: kvo.code,
                    error: "cannot decode table delta because of missing ABI".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use shipstream_codec::abi::{AbiDef, AbiTableDef, AbiVariantDef};
    use shipstream_codec::{ByteWriter, DecodeError};
    use shipstream_core::{BlockTimestamp, Checksum256, Name, TimePoint};
    use std::io::Write;

    /// Minimal session schema: `table_delta` plus one variant per table.
    fn session_schema() -> AbiSchema {
        let abi = AbiDef {
            version: "eosio::abi/1.1".to_string(),
            variants: vec![
                AbiVariantDef {
                    name: "table_delta".to_string(),
                    types: vec!["table_delta_v0".to_string()],
                },
                AbiVariantDef {
                    name: "account".to_string(),
                    types: vec!["account_v0".to_string()],
                },
                AbiVariantDef {
                    name: "contract_row".to_string(),
                    types: vec!["contract_row_v0".to_string()],
                },
            ],
            ..Default::default()
        };
        AbiSchema::build(&abi).unwrap()
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
        w.write_bytes(&[]); // code
        w.write_bytes(abi);
        w.into_bytes()
    }

    fn contract_row(code: Name) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_varuint32(0); // contract_row_v0
        w.write_name(code);
        w.write_name(code); // scope
        w.write_name("accounts".parse().unwrap());
        w.write_u64(1); // primary key
        w.write_name(code); // payer
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
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&w.into_bytes()).unwrap();
        enc.finish().unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        db: ReceiverDb,
        bus: EventBus,
        registry: AbiRegistry,
        schema: AbiSchema,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut db = ReceiverDb::open(dir.path().join("receiver-state"), 16).unwrap();
        db.set_revision(5);
        db.begin_undo_scope().unwrap();
        Fixture {
            _dir: dir,
            db,
            bus: EventBus::new(64),
            registry: AbiRegistry::new(),
            schema: session_schema(),
        }
    }

    fn run(fx: &mut Fixture, payload: &[u8]) -> Result<(), ReceiverError> {
        let mut demux = DeltaDemux {
            schema: &fx.schema,
            registry: &mut fx.registry,
            db: &mut fx.db,
            bus: &fx.bus,
            at: EventStamp {
                block_num: 5,
                block_timestamp: BlockTimestamp(10),
            },
        };
        demux.run(payload)
    }

    #[test]
    fn account_row_updates_registry_and_emits_delta_event() {
        let mut fx = fixture();
        let mut updates = fx.bus.abi_updates.subscribe();
        let mut deltas = fx.bus.block_table_deltas.subscribe();
        let token: Name = "eosio.token".parse().unwrap();

        let payload =
            deltas_payload(&[("account", vec![(true, account_row(token, &contract_abi_bin()))])]);
        run(&mut fx, &payload).unwrap();

        assert_eq!(updates.try_recv().unwrap().account, token);
        assert!(fx.registry.is_loaded(token));
        let event = deltas.try_recv().unwrap();
        assert_eq!(event.table_delta.name, "account");
        assert_eq!(event.block_timestamp, BlockTimestamp(10));
    }

    #[test]
    fn empty_abi_removes_record() {
        let mut fx = fixture();
        let token: Name = "eosio.token".parse().unwrap();
        let payload =
            deltas_payload(&[("account", vec![(true, account_row(token, &contract_abi_bin()))])]);
        run(&mut fx, &payload).unwrap();
        assert!(fx.db.get_abi(token).is_some());

        let mut removals = fx.bus.abi_removals.subscribe();
        let payload = deltas_payload(&[("account", vec![(true, account_row(token, &[]))])]);
        run(&mut fx, &payload).unwrap();
        assert_eq!(removals.try_recv().unwrap().account, token);
        assert!(fx.db.get_abi(token).is_none());
    }

    #[test]
    fn contract_row_with_abi_emits_row_update() {
        let mut fx = fixture();
        let token: Name = "eosio.token".parse().unwrap();
        let payload =
            deltas_payload(&[("account", vec![(true, account_row(token, &contract_abi_bin()))])]);
        run(&mut fx, &payload).unwrap();

        let mut rows = fx.bus.table_row_updates.subscribe();
        let payload = deltas_payload(&[("contract_row", vec![(true, contract_row(token))])]);
        run(&mut fx, &payload).unwrap();

        let event = rows.try_recv().unwrap();
        assert!(event.added);
        assert_eq!(event.kvo.code, token);
        assert_eq!(event.kvo.primary_key, 1);
    }

    #[test]
    fn contract_row_without_abi_emits_abi_error() {
        let mut fx = fixture();
        let stranger: Name = "stranger".parse().unwrap();
        let mut rows = fx.bus.table_row_updates.subscribe();
        let mut errors = fx.bus.abi_errors.subscribe();

        let payload = deltas_payload(&[("contract_row", vec![(false, contract_row(stranger))])]);
        run(&mut fx, &payload).unwrap();

        assert!(rows.try_recv().is_err());
        let err = errors.try_recv().unwrap();
        assert_eq!(err.account, stranger);
        assert!(err.error.contains("missing ABI"));
    }

    #[test]
    fn contract_rows_skipped_without_subscribers() {
        let mut fx = fixture();
        let stranger: Name = "stranger".parse().unwrap();
        let mut deltas = fx.bus.block_table_deltas.subscribe();

        // no table_row_updates / abi_errors subscribers: rows are not decoded,
        // but the raw delta event still fires
        let payload = deltas_payload(&[("contract_row", vec![(true, contract_row(stranger))])]);
        run(&mut fx, &payload).unwrap();
        assert_eq!(deltas.try_recv().unwrap().table_delta.name, "contract_row");
    }

    #[test]
    fn bad_row_variant_tag_is_fatal() {
        let mut fx = fixture();
        let mut bad_row = contract_row("stranger".parse().unwrap());
        bad_row[0] = 0x07; // out-of-range variant tag
        let payload = deltas_payload(&[("contract_row", vec![(true, bad_row)])]);
        let err = run(&mut fx, &payload).unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::Decode(DecodeError::TagOutOfRange { .. })
        ));
    }

    #[test]
    fn unknown_table_delta_type_is_fatal() {
        let mut fx = fixture();
        let payload = deltas_payload(&[("mystery", vec![(true, vec![0x00])])]);
        let err = run(&mut fx, &payload).unwrap_err();
        assert!(matches!(
            err,
            ReceiverError::Decode(DecodeError::UnknownType { .. })
        ));
    }
}

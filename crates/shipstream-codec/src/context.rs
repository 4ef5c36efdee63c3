//! The per-contract ABI decode context.
//!
//! Holds parsed schemas for the contracts whose ABIs have been installed.
//! The context is additive: schemas can be added or replaced, never removed.
//! Anything that needs a removal discards the whole context and rebuilds it
//! from the persisted ABI records.

use std::collections::HashMap;

use serde_json::Value;
use shipstream_core::Name;

use crate::abi::{AbiDef, AbiSchema};
use crate::error::DecodeError;
use crate::reader::ByteReader;
use crate::value::decode_value;

/// Process-lifetime cache of parsed contract schemas.
#[derive(Debug, Default)]
pub struct AbiDecodeContext {
    contracts: HashMap<Name, AbiSchema>,
}

impl AbiDecodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) a contract's ABI from its binary serialization.
    ///
    /// Validates the ABI before touching the context; a failed install
    /// leaves the previous schema (if any) in place. Returns the parsed
    /// definition so callers can publish it.
    pub fn set_abi_bin(&mut self, account: Name, raw: &[u8]) -> Result<AbiDef, DecodeError> {
        let def = AbiDef::from_bin(raw)?;
        let schema = AbiSchema::build(&def)?;
        self.contracts.insert(account, schema);
        Ok(def)
    }

    pub fn contains(&self, account: Name) -> bool {
        self.contracts.contains_key(&account)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn schema(&self, account: Name) -> Option<&AbiSchema> {
        self.contracts.get(&account)
    }

    /// Row type of `table` as declared by `account`'s ABI.
    pub fn table_type(&self, account: Name, table: Name) -> Result<&str, DecodeError> {
        let schema = self
            .contracts
            .get(&account)
            .ok_or_else(|| DecodeError::AbiNotLoaded {
                account: account.to_string(),
            })?;
        schema
            .table_type(table)
            .ok_or_else(|| DecodeError::UnknownTable {
                account: account.to_string(),
                table: table.to_string(),
            })
    }

    /// Decode one serialized row of `account`'s `table` into a JSON value.
    pub fn decode_table_row(
        &self,
        account: Name,
        table: Name,
        raw: &[u8],
    ) -> Result<Value, DecodeError> {
        let schema = self
            .contracts
            .get(&account)
            .ok_or_else(|| DecodeError::AbiNotLoaded {
                account: account.to_string(),
            })?;
        let row_type = schema
            .table_type(table)
            .ok_or_else(|| DecodeError::UnknownTable {
                account: account.to_string(),
                table: table.to_string(),
            })?
            .to_string();
        decode_value(schema, &mut ByteReader::new(raw), &row_type)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

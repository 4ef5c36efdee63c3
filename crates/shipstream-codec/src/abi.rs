//! ABI definitions and the resolved schema index built from them.
//!
//! An [`AbiDef`] arrives two ways: as JSON text (the session protocol ABI,
//! first frame of every connection) or as a binary blob (per-contract ABIs
//! carried in `account` table deltas). Both forms parse into the same
//! definition type, from which an [`AbiSchema`] resolves typedefs and
//! answers the variant/table/struct lookups the codec needs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shipstream_core::{hex_bytes, Name};

use crate::error::DecodeError;
use crate::reader::ByteReader;
use crate::writer::ByteWriter;

/// The ABI version prefix this codec understands.
const SUPPORTED_VERSION_PREFIX: &str = "eosio::abi/1.";

// ─── Definition types ─────────────────────────────────────────────────────────

/// `new_type_name` is an alias for `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiTypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiFieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiStructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<AbiFieldDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiVariantDef {
    pub name: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiActionDef {
    pub name: Name,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub ricardian_contract: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiTableDef {
    pub name: Name,
    #[serde(default)]
    pub index_type: String,
    #[serde(default)]
    pub key_names: Vec<String>,
    #[serde(default)]
    pub key_types: Vec<String>,
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiClausePair {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiErrorMessage {
    pub error_code: u64,
    pub error_msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiExtensionDef {
    pub tag: u16,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// A complete ABI definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiDef {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<AbiTypeDef>,
    #[serde(default)]
    pub structs: Vec<AbiStructDef>,
    #[serde(default)]
    pub actions: Vec<AbiActionDef>,
    #[serde(default)]
    pub tables: Vec<AbiTableDef>,
    #[serde(default)]
    pub ricardian_clauses: Vec<AbiClausePair>,
    #[serde(default)]
    pub error_messages: Vec<AbiErrorMessage>,
    #[serde(default)]
    pub abi_extensions: Vec<AbiExtensionDef>,
    #[serde(default)]
    pub variants: Vec<AbiVariantDef>,
}

impl AbiDef {
    /// Parse the JSON form (the session protocol ABI).
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let abi: AbiDef = serde_json::from_str(text)?;
        abi.check_version()?;
        Ok(abi)
    }

    /// Parse the binary form (per-contract ABIs from `account` deltas).
    pub fn from_bin(raw: &[u8]) -> Result<Self, DecodeError> {
        let mut rd = ByteReader::new(raw);
        let version = rd.read_string()?;
        let types = rd.read_vec(|r| {
            Ok(AbiTypeDef {
                new_type_name: r.read_string()?,
                type_: r.read_string()?,
            })
        })?;
        let structs = rd.read_vec(|r| {
            Ok(AbiStructDef {
                name: r.read_string()?,
                base: r.read_string()?,
                fields: r.read_vec(|r| {
                    Ok(AbiFieldDef {
                        name: r.read_string()?,
                        type_: r.read_string()?,
                    })
                })?,
            })
        })?;
        let actions = rd.read_vec(|r| {
            Ok(AbiActionDef {
                name: r.read_name()?,
                type_: r.read_string()?,
                ricardian_contract: r.read_string()?,
            })
        })?;
        let tables = rd.read_vec(|r| {
            Ok(AbiTableDef {
                name: r.read_name()?,
                index_type: r.read_string()?,
                key_names: r.read_vec(|r| r.read_string())?,
                key_types: r.read_vec(|r| r.read_string())?,
                type_: r.read_string()?,
            })
        })?;
        let ricardian_clauses = rd.read_vec(|r| {
            Ok(AbiClausePair {
                id: r.read_string()?,
                body: r.read_string()?,
            })
        })?;
        let error_messages = rd.read_vec(|r| {
            Ok(AbiErrorMessage {
                error_code: r.read_u64()?,
                error_msg: r.read_string()?,
            })
        })?;
        let abi_extensions = rd.read_vec(|r| {
            Ok(AbiExtensionDef {
                tag: r.read_u16()?,
                data: r.read_bytes()?,
            })
        })?;
        // Variants are a trailing extension; older ABIs simply end here.
        let variants = if rd.is_empty() {
            Vec::new()
        } else {
            rd.read_vec(|r| {
                Ok(AbiVariantDef {
                    name: r.read_string()?,
                    types: r.read_vec(|r| r.read_string())?,
                })
            })?
        };
        let abi = AbiDef {
            version,
            types,
            structs,
            actions,
            tables,
            ricardian_clauses,
            error_messages,
            abi_extensions,
            variants,
        };
        abi.check_version()?;
        Ok(abi)
    }

    /// Serialize to the binary form.
    pub fn to_bin(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_string(&self.version);
        w.write_vec(&self.types, |w, t| {
            w.write_string(&t.new_type_name);
            w.write_string(&t.type_);
        });
        w.write_vec(&self.structs, |w, s| {
            w.write_string(&s.name);
            w.write_string(&s.base);
            w.write_vec(&s.fields, |w, f| {
                w.write_string(&f.name);
                w.write_string(&f.type_);
            });
        });
        w.write_vec(&self.actions, |w, a| {
            w.write_name(a.name);
            w.write_string(&a.type_);
            w.write_string(&a.ricardian_contract);
        });
        w.write_vec(&self.tables, |w, t| {
            w.write_name(t.name);
            w.write_string(&t.index_type);
            w.write_vec(&t.key_names, |w, k| w.write_string(k));
            w.write_vec(&t.key_types, |w, k| w.write_string(k));
            w.write_string(&t.type_);
        });
        w.write_vec(&self.ricardian_clauses, |w, c| {
            w.write_string(&c.id);
            w.write_string(&c.body);
        });
        w.write_vec(&self.error_messages, |w, m| {
            w.write_u64(m.error_code);
            w.write_string(&m.error_msg);
        });
        w.write_vec(&self.abi_extensions, |w, e| {
            w.write_u16(e.tag);
            w.write_bytes(&e.data);
        });
        w.write_vec(&self.variants, |w, v| {
            w.write_string(&v.name);
            w.write_vec(&v.types, |w, t| w.write_string(t));
        });
        w.into_bytes()
    }

    fn check_version(&self) -> Result<(), DecodeError> {
        if !self.version.starts_with(SUPPORTED_VERSION_PREFIX) {
            return Err(DecodeError::UnsupportedAbiVersion(self.version.clone()));
        }
        Ok(())
    }
}

// ─── Resolved schema ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct StructEntry {
    pub base: String,
    pub fields: Vec<AbiFieldDef>,
}

/// Typedef-resolved index over one ABI: variant checks, struct/field and
/// table lookups.
#[derive(Debug, Clone)]
pub struct AbiSchema {
    typedefs: HashMap<String, String>,
    structs: HashMap<String, StructEntry>,
    variants: HashMap<String, Vec<String>>,
    tables: HashMap<Name, String>,
}

impl AbiSchema {
    pub fn build(abi: &AbiDef) -> Result<Self, DecodeError> {
        let mut schema = AbiSchema {
            typedefs: HashMap::new(),
            structs: HashMap::new(),
            variants: HashMap::new(),
            tables: HashMap::new(),
        };
        for t in &abi.types {
            schema
                .typedefs
                .insert(t.new_type_name.clone(), t.type_.clone());
        }
        for s in &abi.structs {
            schema.structs.insert(
                s.name.clone(),
                StructEntry {
                    base: s.base.clone(),
                    fields: s.fields.clone(),
                },
            );
        }
        for v in &abi.variants {
            schema.variants.insert(v.name.clone(), v.types.clone());
        }
        for t in &abi.tables {
            schema.tables.insert(t.name, t.type_.clone());
        }
        // Surface typedef cycles at build time rather than on first decode.
        for name in schema.typedefs.keys() {
            schema.resolve(name)?;
        }
        Ok(schema)
    }

    /// Follow typedefs until a concrete type name.
    pub fn resolve<'s>(&'s self, name: &'s str) -> Result<&'s str, DecodeError> {
        let mut current = name;
        let mut hops = 0;
        while let Some(next) = self.typedefs.get(current) {
            current = next;
            hops += 1;
            if hops > self.typedefs.len() {
                return Err(DecodeError::TypedefCycle {
                    name: name.to_string(),
                });
            }
        }
        Ok(current)
    }

    /// Alternatives of a variant type, or an error if the name does not
    /// resolve to a variant.
    pub fn variant_alternatives(&self, name: &str) -> Result<&[String], DecodeError> {
        let resolved = self.resolve(name)?;
        match self.variants.get(resolved) {
            Some(alts) => Ok(alts),
            None if self.structs.contains_key(resolved) => Err(DecodeError::NotAVariant {
                name: name.to_string(),
            }),
            None => Err(DecodeError::UnknownType {
                name: name.to_string(),
            }),
        }
    }

    /// Tag index of `alternative` within the variant `name`.
    pub fn variant_index(&self, name: &str, alternative: &str) -> Result<u32, DecodeError> {
        let alts = self.variant_alternatives(name)?;
        alts.iter()
            .position(|a| a == alternative)
            .map(|p| p as u32)
            .ok_or_else(|| DecodeError::WrongVariant {
                name: name.to_string(),
                expected: alternative.to_string(),
                got: "<absent>".to_string(),
            })
    }

    /// Read a variant tag and require it to select `expected` by name.
    pub fn check_variant(
        &self,
        rd: &mut ByteReader<'_>,
        name: &str,
        expected: &str,
    ) -> Result<(), DecodeError> {
        let alts = self.variant_alternatives(name)?;
        let tag = rd.read_varuint32()?;
        let got = alts
            .get(tag as usize)
            .ok_or_else(|| DecodeError::TagOutOfRange {
                name: name.to_string(),
                tag,
                count: alts.len(),
            })?;
        if got != expected {
            return Err(DecodeError::WrongVariant {
                name: name.to_string(),
                expected: expected.to_string(),
                got: got.clone(),
            });
        }
        Ok(())
    }

    /// Read a variant tag and require it to equal `expected` by index.
    pub fn check_variant_index(
        &self,
        rd: &mut ByteReader<'_>,
        name: &str,
        expected: u32,
    ) -> Result<(), DecodeError> {
        let alts = self.variant_alternatives(name)?;
        let tag = rd.read_varuint32()?;
        if tag as usize >= alts.len() {
            return Err(DecodeError::TagOutOfRange {
                name: name.to_string(),
                tag,
                count: alts.len(),
            });
        }
        if tag != expected {
            return Err(DecodeError::WrongVariant {
                name: name.to_string(),
                expected: alts[expected as usize].clone(),
                got: alts[tag as usize].clone(),
            });
        }
        Ok(())
    }

    /// Row type of a contract table.
    pub fn table_type(&self, table: Name) -> Option<&str> {
        self.tables.get(&table).map(String::as_str)
    }

    pub(crate) fn struct_entry(&self, name: &str) -> Option<&StructEntry> {
        self.structs.get(name)
    }

    pub(crate) fn variant_entry(&self, name: &str) -> Option<&Vec<String>> {
        self.variants.get(name)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

//! Schema-driven decoding of contract-defined binary payloads into JSON
//! values.
//!
//! Contract table rows and action data carry bytes whose layout is only
//! known through the contract's ABI. [`decode_value`] walks an
//! [`AbiSchema`] type graph and produces `serde_json::Value`s: 64-bit and
//! wider integers become decimal strings, byte blobs and digests become
//! hex, structs become objects, variants become `[type, value]` pairs.

use serde_json::{json, Map, Value};
use shipstream_core::{BlockTimestamp, TimePoint};

use crate::abi::AbiSchema;
use crate::error::DecodeError;
use crate::reader::ByteReader;

/// Guard against self-referential schemas that consume no input.
const MAX_NESTING: u32 = 64;

/// Decode one value of `type_name` from the reader.
pub fn decode_value(
    schema: &AbiSchema,
    rd: &mut ByteReader<'_>,
    type_name: &str,
) -> Result<Value, DecodeError> {
    decode_inner(schema, rd, type_name, 0)
}

fn decode_inner(
    schema: &AbiSchema,
    rd: &mut ByteReader<'_>,
    type_name: &str,
    depth: u32,
) -> Result<Value, DecodeError> {
    if depth > MAX_NESTING {
        return Err(DecodeError::Other(format!(
            "type '{type_name}' nests deeper than {MAX_NESTING} levels"
        )));
    }

    // Suffixes bind tighter than typedefs: `foo[]`, `foo?`, `foo$`.
    if let Some(inner) = type_name.strip_suffix('$') {
        // Binary extension: absent iff the buffer is exhausted.
        if rd.is_empty() {
            return Ok(Value::Null);
        }
        return decode_inner(schema, rd, inner, depth + 1);
    }
    if let Some(inner) = type_name.strip_suffix('?') {
        if rd.read_bool()? {
            return decode_inner(schema, rd, inner, depth + 1);
        }
        return Ok(Value::Null);
    }
    if let Some(inner) = type_name.strip_suffix("[]") {
        let count = rd.read_varuint32()?;
        let mut items = Vec::with_capacity((count as usize).min(4096));
        for _ in 0..count {
            items.push(decode_inner(schema, rd, inner, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }

    if let Some(value) = decode_builtin(rd, type_name)? {
        return Ok(value);
    }

    let resolved = schema.resolve(type_name)?.to_string();
    if resolved != type_name {
        return decode_inner(schema, rd, &resolved, depth + 1);
    }

    if let Some(alts) = schema.variant_entry(&resolved) {
        let tag = rd.read_varuint32()?;
        let alt = alts
            .get(tag as usize)
            .ok_or_else(|| DecodeError::TagOutOfRange {
                name: resolved.clone(),
                tag,
                count: alts.len(),
            })?
            .clone();
        let inner = decode_inner(schema, rd, &alt, depth + 1)?;
        return Ok(json!([alt, inner]));
    }

    if schema.struct_entry(&resolved).is_some() {
        let mut out = Map::new();
        decode_struct_fields(schema, rd, &resolved, depth, &mut out)?;
        return Ok(Value::Object(out));
    }

    Err(DecodeError::UnknownType {
        name: type_name.to_string(),
    })
}

/// Base struct fields first, then own fields, flattened into one object.
fn decode_struct_fields(
    schema: &AbiSchema,
    rd: &mut ByteReader<'_>,
    name: &str,
    depth: u32,
    out: &mut Map<String, Value>,
) -> Result<(), DecodeError> {
    if depth > MAX_NESTING {
        return Err(DecodeError::Other(format!(
            "struct '{name}' nests deeper than {MAX_NESTING} levels"
        )));
    }
    let entry = schema
        .struct_entry(name)
        .ok_or_else(|| DecodeError::UnknownType {
            name: name.to_string(),
        })?
        .clone();
    if !entry.base.is_empty() {
        let base = schema.resolve(&entry.base)?.to_string();
        decode_struct_fields(schema, rd, &base, depth + 1, out)?;
    }
    for field in &entry.fields {
        let value = decode_inner(schema, rd, &field.type_, depth + 1)?;
        out.insert(field.name.clone(), value);
    }
    Ok(())
}

fn decode_builtin(rd: &mut ByteReader<'_>, name: &str) -> Result<Option<Value>, DecodeError> {
    let value = match name {
        "bool" => json!(rd.read_bool()?),
        "uint8" => json!(rd.read_u8()?),
        "int8" => json!(rd.read_i8()?),
        "uint16" => json!(rd.read_u16()?),
        "int16" => json!(rd.read_i16()?),
        "uint32" => json!(rd.read_u32()?),
        "int32" => json!(rd.read_i32()?),
        "uint64" => json!(rd.read_u64()?.to_string()),
        "int64" => json!(rd.read_i64()?.to_string()),
        "uint128" => json!(rd.read_u128()?.to_string()),
        "int128" => json!(rd.read_i128()?.to_string()),
        "varuint32" => json!(rd.read_varuint32()?),
        "varint32" => json!(rd.read_varint32()?),
        "float32" => json!(rd.read_f32()?),
        "float64" => json!(rd.read_f64()?),
        "float128" => json!(hex::encode(rd.take(16)?)),
        "string" => json!(rd.read_string()?),
        "bytes" => json!(hex::encode(rd.read_bytes()?)),
        "checksum160" => json!(hex::encode(rd.take(20)?)),
        "checksum256" => json!(rd.read_checksum256()?.to_string()),
        "checksum512" => json!(hex::encode(rd.take(64)?)),
        "name" => json!(rd.read_name()?.to_string()),
        "time_point" => json!(rd.read_time_point()?.to_string()),
        "time_point_sec" => json!(TimePoint(rd.read_u32()? as i64 * 1_000_000).to_string()),
        "block_timestamp_type" => json!(BlockTimestamp(rd.read_u32()?).to_string()),
        "symbol_code" => json!(symbol_code_to_string(rd.read_u64()?)),
        "symbol" => json!(symbol_to_string(rd.read_u64()?)),
        "asset" => {
            let amount = rd.read_i64()?;
            let symbol = rd.read_u64()?;
            json!(format_asset(amount, symbol))
        }
        "public_key" => {
            let key = rd.read_public_key()?;
            let mut raw = vec![key.curve];
            raw.extend_from_slice(&key.data);
            json!(hex::encode(raw))
        }
        "signature" => {
            let sig = rd.read_signature()?;
            let mut raw = vec![sig.curve];
            raw.extend_from_slice(&sig.data);
            json!(hex::encode(raw))
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn symbol_code_to_string(raw: u64) -> String {
    let mut out = String::new();
    let mut tmp = raw;
    while tmp > 0 {
        let c = (tmp & 0xff) as u8;
        if c == 0 {
            break;
        }
        out.push(c as char);
        tmp >>= 8;
    }
    out
}

fn symbol_to_string(raw: u64) -> String {
    let precision = (raw & 0xff) as u32;
    format!("{},{}", precision, symbol_code_to_string(raw >> 8))
}

fn format_asset(amount: i64, symbol: u64) -> String {
    let precision = (symbol & 0xff) as u32;
    let code = symbol_code_to_string(symbol >> 8);
    let sign = if amount < 0 { "-" } else { "" };
    let magnitude = amount.unsigned_abs();
    let scale = 10u64.pow(precision.min(18));
    if precision == 0 {
        format!("{sign}{magnitude} {code}")
    } else {
        format!(
            "{sign}{}.{:0width$} {code}",
            magnitude / scale,
            magnitude % scale,
            width = precision as usize
        )
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AbiDef, AbiFieldDef, AbiStructDef, AbiTypeDef, AbiVariantDef};
    use crate::writer::ByteWriter;

    fn token_schema() -> AbiSchema {
        let abi = AbiDef {
            version: "eosio::abi/1.1".to_string(),
            types: vec![AbiTypeDef {
                new_type_name: "account_name".to_string(),
                type_: "name".to_string(),
            }],
            structs: vec![AbiStructDef {
                name: "transfer".to_string(),
                base: String::new(),
                fields: vec![
                    AbiFieldDef {
                        name: "from".to_string(),
                        type_: "account_name".to_string(),
                    },
                    AbiFieldDef {
                        name: "to".to_string(),
                        type_: "account_name".to_string(),
                    },
                    AbiFieldDef {
                        name: "quantity".to_string(),
                        type_: "asset".to_string(),
                    },
                    AbiFieldDef {
                        name: "memo".to_string(),
                        type_: "string".to_string(),
                    },
                ],
            }],
            ..Default::default()
        };
        AbiSchema::build(&abi).unwrap()
    }

    fn eos_symbol() -> u64 {
        // precision 4, code "EOS"
        4 | (b'E' as u64) << 8 | (b'O' as u64) << 16 | (b'S' as u64) << 24
    }

    #[test]
    fn decode_transfer_struct() {
        let schema = token_schema();
        let mut w = ByteWriter::new();
        w.write_name("alice".parse().unwrap());
        w.write_name("bob".parse().unwrap());
        w.write_i64(15_000); // 1.5000 EOS
        w.write_u64(eos_symbol());
        w.write_string("rent");
        let buf = w.into_bytes();

        let value = decode_value(&schema, &mut ByteReader::new(&buf), "transfer").unwrap();
        assert_eq!(value["from"], "alice");
        assert_eq!(value["to"], "bob");
        assert_eq!(value["quantity"], "1.5000 EOS");
        assert_eq!(value["memo"], "rent");
    }

    #[test]
    fn decode_array_and_optional() {
        let schema = token_schema();
        let mut w = ByteWriter::new();
        w.write_varuint32(3);
        w.write_u32(1);
        w.write_u32(2);
        w.write_u32(3);
        w.write_bool(false);
        let buf = w.into_bytes();
        let mut rd = ByteReader::new(&buf);

        assert_eq!(
            decode_value(&schema, &mut rd, "uint32[]").unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(decode_value(&schema, &mut rd, "name?").unwrap(), Value::Null);
    }

    #[test]
    fn decode_binary_extension_on_empty_buffer() {
        let schema = token_schema();
        let mut rd = ByteReader::new(&[]);
        assert_eq!(
            decode_value(&schema, &mut rd, "uint32$").unwrap(),
            Value::Null
        );
    }

    #[test]
    fn decode_variant_as_pair() {
        let abi = AbiDef {
            version: "eosio::abi/1.1".to_string(),
            variants: vec![AbiVariantDef {
                name: "id_or_num".to_string(),
                types: vec!["uint32".to_string(), "name".to_string()],
            }],
            ..Default::default()
        };
        let schema = AbiSchema::build(&abi).unwrap();
        let mut w = ByteWriter::new();
        w.write_varuint32(1);
        w.write_name("carol".parse().unwrap());
        let buf = w.into_bytes();

        let value = decode_value(&schema, &mut ByteReader::new(&buf), "id_or_num").unwrap();
        assert_eq!(value, json!(["name", "carol"]));
    }

    #[test]
    fn wide_ints_decode_to_strings() {
        let schema = token_schema();
        let mut w = ByteWriter::new();
        w.write_u64(u64::MAX);
        w.write_u128(u128::MAX);
        let buf = w.into_bytes();
        let mut rd = ByteReader::new(&buf);

        assert_eq!(
            decode_value(&schema, &mut rd, "uint64").unwrap(),
            json!(u64::MAX.to_string())
        );
        assert_eq!(
            decode_value(&schema, &mut rd, "uint128").unwrap(),
            json!(u128::MAX.to_string())
        );
    }

    #[test]
    fn self_referential_struct_is_bounded() {
        let abi = AbiDef {
            version: "eosio::abi/1.1".to_string(),
            structs: vec![AbiStructDef {
                name: "loop".to_string(),
                base: String::new(),
                fields: vec![AbiFieldDef {
                    name: "next".to_string(),
                    type_: "loop".to_string(),
                }],
            }],
            ..Default::default()
        };
        let schema = AbiSchema::build(&abi).unwrap();
        let buf = [0u8; 8];
        assert!(decode_value(&schema, &mut ByteReader::new(&buf), "loop").is_err());
    }

    #[test]
    fn negative_asset_formats() {
        assert_eq!(format_asset(-15_000, eos_symbol()), "-1.5000 EOS");
        assert_eq!(format_asset(7, (b'X' as u64) << 8), "7 X");
    }
}

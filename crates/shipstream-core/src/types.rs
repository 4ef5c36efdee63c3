//! Chain primitive types.
//!
//! `Name` is the 64-bit base-32 compressed account/action name used all over
//! the state-history stream; `Checksum256` is the 32-byte block/transaction
//! digest; `BlockTimestamp` and `TimePoint` are the two chain time
//! representations. All of them serialize as human-readable strings so they
//! can be used as map keys in configs and in the persisted receiver state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DigestParseError, NameParseError};

// ─── Name ─────────────────────────────────────────────────────────────────────

/// Characters of the base-32 name alphabet, indexed by symbol value.
const NAME_CHARS: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// A 64-bit compressed account or action name.
///
/// Up to 12 characters from `[.1-5a-z]` packed at 5 bits each, plus an
/// optional 13th character restricted to 4 bits. Empty names are legal and
/// encode to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name(pub u64);

impl Name {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    fn symbol(c: u8) -> Option<u64> {
        match c {
            b'a'..=b'z' => Some((c - b'a') as u64 + 6),
            b'1'..=b'5' => Some((c - b'1') as u64 + 1),
            b'.' => Some(0),
            _ => None,
        }
    }
}

impl FromStr for Name {
    type Err = NameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() > 13 {
            return Err(NameParseError::TooLong(s.to_string()));
        }
        let mut value = 0u64;
        for (i, &c) in bytes.iter().enumerate() {
            let sym = Name::symbol(c).ok_or_else(|| NameParseError::InvalidChar {
                name: s.to_string(),
                ch: c as char,
            })?;
            if i < 12 {
                value |= (sym & 0x1f) << (59 - 5 * i);
            } else {
                // The 13th character only has 4 bits of room.
                if sym > 0x0f {
                    return Err(NameParseError::InvalidThirteenth {
                        name: s.to_string(),
                        ch: c as char,
                    });
                }
                value |= sym;
            }
        }
        Ok(Name(value))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [b'.'; 13];
        let mut tmp = self.0;
        for i in 0..13 {
            let mask = if i == 0 { 0x0f } else { 0x1f };
            out[12 - i] = NAME_CHARS[(tmp & mask) as usize];
            tmp >>= if i == 0 { 4 } else { 5 };
        }
        let len = out
            .iter()
            .rposition(|&c| c != b'.')
            .map(|p| p + 1)
            .unwrap_or(0);
        for &c in &out[..len] {
            write!(f, "{}", c as char)?;
        }
        Ok(())
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Checksum256 ─────────────────────────────────────────────────────────────

/// A 256-bit digest (block id, transaction id, code hash).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Checksum256(pub [u8; 32]);

impl Checksum256 {
    pub const fn zero() -> Self {
        Self([0; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Display for Checksum256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Checksum256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum256({})", self)
    }
}

impl FromStr for Checksum256 {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(DigestParseError::Length(s.len()));
        }
        let raw = hex::decode(s).map_err(|e| DigestParseError::Hex(e.to_string()))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&raw);
        Ok(Self(out))
    }
}

impl Serialize for Checksum256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Timestamps ──────────────────────────────────────────────────────────────

/// A block timestamp: the number of 500 ms slots since 2000-01-01T00:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockTimestamp(pub u32);

impl BlockTimestamp {
    /// Milliseconds between the Unix epoch and the block timestamp epoch.
    pub const EPOCH_MS: i64 = 946_684_800_000;
    /// Slot width in milliseconds.
    pub const INTERVAL_MS: i64 = 500;

    pub fn to_datetime(self) -> DateTime<Utc> {
        let ms = Self::EPOCH_MS + self.0 as i64 * Self::INTERVAL_MS;
        DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl fmt::Display for BlockTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%dT%H:%M:%S%.3f"))
    }
}

/// A microsecond-resolution wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimePoint(pub i64);

impl TimePoint {
    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

// ─── Key material ────────────────────────────────────────────────────────────

/// A public key: one curve tag byte plus 33 bytes of key data.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    pub curve: u8,
    pub data: [u8; 33],
}

impl Default for PublicKey {
    fn default() -> Self {
        Self { curve: 0, data: [0; 33] }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({:02x}{})", self.curve, hex::encode(self.data))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut raw = vec![self.curve];
        raw.extend_from_slice(&self.data);
        serializer.collect_str(&hex::encode(raw))
    }
}

/// A signature: one curve tag byte plus 65 bytes of signature data.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub curve: u8,
    pub data: [u8; 65],
}

impl Default for Signature {
    fn default() -> Self {
        Self { curve: 0, data: [0; 65] }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:02x}{})", self.curve, hex::encode(self.data))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut raw = vec![self.curve];
        raw.extend_from_slice(&self.data);
        serializer.collect_str(&hex::encode(raw))
    }
}

// ─── Hex helpers ─────────────────────────────────────────────────────────────

/// Serde adapter serializing `Vec<u8>` fields as hex strings.
///
/// Used with `#[serde(with = "hex_bytes")]` on byte-blob fields (contract
/// ABI bytes, action payloads, packed transactions).
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

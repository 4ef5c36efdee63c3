//! Cursor-style reader over a binary wire buffer.
//!
//! All multi-byte integers are little-endian. Variable-length integers use
//! LEB128 with a five-byte cap. Length-prefixed containers (strings, byte
//! blobs, arrays) carry a varuint32 count.

use shipstream_core::{BlockTimestamp, Checksum256, Name, PublicKey, Signature, TimePoint};

use crate::error::DecodeError;

/// A non-owning cursor over a wire buffer.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let raw = self.take(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(raw);
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_u128(&mut self) -> Result<u128, DecodeError> {
        let raw = self.take(16)?;
        let mut b = [0u8; 16];
        b.copy_from_slice(raw);
        Ok(u128::from_le_bytes(b))
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_i128(&mut self) -> Result<i128, DecodeError> {
        Ok(self.read_u128()? as i128)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// LEB128 unsigned, at most 5 bytes.
    pub fn read_varuint32(&mut self) -> Result<u32, DecodeError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= 35 {
                return Err(DecodeError::VarintOverflow);
            }
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(value as u32)
    }

    /// Zig-zag signed varint.
    pub fn read_varint32(&mut self) -> Result<i32, DecodeError> {
        let raw = self.read_varuint32()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    /// varuint32 length prefix followed by raw bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_varuint32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// varuint32 length prefix followed by UTF-8 data.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let raw = self.read_bytes()?;
        String::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_checksum256(&mut self) -> Result<Checksum256, DecodeError> {
        let raw = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(raw);
        Ok(Checksum256(out))
    }

    pub fn read_name(&mut self) -> Result<Name, DecodeError> {
        Ok(Name(self.read_u64()?))
    }

    pub fn read_time_point(&mut self) -> Result<TimePoint, DecodeError> {
        Ok(TimePoint(self.read_i64()?))
    }

    pub fn read_block_timestamp(&mut self) -> Result<BlockTimestamp, DecodeError> {
        Ok(BlockTimestamp(self.read_u32()?))
    }

    pub fn read_public_key(&mut self) -> Result<PublicKey, DecodeError> {
        let curve = self.read_u8()?;
        let raw = self.take(33)?;
        let mut data = [0u8; 33];
        data.copy_from_slice(raw);
        Ok(PublicKey { curve, data })
    }

    pub fn read_signature(&mut self) -> Result<Signature, DecodeError> {
        let curve = self.read_u8()?;
        let raw = self.take(65)?;
        let mut data = [0u8; 65];
        data.copy_from_slice(raw);
        Ok(Signature { curve, data })
    }

    /// One present byte, then the payload if present.
    pub fn read_optional<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, DecodeError> {
        if self.read_bool()? {
            Ok(Some(read(self)?))
        } else {
            Ok(None)
        }
    }

    /// varuint32 count, then that many items.
    pub fn read_vec<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        let count = self.read_varuint32()? as usize;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(read(self)?);
        }
        Ok(out)
    }
}

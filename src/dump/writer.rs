use bytes::{BufMut, Bytes, BytesMut};

use crate::parser::{
    capture::crc64,
    core::raw::RDBStr,
    model::{RDBOpcode, RDBType, StreamId},
};

/// Append-only encoder for the RDB wire format.
#[derive(Debug, Default)]
pub struct RdbWriter {
    buf: BytesMut,
}

impl RdbWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Hand out everything written so far, leaving the writer empty.
    pub fn split(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn write_type(&mut self, ty: RDBType) {
        self.buf.put_u8(ty.into());
    }

    pub fn write_opcode(&mut self, opcode: RDBOpcode) {
        self.buf.put_u8(opcode.into());
    }

    pub fn write_le_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_le_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    pub fn write_len(&mut self, len: u64) {
        if len < 1 << 6 {
            self.buf.put_u8(len as u8);
        } else if len < 1 << 14 {
            self.buf.put_u8(0x40 | (len >> 8) as u8);
            self.buf.put_u8(len as u8);
        } else if len <= u32::MAX as u64 {
            self.buf.put_u8(0x80);
            self.buf.put_u32(len as u32);
        } else {
            self.buf.put_u8(0x81);
            self.buf.put_u64(len);
        }
    }

    pub fn write_str(&mut self, data: &[u8]) {
        self.write_len(data.len() as u64);
        self.buf.put_slice(data);
    }

    /// Strings that are integers are written with the int8/16/32 encodings.
    pub fn write_rdb_str(&mut self, value: &RDBStr) {
        match value.as_int() {
            Some(v) if i8::try_from(v).is_ok() => {
                self.buf.put_u8(0xC0);
                self.buf.put_i8(v as i8);
            }
            Some(v) if i16::try_from(v).is_ok() => {
                self.buf.put_u8(0xC1);
                self.buf.put_i16_le(v as i16);
            }
            Some(v) if i32::try_from(v).is_ok() => {
                self.buf.put_u8(0xC2);
                self.buf.put_i32_le(v as i32);
            }
            _ => self.write_str(&value.as_bytes()),
        }
    }

    /// ZSET (v1) score as a length-prefixed ASCII double.
    pub fn write_double_str(&mut self, value: f64) {
        if value.is_nan() {
            self.buf.put_u8(253);
        } else if value == f64::INFINITY {
            self.buf.put_u8(254);
        } else if value == f64::NEG_INFINITY {
            self.buf.put_u8(255);
        } else {
            // Shortest round-trip digits; the exponent form keeps huge and tiny
            // magnitudes well under the 253 length marker, like `%.17g`.
            let magnitude = value.abs();
            let text = if magnitude != 0.0 && !(1e-4..1e17).contains(&magnitude) {
                format!("{:e}", value)
            } else {
                value.to_string()
            };
            self.buf.put_u8(text.len() as u8);
            self.buf.put_slice(text.as_bytes());
        }
    }

    pub fn write_stream_id(&mut self, id: StreamId) {
        self.write_len(id.ms);
        self.write_len(id.seq);
    }

    pub fn write_raw_stream_id(&mut self, id: StreamId) {
        self.buf.put_slice(&id.to_be_bytes());
    }

    pub fn write_header(&mut self, version: u16) {
        self.buf.put_slice(format!("REDIS{:04}", version).as_bytes());
    }

    /// EOF opcode plus the CRC64 of everything written before it.
    pub fn write_footer(&mut self, version: u16) {
        self.write_opcode(RDBOpcode::Eof);
        if version >= 5 {
            let crc = crc64(&self.buf);
            self.buf.put_u64_le(crc);
        }
    }
}

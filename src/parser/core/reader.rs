use std::{
    fmt,
    io::{self, Read},
    ops::{Deref, DerefMut},
};

use anyhow::Context;
use bytes::Bytes;
use crc::Digest;

use crate::{
    helper::{AnyResult, wrapping_to_usize},
    parser::{
        capture::{CRC64, CaptureBuffer, CapturedValue},
        core::raw::{RDBLen, RDBStr, lzf_decompress, rdb_len_tail_size, read_rdb_len},
        error::DecodeError,
    },
};

const SKIP_CHUNK: usize = 8 * 1024;
const READ_CHUNK: usize = 64 * 1024;

/// Forward-only cursor over an RDB byte stream.
///
/// Every consumed byte is counted, folded into the file checksum and offered
/// to the capture tee. The reader never seeks backward.
pub struct RdbReader<'a> {
    inner: Box<dyn Read + Send + 'a>,
    pos: u64,
    checksum: Digest<'static, u64>,
    capture: CaptureBuffer,
}

impl fmt::Debug for RdbReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdbReader")
            .field("pos", &self.pos)
            .field("capture", &self.capture)
            .finish()
    }
}

impl<'a> RdbReader<'a> {
    pub fn new(inner: impl Read + Send + 'a) -> Self {
        Self {
            inner: Box::new(inner),
            pos: 0,
            checksum: CRC64.digest(),
            capture: CaptureBuffer::default(),
        }
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// CRC64 of every byte consumed so far; the running checksum restarts.
    pub fn take_checksum(&mut self) -> u64 {
        std::mem::replace(&mut self.checksum, CRC64.digest()).finalize()
    }

    pub fn capture(&self) -> &CaptureBuffer {
        &self.capture
    }

    /// Hand back the unconsumed remainder of the stream.
    pub fn into_inner(self) -> Box<dyn Read + Send + 'a> {
        self.inner
    }

    /// Start mirroring consumed bytes for one value.
    ///
    /// The returned scope derefs to the reader; dropping it (including on an
    /// error path) discards the capture and returns the tee to `Pass`.
    pub fn begin_capture(&mut self, type_byte: u8) -> CaptureScope<'_, 'a> {
        self.capture.arm(type_byte);
        CaptureScope { reader: self }
    }

    fn fill(&mut self, buf: &mut [u8]) -> AnyResult<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(DecodeError::UnexpectedEof.into());
            }
            Err(e) => return Err(e.into()),
        }
        self.pos += buf.len() as u64;
        self.checksum.update(buf);
        self.capture.feed(buf);
        Ok(())
    }

    pub fn read_u8(&mut self) -> AnyResult<u8> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    pub fn read_array<const N: usize>(&mut self) -> AnyResult<[u8; N]> {
        let mut out = [0u8; N];
        self.fill(&mut out)?;
        Ok(out)
    }

    /// The buffer grows with the bytes actually read, so a corrupt length
    /// ends in `UnexpectedEof` rather than one huge allocation.
    pub fn read_exact(&mut self, len: usize) -> AnyResult<Bytes> {
        let mut out = Vec::with_capacity(len.min(READ_CHUNK));
        while out.len() < len {
            let start = out.len();
            out.resize(start + (len - start).min(READ_CHUNK), 0);
            self.fill(&mut out[start..])?;
        }
        Ok(Bytes::from(out))
    }

    pub fn skip(&mut self, len: u64) -> AnyResult<()> {
        let mut remain = len;
        let mut scratch = [0u8; SKIP_CHUNK];
        while remain > 0 {
            let n = wrapping_to_usize(remain).min(SKIP_CHUNK);
            self.fill(&mut scratch[..n])?;
            remain -= n as u64;
        }
        Ok(())
    }

    pub fn read_le_u32(&mut self) -> AnyResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_le_u64(&mut self) -> AnyResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_le_f32(&mut self) -> AnyResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_le_f64(&mut self) -> AnyResult<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    pub fn read_rdb_len(&mut self) -> AnyResult<RDBLen> {
        let mut raw = [0u8; 9];
        raw[0] = self.read_u8()?;
        let tail = rdb_len_tail_size(raw[0])?;
        self.fill(&mut raw[1..=tail])?;
        let (_, len) = read_rdb_len(&raw[..=tail])?;
        Ok(len)
    }

    /// A plain length; special string encodings are rejected.
    pub fn read_len(&mut self) -> AnyResult<u64> {
        self.read_rdb_len()?
            .as_u64()
            .context("length should be a plain number")
    }

    pub fn read_rdb_str(&mut self) -> AnyResult<RDBStr> {
        match self.read_rdb_len()? {
            RDBLen::Simple(len) => Ok(RDBStr::Str(self.read_exact(wrapping_to_usize(len))?)),
            RDBLen::IntStr(value) => Ok(RDBStr::Int(value)),
            RDBLen::LZFStr => {
                let in_len = self.read_len().context("read compressed in_len")?;
                let out_len = self.read_len().context("read compressed out_len")?;
                let compressed = self.read_exact(wrapping_to_usize(in_len))?;
                crate::parser_trace!("string.lzf");
                Ok(RDBStr::Str(lzf_decompress(
                    &compressed,
                    wrapping_to_usize(out_len),
                )?))
            }
        }
    }

    /// A string as raw bytes; int-encoded strings are rendered in decimal.
    pub fn read_blob(&mut self) -> AnyResult<Bytes> {
        Ok(self.read_rdb_str()?.to_bytes())
    }

    /// Consume a string without materializing it. Returns the bytes skipped
    /// after the length prefix.
    pub fn skip_rdb_str(&mut self) -> AnyResult<u64> {
        match self.read_rdb_len()? {
            RDBLen::Simple(len) => {
                self.skip(len)?;
                Ok(len)
            }
            RDBLen::IntStr(_) => Ok(0),
            RDBLen::LZFStr => {
                let in_len = self.read_len().context("read compressed in_len")?;
                let _out_len = self.read_len().context("read compressed out_len")?;
                self.skip(in_len)?;
                Ok(in_len)
            }
        }
    }

    /// ZSET (v1) score: one length byte followed by an ASCII double, with
    /// 253/254/255 standing for nan/+inf/-inf.
    pub fn read_double_str(&mut self) -> AnyResult<f64> {
        let len = self.read_u8()?;
        match len {
            253 => Ok(f64::NAN),
            254 => Ok(f64::INFINITY),
            255 => Ok(f64::NEG_INFINITY),
            _ => {
                let raw = self.read_exact(len as usize)?;
                crate::parser::core::raw::parse_score(&raw)
            }
        }
    }

    pub fn skip_double_str(&mut self) -> AnyResult<()> {
        let len = self.read_u8()?;
        if len < 253 {
            self.skip(len as u64)?;
        }
        Ok(())
    }
}

/// A capture held for the duration of one value's decode.
pub struct CaptureScope<'r, 'a> {
    reader: &'r mut RdbReader<'a>,
}

impl CaptureScope<'_, '_> {
    /// Seal the capture; the scope releases the tee when it drops.
    pub fn finish(self) -> CapturedValue {
        self.reader.capture.seal()
    }
}

impl<'a> Deref for CaptureScope<'_, 'a> {
    type Target = RdbReader<'a>;

    fn deref(&self) -> &Self::Target {
        self.reader
    }
}

impl DerefMut for CaptureScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.reader
    }
}

impl Drop for CaptureScope<'_, '_> {
    fn drop(&mut self) {
        self.reader.capture.reset();
    }
}

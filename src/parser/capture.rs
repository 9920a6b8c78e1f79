//! Raw-byte capture: a tee that mirrors every byte the decoders consume for a
//! single value, so the value can be replayed bit-exact as a DUMP/RESTORE
//! payload.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use crc::{CRC_64_REDIS, Crc, Digest};

/// CRC-64/Jones as used by Redis for RDB files and DUMP payloads.
pub static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

pub fn crc64(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Tee state.
///
/// * `Pass`: bytes flow through untouched (skipped keys, key names, opcodes).
/// * `Drain`: bytes are appended to the capture buffer.
/// * `Save`: the value is complete; the buffer is sealed until it is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardState {
    #[default]
    Pass,
    Drain,
    Save,
}

pub struct CaptureBuffer {
    buf: BytesMut,
    digest: Digest<'static, u64>,
    state: GuardState,
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self {
            buf: BytesMut::new(),
            digest: CRC64.digest(),
            state: GuardState::Pass,
        }
    }
}

impl fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("len", &self.buf.len())
            .field("state", &self.state)
            .finish()
    }
}

impl CaptureBuffer {
    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Start draining a new value whose type tag was already consumed.
    pub(crate) fn arm(&mut self, type_byte: u8) {
        self.buf.clear();
        self.digest = CRC64.digest();
        self.state = GuardState::Drain;
        self.feed(&[type_byte]);
    }

    pub(crate) fn feed(&mut self, data: &[u8]) {
        if self.state != GuardState::Drain {
            return;
        }
        self.buf.extend_from_slice(data);
        self.digest.update(data);
    }

    pub(crate) fn seal(&mut self) -> CapturedValue {
        self.state = GuardState::Save;
        let digest = std::mem::replace(&mut self.digest, CRC64.digest());
        CapturedValue {
            raw: self.buf.split().freeze(),
            digest,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.state = GuardState::Pass;
    }
}

/// The exact wire bytes of one value: `<type-byte><value-bytes>`.
pub struct CapturedValue {
    raw: Bytes,
    digest: Digest<'static, u64>,
}

impl fmt::Debug for CapturedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedValue")
            .field("len", &self.raw.len())
            .finish()
    }
}

impl CapturedValue {
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Split into the raw bytes and a finished DUMP payload for `version`.
    pub fn into_parts(self, version: u16) -> (Bytes, Bytes) {
        let mut digest = self.digest;
        let footer = version.to_le_bytes();
        digest.update(&footer);
        let crc = digest.finalize();

        let mut out = BytesMut::with_capacity(self.raw.len() + 10);
        out.extend_from_slice(&self.raw);
        out.extend_from_slice(&footer);
        out.put_u64_le(crc);
        (self.raw, out.freeze())
    }
}

/// Frame `body` (`<type-byte><value-bytes>`) the way DUMP does:
/// `<body><version: u16 le><crc64: u64 le>`.
pub fn restore_payload(body: &[u8], version: u16) -> Bytes {
    let mut out = BytesMut::with_capacity(body.len() + 10);
    out.extend_from_slice(body);
    out.extend_from_slice(&version.to_le_bytes());
    let crc = crc64(&out);
    out.put_u64_le(crc);
    out.freeze()
}

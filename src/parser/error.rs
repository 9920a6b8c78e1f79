use thiserror::Error;

/// Fatal decode failures. The RDB format has no resynchronization points, so
/// every variant aborts the whole pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("invalid length leading byte: {0:#04x}")]
    InvalidLength(u8),
    #[error("{container} terminator mismatch: expected 0xff, found {found:#04x}")]
    BadTerminator {
        container: &'static str,
        found: u8,
    },
    #[error("unknown {container} entry encoding: {flag:#04x}")]
    InvalidEntryEncoding {
        container: &'static str,
        flag: u8,
    },
    #[error("invalid intset encoding width: {0}")]
    InvalidIntSetEncoding(u32),
    #[error("unknown rdb type: {0}")]
    UnknownType(u8),
    #[error("no parser registered for module {name}, version {version}")]
    UnregisteredModule { name: String, version: u16 },
    #[error("checksum mismatch: expected {expected:#018x}, actual {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },
    #[error("malformed restore payload footer")]
    BadRestoreFooter,
}

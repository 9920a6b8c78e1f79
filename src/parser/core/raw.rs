use std::{borrow::Cow, fmt::Display};

use anyhow::{Context, anyhow};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    helper::AnyResult,
    parser::{
        core::combinators::{read_be_u32, read_be_u64, read_i8, read_le_i16, read_le_i32, read_u8},
        error::DecodeError,
    },
};

/// A decoded RDB length prefix.
///
/// `Simple` covers the 6/14/32/64-bit length classes, `IntStr` the int8/16/32
/// special encodings (the integer itself, not a length) and `LZFStr` the marker
/// preceding a compressed string.
#[derive(Clone, Hash, Debug, PartialEq, Eq)]
pub enum RDBLen {
    Simple(u64),
    IntStr(i64),
    LZFStr,
}

impl RDBLen {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RDBLen::Simple(len) => Some(*len),
            _ => None,
        }
    }
}

/// Number of bytes following the leading byte of a length prefix.
pub fn rdb_len_tail_size(first_byte: u8) -> AnyResult<usize> {
    match first_byte {
        0b0000_0000..=0b0011_1111 => Ok(0),
        0b0100_0000..=0b0111_1111 => Ok(1),
        0b1000_0000 => Ok(4),
        0b1000_0001 => Ok(8),
        0b1100_0000 => Ok(1),
        0b1100_0001 => Ok(2),
        0b1100_0010 => Ok(4),
        0b1100_0011 => Ok(0),
        _ => Err(DecodeError::InvalidLength(first_byte).into()),
    }
}

pub fn read_rdb_len(input: &[u8]) -> AnyResult<(&[u8], RDBLen)> {
    let (input, first_byte) = read_u8(input)?;
    match first_byte {
        0b0000_0000..=0b0011_1111 => Ok((input, RDBLen::Simple(first_byte as u64))),
        0b0100_0000..=0b0111_1111 => {
            let (input, second_byte) = read_u8(input)?;
            let len = (((first_byte & 0b0011_1111) as u64) << 8) | second_byte as u64;
            Ok((input, RDBLen::Simple(len)))
        }
        0b1000_0000 => {
            let (input, ret) = read_be_u32(input)?;
            Ok((input, RDBLen::Simple(ret as u64)))
        }
        0b1000_0001 => {
            let (input, ret) = read_be_u64(input)?;
            Ok((input, RDBLen::Simple(ret)))
        }
        0b1100_0000 => {
            let (input, ret) = read_i8(input)?;
            Ok((input, RDBLen::IntStr(ret as i64)))
        }
        0b1100_0001 => {
            let (input, ret) = read_le_i16(input)?;
            Ok((input, RDBLen::IntStr(ret as i64)))
        }
        0b1100_0010 => {
            let (input, ret) = read_le_i32(input)?;
            Ok((input, RDBLen::IntStr(ret as i64)))
        }
        0b1100_0011 => Ok((input, RDBLen::LZFStr)),
        _ => Err(DecodeError::InvalidLength(first_byte).into()),
    }
}

/// An LZF back reference of 3 bytes expands to at most 264 bytes.
const LZF_MAX_EXPANSION: usize = 88;

pub fn lzf_decompress(compressed: &[u8], out_len: usize) -> AnyResult<Bytes> {
    anyhow::ensure!(
        out_len <= compressed.len().saturating_mul(LZF_MAX_EXPANSION),
        "lzf out_len {} is impossible for {} compressed bytes",
        out_len,
        compressed.len()
    );
    let decompressed = lzf::decompress(compressed, out_len)
        .map_err(|e| anyhow!("Failed to decompress LZFStr: {:?}", e))?;
    anyhow::ensure!(
        decompressed.len() == out_len,
        "lzf decompress fail, expected {} bytes, got {}",
        out_len,
        decompressed.len()
    );
    Ok(Bytes::from(decompressed))
}

/// A string as stored in RDB: raw bytes or an integer-encoded value.
///
/// Equality, ordering and hashing go by the string form, so `Int(10)` equals
/// `Str("10")`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RDBStr {
    Str(Bytes),
    Int(i64),
}

impl RDBStr {
    pub fn as_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            RDBStr::Str(s) => Cow::Borrowed(s.as_ref()),
            RDBStr::Int(i) => Cow::Owned(i.to_string().into_bytes()),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            RDBStr::Str(s) => s.clone(),
            RDBStr::Int(i) => Bytes::from(i.to_string()),
        }
    }

    /// Length of the string form, in bytes.
    pub fn len(&self) -> usize {
        match self {
            RDBStr::Str(s) => s.len(),
            RDBStr::Int(i) => i.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer value, if the string is the canonical form of an `i64`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RDBStr::Int(i) => Some(*i),
            RDBStr::Str(s) => {
                let text = std::str::from_utf8(s).ok()?;
                let value: i64 = text.parse().ok()?;
                (value.to_string() == text).then_some(value)
            }
        }
    }

    pub fn to_f64(&self) -> AnyResult<f64> {
        match self {
            RDBStr::Int(i) => Ok(*i as f64),
            RDBStr::Str(s) => parse_score(s),
        }
    }
}

/// Parse a score the way Redis prints it (`inf`, `-inf`, `nan` included).
pub fn parse_score(raw: &[u8]) -> AnyResult<f64> {
    let text = std::str::from_utf8(raw).context("score should be utf8")?;
    match text {
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        "nan" => Ok(f64::NAN),
        _ => text
            .parse()
            .with_context(|| format!("invalid score: {}", raw.escape_ascii())),
    }
}

impl From<&str> for RDBStr {
    fn from(value: &str) -> Self {
        RDBStr::Str(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Bytes> for RDBStr {
    fn from(value: Bytes) -> Self {
        RDBStr::Str(value)
    }
}

impl PartialEq for RDBStr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RDBStr::Int(a), RDBStr::Int(b)) => a == b,
            _ => self.as_bytes() == other.as_bytes(),
        }
    }
}

impl Eq for RDBStr {}

impl std::hash::Hash for RDBStr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl PartialOrd for RDBStr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RDBStr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(&other.as_bytes())
    }
}

impl Display for RDBStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RDBStr::Str(s) => write!(f, "{}", s.escape_ascii()),
            RDBStr::Int(i) => write!(f, "{}", i),
        }
    }
}

//! Decoders for the packed containers Redis embeds in RDB strings.
//!
//! Each decoder takes the whole blob (already read as one length-prefixed
//! string by the outer reader) and must consume it exactly: declared entry
//! count first, then the 0xFF terminator, then nothing.

use anyhow::ensure;
use bytes::Bytes;

use crate::{helper::AnyResult, parser::core::raw::RDBStr};

pub mod intset;
pub mod listpack;
pub mod stream;
pub mod ziplist;
pub mod zipmap;

/// Envelope metadata of a ziplist or listpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub total_bytes: u32,
    /// Ziplist only.
    pub tail_offset: Option<u32>,
    /// `None` when the on-disk count saturated (0xFFFF) and the entries have
    /// to be walked up to the terminator.
    pub count: Option<u32>,
}

/// One packed element, borrowing string payloads from the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedEntry<'a> {
    Str(&'a [u8]),
    Int(i64),
}

impl PackedEntry<'_> {
    /// Materialize the entry, sharing the blob's allocation for strings.
    pub fn to_rdb_str(self, blob: &Bytes) -> RDBStr {
        match self {
            PackedEntry::Str(s) => RDBStr::Str(blob.slice_ref(s)),
            PackedEntry::Int(i) => RDBStr::Int(i),
        }
    }
}

pub(crate) fn ensure_consumed(rest: &[u8], container: &'static str) -> AnyResult {
    ensure!(
        rest.is_empty(),
        "{} has {} trailing bytes after its terminator",
        container,
        rest.len()
    );
    Ok(())
}

/// Pair up a flat element list as (field, value).
pub fn into_pairs(items: Vec<RDBStr>) -> AnyResult<Vec<(RDBStr, RDBStr)>> {
    ensure!(
        items.len() % 2 == 0,
        "expected an even number of elements, got {}",
        items.len()
    );
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        out.push((field, value));
    }
    Ok(out)
}

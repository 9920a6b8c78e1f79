//! Zipmap (hashes written before Redis 2.6), ref: https://github.com/redis/redis/blob/2.4/src/zipmap.c

use anyhow::{Context, anyhow};
use bytes::Bytes;

use crate::{
    helper::{AnyResult, wrapping_to_usize},
    parser::{
        container::ensure_consumed,
        core::{
            combinators::{read_exact, read_le_u32, read_u8},
            raw::RDBStr,
        },
    },
};

const END: u8 = 0xFF;
const BIG_LEN: u8 = 0xFE;

/// A length field, or `None` at the end marker.
fn read_len(input: &[u8]) -> AnyResult<(&[u8], Option<u64>)> {
    let (input, flag) = read_u8(input)?;
    match flag {
        END => Ok((input, None)),
        BIG_LEN => {
            let (input, len) = read_le_u32(input)?;
            Ok((input, Some(len as u64)))
        }
        _ => Ok((input, Some(flag as u64))),
    }
}

pub fn decode(blob: &Bytes) -> AnyResult<Vec<(RDBStr, RDBStr)>> {
    let (mut input, _zmlen) = read_u8(blob).context("read zmlen")?;
    let mut out = Vec::new();
    loop {
        let (rest, key_len) = read_len(input).context("read zipmap key length")?;
        let Some(key_len) = key_len else {
            input = rest;
            break;
        };
        let (rest, key) = read_exact(rest, wrapping_to_usize(key_len))?;
        let (rest, value_len) = read_len(rest).context("read zipmap value length")?;
        let value_len = value_len.ok_or_else(|| anyhow!("zipmap value length not found"))?;
        let (rest, free) = read_u8(rest).context("read zipmap free byte")?;
        let (rest, value) = read_exact(rest, wrapping_to_usize(value_len))?;
        let (rest, _) = read_exact(rest, free as usize).context("skip zipmap free space")?;
        out.push((
            RDBStr::Str(blob.slice_ref(key)),
            RDBStr::Str(blob.slice_ref(value)),
        ));
        input = rest;
    }
    ensure_consumed(input, "zipmap")?;
    Ok(out)
}

//! Ziplist, ref: https://github.com/redis/redis/blob/7.0.0/src/ziplist.c

use anyhow::Context;
use bytes::Bytes;

use crate::{
    helper::{AnyResult, wrapping_to_usize},
    parser::{
        container::{ContainerHeader, PackedEntry, ensure_consumed},
        core::{
            combinators::{
                read_be_u32, read_exact, read_i8, read_le_i16, read_le_i24, read_le_i32,
                read_le_i64, read_le_u16, read_le_u32, read_terminator, read_u8,
            },
            raw::RDBStr,
        },
        error::DecodeError,
    },
};

const CONTAINER: &str = "ziplist";
const UNKNOWN_COUNT: u16 = u16::MAX;

pub fn read_header(input: &[u8]) -> AnyResult<(&[u8], ContainerHeader)> {
    let (input, total_bytes) = read_le_u32(input).context("read zlbytes")?;
    let (input, tail_offset) = read_le_u32(input).context("read zltail")?;
    let (input, count) = read_le_u16(input).context("read zllen")?;
    Ok((input, ContainerHeader {
        total_bytes,
        tail_offset: Some(tail_offset),
        count: (count != UNKNOWN_COUNT).then_some(count as u32),
    }))
}

/// Read one entry: prevlen, encoding, payload.
pub fn read_entry(input: &[u8]) -> AnyResult<(&[u8], PackedEntry<'_>)> {
    let (mut input, prevlen) = read_u8(input).context("read prevlen")?;
    match prevlen {
        0xFF => {
            return Err(DecodeError::InvalidEntryEncoding {
                container: CONTAINER,
                flag: prevlen,
            }
            .into());
        }
        0xFE => {
            let (rest, _) = read_exact(input, 4).context("read prevlen4")?;
            input = rest;
        }
        _ => {}
    }

    let (input, encoding) = read_u8(input).context("read encoding byte")?;
    match encoding >> 6 {
        0 => str_entry(input, (encoding & 0x3F) as u64),
        1 => {
            let (input, low) = read_u8(input)?;
            let len = (((encoding & 0x3F) as u64) << 8) | low as u64;
            str_entry(input, len)
        }
        2 => {
            crate::parser_trace!("ziplist.str32");
            let (input, len) = read_be_u32(input)?;
            str_entry(input, len as u64)
        }
        _ => match encoding {
            0xC0 => {
                let (input, v) = read_le_i16(input)?;
                Ok((input, PackedEntry::Int(v as i64)))
            }
            0xD0 => {
                let (input, v) = read_le_i32(input)?;
                Ok((input, PackedEntry::Int(v as i64)))
            }
            0xE0 => {
                let (input, v) = read_le_i64(input)?;
                Ok((input, PackedEntry::Int(v)))
            }
            0xF0 => {
                let (input, v) = read_le_i24(input)?;
                Ok((input, PackedEntry::Int(v as i64)))
            }
            0xFE => {
                let (input, v) = read_i8(input)?;
                Ok((input, PackedEntry::Int(v as i64)))
            }
            0xF1..=0xFD => Ok((input, PackedEntry::Int(((encoding & 0x0F) - 1) as i64))),
            _ => Err(DecodeError::InvalidEntryEncoding {
                container: CONTAINER,
                flag: encoding,
            }
            .into()),
        },
    }
}

fn str_entry(input: &[u8], len: u64) -> AnyResult<(&[u8], PackedEntry<'_>)> {
    let (input, payload) = read_exact(input, wrapping_to_usize(len))?;
    Ok((input, PackedEntry::Str(payload)))
}

/// Walk every entry of a ziplist blob, then check its terminator.
pub fn for_each_entry<'a>(
    blob: &'a [u8],
    mut f: impl FnMut(PackedEntry<'a>) -> AnyResult,
) -> AnyResult<ContainerHeader> {
    let (mut input, header) = read_header(blob)?;
    match header.count {
        Some(count) => {
            for _ in 0..count {
                let (rest, entry) = read_entry(input)?;
                f(entry)?;
                input = rest;
            }
        }
        None => {
            crate::parser_trace!("ziplist.unknown_count");
            while input.first().is_some_and(|b| *b != 0xFF) {
                let (rest, entry) = read_entry(input)?;
                f(entry)?;
                input = rest;
            }
        }
    }
    let input = read_terminator(input, CONTAINER)?;
    ensure_consumed(input, CONTAINER)?;
    Ok(header)
}

pub fn decode(blob: &Bytes) -> AnyResult<Vec<RDBStr>> {
    let mut out = Vec::new();
    for_each_entry(blob, |entry| {
        out.push(entry.to_rdb_str(blob));
        Ok(())
    })?;
    Ok(out)
}

//! Listpack, ref: https://github.com/redis/redis/blob/7.0.0/src/listpack.c

use anyhow::Context;
use bytes::Bytes;

use crate::{
    helper::{AnyResult, wrapping_to_usize},
    parser::{
        container::{ContainerHeader, PackedEntry, ensure_consumed},
        core::{
            combinators::{
                read_exact, read_le_i16, read_le_i24, read_le_i32, read_le_i64, read_le_u16,
                read_le_u32, read_terminator, read_u8,
            },
            raw::RDBStr,
        },
        error::DecodeError,
    },
};

const CONTAINER: &str = "listpack";
const UNKNOWN_COUNT: u16 = u16::MAX;

pub fn read_header(input: &[u8]) -> AnyResult<(&[u8], ContainerHeader)> {
    let (input, total_bytes) = read_le_u32(input).context("read listpack total bytes")?;
    let (input, count) = read_le_u16(input).context("read listpack count")?;
    Ok((input, ContainerHeader {
        total_bytes,
        tail_offset: None,
        count: (count != UNKNOWN_COUNT).then_some(count as u32),
    }))
}

/// Size of the back-length trailer for an entry of `entry_len` bytes.
pub fn backlen_size(entry_len: usize) -> usize {
    match entry_len {
        0..=127 => 1,
        128..16383 => 2,
        16383..2097151 => 3,
        2097151..268435455 => 4,
        _ => 5,
    }
}

/// Read one entry and its back-length trailer.
pub fn read_entry(input: &[u8]) -> AnyResult<(&[u8], PackedEntry<'_>)> {
    let (rest, flag) = read_u8(input)?;
    let (rest, entry) = match flag {
        // 0xxxxxxx: 7-bit unsigned int
        0x00..=0x7F => (rest, PackedEntry::Int(flag as i64)),
        // 10xxxxxx: 6-bit string length
        0x80..=0xBF => str_entry(rest, (flag & 0x3F) as u64)?,
        // 110xxxxx yyyyyyyy: 13-bit signed int
        0xC0..=0xDF => {
            let (rest, low) = read_u8(rest)?;
            let raw = (((flag & 0x1F) as i64) << 8) | low as i64;
            let value = if raw >= 1 << 12 { raw - (1 << 13) } else { raw };
            (rest, PackedEntry::Int(value))
        }
        // 1110xxxx yyyyyyyy: 12-bit string length
        0xE0..=0xEF => {
            let (rest, low) = read_u8(rest)?;
            str_entry(rest, (((flag & 0x0F) as u64) << 8) | low as u64)?
        }
        0xF0 => {
            crate::parser_trace!("listpack.str32");
            let (rest, len) = read_le_u32(rest)?;
            str_entry(rest, len as u64)?
        }
        0xF1 => {
            let (rest, v) = read_le_i16(rest)?;
            (rest, PackedEntry::Int(v as i64))
        }
        0xF2 => {
            let (rest, v) = read_le_i24(rest)?;
            (rest, PackedEntry::Int(v as i64))
        }
        0xF3 => {
            let (rest, v) = read_le_i32(rest)?;
            (rest, PackedEntry::Int(v as i64))
        }
        0xF4 => {
            let (rest, v) = read_le_i64(rest)?;
            (rest, PackedEntry::Int(v))
        }
        _ => {
            return Err(DecodeError::InvalidEntryEncoding {
                container: CONTAINER,
                flag,
            }
            .into());
        }
    };
    let entry_len = input.len() - rest.len();
    let (rest, _) = read_exact(rest, backlen_size(entry_len)).context("read backlen")?;
    Ok((rest, entry))
}

fn str_entry(input: &[u8], len: u64) -> AnyResult<(&[u8], PackedEntry<'_>)> {
    let (input, payload) = read_exact(input, wrapping_to_usize(len))?;
    Ok((input, PackedEntry::Str(payload)))
}

/// Walk every entry of a listpack blob, then check its terminator.
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
            crate::parser_trace!("listpack.unknown_count");
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

/// Encode elements as a listpack, picking the smallest entry encoding.
pub fn encode(items: &[RDBStr]) -> Vec<u8> {
    let mut body = Vec::new();
    for item in items {
        let start = body.len();
        match item.as_int() {
            Some(v @ 0..=127) => body.push(v as u8),
            Some(v) if (-4096..4096).contains(&v) => {
                let raw = (v as u16) & 0x1FFF;
                body.push(0xC0 | (raw >> 8) as u8);
                body.push(raw as u8);
            }
            Some(v) if i16::try_from(v).is_ok() => {
                body.push(0xF1);
                body.extend_from_slice(&(v as i16).to_le_bytes());
            }
            Some(v) if (-(1 << 23)..(1 << 23)).contains(&v) => {
                body.push(0xF2);
                body.extend_from_slice(&(v as i32).to_le_bytes()[..3]);
            }
            Some(v) if i32::try_from(v).is_ok() => {
                body.push(0xF3);
                body.extend_from_slice(&(v as i32).to_le_bytes());
            }
            Some(v) => {
                body.push(0xF4);
                body.extend_from_slice(&v.to_le_bytes());
            }
            None => {
                let s = item.as_bytes();
                match s.len() {
                    0..=63 => body.push(0x80 | s.len() as u8),
                    64..=4095 => {
                        body.push(0xE0 | (s.len() >> 8) as u8);
                        body.push(s.len() as u8);
                    }
                    _ => {
                        body.push(0xF0);
                        body.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    }
                }
                body.extend_from_slice(&s);
            }
        }
        let entry_len = body.len() - start;
        encode_backlen(entry_len, &mut body);
    }

    let mut out = Vec::with_capacity(body.len() + 7);
    out.extend_from_slice(&((body.len() + 7) as u32).to_le_bytes());
    let count = u16::try_from(items.len()).unwrap_or(UNKNOWN_COUNT);
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&body);
    out.push(0xFF);
    out
}

fn encode_backlen(entry_len: usize, out: &mut Vec<u8>) {
    let n = backlen_size(entry_len);
    let mut value = entry_len as u64;
    // big-endian 7-bit groups, continuation bit on all but the first byte
    let mut groups = Vec::with_capacity(n);
    for _ in 0..n {
        groups.push((value & 0x7F) as u8);
        value >>= 7;
    }
    for (i, g) in groups.iter().rev().enumerate() {
        out.push(if i == 0 { *g } else { *g | 0x80 });
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::uint7(RDBStr::Int(100))]
    #[case::int13_neg(RDBStr::Int(-1))]
    #[case::int13_max(RDBStr::Int(4095))]
    #[case::int16(RDBStr::Int(-20000))]
    #[case::int24(RDBStr::Int(8_000_000))]
    #[case::int32(RDBStr::Int(-2_000_000_000))]
    #[case::int64(RDBStr::Int(i64::MAX))]
    #[case::str6(RDBStr::from("field"))]
    #[case::str12(RDBStr::Str(Bytes::from(vec![b'x'; 300])))]
    #[case::str32(RDBStr::Str(Bytes::from(vec![b'y'; 5000])))]
    fn entry_encodings(#[case] item: RDBStr) -> AnyResult<()> {
        let blob = Bytes::from(encode(std::slice::from_ref(&item)));
        let decoded = decode(&blob)?;
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_bytes(), item.as_bytes());
        Ok(())
    }

    #[test]
    fn header_counts_and_bytes() -> AnyResult<()> {
        let data = encode(&[RDBStr::from("a"), RDBStr::from("1")]);
        let (_, header) = read_header(&data)?;
        assert_eq!(header.total_bytes as usize, data.len());
        assert_eq!(header.count, Some(2));
        Ok(())
    }

    #[test]
    fn unknown_count_walks_to_terminator() -> AnyResult<()> {
        let mut data = encode(&[RDBStr::from("a"), RDBStr::from("b"), RDBStr::Int(3)]);
        data[4] = 0xFF;
        data[5] = 0xFF;
        assert_eq!(decode(&Bytes::from(data))?.len(), 3);
        Ok(())
    }

    #[test]
    fn corrupted_terminator_is_fatal() {
        let mut data = encode(&[RDBStr::from("a")]);
        let last = data.len() - 1;
        data[last] = 0x00;
        let err = decode(&Bytes::copy_from_slice(&data)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DecodeError>(),
            Some(&DecodeError::BadTerminator {
                container: "listpack",
                found: 0x00
            })
        );
    }

    #[test]
    fn reserved_flag_is_fatal() {
        let data = [7, 0, 0, 0, 1, 0, 0xF5, 0xFF];
        let err = decode(&Bytes::copy_from_slice(&data)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::InvalidEntryEncoding { flag: 0xF5, .. })
        ));
    }

    #[test]
    fn backlen_sizes() {
        assert_eq!(backlen_size(1), 1);
        assert_eq!(backlen_size(127), 1);
        assert_eq!(backlen_size(128), 2);
        assert_eq!(backlen_size(16383), 3);
        assert_eq!(backlen_size(300_000_000), 5);
    }
}

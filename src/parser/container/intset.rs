//! Intset, ref: https://github.com/redis/redis/blob/7.0.0/src/intset.c

use anyhow::Context;

use crate::{
    helper::AnyResult,
    parser::{
        container::ensure_consumed,
        core::combinators::{read_le_i16, read_le_i32, read_le_i64, read_le_u32},
        error::DecodeError,
    },
};

pub fn read_header(input: &[u8]) -> AnyResult<(&[u8], u32, u32)> {
    let (input, encoding) = read_le_u32(input).context("read intset encoding")?;
    if !matches!(encoding, 2 | 4 | 8) {
        return Err(DecodeError::InvalidIntSetEncoding(encoding).into());
    }
    let (input, length) = read_le_u32(input).context("read intset length")?;
    Ok((input, encoding, length))
}

pub fn decode(blob: &[u8]) -> AnyResult<Vec<i64>> {
    let (mut input, encoding, length) = read_header(blob)?;
    let mut out = Vec::with_capacity((length as usize).min(input.len() / encoding as usize));
    for _ in 0..length {
        let (rest, value) = match encoding {
            2 => read_le_i16(input).map(|(r, v)| (r, v as i64))?,
            4 => read_le_i32(input).map(|(r, v)| (r, v as i64))?,
            _ => read_le_i64(input)?,
        };
        out.push(value);
        input = rest;
    }
    ensure_consumed(input, "intset")?;
    Ok(out)
}

pub fn encode(values: &[i64]) -> Vec<u8> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let width: u32 = if sorted.iter().all(|v| i16::try_from(*v).is_ok()) {
        2
    } else if sorted.iter().all(|v| i32::try_from(*v).is_ok()) {
        4
    } else {
        8
    };
    let mut out = Vec::with_capacity(8 + sorted.len() * width as usize);
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    for v in sorted {
        out.extend_from_slice(&v.to_le_bytes()[..width as usize]);
    }
    out
}

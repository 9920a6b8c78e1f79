use crate::{helper::AnyResult, parser::error::DecodeError};

pub fn read_exact(input: &[u8], len: usize) -> AnyResult<(&[u8], &[u8])> {
    if input.len() < len {
        return Err(DecodeError::UnexpectedEof.into());
    }
    Ok((&input[len..], &input[..len]))
}

pub fn read_array<const N: usize>(input: &[u8]) -> AnyResult<(&[u8], [u8; N])> {
    let (input, found) = read_exact(input, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(found);
    Ok((input, out))
}

pub fn read_u8(input: &[u8]) -> AnyResult<(&[u8], u8)> {
    let (input, found) = read_exact(input, 1)?;
    Ok((input, found[0]))
}

pub fn read_i8(input: &[u8]) -> AnyResult<(&[u8], i8)> {
    let (input, found) = read_u8(input)?;
    Ok((input, found as i8))
}

pub fn read_be_u32(input: &[u8]) -> AnyResult<(&[u8], u32)> {
    let (input, found) = read_array::<4>(input)?;
    Ok((input, u32::from_be_bytes(found)))
}

pub fn read_be_u64(input: &[u8]) -> AnyResult<(&[u8], u64)> {
    let (input, found) = read_array::<8>(input)?;
    Ok((input, u64::from_be_bytes(found)))
}

pub fn read_le_u16(input: &[u8]) -> AnyResult<(&[u8], u16)> {
    let (input, found) = read_array::<2>(input)?;
    Ok((input, u16::from_le_bytes(found)))
}

pub fn read_le_u32(input: &[u8]) -> AnyResult<(&[u8], u32)> {
    let (input, found) = read_array::<4>(input)?;
    Ok((input, u32::from_le_bytes(found)))
}

pub fn read_le_i16(input: &[u8]) -> AnyResult<(&[u8], i16)> {
    let (input, found) = read_array::<2>(input)?;
    Ok((input, i16::from_le_bytes(found)))
}

/// Little-endian signed 24-bit integer, sign-extended.
pub fn read_le_i24(input: &[u8]) -> AnyResult<(&[u8], i32)> {
    let (input, found) = read_array::<3>(input)?;
    let value = i32::from_le_bytes([0, found[0], found[1], found[2]]) >> 8;
    Ok((input, value))
}

pub fn read_le_i32(input: &[u8]) -> AnyResult<(&[u8], i32)> {
    let (input, found) = read_array::<4>(input)?;
    Ok((input, i32::from_le_bytes(found)))
}

pub fn read_le_i64(input: &[u8]) -> AnyResult<(&[u8], i64)> {
    let (input, found) = read_array::<8>(input)?;
    Ok((input, i64::from_le_bytes(found)))
}

/// Consume the single-byte container terminator, failing on anything but 0xFF.
pub fn read_terminator<'a>(input: &'a [u8], container: &'static str) -> AnyResult<&'a [u8]> {
    let (input, found) = read_u8(input)?;
    if found != 0xFF {
        return Err(DecodeError::BadTerminator { container, found }.into());
    }
    Ok(input)
}

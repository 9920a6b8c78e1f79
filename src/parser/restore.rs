use std::io::Cursor;

use anyhow::{Context, ensure};

use crate::{
    helper::AnyResult,
    parser::{
        capture::crc64,
        core::reader::RdbReader,
        error::DecodeError,
        model::RDBType,
        module::ModuleParserRegistry,
        value::{DecodedValue, Mode, decode_value},
    },
};

/// Newest RDB version this crate reads and writes.
pub const RDB_VERSION: u16 = 12;

const FOOTER_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct RestorePayload {
    pub rdb_type: RDBType,
    pub version: u16,
    pub value: DecodedValue,
}

/// Verify and decode a DUMP payload:
/// `<type><value><version: u16 le><crc64: u64 le>`.
pub fn decode_restore_payload(
    payload: &[u8],
    modules: &ModuleParserRegistry,
) -> AnyResult<RestorePayload> {
    if payload.len() < FOOTER_LEN + 1 {
        return Err(DecodeError::BadRestoreFooter.into());
    }
    let (checked, crc) = payload.split_at(payload.len() - 8);
    let expected = u64::from_le_bytes(crc.try_into().context("read payload crc")?);
    let actual = crc64(checked);
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual }.into());
    }

    let (body, version) = checked.split_at(checked.len() - 2);
    let version = u16::from_le_bytes(version.try_into().context("read payload version")?);
    if version > RDB_VERSION {
        return Err(DecodeError::BadRestoreFooter.into());
    }

    let mut reader = RdbReader::new(Cursor::new(body));
    let type_byte = reader.read_u8()?;
    let rdb_type =
        RDBType::try_from(type_byte).map_err(|_| DecodeError::UnknownType(type_byte))?;
    let value = decode_value(&mut reader, rdb_type, Mode::FullDecode, modules)?
        .context("restore payload value")?;
    ensure!(
        reader.tell() == body.len() as u64,
        "restore payload has {} bytes past its value",
        body.len() as u64 - reader.tell()
    );
    Ok(RestorePayload {
        rdb_type,
        version,
        value,
    })
}

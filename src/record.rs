//! Driver over a whole RDB stream: header, opcodes and keys.

use std::io::Read;

use anyhow::{Context, bail, ensure};
use bytes::Bytes;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::{
    filter::FilterSpec,
    helper::AnyResult,
    parser::{
        DecodeError,
        capture::CapturedValue,
        core::reader::RdbReader,
        model::{RDBOpcode, RDBType, RdbValue, RecordType},
        module::{ModuleLoader, ModuleParser, ModuleParserRegistry, OpcodeModuleParser},
        restore::RDB_VERSION,
        value::{Mode, ValueStats, decode_value},
    },
};

/// First RDB version that ends with a CRC64 of the whole file.
const CHECKSUM_SINCE_VERSION: u16 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expiry {
    #[default]
    None,
    /// Unix time in seconds (EXPIRETIME opcode).
    Seconds(u64),
    /// Unix time in milliseconds (EXPIRETIME_MS opcode).
    Milliseconds(u64),
}

impl Expiry {
    pub fn expire_at_ms(self) -> Option<u64> {
        match self {
            Expiry::None => None,
            Expiry::Seconds(s) => Some(s.saturating_mul(1000)),
            Expiry::Milliseconds(ms) => Some(ms),
        }
    }

    pub fn is_none(self) -> bool {
        self == Expiry::None
    }
}

/// One decoded key.
#[derive(Debug)]
pub struct RdbEntry {
    pub db: u64,
    pub rdb_type: RDBType,
    pub key: Bytes,
    pub value: RdbValue,
    pub stats: ValueStats,
    pub expiry: Expiry,
    pub idle_seconds: Option<u64>,
    pub freq: Option<u8>,
    /// Bytes the value occupied in the stream, type byte excluded.
    pub rdb_size: u64,
    /// `<type><value>` exactly as read, when capture was requested.
    pub capture: Option<CapturedValue>,
}

impl RdbEntry {
    pub fn record_type(&self) -> RecordType {
        self.rdb_type.record_type()
    }

    pub fn encoding(&self) -> &'static str {
        self.rdb_type.encoding_name()
    }

    pub fn member_count(&self) -> u64 {
        self.value.member_count()
    }

    pub fn max_member_len(&self) -> u64 {
        self.value.max_member_len()
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct ReaderOptions {
    #[builder(default)]
    pub filter: FilterSpec,
    #[builder(default)]
    pub modules: ModuleParserRegistry,
    /// Keep each included value's raw bytes for re-encoding.
    #[builder(default = false)]
    pub capture: bool,
    #[builder(default = true)]
    pub verify_checksum: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Default)]
struct PendingMeta {
    expiry: Expiry,
    idle_seconds: Option<u64>,
    freq: Option<u8>,
}

/// Iterates the keys of an RDB stream that pass the filter.
///
/// Auxiliary fields are collected on the way; once the EOF opcode has been
/// read, [`EntryReader::into_tail`] hands back whatever follows (the AOF part
/// of a mixed RDB+AOF file).
pub struct EntryReader<'a> {
    reader: RdbReader<'a>,
    options: ReaderOptions,
    version: u16,
    db: u64,
    pending: PendingMeta,
    aux: Vec<(Bytes, Bytes)>,
    skipped: u64,
    finished: bool,
}

impl<'a> EntryReader<'a> {
    pub fn new(input: impl Read + Send + 'a, options: ReaderOptions) -> Self {
        Self {
            reader: RdbReader::new(input),
            options,
            version: 0,
            db: 0,
            pending: PendingMeta::default(),
            aux: Vec::new(),
            skipped: 0,
            finished: false,
        }
    }

    /// RDB version from the header, 0 before it has been read.
    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn aux(&self) -> &[(Bytes, Bytes)] {
        &self.aux
    }

    /// Keys rejected by the filter so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn position(&self) -> u64 {
        self.reader.tell()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The stream after the RDB checksum.
    pub fn into_tail(self) -> AnyResult<Box<dyn Read + Send + 'a>> {
        ensure!(self.finished, "rdb payload has not been fully read");
        Ok(self.reader.into_inner())
    }

    fn read_header(&mut self) -> AnyResult<()> {
        let magic = self.reader.read_array::<5>().context("read magic number")?;
        ensure!(&magic == b"REDIS", "not an rdb stream: bad magic number");
        let version = self.reader.read_array::<4>().context("read version")?;
        let version = std::str::from_utf8(&version).context("version should be utf8")?;
        let version: u16 = version.parse().context("version should be a number")?;
        ensure!(version >= 1, "version should be >= 1");
        ensure!(
            version <= RDB_VERSION,
            "version should be <= {}, got {}",
            RDB_VERSION,
            version
        );
        info!(operation = "rdb_header", version, "RDB header read");
        self.version = version;
        Ok(())
    }

    fn read_eof(&mut self) -> AnyResult<()> {
        self.finished = true;
        if self.version < CHECKSUM_SINCE_VERSION {
            return Ok(());
        }
        let actual = self.reader.take_checksum();
        let expected = self.reader.read_le_u64().context("read rdb checksum")?;
        if expected == 0 {
            debug!(operation = "rdb_checksum", "RDB checksum disabled");
        } else if self.options.verify_checksum && expected != actual {
            return Err(DecodeError::ChecksumMismatch { expected, actual }.into());
        }
        info!(
            operation = "rdb_eof",
            position = self.reader.tell(),
            skipped = self.skipped,
            "RDB payload finished"
        );
        Ok(())
    }

    fn read_module_aux(&mut self) -> AnyResult<()> {
        let module_id = self.reader.read_len().context("read module aux id")?;
        let when_opcode = self.reader.read_len().context("read module aux when opcode")?;
        ensure!(
            when_opcode == 2,
            "module aux `when` should be a UINT opcode, got {}",
            when_opcode
        );
        let when = self.reader.read_len().context("read module aux when")?;
        let mut loader = ModuleLoader::new(&mut self.reader, true);
        let fields = OpcodeModuleParser.parse(&mut loader, 0)?;
        loader.finish()?;
        debug!(
            operation = "module_aux",
            module_id,
            when,
            fields = fields.len(),
            "Module aux data skipped"
        );
        Ok(())
    }

    /// Handle one opcode. Returns `false` at EOF.
    fn read_opcode(&mut self, opcode: RDBOpcode) -> AnyResult<bool> {
        match opcode {
            RDBOpcode::Aux => {
                let key = self.reader.read_blob().context("read aux key")?;
                let val = self.reader.read_blob().context("read aux val")?;
                debug!(
                    operation = "rdb_aux",
                    key = %key.escape_ascii(),
                    val = %val.escape_ascii(),
                    "Aux field"
                );
                self.aux.push((key, val));
            }
            RDBOpcode::SelectDB => {
                self.db = self.reader.read_len().context("read select db number")?;
                debug!(operation = "select_db", db = self.db, "Switched database");
            }
            RDBOpcode::ResizeDB => {
                let table_size = self.reader.read_len().context("read hash table size")?;
                let ttl_table_size = self.reader.read_len().context("read ttl table size")?;
                debug!(
                    operation = "resize_db",
                    db = self.db,
                    table_size,
                    ttl_table_size,
                    "Database size hint"
                );
            }
            RDBOpcode::ExpireTime => {
                let at = self.reader.read_array::<4>().context("read expire time")?;
                crate::parser_trace!("expiry.s");
                self.pending.expiry = Expiry::Seconds(u32::from_le_bytes(at) as u64);
            }
            RDBOpcode::ExpireTimeMs => {
                let at = self.reader.read_le_u64().context("read expire time ms")?;
                crate::parser_trace!("expiry.ms");
                self.pending.expiry = Expiry::Milliseconds(at);
            }
            RDBOpcode::Idle => {
                self.pending.idle_seconds =
                    Some(self.reader.read_len().context("read idle seconds")?);
            }
            RDBOpcode::Freq => {
                self.pending.freq = Some(self.reader.read_u8().context("read freq")?);
            }
            RDBOpcode::SlotInfo => {
                let slot_id = self.reader.read_len().context("read slot id")?;
                let slot_size = self.reader.read_len().context("read slot size")?;
                let expires_slot_size = self.reader.read_len().context("read expires size")?;
                debug!(
                    operation = "slot_info",
                    slot_id, slot_size, expires_slot_size, "Slot info"
                );
            }
            RDBOpcode::ModuleAux => self.read_module_aux()?,
            RDBOpcode::Function2 => {
                let code_len = self.reader.skip_rdb_str().context("skip function code")?;
                debug!(operation = "function2", code_len, "Function library skipped");
            }
            RDBOpcode::FunctionPreGA => bail!("not supported opcode: FunctionPreGA"),
            RDBOpcode::Eof => {
                self.read_eof()?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn read_key(&mut self, type_byte: u8, rdb_type: RDBType) -> AnyResult<Option<RdbEntry>> {
        let key = self.reader.read_blob().context("read key")?;
        let meta = std::mem::take(&mut self.pending);
        let modules = &self.options.modules;

        if !self.options.filter.include(self.db, rdb_type, &key) {
            decode_value(&mut self.reader, rdb_type, Mode::FastSkip, modules)
                .with_context(|| format!("skip key {}", key.escape_ascii()))?;
            self.skipped += 1;
            return Ok(None);
        }

        let started = self.reader.tell();
        let (decoded, capture) = if self.options.capture {
            let mut scope = self.reader.begin_capture(type_byte);
            let decoded = decode_value(&mut scope, rdb_type, Mode::FullDecode, modules)
                .with_context(|| format!("decode key {}", key.escape_ascii()))?;
            (decoded, Some(scope.finish()))
        } else {
            let decoded = decode_value(&mut self.reader, rdb_type, Mode::FullDecode, modules)
                .with_context(|| format!("decode key {}", key.escape_ascii()))?;
            (decoded, None)
        };
        let decoded = decoded.context("full decode yields a value")?;

        Ok(Some(RdbEntry {
            db: self.db,
            rdb_type,
            key,
            value: decoded.value,
            stats: decoded.stats,
            expiry: meta.expiry,
            idle_seconds: meta.idle_seconds,
            freq: meta.freq,
            rdb_size: self.reader.tell() - started,
            capture,
        }))
    }

    pub fn next_entry(&mut self) -> AnyResult<Option<RdbEntry>> {
        if self.version == 0 {
            self.read_header().context("read header")?;
        }
        while !self.finished {
            let flag = self.reader.read_u8().context("read item flag")?;
            if let Ok(opcode) = RDBOpcode::try_from(flag) {
                self.read_opcode(opcode)?;
                continue;
            }
            let rdb_type = RDBType::try_from(flag).map_err(|_| DecodeError::UnknownType(flag))?;
            if let Some(entry) = self.read_key(flag, rdb_type)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

impl Iterator for EntryReader<'_> {
    type Item = AnyResult<RdbEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                // the stream position is unknown after a failure
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{filter::FilterConfig, parser::capture::crc64};

    fn rdb(version: u16, body: &[u8]) -> Vec<u8> {
        let mut out = format!("REDIS{:04}", version).into_bytes();
        out.extend_from_slice(body);
        out.push(0xFF);
        if version >= CHECKSUM_SINCE_VERSION {
            let crc = crc64(&out);
            out.extend_from_slice(&crc.to_le_bytes());
        }
        out
    }

    #[test]
    fn pending_metadata_attaches_to_next_key_only() -> AnyResult<()> {
        let mut body = vec![0xFC];
        body.extend_from_slice(&1_700_000_000_000u64.to_le_bytes());
        body.extend_from_slice(&[0xF8, 0x05, 0x00, 0x01, b'a', 0x01, b'1']);
        body.extend_from_slice(&[0x00, 0x01, b'b', 0x01, b'2']);
        let data = rdb(11, &body);
        let entries: Vec<_> =
            EntryReader::new(Cursor::new(data), ReaderOptions::default()).collect::<AnyResult<_>>()?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].expiry, Expiry::Milliseconds(1_700_000_000_000));
        assert_eq!(entries[0].idle_seconds, Some(5));
        assert_eq!(entries[1].expiry, Expiry::None);
        assert_eq!(entries[1].idle_seconds, None);
        Ok(())
    }

    #[test]
    fn checksum_mismatch_is_reported() {
        let mut data = rdb(9, &[0x00, 0x01, b'k', 0x01, b'v']);
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let mut reader = EntryReader::new(Cursor::new(data), ReaderOptions::default());
        assert!(reader.next().is_some_and(|r| r.is_ok()));
        let err = reader.next().and_then(Result::err).expect("checksum error");
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::ChecksumMismatch { .. })
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn zero_checksum_is_accepted() -> AnyResult<()> {
        let mut data = b"REDIS0009".to_vec();
        data.extend_from_slice(&[0x00, 0x01, b'k', 0x01, b'v', 0xFF]);
        data.extend_from_slice(&[0; 8]);
        let mut reader = EntryReader::new(Cursor::new(data), ReaderOptions::default());
        assert!(reader.next_entry()?.is_some());
        assert!(reader.next_entry()?.is_none());
        Ok(())
    }

    #[test]
    fn old_versions_have_no_checksum() -> AnyResult<()> {
        let data = rdb(3, &[0x00, 0x01, b'k', 0x01, b'v']);
        let entries: Vec<_> =
            EntryReader::new(Cursor::new(data), ReaderOptions::default()).collect::<AnyResult<_>>()?;
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[test]
    fn tail_follows_checksum() -> AnyResult<()> {
        let mut data = rdb(10, &[0xFE, 0x02, 0x00, 0x01, b'k', 0x01, b'v']);
        data.extend_from_slice(b"*1\r\n$4\r\nPING\r\n");
        let mut reader = EntryReader::new(Cursor::new(data), ReaderOptions::default());
        let entry = reader.next_entry()?.context("one entry")?;
        assert_eq!(entry.db, 2);
        assert!(reader.next_entry()?.is_none());
        let mut tail = Vec::new();
        reader.into_tail()?.read_to_end(&mut tail)?;
        assert_eq!(tail, b"*1\r\n$4\r\nPING\r\n");
        Ok(())
    }

    #[test]
    fn unknown_type_is_fatal() {
        let data = rdb(10, &[0x08, 0x01, b'k']);
        let err = EntryReader::new(Cursor::new(data), ReaderOptions::default())
            .next()
            .and_then(Result::err)
            .expect("unknown type error");
        assert_eq!(
            err.downcast_ref::<DecodeError>(),
            Some(&DecodeError::UnknownType(8))
        );
    }

    #[test]
    fn captured_bytes_cover_type_and_value() -> AnyResult<()> {
        let data = rdb(10, &[0x00, 0x01, b'k', 0x03, b'b', b'a', b'r']);
        let options = ReaderOptions::builder()
            .capture(true)
            .filter(FilterSpec::new(&FilterConfig::default())?)
            .build();
        let mut reader = EntryReader::new(Cursor::new(data), options);
        let entry = reader.next_entry()?.context("one entry")?;
        let capture = entry.capture.context("captured")?;
        assert_eq!(capture.raw().as_ref(), b"\x00\x03bar");
        assert_eq!(entry.rdb_size, 4);
        Ok(())
    }
}

use std::io::{BufWriter, Write};

use anyhow::Context;
use crc::Digest;
use tracing::info;

use crate::{
    dump::{DumpEncoder, RdbWriter},
    helper::AnyResult,
    output::EntrySink,
    parser::{capture::CRC64, model::RDBOpcode},
    record::RdbEntry,
};

/// IDLE and FREQ opcodes exist from this version on.
const LRU_LFU_SINCE_VERSION: u16 = 9;

/// Writes the included keys back out as an RDB file of the target version.
pub struct RdbSink<W: Write> {
    out: BufWriter<W>,
    encoder: DumpEncoder,
    writer: RdbWriter,
    digest: Digest<'static, u64>,
    db: Option<u64>,
    keys: u64,
    reencoded: u64,
}

impl<W: Write> RdbSink<W> {
    pub fn new(out: W, target_version: u16) -> AnyResult<Self> {
        let encoder = DumpEncoder::new(target_version)?;
        let mut writer = RdbWriter::new();
        writer.write_header(target_version);
        Ok(Self {
            out: BufWriter::new(out),
            encoder,
            writer,
            digest: CRC64.digest(),
            db: None,
            keys: 0,
            reencoded: 0,
        })
    }

    pub fn into_inner(self) -> AnyResult<W> {
        self.out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flush rdb output")
    }

    fn flush_chunk(&mut self) -> AnyResult<()> {
        let chunk = self.writer.split();
        self.digest.update(&chunk);
        self.out.write_all(&chunk).context("write rdb output")
    }
}

impl<W: Write + Send> EntrySink for RdbSink<W> {
    fn write_entry(&mut self, mut entry: RdbEntry) -> AnyResult<()> {
        let payload = self
            .encoder
            .encode(&mut entry)
            .with_context(|| format!("encode key {}", entry.key.escape_ascii()))?;

        if self.db != Some(entry.db) {
            self.writer.write_opcode(RDBOpcode::SelectDB);
            self.writer.write_len(entry.db);
            self.db = Some(entry.db);
        }
        if let Some(at) = entry.expiry.expire_at_ms() {
            self.writer.write_opcode(RDBOpcode::ExpireTimeMs);
            self.writer.write_le_u64(at);
        }
        if self.encoder.target_version() >= LRU_LFU_SINCE_VERSION {
            if let Some(idle) = entry.idle_seconds {
                self.writer.write_opcode(RDBOpcode::Idle);
                self.writer.write_len(idle);
            }
            if let Some(freq) = entry.freq {
                self.writer.write_opcode(RDBOpcode::Freq);
                self.writer.write_u8(freq);
            }
        }

        // body is `<type><value>`; the key goes between the two
        let (ty, value) = payload.body.split_at(1);
        self.writer.write_raw(ty);
        self.writer.write_str(&entry.key);
        self.writer.write_raw(value);

        self.keys += 1;
        if payload.reencoded {
            self.reencoded += 1;
        }
        self.flush_chunk()
    }

    fn finish(&mut self) -> AnyResult<()> {
        self.writer.write_opcode(RDBOpcode::Eof);
        self.flush_chunk()?;
        if self.encoder.target_version() >= 5 {
            let digest = std::mem::replace(&mut self.digest, CRC64.digest());
            self.out
                .write_all(&digest.finalize().to_le_bytes())
                .context("write rdb checksum")?;
        }
        self.out.flush().context("flush rdb output")?;
        info!(
            operation = "rdb_output",
            version = self.encoder.target_version(),
            keys = self.keys,
            reencoded = self.reencoded,
            "RDB output finished"
        );
        Ok(())
    }
}

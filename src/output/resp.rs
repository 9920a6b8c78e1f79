use std::io::{self, BufWriter, Read, Write};

use anyhow::{Context, bail, ensure};
use bytes::Bytes;
use redis_protocol::resp2::{
    encode::encode_bytes,
    types::{BytesFrame, Resp2Frame},
};
use tracing::info;

use crate::{
    config::RespConfig,
    dump::DumpEncoder,
    helper::AnyResult,
    output::{EntrySink, format_score},
    parser::model::{RdbValue, RecordType},
    record::RdbEntry,
};

/// Redis commands that recreate each key, for `redis-cli --pipe` or a live
/// replica link.
pub struct RespSink<W: Write> {
    out: BufWriter<W>,
    config: RespConfig,
    encoder: DumpEncoder,
    db: Option<u64>,
    commands: u64,
}

impl<W: Write> RespSink<W> {
    pub fn new(out: W, config: RespConfig, target_version: u16) -> AnyResult<Self> {
        Ok(Self {
            out: BufWriter::new(out),
            config,
            encoder: DumpEncoder::new(target_version)?,
            db: None,
            commands: 0,
        })
    }

    pub fn into_inner(self) -> AnyResult<W> {
        self.out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flush resp output")
    }

    fn write_command(&mut self, args: Vec<Bytes>) -> AnyResult<()> {
        let command = BytesFrame::Array(args.into_iter().map(BytesFrame::BulkString).collect());
        let mut buffer = vec![0u8; command.encode_len(false)];
        let wrote = encode_bytes(&mut buffer, &command, false).context("encode command")?;
        ensure!(wrote == buffer.len(), "mismatch in encoded command length");
        self.out.write_all(&buffer)?;
        self.commands += 1;
        Ok(())
    }

    /// `<name> key <chunk...>` with at most `batch_size` elements per command.
    fn write_batched(
        &mut self,
        name: &'static str,
        key: &Bytes,
        elements: Vec<Vec<Bytes>>,
    ) -> AnyResult<()> {
        for chunk in elements.chunks(self.config.batch_size) {
            let mut args = vec![Bytes::from_static(name.as_bytes()), key.clone()];
            args.extend(chunk.iter().flatten().cloned());
            self.write_command(args)?;
        }
        Ok(())
    }

    fn write_restore(&mut self, entry: &mut RdbEntry) -> AnyResult<()> {
        let payload = self.encoder.encode(entry)?;
        let mut args = vec![
            Bytes::from_static(b"RESTORE"),
            entry.key.clone(),
            Bytes::from_static(b"0"),
            payload.payload,
        ];
        if self.config.replace {
            args.push(Bytes::from_static(b"REPLACE"));
        }
        self.write_command(args)
    }

    fn write_value(&mut self, entry: &RdbEntry) -> AnyResult<()> {
        let key = &entry.key;
        if self.config.replace && entry.record_type() != RecordType::String {
            self.write_command(vec![Bytes::from_static(b"DEL"), key.clone()])?;
        }
        match &entry.value {
            RdbValue::String(s) => {
                self.write_command(vec![Bytes::from_static(b"SET"), key.clone(), s.to_bytes()])
            }
            RdbValue::List(items) => {
                let elements = items.iter().map(|i| vec![i.to_bytes()]).collect();
                self.write_batched("RPUSH", key, elements)
            }
            RdbValue::Set(items) => {
                let elements = items.iter().map(|i| vec![i.to_bytes()]).collect();
                self.write_batched("SADD", key, elements)
            }
            RdbValue::ZSet(members) => {
                let elements = members
                    .iter()
                    .map(|m| vec![Bytes::from(format_score(m.score)), m.member.to_bytes()])
                    .collect();
                self.write_batched("ZADD", key, elements)
            }
            RdbValue::Hash(fields) => {
                let elements = fields
                    .iter()
                    .map(|f| vec![f.field.to_bytes(), f.value.to_bytes()])
                    .collect();
                self.write_batched("HMSET", key, elements)?;
                for field in fields {
                    if let Some(at) = field.expire_at_ms {
                        self.write_command(vec![
                            Bytes::from_static(b"HPEXPIREAT"),
                            key.clone(),
                            Bytes::from(at.to_string()),
                            Bytes::from_static(b"FIELDS"),
                            Bytes::from_static(b"1"),
                            field.field.to_bytes(),
                        ])?;
                    }
                }
                Ok(())
            }
            RdbValue::Stream(_) | RdbValue::Module(_) => {
                bail!("{} values can only be sent as RESTORE", entry.record_type())
            }
        }
    }
}

impl<W: Write + Send> EntrySink for RespSink<W> {
    fn write_entry(&mut self, mut entry: RdbEntry) -> AnyResult<()> {
        if self.db != Some(entry.db) {
            self.write_command(vec![
                Bytes::from_static(b"SELECT"),
                Bytes::from(entry.db.to_string()),
            ])?;
            self.db = Some(entry.db);
        }

        let restore = self.config.restore
            || matches!(entry.value, RdbValue::Stream(_) | RdbValue::Module(_));
        if restore {
            self.write_restore(&mut entry)?;
        } else {
            self.write_value(&entry)?;
        }

        if let Some(at) = entry.expiry.expire_at_ms() {
            self.write_command(vec![
                Bytes::from_static(b"PEXPIREAT"),
                entry.key.clone(),
                Bytes::from(at.to_string()),
            ])?;
        }
        Ok(())
    }

    /// The AOF tail is already RESP; it is forwarded as is.
    fn write_tail(&mut self, tail: &mut dyn Read) -> AnyResult<u64> {
        let copied = io::copy(tail, &mut self.out).context("forward aof tail")?;
        info!(operation = "aof_tail", bytes = copied, "AOF tail forwarded");
        Ok(copied)
    }

    fn finish(&mut self) -> AnyResult<()> {
        self.out.flush().context("flush resp output")?;
        info!(
            operation = "resp_output",
            commands = self.commands,
            "RESP output finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        parser::{core::raw::RDBStr, model::RDBType, value::ValueStats},
        record::Expiry,
    };

    fn entry(db: u64, key: &'static [u8], rdb_type: RDBType, value: RdbValue) -> RdbEntry {
        RdbEntry {
            db,
            rdb_type,
            key: Bytes::from_static(key),
            value,
            stats: ValueStats::default(),
            expiry: Expiry::None,
            idle_seconds: None,
            freq: None,
            rdb_size: 0,
            capture: None,
        }
    }

    fn render(config: RespConfig, entries: Vec<RdbEntry>) -> AnyResult<String> {
        let mut sink = RespSink::new(Vec::new(), config, 12)?;
        for e in entries {
            sink.write_entry(e)?;
        }
        sink.finish()?;
        Ok(String::from_utf8_lossy(&sink.into_inner()?).into_owned())
    }

    #[test]
    fn selects_db_and_sets_expiry() -> AnyResult<()> {
        let mut first = entry(0, b"foo", RDBType::String, RdbValue::String("bar".into()));
        first.expiry = Expiry::Milliseconds(1000);
        let second = entry(0, b"n", RDBType::String, RdbValue::String(RDBStr::Int(5)));
        let third = entry(2, b"x", RDBType::String, RdbValue::String("y".into()));
        let out = render(RespConfig::default(), vec![first, second, third])?;
        assert_eq!(
            out,
            "*2\r\n$6\r\nSELECT\r\n$1\r\n0\r\n\
             *3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n\
             *3\r\n$9\r\nPEXPIREAT\r\n$3\r\nfoo\r\n$4\r\n1000\r\n\
             *3\r\n$3\r\nSET\r\n$1\r\nn\r\n$1\r\n5\r\n\
             *2\r\n$6\r\nSELECT\r\n$1\r\n2\r\n\
             *3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\ny\r\n"
        );
        Ok(())
    }

    #[test]
    fn batches_elements() -> AnyResult<()> {
        let config = RespConfig {
            batch_size: 2,
            ..Default::default()
        };
        let list = entry(
            0,
            b"l",
            RDBType::List,
            RdbValue::List(vec!["a".into(), "b".into(), "c".into()]),
        );
        let out = render(config, vec![list])?;
        assert_eq!(out.matches("RPUSH").count(), 2);
        assert!(out.ends_with("*3\r\n$5\r\nRPUSH\r\n$1\r\nl\r\n$1\r\nc\r\n"));
        Ok(())
    }

    #[test]
    fn restore_mode_sends_payload() -> AnyResult<()> {
        let config = RespConfig {
            restore: true,
            replace: true,
            ..Default::default()
        };
        let out = render(config, vec![entry(
            0,
            b"k",
            RDBType::String,
            RdbValue::String("v".into()),
        )])?;
        assert!(out.contains("RESTORE"));
        assert!(out.ends_with("$7\r\nREPLACE\r\n"));
        Ok(())
    }

    #[test]
    fn forwards_tail() -> AnyResult<()> {
        let mut sink = RespSink::new(Vec::new(), RespConfig::default(), 12)?;
        let tail = b"*1\r\n$4\r\nPING\r\n";
        assert_eq!(sink.write_tail(&mut Cursor::new(tail))?, tail.len() as u64);
        sink.finish()?;
        assert_eq!(sink.into_inner()?, tail);
        Ok(())
    }
}

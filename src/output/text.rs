use std::io::{BufWriter, Write};

use anyhow::Context;
use itertools::Itertools;

use crate::{
    config::TextConfig,
    helper::{AnyResult, escape_bytes},
    output::{EntrySink, flatten},
    record::RdbEntry,
};

/// One line per key:
/// `db<d>type<d>key<d>expire_at_ms<d>count[<d>element...]`.
pub struct TextSink<W: Write> {
    out: BufWriter<W>,
    delimiter: u8,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W, config: &TextConfig) -> Self {
        // validated as printable ascii
        let delimiter = u8::try_from(config.delimiter).unwrap_or(b',');
        Self {
            out: BufWriter::new(out),
            delimiter,
        }
    }

    pub fn into_inner(self) -> AnyResult<W> {
        self.out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flush text output")
    }
}

impl<W: Write + Send> EntrySink for TextSink<W> {
    fn write_entry(&mut self, entry: RdbEntry) -> AnyResult<()> {
        let d = Some(self.delimiter);
        let head = [
            entry.db.to_string(),
            entry.record_type().to_string(),
            escape_bytes(&entry.key, d),
            entry
                .expiry
                .expire_at_ms()
                .map(|ms| ms.to_string())
                .unwrap_or_default(),
            entry.member_count().to_string(),
        ];
        let elements = flatten(&entry.value);
        let sep = (self.delimiter as char).to_string();
        let line = head
            .into_iter()
            .chain(elements.iter().map(|e| escape_bytes(e, d)))
            .join(&sep);
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> AnyResult<()> {
        self.out.flush().context("flush text output")
    }
}

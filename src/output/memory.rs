use std::io::{BufWriter, Write};

use anyhow::Context;
use tracing::info;

use crate::{
    config::MemoryConfig,
    helper::{AnyResult, escape_bytes},
    memory::{MemoryEstimator, MemoryRecord, TopK},
    output::EntrySink,
    record::RdbEntry,
};

const HEADER: &str =
    "database,type,key,size_in_bytes,encoding,num_elements,len_largest_element,expiry\n";

/// CSV memory report. With `top` set, rows are held back and written
/// largest first when the pass ends.
pub struct MemorySink<W: Write> {
    out: BufWriter<W>,
    estimator: MemoryEstimator,
    min_bytes: u64,
    top: Option<TopK<MemoryRecord>>,
    header_written: bool,
    total_bytes: u64,
    reported: u64,
}

impl<W: Write> MemorySink<W> {
    pub fn new(out: W, config: &MemoryConfig) -> Self {
        Self {
            out: BufWriter::new(out),
            estimator: MemoryEstimator::new(config.seed),
            min_bytes: config.min_bytes,
            top: config.top.map(TopK::new),
            header_written: false,
            total_bytes: 0,
            reported: 0,
        }
    }

    pub fn into_inner(self) -> AnyResult<W> {
        self.out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flush memory report")
    }

    fn write_row(&mut self, record: &MemoryRecord) -> AnyResult<()> {
        if !self.header_written {
            self.out.write_all(HEADER.as_bytes())?;
            self.header_written = true;
        }
        writeln!(
            self.out,
            "{},{},{},{},{},{},{},{}",
            record.db,
            record.record_type,
            csv_field(&escape_bytes(&record.key, None)),
            record.size_in_bytes,
            record.encoding,
            record.num_elements,
            record.len_largest_element,
            record
                .expire_at_ms
                .map(|ms| ms.to_string())
                .unwrap_or_default()
        )?;
        self.reported += 1;
        Ok(())
    }
}

/// Quote a field holding a comma or a quote.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl<W: Write + Send> EntrySink for MemorySink<W> {
    fn write_entry(&mut self, entry: RdbEntry) -> AnyResult<()> {
        let record = self.estimator.estimate(&entry);
        self.total_bytes += record.size_in_bytes;
        if record.size_in_bytes < self.min_bytes {
            return Ok(());
        }
        match &mut self.top {
            Some(top) => top.push(record),
            None => self.write_row(&record)?,
        }
        Ok(())
    }

    fn finish(&mut self) -> AnyResult<()> {
        if let Some(top) = self.top.take() {
            for record in top.into_sorted_vec() {
                self.write_row(&record)?;
            }
        }
        if !self.header_written {
            self.out.write_all(HEADER.as_bytes())?;
            self.header_written = true;
        }
        self.out.flush().context("flush memory report")?;
        info!(
            operation = "memory_report",
            total_bytes = self.total_bytes,
            reported = self.reported,
            "Memory report finished"
        );
        Ok(())
    }
}

//! One export pass: input stream through the entry reader into a sink.

use std::io::Read;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::{
    config::ExportConfig,
    filter::FilterSpec,
    helper::AnyResult,
    output::{EntrySink, create_sink, worker::OutputWorker},
    parser::module::ModuleParserRegistry,
    record::{EntryReader, RdbEntry, ReaderOptions},
    source::{open_input, open_output},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub version: u16,
    pub keys: u64,
    pub skipped: u64,
    pub aux_fields: usize,
    /// Bytes after the RDB payload (AOF part of a mixed file).
    pub tail_bytes: u64,
}

pub fn reader_options(
    config: &ExportConfig,
    modules: &ModuleParserRegistry,
) -> AnyResult<ReaderOptions> {
    Ok(ReaderOptions::builder()
        .filter(FilterSpec::new(&config.filter)?)
        .modules(modules.clone())
        .capture(config.needs_capture())
        .verify_checksum(config.verify_checksum)
        .build())
}

fn drain(
    reader: &mut EntryReader<'_>,
    mut emit: impl FnMut(RdbEntry) -> AnyResult<()>,
) -> AnyResult<u64> {
    let mut keys = 0u64;
    while let Some(entry) = reader.next_entry()? {
        emit(entry)?;
        keys += 1;
    }
    Ok(keys)
}

fn finish_pass(
    reader: EntryReader<'_>,
    keys: u64,
    sink: &mut dyn EntrySink,
) -> AnyResult<ExportSummary> {
    let version = reader.version();
    let skipped = reader.skipped();
    let aux_fields = reader.aux().len();
    let mut tail = reader.into_tail()?;
    let tail_bytes = sink.write_tail(&mut tail)?;
    sink.finish()?;

    let summary = ExportSummary {
        version,
        keys,
        skipped,
        aux_fields,
        tail_bytes,
    };
    info!(
        operation = "export_finished",
        version, keys, skipped, tail_bytes, "Export finished"
    );
    Ok(summary)
}

/// Run a pass on the current thread.
pub fn export_stream(
    config: &ExportConfig,
    modules: &ModuleParserRegistry,
    input: impl Read + Send,
    sink: &mut dyn EntrySink,
) -> AnyResult<ExportSummary> {
    let mut reader = EntryReader::new(input, reader_options(config, modules)?);
    let keys = drain(&mut reader, |entry| sink.write_entry(entry))?;
    finish_pass(reader, keys, sink)
}

/// Open the configured input and output and run a pass. Decoding runs on a
/// blocking thread; with `async_output` the sink gets its own writer thread.
pub async fn export(
    config: ExportConfig,
    modules: ModuleParserRegistry,
) -> AnyResult<ExportSummary> {
    config.validate()?;
    let input = open_input(config.input.as_deref())?;
    let out = open_output(config.output.as_deref())?;
    let mut sink = create_sink(&config, out)?;
    info!(
        operation = "export_start",
        format = %config.format,
        async_output = config.async_output,
        "Export started"
    );

    if !config.async_output {
        return tokio::task::spawn_blocking(move || {
            export_stream(&config, &modules, input, &mut sink)
        })
        .await
        .context("decode task panicked")?;
    }

    let options = reader_options(&config, &modules)?;
    let worker = OutputWorker::spawn(sink, config.queue_capacity);
    let (worker, decoded) = tokio::task::spawn_blocking(move || {
        let mut reader = EntryReader::new(input, options);
        let keys = drain(&mut reader, |entry| worker.send_blocking(entry));
        (worker, keys.map(|keys| (keys, reader)))
    })
    .await
    .context("decode task panicked")?;

    // a failed writer also fails the decode side; its own error says more
    let mut sink = worker.join().await?;
    let (keys, reader) = decoded?;
    tokio::task::spawn_blocking(move || finish_pass(reader, keys, &mut sink))
        .await
        .context("output task panicked")?
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        config::OutputFormat,
        output::TextSink,
        parser::capture::crc64,
    };

    fn rdb(body: &[u8], tail: &[u8]) -> Vec<u8> {
        let mut out = b"REDIS0011".to_vec();
        out.extend_from_slice(body);
        out.push(0xFF);
        let crc = crc64(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(tail);
        out
    }

    #[test]
    fn counts_kept_and_skipped_keys() -> AnyResult<()> {
        let body = [
            0x00, 0x01, b'a', 0x01, b'1', //
            0x00, 0x01, b'b', 0x01, b'2',
        ];
        let mut config = ExportConfig::new(OutputFormat::Text);
        config.filter.keys = vec!["b".to_string()];
        let mut sink = TextSink::new(Vec::new(), &config.text);
        let summary = export_stream(
            &config,
            &ModuleParserRegistry::default(),
            Cursor::new(rdb(&body, b"*1\r\n$4\r\nPING\r\n")),
            &mut sink,
        )?;
        assert_eq!(summary, ExportSummary {
            version: 11,
            keys: 1,
            skipped: 1,
            aux_fields: 0,
            tail_bytes: 14,
        });
        assert_eq!(sink.into_inner()?, b"0,string,b,,1,2\n");
        Ok(())
    }
}

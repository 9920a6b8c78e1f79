use std::{
    borrow::Cow,
    io::{self, Read, Write},
};

use anyhow::Context;

use crate::{
    config::{ExportConfig, OutputFormat},
    helper::AnyResult,
    parser::{model::RdbValue, module::ModuleField},
    record::RdbEntry,
};

pub mod json;
pub mod memory;
pub mod rdb;
pub mod resp;
pub mod text;
pub mod worker;

pub use json::JsonSink;
pub use memory::MemorySink;
pub use rdb::RdbSink;
pub use resp::RespSink;
pub use text::TextSink;

/// Destination for decoded entries.
pub trait EntrySink: Send {
    fn write_entry(&mut self, entry: RdbEntry) -> AnyResult<()>;

    /// Bytes that followed the RDB payload (the AOF part of a mixed file).
    /// Returns how many bytes were consumed.
    fn write_tail(&mut self, tail: &mut dyn Read) -> AnyResult<u64> {
        io::copy(tail, &mut io::sink()).context("drain aof tail")
    }

    /// Flush buffered state. Called exactly once, after the last entry.
    fn finish(&mut self) -> AnyResult<()>;
}

impl<S: EntrySink + ?Sized> EntrySink for Box<S> {
    fn write_entry(&mut self, entry: RdbEntry) -> AnyResult<()> {
        (**self).write_entry(entry)
    }

    fn write_tail(&mut self, tail: &mut dyn Read) -> AnyResult<u64> {
        (**self).write_tail(tail)
    }

    fn finish(&mut self) -> AnyResult<()> {
        (**self).finish()
    }
}

pub fn create_sink<W: Write + Send + 'static>(
    config: &ExportConfig,
    out: W,
) -> AnyResult<Box<dyn EntrySink>> {
    let sink: Box<dyn EntrySink> = match config.format {
        OutputFormat::Text => Box::new(TextSink::new(out, &config.text)),
        OutputFormat::Json => Box::new(JsonSink::new(out)),
        OutputFormat::Resp => Box::new(RespSink::new(
            out,
            config.resp.clone(),
            config.dump.target_version,
        )?),
        OutputFormat::Rdb => Box::new(RdbSink::new(out, config.dump.target_version)?),
        OutputFormat::Memory => Box::new(MemorySink::new(out, &config.memory)),
    };
    Ok(sink)
}

/// Redis prints scores with `%.17g`; Rust's shortest round-trip form reads
/// back to the same double.
pub(crate) fn format_score(score: f64) -> String {
    if score.is_nan() {
        "nan".to_string()
    } else if score.is_infinite() {
        if score > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        score.to_string()
    }
}

pub(crate) fn format_module_field(field: &ModuleField) -> Cow<'_, [u8]> {
    match field {
        ModuleField::Signed(v) => Cow::Owned(v.to_string().into_bytes()),
        ModuleField::Unsigned(v) => Cow::Owned(v.to_string().into_bytes()),
        ModuleField::Float(v) => Cow::Owned(format_score(*v as f64).into_bytes()),
        ModuleField::Double(v) => Cow::Owned(format_score(*v).into_bytes()),
        ModuleField::String(s) => Cow::Borrowed(s.as_ref()),
    }
}

/// The value as a flat element list: list/set items, member/score pairs,
/// field/value pairs, stream ids followed by their field/value pairs, or
/// the module id followed by its fields.
pub(crate) fn flatten(value: &RdbValue) -> Vec<Cow<'_, [u8]>> {
    match value {
        RdbValue::String(s) => vec![s.as_bytes()],
        RdbValue::List(items) | RdbValue::Set(items) => {
            items.iter().map(|item| item.as_bytes()).collect()
        }
        RdbValue::ZSet(members) => members
            .iter()
            .flat_map(|m| {
                [
                    m.member.as_bytes(),
                    Cow::Owned(format_score(m.score).into_bytes()),
                ]
            })
            .collect(),
        RdbValue::Hash(fields) => fields
            .iter()
            .flat_map(|f| [f.field.as_bytes(), f.value.as_bytes()])
            .collect(),
        RdbValue::Stream(stream) => stream
            .entries
            .iter()
            .filter(|e| !e.deleted)
            .flat_map(|e| {
                std::iter::once(Cow::Owned(e.id.to_string().into_bytes())).chain(
                    e.fields
                        .iter()
                        .flat_map(|(f, v)| [f.as_bytes(), v.as_bytes()]),
                )
            })
            .collect(),
        RdbValue::Module(module) => std::iter::once(Cow::Owned(module.id.to_string().into_bytes()))
            .chain(module.fields.iter().map(format_module_field))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{
        core::raw::RDBStr,
        model::{HashField, ZSetMember},
    };

    #[test]
    fn scores_print_like_redis() {
        assert_eq!(format_score(1.0), "1");
        assert_eq!(format_score(1.5), "1.5");
        assert_eq!(format_score(f64::INFINITY), "inf");
        assert_eq!(format_score(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn flattens_pairs() {
        let zset = RdbValue::ZSet(vec![ZSetMember {
            member: "m".into(),
            score: 2.5,
        }]);
        assert_eq!(flatten(&zset), vec![
            Cow::Borrowed(b"m".as_slice()),
            Cow::Borrowed(b"2.5".as_slice())
        ]);

        let hash = RdbValue::Hash(vec![HashField {
            field: "a".into(),
            value: RDBStr::Int(1),
            expire_at_ms: None,
        }]);
        let flat: Vec<Vec<u8>> = flatten(&hash).into_iter().map(Cow::into_owned).collect();
        assert_eq!(flat, vec![b"a".to_vec(), b"1".to_vec()]);
    }
}

use std::io::{BufWriter, Write};

use anyhow::Context;
use serde_json::{Value, json};

use crate::{
    helper::{AnyResult, escape_bytes},
    output::{EntrySink, format_module_field, format_score},
    parser::{core::raw::RDBStr, model::RdbValue},
    record::RdbEntry,
};

/// A JSON array with one object per key.
pub struct JsonSink<W: Write> {
    out: BufWriter<W>,
    written: u64,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
            written: 0,
        }
    }

    pub fn into_inner(self) -> AnyResult<W> {
        self.out
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flush json output")
    }
}

fn text(s: &RDBStr) -> Value {
    Value::String(escape_bytes(&s.as_bytes(), None))
}

fn value_json(value: &RdbValue) -> Value {
    match value {
        RdbValue::String(s) => text(s),
        RdbValue::List(items) | RdbValue::Set(items) => items.iter().map(text).collect(),
        RdbValue::ZSet(members) => members
            .iter()
            .map(|m| json!({"member": text(&m.member), "score": format_score(m.score)}))
            .collect(),
        RdbValue::Hash(fields) => fields
            .iter()
            .map(|f| {
                let mut obj = json!({"field": text(&f.field), "value": text(&f.value)});
                if let Some(at) = f.expire_at_ms {
                    obj["expire_at_ms"] = json!(at);
                }
                obj
            })
            .collect(),
        RdbValue::Stream(stream) => json!({
            "length": stream.length,
            "last_id": stream.last_id.to_string(),
            "first_id": stream.first_id.map(|id| id.to_string()),
            "max_deleted_id": stream.max_deleted_id.map(|id| id.to_string()),
            "entries_added": stream.entries_added,
            "entries": stream
                .entries
                .iter()
                .filter(|e| !e.deleted)
                .map(|e| json!({
                    "id": e.id.to_string(),
                    "fields": e.fields.iter().flat_map(|(f, v)| [text(f), text(v)]).collect::<Vec<_>>(),
                }))
                .collect::<Vec<_>>(),
            "groups": stream
                .groups
                .iter()
                .map(|g| json!({
                    "name": escape_bytes(&g.name, None),
                    "last_id": g.last_id.to_string(),
                    "entries_read": g.entries_read,
                    "pending": g.pending.len(),
                    "consumers": g
                        .consumers
                        .iter()
                        .map(|c| json!({
                            "name": escape_bytes(&c.name, None),
                            "seen_time_ms": c.seen_time_ms,
                            "active_time_ms": c.active_time_ms,
                            "pending": c.pending.len(),
                        }))
                        .collect::<Vec<_>>(),
                }))
                .collect::<Vec<_>>(),
        }),
        RdbValue::Module(module) => json!({
            "module": module.id.to_string(),
            "fields": module
                .fields
                .iter()
                .map(|f| escape_bytes(&format_module_field(f), None))
                .collect::<Vec<_>>(),
        }),
    }
}

impl<W: Write + Send> EntrySink for JsonSink<W> {
    fn write_entry(&mut self, entry: RdbEntry) -> AnyResult<()> {
        let obj = json!({
            "db": entry.db,
            "type": entry.record_type(),
            "encoding": entry.encoding(),
            "key": escape_bytes(&entry.key, None),
            "expire_at_ms": entry.expiry.expire_at_ms(),
            "value": value_json(&entry.value),
        });
        self.out
            .write_all(if self.written == 0 { b"[\n" } else { b",\n" })?;
        serde_json::to_writer(&mut self.out, &obj).context("write json entry")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> AnyResult<()> {
        let close: &[u8] = if self.written == 0 { b"[]\n" } else { b"\n]\n" };
        self.out.write_all(close)?;
        self.out.flush().context("flush json output")
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::{
        parser::{model::RDBType, model::ZSetMember, value::ValueStats},
        record::Expiry,
    };

    fn entry(key: &'static [u8], rdb_type: RDBType, value: RdbValue) -> RdbEntry {
        RdbEntry {
            db: 0,
            rdb_type,
            key: Bytes::from_static(key),
            value,
            stats: ValueStats::default(),
            expiry: Expiry::Milliseconds(5),
            idle_seconds: None,
            freq: None,
            rdb_size: 0,
            capture: None,
        }
    }

    #[test]
    fn writes_parseable_array() -> AnyResult<()> {
        let mut sink = JsonSink::new(Vec::new());
        sink.write_entry(entry(b"s\x01", RDBType::String, RdbValue::String("v".into())))?;
        sink.write_entry(entry(
            b"z",
            RDBType::ZSetListPack,
            RdbValue::ZSet(vec![ZSetMember {
                member: "m".into(),
                score: 1.5,
            }]),
        ))?;
        sink.finish()?;

        let parsed: Value = serde_json::from_slice(&sink.into_inner()?)?;
        let items = parsed.as_array().context("array")?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["key"], "s\\x01");
        assert_eq!(items[0]["type"], "string");
        assert_eq!(items[0]["expire_at_ms"], 5);
        assert_eq!(items[1]["type"], "zset");
        assert_eq!(items[1]["encoding"], "listpack");
        assert_eq!(items[1]["value"][0]["score"], "1.5");
        Ok(())
    }

    #[test]
    fn empty_export_is_empty_array() -> AnyResult<()> {
        let mut sink = JsonSink::new(Vec::new());
        sink.finish()?;
        let parsed: Value = serde_json::from_slice(&sink.into_inner()?)?;
        assert_eq!(parsed, json!([]));
        Ok(())
    }
}

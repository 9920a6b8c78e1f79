#![allow(dead_code)]

//! Hand-assembled RDB streams, so no live Redis is needed.

use bytes::Bytes;
use rdbexport::{
    dump::RdbWriter,
    parser::model::{
        ConsumerGroup, PendingEntry, RDBOpcode, RDBType, StreamConsumer, StreamEntry, StreamId,
    },
    parser::container::stream::encode_node,
};

pub mod trace;

pub struct RdbBuilder {
    writer: RdbWriter,
    version: u16,
}

impl RdbBuilder {
    pub fn new(version: u16) -> Self {
        let mut writer = RdbWriter::new();
        writer.write_header(version);
        Self { writer, version }
    }

    pub fn aux(mut self, key: &str, value: &str) -> Self {
        self.writer.write_opcode(RDBOpcode::Aux);
        self.writer.write_str(key.as_bytes());
        self.writer.write_str(value.as_bytes());
        self
    }

    pub fn select_db(mut self, db: u64) -> Self {
        self.writer.write_opcode(RDBOpcode::SelectDB);
        self.writer.write_len(db);
        self
    }

    pub fn expire_ms(mut self, at: u64) -> Self {
        self.writer.write_opcode(RDBOpcode::ExpireTimeMs);
        self.writer.write_le_u64(at);
        self
    }

    /// `<type><key><value bytes>`.
    pub fn raw(mut self, ty: RDBType, key: &str, value: &[u8]) -> Self {
        self.writer.write_type(ty);
        self.writer.write_str(key.as_bytes());
        self.writer.write_raw(value);
        self
    }

    pub fn string(self, key: &str, value: &str) -> Self {
        self.raw(RDBType::String, key, &encoded_str(value.as_bytes()))
    }

    /// A value stored as one string holding a packed container.
    pub fn blob(self, ty: RDBType, key: &str, blob: &[u8]) -> Self {
        self.raw(ty, key, &encoded_str(blob))
    }

    /// A plain (type 4) hash.
    pub fn hash(self, key: &str, pairs: &[(&str, &str)]) -> Self {
        let mut value = RdbWriter::new();
        value.write_len(pairs.len() as u64);
        for (f, v) in pairs {
            value.write_str(f.as_bytes());
            value.write_str(v.as_bytes());
        }
        self.raw(RDBType::Hash, key, value.as_slice())
    }

    /// Raw bytes, for corrupting a stream on purpose.
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.writer.write_raw(data);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.writer.write_footer(self.version);
        self.writer.freeze().to_vec()
    }

    /// The stream without EOF and checksum.
    pub fn build_truncated(self) -> Vec<u8> {
        self.writer.freeze().to_vec()
    }
}

pub fn encoded_str(data: &[u8]) -> Vec<u8> {
    let mut w = RdbWriter::new();
    w.write_str(data);
    w.freeze().to_vec()
}

pub enum Zl<'a> {
    Str(&'a [u8]),
    Int(i64),
}

fn ziplist_entry(prevlen: usize, entry: &Zl<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    if prevlen < 254 {
        out.push(prevlen as u8);
    } else {
        out.push(0xFE);
        out.extend_from_slice(&(prevlen as u32).to_le_bytes());
    }
    match entry {
        Zl::Str(s) if s.len() < 64 => {
            out.push(s.len() as u8);
            out.extend_from_slice(s);
        }
        Zl::Str(s) => {
            out.push(0x80);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s);
        }
        Zl::Int(i) if (0..=12).contains(i) => out.push(0xF1 + *i as u8),
        Zl::Int(i) if i16::try_from(*i).is_ok() => {
            out.push(0xC0);
            out.extend_from_slice(&(*i as i16).to_le_bytes());
        }
        Zl::Int(i) => {
            out.push(0xE0);
            out.extend_from_slice(&i.to_le_bytes());
        }
    }
    out
}

pub fn ziplist(entries: &[Zl<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut prevlen = 0;
    let mut tail = 10;
    for entry in entries {
        tail = 10 + body.len();
        let encoded = ziplist_entry(prevlen, entry);
        prevlen = encoded.len();
        body.extend_from_slice(&encoded);
    }
    let total = 10 + body.len() + 1;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(tail as u32).to_le_bytes());
    out.extend_from_slice(&(entries.len().min(0xFFFF) as u16).to_le_bytes());
    out.extend_from_slice(&body);
    out.push(0xFF);
    out
}

pub fn ziplist_strs(items: &[&str]) -> Vec<u8> {
    let entries: Vec<_> = items.iter().map(|s| Zl::Str(s.as_bytes())).collect();
    ziplist(&entries)
}

/// A type 15/19/21 stream value with one node and no consumer groups.
pub fn stream_value(ty: RDBType, entries: &[StreamEntry]) -> Vec<u8> {
    stream_value_with_groups(ty, entries, &[])
}

/// A one-node stream followed by `groups`, laid out the way type `ty`
/// stores them: entries-read from 19 on, consumer active-time from 21 on.
pub fn stream_value_with_groups(
    ty: RDBType,
    entries: &[StreamEntry],
    groups: &[ConsumerGroup],
) -> Vec<u8> {
    let v2 = ty != RDBType::StreamListPacks;
    let v3 = ty == RDBType::StreamListPacks3;
    let (master_id, listpack) = encode_node(entries).expect("encode stream node");
    let last_id = entries.last().map(|e| e.id).unwrap_or_default();
    let mut w = RdbWriter::new();
    w.write_len(1);
    w.write_str(&master_id.to_be_bytes());
    w.write_str(&listpack);
    w.write_len(entries.iter().filter(|e| !e.deleted).count() as u64);
    w.write_stream_id(last_id);
    if v2 {
        w.write_stream_id(entries.first().map(|e| e.id).unwrap_or_default());
        w.write_stream_id(StreamId::default());
        w.write_len(entries.len() as u64);
    }
    w.write_len(groups.len() as u64);
    for group in groups {
        w.write_str(&group.name);
        w.write_stream_id(group.last_id);
        if v2 {
            w.write_len(group.entries_read.expect("entries_read for v2 layouts"));
        }
        w.write_len(group.pending.len() as u64);
        for p in &group.pending {
            w.write_raw(&p.id.to_be_bytes());
            w.write_raw(&p.delivery_time_ms.to_le_bytes());
            w.write_len(p.delivery_count);
        }
        w.write_len(group.consumers.len() as u64);
        for c in &group.consumers {
            w.write_str(&c.name);
            w.write_raw(&c.seen_time_ms.to_le_bytes());
            if v3 {
                let active = c.active_time_ms.expect("active_time for v3 layout");
                w.write_raw(&active.to_le_bytes());
            }
            w.write_len(c.pending.len() as u64);
            for id in &c.pending {
                w.write_raw(&id.to_be_bytes());
            }
        }
    }
    w.freeze().to_vec()
}

/// Two groups over entries 1-0, 2-0 and 2-1: one with a PEL shared by two
/// consumers, one idle. Fields absent from layout `ty` are `None`.
pub fn sample_groups(ty: RDBType) -> Vec<ConsumerGroup> {
    let v2 = ty != RDBType::StreamListPacks;
    let v3 = ty == RDBType::StreamListPacks3;
    let id = |ms, seq| StreamId { ms, seq };
    let consumer = |name: &'static str, seen: u64, pending: Vec<StreamId>| StreamConsumer {
        name: Bytes::from_static(name.as_bytes()),
        seen_time_ms: seen,
        active_time_ms: v3.then_some(seen - 100),
        pending,
    };
    vec![
        ConsumerGroup {
            name: Bytes::from_static(b"workers"),
            last_id: id(2, 0),
            entries_read: v2.then_some(2),
            pending: vec![
                PendingEntry {
                    id: id(1, 0),
                    delivery_time_ms: 1_700_000_000_000,
                    delivery_count: 1,
                },
                PendingEntry {
                    id: id(2, 0),
                    delivery_time_ms: 1_700_000_000_250,
                    delivery_count: 3,
                },
            ],
            consumers: vec![
                consumer("alice", 1_700_000_000_500, vec![id(1, 0)]),
                consumer("bob", 1_700_000_000_900, vec![id(2, 0)]),
            ],
        },
        ConsumerGroup {
            name: Bytes::from_static(b"idle"),
            last_id: StreamId::default(),
            entries_read: v2.then_some(0),
            pending: Vec::new(),
            consumers: vec![consumer("carol", 1_700_000_001_000, Vec::new())],
        },
    ]
}

pub fn stream_entry(ms: u64, seq: u64, fields: &[(&str, &str)]) -> StreamEntry {
    StreamEntry {
        id: StreamId { ms, seq },
        deleted: false,
        fields: fields
            .iter()
            .map(|(f, v)| (Bytes::copy_from_slice(f.as_bytes()).into(), (*v).into()))
            .collect(),
    }
}

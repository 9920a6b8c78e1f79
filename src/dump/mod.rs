//! DUMP payload production for a target RDB version.
//!
//! A value whose on-disk type the target version understands is replayed
//! from its captured bytes. Anything newer is re-serialized into an older
//! encoding of the same logical type.

use anyhow::{Context, bail, ensure};
use bytes::Bytes;
use tracing::warn;

use crate::{
    helper::AnyResult,
    parser::{
        capture::restore_payload,
        container::stream::encode_node,
        model::{RDBModuleOpcode, RDBType, RdbValue, StreamNode, StreamValue},
        module::ModuleField,
        restore::RDB_VERSION,
    },
    record::RdbEntry,
};

pub mod writer;

pub use writer::RdbWriter;

/// Oldest version that can be written.
pub const MIN_TARGET_VERSION: u16 = 6;

/// A RESTORE-ready value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpPayload {
    /// Type of the encoded value, after any downgrade.
    pub rdb_type: RDBType,
    /// `<type><value>`.
    pub body: Bytes,
    /// `<type><value><version><crc64>`.
    pub payload: Bytes,
    pub reencoded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpEncoder {
    target_version: u16,
}

impl DumpEncoder {
    pub fn new(target_version: u16) -> AnyResult<Self> {
        ensure!(
            (MIN_TARGET_VERSION..=RDB_VERSION).contains(&target_version),
            "target rdb version should be within {}..={}, got {}",
            MIN_TARGET_VERSION,
            RDB_VERSION,
            target_version
        );
        Ok(Self { target_version })
    }

    pub fn target_version(&self) -> u16 {
        self.target_version
    }

    /// The type `ty` is written as under the target version.
    pub fn target_type(&self, ty: RDBType) -> AnyResult<RDBType> {
        let v = self.target_version;
        if ty.min_version() <= v {
            return Ok(ty);
        }
        let target = match ty {
            RDBType::ZSet2 => RDBType::ZSet,
            RDBType::ListQuickList | RDBType::ListQuickList2 => RDBType::List,
            RDBType::HashListPack
            | RDBType::HashMetadataPreGA
            | RDBType::HashListPackExPreGA
            | RDBType::HashMetadata
            | RDBType::HashListPackEx => RDBType::Hash,
            RDBType::ZSetListPack if v >= RDBType::ZSet2.min_version() => RDBType::ZSet2,
            RDBType::ZSetListPack => RDBType::ZSet,
            RDBType::SetListPack => RDBType::Set,
            RDBType::StreamListPacks2 | RDBType::StreamListPacks3
                if v >= RDBType::StreamListPacks2.min_version() =>
            {
                RDBType::StreamListPacks2
            }
            RDBType::StreamListPacks2 | RDBType::StreamListPacks3
                if v >= RDBType::StreamListPacks.min_version() =>
            {
                RDBType::StreamListPacks
            }
            _ => bail!(
                "{:?} cannot be written for rdb version {}",
                ty,
                self.target_version
            ),
        };
        Ok(target)
    }

    /// Build the payload for one entry, consuming its captured bytes.
    pub fn encode(&self, entry: &mut RdbEntry) -> AnyResult<DumpPayload> {
        let target = self.target_type(entry.rdb_type)?;
        if target == entry.rdb_type {
            if let Some(capture) = entry.capture.take() {
                let (body, payload) = capture.into_parts(self.target_version);
                return Ok(DumpPayload {
                    rdb_type: target,
                    body,
                    payload,
                    reencoded: false,
                });
            }
        }

        // without captured bytes a packed value is rebuilt in its plain form
        let target = if target == entry.rdb_type {
            plain_type(target, self.target_version)?
        } else {
            target
        };
        if matches!(
            entry.rdb_type,
            RDBType::HashMetadataPreGA
                | RDBType::HashListPackExPreGA
                | RDBType::HashMetadata
                | RDBType::HashListPackEx
        ) && target == RDBType::Hash
        {
            warn!(
                operation = "dump_downgrade",
                key = %entry.key.escape_ascii(),
                target_version = self.target_version,
                "Hash field expirations dropped"
            );
        }

        let mut writer = RdbWriter::new();
        writer.write_type(target);
        write_value(&mut writer, target, &entry.value)
            .with_context(|| format!("encode {:?} as {:?}", entry.rdb_type, target))?;
        let body = writer.freeze();
        let payload = restore_payload(&body, self.target_version);
        Ok(DumpPayload {
            rdb_type: target,
            body,
            payload,
            reencoded: true,
        })
    }
}

/// Plain (non-packed) type carrying the same logical value.
fn plain_type(ty: RDBType, version: u16) -> AnyResult<RDBType> {
    let zset = if version >= RDBType::ZSet2.min_version() {
        RDBType::ZSet2
    } else {
        RDBType::ZSet
    };
    Ok(match ty {
        RDBType::ListZipList | RDBType::ListQuickList | RDBType::ListQuickList2 => RDBType::List,
        RDBType::SetIntSet | RDBType::SetListPack => RDBType::Set,
        RDBType::ZSetZipList | RDBType::ZSetListPack => zset,
        RDBType::HashZipMap | RDBType::HashZipList | RDBType::HashListPack => RDBType::Hash,
        RDBType::HashMetadataPreGA | RDBType::HashListPackExPreGA | RDBType::HashListPackEx => {
            RDBType::HashMetadata
        }
        RDBType::ModulePreGA => bail!("module values without opcodes cannot be re-encoded"),
        other => other,
    })
}

/// Serialize `value` as type `ty`. Only plain types, streams and opcoded
/// module values are supported.
pub fn write_value(writer: &mut RdbWriter, ty: RDBType, value: &RdbValue) -> AnyResult<()> {
    match (ty, value) {
        (RDBType::String, RdbValue::String(s)) => writer.write_rdb_str(s),
        (RDBType::List, RdbValue::List(items)) | (RDBType::Set, RdbValue::Set(items)) => {
            writer.write_len(items.len() as u64);
            for item in items {
                writer.write_rdb_str(item);
            }
        }
        (RDBType::ZSet, RdbValue::ZSet(members)) => {
            writer.write_len(members.len() as u64);
            for m in members {
                writer.write_rdb_str(&m.member);
                writer.write_double_str(m.score);
            }
        }
        (RDBType::ZSet2, RdbValue::ZSet(members)) => {
            writer.write_len(members.len() as u64);
            for m in members {
                writer.write_rdb_str(&m.member);
                writer.write_le_f64(m.score);
            }
        }
        (RDBType::Hash, RdbValue::Hash(fields)) => {
            writer.write_len(fields.len() as u64);
            for f in fields {
                writer.write_rdb_str(&f.field);
                writer.write_rdb_str(&f.value);
            }
        }
        (RDBType::HashMetadata, RdbValue::Hash(fields)) => {
            let min_expire = fields.iter().filter_map(|f| f.expire_at_ms).min();
            writer.write_le_u64(min_expire.unwrap_or(0));
            writer.write_len(fields.len() as u64);
            for f in fields {
                let ttl = match (f.expire_at_ms, min_expire) {
                    (Some(at), Some(min)) => at - min + 1,
                    _ => 0,
                };
                writer.write_len(ttl);
                writer.write_rdb_str(&f.field);
                writer.write_rdb_str(&f.value);
            }
        }
        (
            RDBType::StreamListPacks | RDBType::StreamListPacks2 | RDBType::StreamListPacks3,
            RdbValue::Stream(stream),
        ) => write_stream(writer, ty, stream)?,
        (RDBType::Module2, RdbValue::Module(module)) => {
            writer.write_len(module.id.to_raw()?);
            for field in &module.fields {
                match field {
                    ModuleField::Signed(v) => {
                        writer.write_len(RDBModuleOpcode::SInt as u64);
                        writer.write_len(*v as u64);
                    }
                    ModuleField::Unsigned(v) => {
                        writer.write_len(RDBModuleOpcode::UInt as u64);
                        writer.write_len(*v);
                    }
                    ModuleField::Float(v) => {
                        writer.write_len(RDBModuleOpcode::Float as u64);
                        writer.write_raw(&v.to_le_bytes());
                    }
                    ModuleField::Double(v) => {
                        writer.write_len(RDBModuleOpcode::Double as u64);
                        writer.write_le_f64(*v);
                    }
                    ModuleField::String(s) => {
                        writer.write_len(RDBModuleOpcode::String as u64);
                        writer.write_str(s);
                    }
                }
            }
            writer.write_len(RDBModuleOpcode::Eof as u64);
        }
        (ty, value) => bail!(
            "cannot write {:?} value as {:?}",
            value.record_type(),
            ty
        ),
    }
    Ok(())
}

fn write_stream(writer: &mut RdbWriter, ty: RDBType, stream: &StreamValue) -> AnyResult<()> {
    let v2 = matches!(ty, RDBType::StreamListPacks2 | RDBType::StreamListPacks3);
    let v3 = ty == RDBType::StreamListPacks3;

    // nodes are replayed as read; a stream decoded without them is rebuilt
    // as a single node of its live entries
    let rebuilt;
    let nodes: &[StreamNode] = if stream.nodes.is_empty() && !stream.entries.is_empty() {
        let live: Vec<_> = stream.entries.iter().filter(|e| !e.deleted).cloned().collect();
        let (master_id, listpack) = encode_node(&live)?;
        rebuilt = [StreamNode {
            master_id,
            listpack: Bytes::from(listpack),
        }];
        &rebuilt
    } else {
        &stream.nodes
    };

    writer.write_len(nodes.len() as u64);
    for node in nodes {
        writer.write_str(&node.master_id.to_be_bytes());
        writer.write_str(&node.listpack);
    }
    writer.write_len(stream.length);
    writer.write_stream_id(stream.last_id);
    if v2 {
        let first_id = stream
            .first_id
            .or_else(|| stream.entries.iter().find(|e| !e.deleted).map(|e| e.id))
            .unwrap_or_default();
        writer.write_stream_id(first_id);
        writer.write_stream_id(stream.max_deleted_id.unwrap_or_default());
        writer.write_len(stream.entries_added.unwrap_or(stream.length));
    }

    writer.write_len(stream.groups.len() as u64);
    for group in &stream.groups {
        writer.write_str(&group.name);
        writer.write_stream_id(group.last_id);
        if v2 {
            // -1 (unknown) as Redis writes it
            writer.write_len(group.entries_read.unwrap_or(u64::MAX));
        }
        writer.write_len(group.pending.len() as u64);
        for p in &group.pending {
            writer.write_raw_stream_id(p.id);
            writer.write_le_u64(p.delivery_time_ms);
            writer.write_len(p.delivery_count);
        }
        writer.write_len(group.consumers.len() as u64);
        for c in &group.consumers {
            writer.write_str(&c.name);
            writer.write_le_u64(c.seen_time_ms);
            if v3 {
                writer.write_le_u64(c.active_time_ms.unwrap_or(c.seen_time_ms));
            }
            writer.write_len(c.pending.len() as u64);
            for id in &c.pending {
                writer.write_raw_stream_id(*id);
            }
        }
    }
    Ok(())
}

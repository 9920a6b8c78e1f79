//! Type dispatcher: decodes or skips one value given its RDB type.
//!
//! Both modes walk the value through the same code, reading every length
//! and fixed-width field; they differ only in whether string payloads and
//! container blobs are materialized. This keeps the bytes consumed by
//! `FastSkip` and `FullDecode` identical for every type.

use anyhow::{Context, bail, ensure};
use bytes::Bytes;

use crate::{
    helper::AnyResult,
    parser::{
        container::{intset, into_pairs, listpack, stream, ziplist, zipmap},
        core::{raw::RDBStr, reader::RdbReader},
        model::{
            ConsumerGroup, HashField, PendingEntry, RDBType, RdbValue, StreamConsumer, StreamId,
            StreamNode, StreamValue, ZSetMember,
        },
        module::ModuleParserRegistry,
    },
};

const QUICKLIST_NODE_PLAIN: u64 = 1;
const QUICKLIST_NODE_PACKED: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Advance past the value, discarding it.
    FastSkip,
    /// Materialize the value.
    FullDecode,
}

impl Mode {
    fn is_decode(self) -> bool {
        self == Mode::FullDecode
    }
}

/// Encoding facts gathered while decoding, used for memory estimation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStats {
    /// Sizes of the packed blobs (ziplist, listpack, intset, zipmap) that
    /// back the value in memory.
    pub blob_lens: Vec<u64>,
    /// Quicklist nodes or stream radix-tree nodes.
    pub nodes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    pub value: RdbValue,
    pub stats: ValueStats,
}

/// Decode (or skip) the value following an already consumed type byte.
///
/// Returns `None` in `FastSkip` mode.
pub fn decode_value(
    reader: &mut RdbReader<'_>,
    ty: RDBType,
    mode: Mode,
    modules: &ModuleParserRegistry,
) -> AnyResult<Option<DecodedValue>> {
    let mut stats = ValueStats::default();
    let value = match ty {
        RDBType::String => load_str(reader, mode)?.map(RdbValue::String),
        RDBType::List => load_strs(reader, mode)?.map(RdbValue::List),
        RDBType::Set => load_strs(reader, mode)?.map(RdbValue::Set),
        RDBType::ZSet | RDBType::ZSet2 => load_zset(reader, ty, mode)?.map(RdbValue::ZSet),
        RDBType::Hash => load_hash(reader, mode)?.map(RdbValue::Hash),
        RDBType::ModulePreGA | RDBType::Module2 => modules
            .load(reader, ty == RDBType::Module2, !mode.is_decode())?
            .filter(|_| mode.is_decode())
            .map(RdbValue::Module),
        RDBType::HashZipMap => load_blob(reader, mode, &mut stats)?
            .map(|blob| -> AnyResult<_> {
                let pairs = zipmap::decode(&blob)?;
                Ok(RdbValue::Hash(pairs.into_iter().map(plain_field).collect()))
            })
            .transpose()?,
        RDBType::ListZipList => load_blob(reader, mode, &mut stats)?
            .map(|blob| ziplist::decode(&blob).map(RdbValue::List))
            .transpose()?,
        RDBType::SetIntSet => load_blob(reader, mode, &mut stats)?
            .map(|blob| -> AnyResult<_> {
                let values = intset::decode(&blob)?;
                Ok(RdbValue::Set(values.into_iter().map(RDBStr::Int).collect()))
            })
            .transpose()?,
        RDBType::ZSetZipList => load_blob(reader, mode, &mut stats)?
            .map(|blob| packed_zset(ziplist::decode(&blob)?))
            .transpose()?,
        RDBType::ZSetListPack => load_blob(reader, mode, &mut stats)?
            .map(|blob| packed_zset(listpack::decode(&blob)?))
            .transpose()?,
        RDBType::HashZipList => load_blob(reader, mode, &mut stats)?
            .map(|blob| packed_hash(ziplist::decode(&blob)?))
            .transpose()?,
        RDBType::HashListPack => load_blob(reader, mode, &mut stats)?
            .map(|blob| packed_hash(listpack::decode(&blob)?))
            .transpose()?,
        RDBType::SetListPack => load_blob(reader, mode, &mut stats)?
            .map(|blob| listpack::decode(&blob).map(RdbValue::Set))
            .transpose()?,
        RDBType::ListQuickList | RDBType::ListQuickList2 => {
            load_quicklist(reader, ty, mode, &mut stats)?.map(RdbValue::List)
        }
        RDBType::StreamListPacks | RDBType::StreamListPacks2 | RDBType::StreamListPacks3 => {
            load_stream(reader, ty, mode, &mut stats)?.map(|s| RdbValue::Stream(Box::new(s)))
        }
        RDBType::HashMetadataPreGA | RDBType::HashMetadata => {
            load_hash_metadata(reader, ty, mode)?.map(RdbValue::Hash)
        }
        RDBType::HashListPackExPreGA | RDBType::HashListPackEx => {
            load_hash_listpack_ex(reader, ty, mode, &mut stats)?.map(RdbValue::Hash)
        }
    };
    Ok(value.map(|value| DecodedValue { value, stats }))
}

fn load_str(reader: &mut RdbReader<'_>, mode: Mode) -> AnyResult<Option<RDBStr>> {
    match mode {
        Mode::FastSkip => {
            reader.skip_rdb_str()?;
            Ok(None)
        }
        Mode::FullDecode => Ok(Some(reader.read_rdb_str()?)),
    }
}

fn load_blob(
    reader: &mut RdbReader<'_>,
    mode: Mode,
    stats: &mut ValueStats,
) -> AnyResult<Option<Bytes>> {
    let blob = load_str(reader, mode)?.map(|s| s.to_bytes());
    if let Some(blob) = &blob {
        stats.blob_lens.push(blob.len() as u64);
    }
    Ok(blob)
}

fn load_strs(reader: &mut RdbReader<'_>, mode: Mode) -> AnyResult<Option<Vec<RDBStr>>> {
    let len = reader.read_len().context("read element count")?;
    let mut items = Vec::new();
    for _ in 0..len {
        if let Some(item) = load_str(reader, mode)? {
            items.push(item);
        }
    }
    Ok(mode.is_decode().then_some(items))
}

fn load_zset(
    reader: &mut RdbReader<'_>,
    ty: RDBType,
    mode: Mode,
) -> AnyResult<Option<Vec<ZSetMember>>> {
    let len = reader.read_len().context("read zset size")?;
    let mut members = Vec::new();
    for _ in 0..len {
        let member = load_str(reader, mode)?;
        let score = match (ty, mode) {
            (RDBType::ZSet2, _) => reader.read_le_f64()?,
            (_, Mode::FastSkip) => {
                reader.skip_double_str()?;
                0.0
            }
            (_, Mode::FullDecode) => reader.read_double_str()?,
        };
        if let Some(member) = member {
            members.push(ZSetMember { member, score });
        }
    }
    Ok(mode.is_decode().then_some(members))
}

fn load_hash(reader: &mut RdbReader<'_>, mode: Mode) -> AnyResult<Option<Vec<HashField>>> {
    let len = reader.read_len().context("read hash size")?;
    let mut fields = Vec::new();
    for _ in 0..len {
        let field = load_str(reader, mode)?;
        let value = load_str(reader, mode)?;
        if let (Some(field), Some(value)) = (field, value) {
            fields.push(plain_field((field, value)));
        }
    }
    Ok(mode.is_decode().then_some(fields))
}

fn plain_field((field, value): (RDBStr, RDBStr)) -> HashField {
    HashField {
        field,
        value,
        expire_at_ms: None,
    }
}

fn packed_zset(items: Vec<RDBStr>) -> AnyResult<RdbValue> {
    let members = into_pairs(items)?
        .into_iter()
        .map(|(member, score)| {
            let score = score.to_f64().context("parse packed zset score")?;
            Ok(ZSetMember { member, score })
        })
        .collect::<AnyResult<_>>()?;
    Ok(RdbValue::ZSet(members))
}

fn packed_hash(items: Vec<RDBStr>) -> AnyResult<RdbValue> {
    Ok(RdbValue::Hash(
        into_pairs(items)?.into_iter().map(plain_field).collect(),
    ))
}

fn load_quicklist(
    reader: &mut RdbReader<'_>,
    ty: RDBType,
    mode: Mode,
    stats: &mut ValueStats,
) -> AnyResult<Option<Vec<RDBStr>>> {
    let nodes = reader.read_len().context("read quicklist node count")?;
    stats.nodes = nodes;
    let mut items = Vec::new();
    for _ in 0..nodes {
        let container = if ty == RDBType::ListQuickList2 {
            reader.read_len().context("read quicklist node container")?
        } else {
            QUICKLIST_NODE_PACKED
        };
        let Some(blob) = load_blob(reader, mode, stats)? else {
            continue;
        };
        match (ty, container) {
            (_, QUICKLIST_NODE_PLAIN) => {
                crate::parser_trace!("quicklist.plain");
                items.push(RDBStr::Str(blob));
            }
            (RDBType::ListQuickList, _) => {
                crate::parser_trace!("quicklist.ziplist");
                items.extend(ziplist::decode(&blob)?);
            }
            (_, QUICKLIST_NODE_PACKED) => {
                crate::parser_trace!("quicklist.listpack");
                items.extend(listpack::decode(&blob)?);
            }
            _ => bail!("unknown quicklist node container: {}", container),
        }
    }
    Ok(mode.is_decode().then_some(items))
}

fn read_stream_id(reader: &mut RdbReader<'_>) -> AnyResult<StreamId> {
    let ms = reader.read_len().context("read stream id ms")?;
    let seq = reader.read_len().context("read stream id seq")?;
    Ok(StreamId { ms, seq })
}

fn read_raw_stream_id(reader: &mut RdbReader<'_>) -> AnyResult<StreamId> {
    Ok(StreamId::from_be_bytes(reader.read_array::<16>()?))
}

/// Stream layouts by type:
///
/// | field                         | 15 | 19 | 21 |
/// |-------------------------------|----|----|----|
/// | first-id, max-deleted-id      |    | x  | x  |
/// | entries-added                 |    | x  | x  |
/// | group entries-read            |    | x  | x  |
/// | consumer active-time          |    |    | x  |
fn load_stream(
    reader: &mut RdbReader<'_>,
    ty: RDBType,
    mode: Mode,
    stats: &mut ValueStats,
) -> AnyResult<Option<StreamValue>> {
    let v2 = matches!(ty, RDBType::StreamListPacks2 | RDBType::StreamListPacks3);
    let v3 = ty == RDBType::StreamListPacks3;

    let node_count = reader.read_len().context("read stream node count")?;
    stats.nodes = node_count;
    let mut nodes = Vec::new();
    let mut entries = Vec::new();
    for _ in 0..node_count {
        let node_key = load_str(reader, mode).context("read stream node key")?;
        let blob = load_blob(reader, mode, stats).context("read stream node listpack")?;
        if let (Some(node_key), Some(listpack)) = (node_key, blob) {
            let raw: [u8; 16] = node_key
                .as_bytes()
                .as_ref()
                .try_into()
                .context("stream node key should be 16 bytes")?;
            let master_id = StreamId::from_be_bytes(raw);
            entries.extend(stream::decode_node(master_id, &listpack)?);
            nodes.push(StreamNode {
                master_id,
                listpack,
            });
        }
    }

    let length = reader.read_len().context("read stream length")?;
    let last_id = read_stream_id(reader)?;
    let (first_id, max_deleted_id, entries_added) = if v2 {
        let first_id = read_stream_id(reader)?;
        let max_deleted_id = read_stream_id(reader)?;
        let entries_added = reader.read_len().context("read entries added")?;
        (Some(first_id), Some(max_deleted_id), Some(entries_added))
    } else {
        (None, None, None)
    };

    let group_count = reader.read_len().context("read consumer group count")?;
    let mut groups = Vec::new();
    for _ in 0..group_count {
        let name = load_str(reader, mode)?;
        let last_id = read_stream_id(reader)?;
        let entries_read = if v2 {
            Some(reader.read_len().context("read group entries read")?)
        } else {
            None
        };

        let pel_size = reader.read_len().context("read group pel size")?;
        let mut pending = Vec::new();
        for _ in 0..pel_size {
            let id = read_raw_stream_id(reader)?;
            let delivery_time_ms = reader.read_le_u64()?;
            let delivery_count = reader.read_len()?;
            if mode.is_decode() {
                pending.push(PendingEntry {
                    id,
                    delivery_time_ms,
                    delivery_count,
                });
            }
        }

        let consumer_count = reader.read_len().context("read consumer count")?;
        let mut consumers = Vec::new();
        for _ in 0..consumer_count {
            let name = load_str(reader, mode)?;
            let seen_time_ms = reader.read_le_u64()?;
            let active_time_ms = if v3 {
                Some(reader.read_le_u64()?)
            } else {
                None
            };
            let pel_size = reader.read_len().context("read consumer pel size")?;
            let mut consumer_pending = Vec::new();
            for _ in 0..pel_size {
                let id = read_raw_stream_id(reader)?;
                if mode.is_decode() {
                    consumer_pending.push(id);
                }
            }
            if let Some(name) = name {
                consumers.push(StreamConsumer {
                    name: name.to_bytes(),
                    seen_time_ms,
                    active_time_ms,
                    pending: consumer_pending,
                });
            }
        }

        if let Some(name) = name {
            groups.push(ConsumerGroup {
                name: name.to_bytes(),
                last_id,
                entries_read,
                pending,
                consumers,
            });
        }
    }

    // Skipping never opens the node listpacks, so the live entry count is
    // only known when decoding. A mismatch is reported on full decode only.
    if !mode.is_decode() {
        return Ok(None);
    }
    let live = entries.iter().filter(|e| !e.deleted).count() as u64;
    ensure!(
        live == length,
        "stream length {} does not match {} live entries",
        length,
        live
    );
    Ok(Some(StreamValue {
        nodes,
        entries,
        length,
        last_id,
        first_id,
        max_deleted_id,
        entries_added,
        groups,
    }))
}

/// Hash with per-field TTLs, one field per record (types 22 and 24).
fn load_hash_metadata(
    reader: &mut RdbReader<'_>,
    ty: RDBType,
    mode: Mode,
) -> AnyResult<Option<Vec<HashField>>> {
    let min_expire = if ty == RDBType::HashMetadata {
        Some(reader.read_le_u64().context("read hash min expire")?)
    } else {
        None
    };
    let len = reader.read_len().context("read hash size")?;
    let mut fields = Vec::new();
    for _ in 0..len {
        let expire_at_ms = match min_expire {
            Some(min_expire) => {
                let ttl = reader.read_len().context("read field ttl")?;
                (ttl != 0).then(|| ttl.wrapping_add(min_expire).wrapping_sub(1))
            }
            None => {
                let at = reader.read_le_u64().context("read field expire time")?;
                (at != 0).then_some(at)
            }
        };
        let field = load_str(reader, mode)?;
        let value = load_str(reader, mode)?;
        if let (Some(field), Some(value)) = (field, value) {
            fields.push(HashField {
                field,
                value,
                expire_at_ms,
            });
        }
    }
    Ok(mode.is_decode().then_some(fields))
}

/// Listpack of field, value, ttl triplets (types 23 and 25).
fn load_hash_listpack_ex(
    reader: &mut RdbReader<'_>,
    ty: RDBType,
    mode: Mode,
    stats: &mut ValueStats,
) -> AnyResult<Option<Vec<HashField>>> {
    if ty == RDBType::HashListPackEx {
        // min expire of the whole hash; each triplet carries its own absolute ttl
        reader.read_le_u64().context("read hash min expire")?;
    }
    let Some(blob) = load_blob(reader, mode, stats)? else {
        return Ok(None);
    };
    let items = listpack::decode(&blob)?;
    ensure!(
        items.len() % 3 == 0,
        "listpackex should hold field/value/ttl triplets, got {} elements",
        items.len()
    );
    let mut fields = Vec::with_capacity(items.len() / 3);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value), Some(ttl)) = (iter.next(), iter.next(), iter.next()) {
        let ttl = ttl
            .as_int()
            .with_context(|| format!("listpackex ttl should be an integer, got {}", ttl))?;
        fields.push(HashField {
            field,
            value,
            expire_at_ms: (ttl > 0).then_some(ttl as u64),
        });
    }
    Ok(Some(fields))
}

use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    impl_serde_str_conversion,
    parser::{core::raw::RDBStr, module::ModuleValue},
};

/// Opcode of RDB, ref: https://github.com/redis/redis/blob/2ba81b70957691a6a010e785225672e6657e53e8/src/rdb.h#L93
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RDBOpcode {
    SlotInfo = 244,      // RDB_OPCODE_SLOT_INFO
    Function2 = 245,     // RDB_OPCODE_FUNCTION2
    FunctionPreGA = 246, // RDB_OPCODE_FUNCTION_PRE_GA
    ModuleAux = 247,     // RDB_OPCODE_MODULE_AUX
    Idle = 248,          // RDB_OPCODE_IDLE
    Freq = 249,          // RDB_OPCODE_FREQ
    Aux = 250,           // RDB_OPCODE_AUX
    ResizeDB = 251,      // RDB_OPCODE_RESIZEDB
    ExpireTimeMs = 252,  // RDB_OPCODE_EXPIRETIME_MS
    ExpireTime = 253,    // RDB_OPCODE_EXPIRETIME
    SelectDB = 254,      // RDB_OPCODE_SELECTDB
    Eof = 255,           // RDB_OPCODE_EOF
}

/// Type of RDB, ref: https://github.com/redis/redis/blob/2ba81b70957691a6a010e785225672e6657e53e8/src/rdb.h#L100
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum RDBType {
    String = 0,               // RDB_TYPE_STRING
    List = 1,                 // RDB_TYPE_LIST
    Set = 2,                  // RDB_TYPE_SET
    ZSet = 3,                 // RDB_TYPE_ZSET
    Hash = 4,                 // RDB_TYPE_HASH
    ZSet2 = 5,                // RDB_TYPE_ZSET_2
    ModulePreGA = 6,          // RDB_TYPE_MODULE_PRE_GA
    Module2 = 7,              // RDB_TYPE_MODULE_2
    HashZipMap = 9,           // RDB_TYPE_HASH_ZIPMAP
    ListZipList = 10,         // RDB_TYPE_LIST_ZIPLIST
    SetIntSet = 11,           // RDB_TYPE_SET_INTSET
    ZSetZipList = 12,         // RDB_TYPE_ZSET_ZIPLIST
    HashZipList = 13,         // RDB_TYPE_HASH_ZIPLIST
    ListQuickList = 14,       // RDB_TYPE_LIST_QUICKLIST
    StreamListPacks = 15,     // RDB_TYPE_STREAM_LISTPACKS
    HashListPack = 16,        // RDB_TYPE_HASH_LISTPACK
    ZSetListPack = 17,        // RDB_TYPE_ZSET_LISTPACK
    ListQuickList2 = 18,      // RDB_TYPE_LIST_QUICKLIST_2
    StreamListPacks2 = 19,    // RDB_TYPE_STREAM_LISTPACKS_2
    SetListPack = 20,         // RDB_TYPE_SET_LISTPACK
    StreamListPacks3 = 21,    // RDB_TYPE_STREAM_LISTPACKS_3
    HashMetadataPreGA = 22,   // RDB_TYPE_HASH_METADATA_PRE_GA
    HashListPackExPreGA = 23, // RDB_TYPE_HASH_LISTPACK_EX_PRE_GA
    HashMetadata = 24,        // RDB_TYPE_HASH_METADATA
    HashListPackEx = 25,      // RDB_TYPE_HASH_LISTPACK_EX
}

impl RDBType {
    /// The logical type this on-disk encoding belongs to.
    pub fn record_type(self) -> RecordType {
        match self {
            RDBType::String => RecordType::String,
            RDBType::List
            | RDBType::ListZipList
            | RDBType::ListQuickList
            | RDBType::ListQuickList2 => RecordType::List,
            RDBType::Set | RDBType::SetIntSet | RDBType::SetListPack => RecordType::Set,
            RDBType::ZSet | RDBType::ZSet2 | RDBType::ZSetZipList | RDBType::ZSetListPack => {
                RecordType::ZSet
            }
            RDBType::Hash
            | RDBType::HashZipMap
            | RDBType::HashZipList
            | RDBType::HashListPack
            | RDBType::HashMetadataPreGA
            | RDBType::HashListPackExPreGA
            | RDBType::HashMetadata
            | RDBType::HashListPackEx => RecordType::Hash,
            RDBType::StreamListPacks | RDBType::StreamListPacks2 | RDBType::StreamListPacks3 => {
                RecordType::Stream
            }
            RDBType::ModulePreGA | RDBType::Module2 => RecordType::Module,
        }
    }

    /// Oldest RDB version that knows this type.
    pub fn min_version(self) -> u16 {
        match self {
            RDBType::String
            | RDBType::List
            | RDBType::Set
            | RDBType::ZSet
            | RDBType::Hash
            | RDBType::HashZipMap
            | RDBType::ListZipList
            | RDBType::SetIntSet
            | RDBType::ZSetZipList
            | RDBType::HashZipList => 6,
            RDBType::ListQuickList => 7,
            RDBType::ZSet2 | RDBType::ModulePreGA | RDBType::Module2 => 8,
            RDBType::StreamListPacks => 9,
            RDBType::HashListPack
            | RDBType::ZSetListPack
            | RDBType::ListQuickList2
            | RDBType::StreamListPacks2 => 10,
            RDBType::SetListPack | RDBType::StreamListPacks3 => 11,
            RDBType::HashMetadataPreGA
            | RDBType::HashListPackExPreGA
            | RDBType::HashMetadata
            | RDBType::HashListPackEx => 12,
        }
    }

    /// Name of the in-memory encoding, as `OBJECT ENCODING` would report it.
    pub fn encoding_name(self) -> &'static str {
        match self {
            RDBType::String => "string",
            RDBType::List => "linkedlist",
            RDBType::Set | RDBType::Hash | RDBType::HashMetadataPreGA | RDBType::HashMetadata => {
                "hashtable"
            }
            RDBType::ZSet | RDBType::ZSet2 => "skiplist",
            RDBType::ModulePreGA | RDBType::Module2 => "module",
            RDBType::HashZipMap => "zipmap",
            RDBType::ListZipList | RDBType::ZSetZipList | RDBType::HashZipList => "ziplist",
            RDBType::SetIntSet => "intset",
            RDBType::ListQuickList | RDBType::ListQuickList2 => "quicklist",
            RDBType::StreamListPacks | RDBType::StreamListPacks2 | RDBType::StreamListPacks3 => {
                "stream"
            }
            RDBType::HashListPack | RDBType::ZSetListPack | RDBType::SetListPack => "listpack",
            RDBType::HashListPackExPreGA | RDBType::HashListPackEx => "listpackex",
        }
    }
}

/// Module serialized values sub opcodes, ref: https://github.com/redis/redis/blob/2ba81b70957691a6a010e785225672e6657e53e8/src/rdb.h#L133
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RDBModuleOpcode {
    Eof = 0,    // RDB_MODULE_OPCODE_EOF
    SInt = 1,   // RDB_MODULE_OPCODE_SINT
    UInt = 2,   // RDB_MODULE_OPCODE_UINT
    Float = 3,  // RDB_MODULE_OPCODE_FLOAT
    Double = 4, // RDB_MODULE_OPCODE_DOUBLE
    String = 5, // RDB_MODULE_OPCODE_STRING
}

/// Redis data type variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    String,
    List,
    Set,
    #[serde(rename = "zset")]
    ZSet,
    Hash,
    Stream,
    Module,
}

impl_serde_str_conversion!(RecordType);

#[derive(Debug, Clone, PartialEq)]
pub struct ZSetMember {
    pub member: RDBStr,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashField {
    pub field: RDBStr,
    pub value: RDBStr,
    /// Per-field expiration (hash field TTL, Redis 7.4+).
    pub expire_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub fn from_be_bytes(raw: [u8; 16]) -> Self {
        let (ms, seq) = raw.split_at(8);
        Self {
            ms: u64::from_be_bytes(ms.try_into().unwrap_or_default()),
            seq: u64::from_be_bytes(seq.try_into().unwrap_or_default()),
        }
    }

    pub fn to_be_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.ms.to_be_bytes());
        out[8..].copy_from_slice(&self.seq.to_be_bytes());
        out
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub deleted: bool,
    pub fields: Vec<(RDBStr, RDBStr)>,
}

/// One radix-tree node: master id plus its listpack, kept verbatim so the
/// stream can be written back in another stream format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNode {
    pub master_id: StreamId,
    pub listpack: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: StreamId,
    pub delivery_time_ms: u64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConsumer {
    pub name: Bytes,
    pub seen_time_ms: u64,
    /// Present from the v3 stream format on.
    pub active_time_ms: Option<u64>,
    pub pending: Vec<StreamId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroup {
    pub name: Bytes,
    pub last_id: StreamId,
    /// Present from the v2 stream format on.
    pub entries_read: Option<u64>,
    pub pending: Vec<PendingEntry>,
    pub consumers: Vec<StreamConsumer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamValue {
    pub nodes: Vec<StreamNode>,
    pub entries: Vec<StreamEntry>,
    pub length: u64,
    pub last_id: StreamId,
    /// v2+ metadata: first id, max deleted id, entries added.
    pub first_id: Option<StreamId>,
    pub max_deleted_id: Option<StreamId>,
    pub entries_added: Option<u64>,
    pub groups: Vec<ConsumerGroup>,
}

/// A fully decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum RdbValue {
    String(RDBStr),
    List(Vec<RDBStr>),
    Set(Vec<RDBStr>),
    ZSet(Vec<ZSetMember>),
    Hash(Vec<HashField>),
    Stream(Box<StreamValue>),
    Module(ModuleValue),
}

impl RdbValue {
    pub fn record_type(&self) -> RecordType {
        match self {
            RdbValue::String(_) => RecordType::String,
            RdbValue::List(_) => RecordType::List,
            RdbValue::Set(_) => RecordType::Set,
            RdbValue::ZSet(_) => RecordType::ZSet,
            RdbValue::Hash(_) => RecordType::Hash,
            RdbValue::Stream(_) => RecordType::Stream,
            RdbValue::Module(_) => RecordType::Module,
        }
    }

    /// Elements for lists/sets, members for zsets, field/value pairs for
    /// hashes, live entries for streams, 1 for strings and modules.
    pub fn member_count(&self) -> u64 {
        match self {
            RdbValue::String(_) | RdbValue::Module(_) => 1,
            RdbValue::List(items) | RdbValue::Set(items) => items.len() as u64,
            RdbValue::ZSet(members) => members.len() as u64,
            RdbValue::Hash(fields) => fields.len() as u64,
            RdbValue::Stream(stream) => stream.length,
        }
    }

    /// Byte length of the largest element.
    pub fn max_member_len(&self) -> u64 {
        let max = match self {
            RdbValue::String(s) => s.len(),
            RdbValue::List(items) | RdbValue::Set(items) => {
                items.iter().map(RDBStr::len).max().unwrap_or(0)
            }
            RdbValue::ZSet(members) => members.iter().map(|m| m.member.len()).max().unwrap_or(0),
            RdbValue::Hash(fields) => fields
                .iter()
                .map(|f| f.field.len().max(f.value.len()))
                .max()
                .unwrap_or(0),
            RdbValue::Stream(stream) => stream
                .entries
                .iter()
                .flat_map(|e| e.fields.iter())
                .map(|(f, v)| f.len().max(v.len()))
                .max()
                .unwrap_or(0),
            RdbValue::Module(_) => 0,
        };
        max as u64
    }
}

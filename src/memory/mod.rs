//! Estimated in-memory footprint of a key, following Redis's own object and
//! container layouts on a 64-bit build.

pub mod allocator;

use std::{cmp::Reverse, collections::BinaryHeap};

use bytes::Bytes;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;

use crate::{
    memory::allocator::{malloc_size, next_power},
    parser::{
        core::raw::RDBStr,
        model::{RDBType, RdbValue, RecordType, StreamValue},
    },
    record::RdbEntry,
};

const POINTER: u64 = 8;
const LONG: u64 = 8;
/// `OBJ_SHARED_INTEGERS`: integers below this share one preallocated object.
const SHARED_INTEGERS: i64 = 10000;
const ZSKIPLIST_MAXLEVEL: u32 = 32;
const ZSKIPLIST_P: f64 = 0.25;

/// One row of the memory report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRecord {
    pub db: u64,
    pub record_type: RecordType,
    pub key: Bytes,
    pub size_in_bytes: u64,
    pub encoding: &'static str,
    pub num_elements: u64,
    pub len_largest_element: u64,
    pub expire_at_ms: Option<u64>,
}

impl Ord for MemoryRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.size_in_bytes
            .cmp(&other.size_in_bytes)
            .then_with(|| self.db.cmp(&other.db))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for MemoryRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct MemoryEstimator {
    rng: StdRng,
}

impl MemoryEstimator {
    /// A fixed `seed` makes skiplist level draws, and so zset sizes, repeatable.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn estimate(&mut self, entry: &RdbEntry) -> MemoryRecord {
        let expire_at_ms = entry.expiry.expire_at_ms();
        let size = self.top_level_overhead(&entry.key, expire_at_ms.is_some())
            + self.value_size(entry);
        MemoryRecord {
            db: entry.db,
            record_type: entry.record_type(),
            key: entry.key.clone(),
            size_in_bytes: size,
            encoding: entry.encoding(),
            num_elements: entry.member_count(),
            len_largest_element: entry.max_member_len(),
            expire_at_ms,
        }
    }

    fn value_size(&mut self, entry: &RdbEntry) -> u64 {
        let packed: u64 = entry.stats.blob_lens.iter().sum();
        match (&entry.value, entry.rdb_type) {
            (RdbValue::String(s), _) => sizeof_string(s),
            (RdbValue::List(items), RDBType::List) => {
                linkedlist_overhead()
                    + items
                        .iter()
                        .map(|item| sizeof_string(item) + linkedlist_entry_overhead())
                        .sum::<u64>()
            }
            (RdbValue::List(_), _) => quicklist_overhead(entry.stats.nodes.max(1)) + packed,
            (RdbValue::Set(items), RDBType::Set) => {
                hashtable_overhead(items.len() as u64)
                    + items
                        .iter()
                        .map(|item| sizeof_string(item) + hashtable_entry_overhead())
                        .sum::<u64>()
            }
            (RdbValue::ZSet(members), RDBType::ZSet | RDBType::ZSet2) => {
                let mut size = skiplist_overhead(members.len() as u64);
                for member in members {
                    size += sizeof_string(&member.member) + 8 + self.skiplist_entry_overhead();
                }
                size
            }
            (
                RdbValue::Hash(fields),
                RDBType::Hash | RDBType::HashMetadataPreGA | RDBType::HashMetadata,
            ) => {
                hashtable_overhead(fields.len() as u64)
                    + fields
                        .iter()
                        .map(|f| {
                            let ttl = if f.expire_at_ms.is_some() { 8 } else { 0 };
                            sizeof_string(&f.field)
                                + sizeof_string(&f.value)
                                + hashtable_entry_overhead()
                                + ttl
                        })
                        .sum::<u64>()
            }
            (RdbValue::Stream(stream), _) => stream_size(stream, entry.stats.nodes) + packed,
            // opaque to us: charge what it took on disk
            (RdbValue::Module(_), _) => entry.rdb_size,
            // ziplist, listpack, intset and zipmap encodings live in one blob
            _ => packed,
        }
    }

    /// Key slot in the main dict, the key sds, the value `robj` and, with a
    /// TTL, the slot in the expires dict.
    fn top_level_overhead(&self, key: &[u8], has_expiry: bool) -> u64 {
        let expiry = if has_expiry {
            hashtable_entry_overhead() + 8
        } else {
            0
        };
        hashtable_entry_overhead() + sds_size(key.len() as u64) + robj_overhead() + expiry
    }

    fn skiplist_entry_overhead(&mut self) -> u64 {
        hashtable_entry_overhead()
            + 2 * POINTER
            + 8
            + (POINTER + 8) * self.zset_random_level() as u64
    }

    /// `zslRandomLevel`: each extra level with probability 1/4.
    fn zset_random_level(&mut self) -> u32 {
        let threshold = (ZSKIPLIST_P * 0xFFFF as f64) as u32;
        let mut level = 1;
        while level < ZSKIPLIST_MAXLEVEL && self.rng.gen_range(0..=0xFFFFu32) < threshold {
            level += 1;
        }
        level
    }
}

fn sizeof_string(s: &RDBStr) -> u64 {
    match s.as_int() {
        Some(i) if (0..SHARED_INTEGERS).contains(&i) => 0,
        // stored inside the robj pointer
        Some(_) => 8,
        None => sds_size(s.len() as u64),
    }
}

/// sdshdr8/16/32/64 header, payload and trailing NUL.
fn sds_size(len: u64) -> u64 {
    let header = match len {
        l if l < 1 << 5 => 1,
        l if l < 1 << 8 => 2,
        l if l < 1 << 16 => 4,
        l if l < 1 << 32 => 8,
        _ => 16,
    };
    malloc_size(len + 1 + header)
}

fn robj_overhead() -> u64 {
    POINTER + 8
}

fn hashtable_entry_overhead() -> u64 {
    2 * POINTER + 8
}

/// dict header plus both bucket tables, counting the second one as half
/// allocated since loading may trigger a rehash.
fn hashtable_overhead(size: u64) -> u64 {
    let buckets = next_power(size).saturating_mul(POINTER);
    4 + 7 * LONG + 4 * POINTER + buckets.saturating_add(buckets / 2)
}

fn linkedlist_overhead() -> u64 {
    LONG + 5 * POINTER
}

fn linkedlist_entry_overhead() -> u64 {
    3 * POINTER
}

fn quicklist_overhead(nodes: u64) -> u64 {
    let quicklist = 2 * POINTER + LONG + 2 * 4;
    let node = 4 * POINTER + LONG + 2 * 4;
    quicklist + nodes * node
}

fn skiplist_overhead(size: u64) -> u64 {
    2 * POINTER + hashtable_overhead(size) + (2 * POINTER + 16)
}

/// Radix tree with 16 byte stream ids as keys.
fn rax_size(elements: u64) -> u64 {
    let nodes = elements * 5 / 2;
    16 * elements + nodes * (4 + POINTER + 16)
}

fn stream_size(stream: &StreamValue, nodes: u64) -> u64 {
    let header = 2 * POINTER + 8 + 16;
    let rax = POINTER + 2 * 8;
    let groups: u64 = stream
        .groups
        .iter()
        .map(|group| {
            let nacks = group.pending.len() as u64 * malloc_size(2 * 8 + POINTER);
            let consumers: u64 = group
                .consumers
                .iter()
                .map(|c| {
                    malloc_size(2 * 8 + 2 * POINTER)
                        + sds_size(c.name.len() as u64)
                        + rax_size(c.pending.len() as u64)
                })
                .sum();
            malloc_size(16 + 2 * POINTER + 8)
                + sds_size(group.name.len() as u64)
                + rax_size(group.pending.len() as u64)
                + nacks
                + consumers
        })
        .sum();
    header + rax + rax_size(nodes) + groups
}

/// Keeps the `k` largest items seen.
pub struct TopK<T: Ord> {
    k: usize,
    heap: BinaryHeap<Reverse<T>>,
}

impl<T: Ord> TopK<T> {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(1 << 16)),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(item));
            return;
        }
        let replaces = matches!(self.heap.peek(), Some(Reverse(smallest)) if item > *smallest);
        if replaces {
            self.heap.pop();
            self.heap.push(Reverse(item));
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Largest first.
    pub fn into_sorted_vec(self) -> Vec<T> {
        self.heap.into_sorted_vec().into_iter().map(|Reverse(x)| x).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::{
            model::{HashField, ZSetMember},
            value::ValueStats,
        },
        record::Expiry,
    };

    fn entry(rdb_type: RDBType, value: RdbValue, stats: ValueStats) -> RdbEntry {
        RdbEntry {
            db: 0,
            rdb_type,
            key: Bytes::from_static(b"key"),
            value,
            stats,
            expiry: Expiry::None,
            idle_seconds: None,
            freq: None,
            rdb_size: 0,
            capture: None,
        }
    }

    fn hash(n: usize) -> RdbValue {
        RdbValue::Hash(
            (0..n)
                .map(|i| HashField {
                    field: RDBStr::from(format!("field-{i}").as_str()),
                    value: RDBStr::from(format!("value-{i}").as_str()),
                    expire_at_ms: None,
                })
                .collect(),
        )
    }

    #[test]
    fn shared_integers_are_free() {
        assert_eq!(sizeof_string(&RDBStr::Int(42)), 0);
        assert_eq!(sizeof_string(&RDBStr::from("9999")), 0);
        assert_eq!(sizeof_string(&RDBStr::Int(10000)), 8);
        assert_eq!(sizeof_string(&RDBStr::from("abc")), 8);
    }

    #[test]
    fn sds_header_grows_with_length() {
        assert_eq!(sds_size(31), 40);
        assert_eq!(sds_size(32), 40);
        assert_eq!(sds_size(300), 320);
    }

    #[test]
    fn larger_hash_costs_more() {
        let mut estimator = MemoryEstimator::new(Some(7));
        for n in 0..200 {
            let small = estimator.estimate(&entry(RDBType::Hash, hash(n), ValueStats::default()));
            let large =
                estimator.estimate(&entry(RDBType::Hash, hash(n + 1), ValueStats::default()));
            assert!(
                large.size_in_bytes > small.size_in_bytes,
                "{} fields: {} vs {}",
                n,
                small.size_in_bytes,
                large.size_in_bytes
            );
        }
    }

    #[test]
    fn packed_hash_is_charged_by_blob() {
        let mut estimator = MemoryEstimator::new(Some(7));
        let small = estimator.estimate(&entry(RDBType::HashZipList, hash(2), ValueStats {
            blob_lens: vec![40],
            nodes: 0,
        }));
        let large = estimator.estimate(&entry(RDBType::HashZipList, hash(3), ValueStats {
            blob_lens: vec![52],
            nodes: 0,
        }));
        assert_eq!(large.size_in_bytes - small.size_in_bytes, 12);
        assert_eq!(small.num_elements, 2);
        assert_eq!(small.encoding, "ziplist");
    }

    #[test]
    fn expiry_adds_overhead() {
        let mut estimator = MemoryEstimator::new(Some(1));
        let plain = entry(RDBType::String, RdbValue::String("v".into()), ValueStats::default());
        let mut expiring = entry(RDBType::String, RdbValue::String("v".into()), ValueStats::default());
        expiring.expiry = Expiry::Milliseconds(1);
        let a = estimator.estimate(&plain);
        let b = estimator.estimate(&expiring);
        assert_eq!(b.size_in_bytes - a.size_in_bytes, hashtable_entry_overhead() + 8);
        assert_eq!(b.expire_at_ms, Some(1));
    }

    #[test]
    fn seeded_zset_estimate_is_repeatable() {
        let members: Vec<_> = (0..64)
            .map(|i| ZSetMember {
                member: RDBStr::from(format!("m{i}").as_str()),
                score: i as f64,
            })
            .collect();
        let zset = entry(RDBType::ZSet2, RdbValue::ZSet(members), ValueStats::default());
        let a = MemoryEstimator::new(Some(99)).estimate(&zset);
        let b = MemoryEstimator::new(Some(99)).estimate(&zset);
        assert_eq!(a.size_in_bytes, b.size_in_bytes);
    }

    #[test]
    fn random_level_is_bounded() {
        let mut estimator = MemoryEstimator::new(Some(3));
        for _ in 0..10_000 {
            let level = estimator.zset_random_level();
            assert!((1..=ZSKIPLIST_MAXLEVEL).contains(&level));
        }
    }

    #[test]
    fn top_k_keeps_largest() {
        let mut top = TopK::new(3);
        for x in [5, 1, 9, 3, 7, 2, 8] {
            top.push(x);
        }
        assert_eq!(top.len(), 3);
        assert_eq!(top.into_sorted_vec(), vec![9, 8, 7]);

        let mut none = TopK::new(0);
        none.push(1);
        assert!(none.is_empty());
    }
}

//! Stream node listpacks, ref: https://github.com/redis/redis/blob/7.0.0/src/t_stream.c
//!
//! Layout of one node's listpack:
//!
//! ```text
//! count | deleted | num-master-fields | master-field... | 0
//! (flags | ms-diff | seq-diff | [num-fields field value... | value...] | lp-count)*
//! ```

use anyhow::{Context, anyhow, ensure};
use bytes::Bytes;

use crate::{
    helper::{AnyResult, wrapping_to_usize},
    parser::{
        container::listpack,
        core::raw::RDBStr,
        model::{StreamEntry, StreamId},
    },
};

const FLAG_DELETED: i64 = 1;
const FLAG_SAMEFIELDS: i64 = 2;

struct Cursor<I: ExactSizeIterator<Item = RDBStr>> {
    inner: I,
}

impl<I: ExactSizeIterator<Item = RDBStr>> Cursor<I> {
    /// Upper bound for vectors sized from counts read out of the node.
    fn remaining(&self) -> usize {
        self.inner.len()
    }

    fn next_str(&mut self, what: &str) -> AnyResult<RDBStr> {
        self.inner
            .next()
            .ok_or_else(|| anyhow!("stream listpack ended before {}", what))
    }

    fn next_int(&mut self, what: &str) -> AnyResult<i64> {
        let item = self.next_str(what)?;
        item.as_int()
            .ok_or_else(|| anyhow!("stream listpack {} should be an integer, got {}", what, item))
    }

    fn next_count(&mut self, what: &str) -> AnyResult<u64> {
        let value = self.next_int(what)?;
        u64::try_from(value).with_context(|| format!("negative {}: {}", what, value))
    }
}

/// Decode every entry (deleted ones included, flagged) of one node.
pub fn decode_node(master_id: StreamId, blob: &Bytes) -> AnyResult<Vec<StreamEntry>> {
    let items = listpack::decode(blob).context("decode stream node listpack")?;
    let mut cur = Cursor {
        inner: items.into_iter(),
    };

    let count = cur.next_count("count")?;
    let deleted = cur.next_count("deleted count")?;
    let num_master_fields = cur.next_count("master field count")?;
    let mut master_fields =
        Vec::with_capacity(wrapping_to_usize(num_master_fields).min(cur.remaining()));
    for _ in 0..num_master_fields {
        master_fields.push(cur.next_str("master field")?);
    }
    let marker = cur.next_int("master entry terminator")?;
    ensure!(marker == 0, "bad master entry terminator: {}", marker);

    let total = count
        .checked_add(deleted)
        .context("stream node entry count overflows")?;
    // flags, ms delta, seq delta and lp-count at least
    let mut entries = Vec::with_capacity(wrapping_to_usize(total).min(cur.remaining() / 4));
    for _ in 0..total {
        let flags = cur.next_int("entry flags")?;
        let ms_diff = cur.next_int("ms delta")?;
        let seq_diff = cur.next_int("seq delta")?;
        let id = StreamId {
            ms: master_id.ms.wrapping_add(ms_diff as u64),
            seq: master_id.seq.wrapping_add(seq_diff as u64),
        };

        let fields = if flags & FLAG_SAMEFIELDS != 0 {
            let mut fields = Vec::with_capacity(master_fields.len());
            for field in &master_fields {
                fields.push((field.clone(), cur.next_str("entry value")?));
            }
            fields
        } else {
            let num_fields = cur.next_count("entry field count")?;
            let mut fields =
                Vec::with_capacity(wrapping_to_usize(num_fields).min(cur.remaining() / 2));
            for _ in 0..num_fields {
                let field = cur.next_str("entry field")?;
                let value = cur.next_str("entry value")?;
                fields.push((field, value));
            }
            fields
        };
        // lp-count: number of listpack elements the entry used, for reverse walks
        cur.next_int("entry lp-count")?;

        entries.push(StreamEntry {
            id,
            deleted: flags & FLAG_DELETED != 0,
            fields,
        });
    }
    ensure!(
        cur.inner.next().is_none(),
        "stream node has elements past its last entry"
    );
    Ok(entries)
}

/// Build a node listpack from live entries, sharing the first entry's
/// fields as master fields.
pub fn encode_node(entries: &[StreamEntry]) -> AnyResult<(StreamId, Vec<u8>)> {
    let first = entries
        .first()
        .ok_or_else(|| anyhow!("stream node needs at least one entry"))?;
    let master_id = first.id;
    let master_fields: Vec<RDBStr> = first.fields.iter().map(|(f, _)| f.clone()).collect();

    let mut items = vec![
        RDBStr::Int(entries.len() as i64),
        RDBStr::Int(0),
        RDBStr::Int(master_fields.len() as i64),
    ];
    items.extend(master_fields.iter().cloned());
    items.push(RDBStr::Int(0));

    for entry in entries {
        let same = entry.fields.len() == master_fields.len()
            && entry
                .fields
                .iter()
                .zip(&master_fields)
                .all(|((f, _), m)| f == m);
        let start = items.len();
        items.push(RDBStr::Int(if same { FLAG_SAMEFIELDS } else { 0 }));
        items.push(RDBStr::Int(entry.id.ms.wrapping_sub(master_id.ms) as i64));
        items.push(RDBStr::Int(entry.id.seq.wrapping_sub(master_id.seq) as i64));
        if same {
            items.extend(entry.fields.iter().map(|(_, v)| v.clone()));
        } else {
            items.push(RDBStr::Int(entry.fields.len() as i64));
            for (f, v) in &entry.fields {
                items.push(f.clone());
                items.push(v.clone());
            }
        }
        let used = items.len() - start;
        items.push(RDBStr::Int(used as i64));
    }
    Ok((master_id, listpack::encode(&items)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ms: u64, seq: u64, fields: &[(&str, &str)]) -> StreamEntry {
        StreamEntry {
            id: StreamId { ms, seq },
            deleted: false,
            fields: fields
                .iter()
                .map(|(f, v)| (RDBStr::from(*f), RDBStr::from(*v)))
                .collect(),
        }
    }

    #[test]
    fn samefields_and_explicit_entries() -> AnyResult<()> {
        let entries = vec![
            entry(1000, 0, &[("name", "a"), ("age", "x")]),
            entry(1000, 1, &[("name", "b"), ("age", "y")]),
            entry(1005, 0, &[("other", "z")]),
        ];
        let (master_id, blob) = encode_node(&entries)?;
        assert_eq!(master_id, StreamId { ms: 1000, seq: 0 });
        let decoded = decode_node(master_id, &Bytes::from(blob))?;
        assert_eq!(decoded, entries);
        Ok(())
    }

    #[test]
    fn deleted_flag_is_kept() -> AnyResult<()> {
        // count=0 deleted=1, one master field, one deleted samefields entry
        let items = vec![
            RDBStr::Int(0),
            RDBStr::Int(1),
            RDBStr::Int(1),
            RDBStr::from("f"),
            RDBStr::Int(0),
            RDBStr::Int(FLAG_DELETED | FLAG_SAMEFIELDS),
            RDBStr::Int(0),
            RDBStr::Int(3),
            RDBStr::from("v"),
            RDBStr::Int(4),
        ];
        let blob = Bytes::from(listpack::encode(&items));
        let decoded = decode_node(StreamId { ms: 7, seq: 1 }, &blob)?;
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].deleted);
        assert_eq!(decoded[0].id, StreamId { ms: 7, seq: 4 });
        Ok(())
    }

    #[test]
    fn truncated_entry_is_error() {
        let items = vec![
            RDBStr::Int(1),
            RDBStr::Int(0),
            RDBStr::Int(0),
            RDBStr::Int(0),
            RDBStr::Int(0),
        ];
        let blob = Bytes::from(listpack::encode(&items));
        assert!(decode_node(StreamId::default(), &blob).is_err());
    }

    #[rstest::rstest]
    #[case::master_fields(&[RDBStr::Int(1), RDBStr::Int(0), RDBStr::Int(i64::MAX)])]
    #[case::entry_total(&[RDBStr::Int(i64::MAX), RDBStr::Int(i64::MAX), RDBStr::Int(0), RDBStr::Int(0)])]
    #[case::entry_fields(&[
        RDBStr::Int(1),
        RDBStr::Int(0),
        RDBStr::Int(0),
        RDBStr::Int(0),
        RDBStr::Int(0),
        RDBStr::Int(0),
        RDBStr::Int(0),
        RDBStr::Int(i64::MAX),
    ])]
    fn huge_counts_are_errors(#[case] items: &[RDBStr]) {
        let blob = Bytes::from(listpack::encode(items));
        assert!(decode_node(StreamId::default(), &blob).is_err());
    }
}

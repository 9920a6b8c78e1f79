use std::io::Cursor;

use rdbexport::{
    helper::AnyResult,
    memory::MemoryEstimator,
    parser::{container::listpack, core::raw::RDBStr, model::RDBType},
    record::{EntryReader, RdbEntry, ReaderOptions},
};

mod common;

use common::RdbBuilder;

fn decode_all(data: Vec<u8>) -> AnyResult<Vec<RdbEntry>> {
    EntryReader::new(Cursor::new(data), ReaderOptions::default()).collect()
}

#[test]
fn each_added_hash_field_grows_the_estimate() -> AnyResult<()> {
    let fields: Vec<(String, String)> = (0..150)
        .map(|i| (format!("field:{i}"), format!("value-{}", "x".repeat(i % 40))))
        .collect();

    let mut builder = RdbBuilder::new(11);
    for n in 0..=fields.len() {
        let pairs: Vec<(&str, &str)> = fields[..n]
            .iter()
            .map(|(f, v)| (f.as_str(), v.as_str()))
            .collect();
        builder = builder.hash(&format!("h{n}"), &pairs);
    }

    let mut estimator = MemoryEstimator::new(Some(1));
    let sizes: Vec<u64> = decode_all(builder.build())?
        .iter()
        .map(|entry| estimator.estimate(entry).size_in_bytes)
        .collect();
    assert_eq!(sizes.len(), fields.len() + 1);
    for pair in sizes.windows(2) {
        assert!(pair[0] < pair[1], "{} >= {}", pair[0], pair[1]);
    }
    Ok(())
}

#[test]
fn packed_and_plain_sets_report_same_shape() -> AnyResult<()> {
    let members: Vec<RDBStr> = ["a", "bb", "ccc"].into_iter().map(RDBStr::from).collect();
    let data = RdbBuilder::new(11)
        .blob(RDBType::SetListPack, "packed", &listpack::encode(&members))
        .raw(RDBType::Set, "plain", &{
            let mut w = rdbexport::dump::RdbWriter::new();
            w.write_len(3);
            for m in &members {
                w.write_rdb_str(m);
            }
            w.freeze().to_vec()
        })
        .build();

    let mut estimator = MemoryEstimator::new(None);
    let entries = decode_all(data)?;
    let packed = estimator.estimate(&entries[0]);
    let plain = estimator.estimate(&entries[1]);

    assert_eq!(packed.encoding, "listpack");
    assert_eq!(plain.encoding, "hashtable");
    assert_eq!(packed.num_elements, 3);
    assert_eq!(plain.num_elements, 3);
    assert_eq!(packed.len_largest_element, 3);
    assert_eq!(plain.len_largest_element, 3);
    assert!(packed.size_in_bytes < plain.size_in_bytes);
    Ok(())
}

#[test]
fn same_seed_gives_same_zset_estimate() -> AnyResult<()> {
    let mut w = rdbexport::dump::RdbWriter::new();
    w.write_len(64);
    for i in 0..64 {
        w.write_str(format!("member-{i}").as_bytes());
        w.write_le_f64(i as f64);
    }
    let data = RdbBuilder::new(11).raw(RDBType::ZSet2, "z", w.as_slice()).build();
    let entries = decode_all(data)?;

    let first = MemoryEstimator::new(Some(42)).estimate(&entries[0]);
    let second = MemoryEstimator::new(Some(42)).estimate(&entries[0]);
    assert_eq!(first.size_in_bytes, second.size_in_bytes);
    assert_eq!(first.encoding, "skiplist");
    Ok(())
}

//! Key inclusion predicate, evaluated once per key before its value is read.

use std::collections::HashSet;

use anyhow::Context;
use bytes::Bytes;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    helper::AnyResult,
    parser::model::{RDBType, RecordType},
};

/// Filter settings as written in configuration. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub dbs: Vec<u64>,
    #[serde(default)]
    pub keys: Vec<String>,
    /// Regular expressions, matched against the whole key.
    #[serde(default)]
    pub key_patterns: Vec<String>,
    #[serde(default)]
    pub types: Vec<RecordType>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    dbs: HashSet<u64>,
    types: HashSet<RecordType>,
    keys: HashSet<Bytes>,
    patterns: Vec<Regex>,
}

impl FilterSpec {
    /// Compile the key patterns; an invalid pattern fails here, before any
    /// input is read.
    pub fn new(config: &FilterConfig) -> AnyResult<Self> {
        let patterns = config
            .key_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{})$", p))
                    .with_context(|| format!("invalid key pattern: {}", p))
            })
            .collect::<AnyResult<Vec<_>>>()?;
        Ok(Self {
            dbs: config.dbs.iter().copied().collect(),
            types: config.types.iter().copied().collect(),
            keys: config
                .keys
                .iter()
                .map(|k| Bytes::copy_from_slice(k.as_bytes()))
                .collect(),
            patterns,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.dbs.is_empty() && self.types.is_empty() && !self.has_key_filter()
    }

    fn has_key_filter(&self) -> bool {
        !self.keys.is_empty() || !self.patterns.is_empty()
    }

    pub fn include_db(&self, db: u64) -> bool {
        self.dbs.is_empty() || self.dbs.contains(&db)
    }

    /// Equivalent on-disk encodings (hash and hash-ziplist, say) share one
    /// logical type.
    pub fn include_type(&self, ty: RDBType) -> bool {
        self.types.is_empty() || self.types.contains(&ty.record_type())
    }

    pub fn include_key(&self, key: &[u8]) -> bool {
        !self.has_key_filter()
            || self.keys.contains(key)
            || self.patterns.iter().any(|p| p.is_match(key))
    }

    pub fn include(&self, db: u64, ty: RDBType, key: &[u8]) -> bool {
        self.include_db(db) && self.include_type(ty) && self.include_key(key)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn spec(dbs: &[u64], types: &[RecordType], keys: &[&str], patterns: &[&str]) -> FilterSpec {
        FilterSpec::new(&FilterConfig {
            dbs: dbs.to_vec(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            key_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            types: types.to_vec(),
        })
        .expect("valid filter")
    }

    #[rstest]
    #[case(1, b"user:42".as_slice(), true)]
    #[case(2, b"user:42".as_slice(), false)]
    #[case(1, b"order:1".as_slice(), false)]
    fn db_and_pattern(#[case] db: u64, #[case] key: &[u8], #[case] expected: bool) {
        let filter = spec(&[1], &[], &[], &["user:.*"]);
        assert_eq!(filter.include(db, RDBType::String, key), expected);
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = FilterSpec::default();
        assert!(filter.is_empty());
        assert!(filter.include(15, RDBType::StreamListPacks3, b"anything"));
    }

    #[test]
    fn pattern_is_full_match() {
        let filter = spec(&[], &[], &[], &["user"]);
        assert!(filter.include_key(b"user"));
        assert!(!filter.include_key(b"user:1"));
        assert!(!filter.include_key(b"my-user"));
    }

    #[test]
    fn exact_keys_union_patterns() {
        let filter = spec(&[], &[], &["exact"], &["p[0-9]+"]);
        assert!(filter.include_key(b"exact"));
        assert!(filter.include_key(b"p12"));
        assert!(!filter.include_key(b"other"));
    }

    #[test]
    fn types_normalize_encodings() {
        let filter = spec(&[], &[RecordType::Hash], &[], &[]);
        assert!(filter.include_type(RDBType::Hash));
        assert!(filter.include_type(RDBType::HashZipList));
        assert!(filter.include_type(RDBType::HashListPackEx));
        assert!(!filter.include_type(RDBType::SetIntSet));
    }

    #[test]
    fn invalid_pattern_fails_early() {
        let err = FilterSpec::new(&FilterConfig {
            key_patterns: vec!["(".to_string()],
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("invalid key pattern"));
    }

    #[test]
    fn composition_is_conjunction() {
        let filter = spec(&[0], &[RecordType::List], &["k"], &[]);
        let dims = [
            (0, RDBType::List, b"k".as_slice()),
            (1, RDBType::List, b"k".as_slice()),
            (0, RDBType::Set, b"k".as_slice()),
            (0, RDBType::List, b"x".as_slice()),
        ];
        for (db, ty, key) in dims {
            assert_eq!(
                filter.include(db, ty, key),
                filter.include_db(db) && filter.include_type(ty) && filter.include_key(key)
            );
        }
        assert!(filter.include(0, RDBType::ListQuickList2, b"k"));
    }
}

//! Label sets and identity fingerprinting.
//!
//! [`Labels`] wraps an ordered map of key/value pairs and provides a
//! stable, order-independent [`fingerprint`](Labels::fingerprint).
//! The fingerprint is the deduplication key for alerts and the input
//! to the cluster hash ring, so it must be identical across nodes for
//! identical label sets.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator written between keys and values when hashing, so that
/// `{"ab": "c"}` and `{"a": "bc"}` hash differently.
const HASH_SEP: &[u8] = &[0xff];

/// A stable 64-bit identity for a label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LabelFingerprint(pub u64);

impl fmt::Display for LabelFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A set of key/value labels identifying an alert.
///
/// Backed by a `BTreeMap` so that iteration order (and therefore the
/// hash input) is deterministic regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    /// Creates an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a label, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the value for a label key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the labels in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a new label set containing only the given keys.
    ///
    /// Keys absent from this set are simply omitted, matching the
    /// behavior expected by shard-label subsetting: an alert without
    /// a shard label still maps somewhere deterministic.
    #[must_use]
    pub fn subset(&self, keys: &[String]) -> Self {
        let mut out = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.0.get(key) {
                out.insert(key.clone(), value.clone());
            }
        }
        Self(out)
    }

    /// Returns true if every label in `other` is present here with the
    /// same value (a partial match; this set may carry extras).
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other
            .iter()
            .all(|(k, v)| self.0.get(k).map(String::as_str) == Some(v))
    }

    /// Serializes the labels into a canonical byte string for hashing.
    #[must_use]
    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (k, v) in &self.0 {
            buf.extend_from_slice(k.as_bytes());
            buf.extend_from_slice(HASH_SEP);
            buf.extend_from_slice(v.as_bytes());
            buf.extend_from_slice(HASH_SEP);
        }
        buf
    }

    /// Computes the stable identity fingerprint of this label set.
    ///
    /// Order-independent: the map is iterated in key order, so two
    /// label sets with the same pairs always produce the same value.
    #[must_use]
    pub fn fingerprint(&self) -> LabelFingerprint {
        let hash = blake3::hash(&self.hash_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        LabelFingerprint(u64::from_le_bytes(bytes))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Labels {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs.into_iter().collect()
    }
}

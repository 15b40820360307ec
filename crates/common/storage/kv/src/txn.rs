// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use tracing::trace;

use crate::{
    Result, codec,
    store::{Store, StoreKey, Versioned},
};

/// A range read by a transaction and the versions it observed.
#[derive(Debug)]
pub(crate) struct ScanRecord<K> {
    bounds: (Bound<K>, Bound<K>),
    seen:   Vec<(K, u64)>,
}

impl<K: Ord> ScanRecord<K> {
    /// Whether the range still holds exactly the keys and versions observed.
    pub(crate) fn matches(&self, data: &BTreeMap<K, Versioned>) -> bool {
        data.range((self.bounds.0.as_ref(), self.bounds.1.as_ref()))
            .map(|(k, v)| (k, v.version))
            .eq(self.seen.iter().map(|(k, version)| (k, *version)))
    }

    pub(crate) const fn bounds(&self) -> &(Bound<K>, Bound<K>) { &self.bounds }
}

/// An optimistic transaction over a [`Store`].
///
/// Reads see the committed state plus this transaction's own writes.
/// Writes are buffered until [`commit`](Self::commit), which fails with
/// [`StoreError::Conflict`](crate::StoreError::Conflict) when anything read
/// has changed meanwhile. Dropping a transaction without committing rolls it
/// back.
pub struct Transaction<'a, K: StoreKey> {
    store:  &'a Store<K>,
    reads:  BTreeMap<K, u64>,
    scans:  Vec<ScanRecord<K>>,
    writes: BTreeMap<K, Option<Bytes>>,
}

impl<'a, K: StoreKey> Transaction<'a, K> {
    pub(crate) const fn new(store: &'a Store<K>) -> Self {
        Self {
            store,
            reads: BTreeMap::new(),
            scans: Vec::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<Bytes> {
        if let Some(pending) = self.writes.get(key) {
            return pending.clone();
        }
        let (value, version) = self.store.read(key);
        self.reads.entry(key.clone()).or_insert(version);
        value
    }

    /// Read and decode the value at `key`.
    pub fn get_as<T: DeserializeOwned>(&mut self, key: &K) -> Result<Option<T>> {
        self.get(key).map(|bytes| codec::decode(&bytes)).transpose()
    }

    pub fn contains_key(&mut self, key: &K) -> bool { self.get(key).is_some() }

    pub fn put(&mut self, key: K, value: impl Into<Bytes>) {
        self.writes.insert(key, Some(value.into()));
    }

    /// Encode `value` and write it at `key`.
    pub fn put_as<T: Serialize + ?Sized>(&mut self, key: K, value: &T) -> Result<()> {
        let bytes = codec::encode(value)?;
        self.put(key, bytes);
        Ok(())
    }

    pub fn delete(&mut self, key: K) { self.writes.insert(key, None); }

    /// Entries inside `range`, in key order.
    ///
    /// The whole range joins the read set: a commit fails if any key in it
    /// is inserted, removed or rewritten by another transaction.
    ///
    /// # Panics
    ///
    /// Panics on an inverted range, like [`BTreeMap::range`].
    pub fn scan<R: RangeBounds<K>>(&mut self, range: R) -> Vec<(K, Bytes)> {
        let bounds = (range.start_bound().cloned(), range.end_bound().cloned());
        let committed = self.store.scan(&bounds);

        let mut seen = Vec::with_capacity(committed.len());
        let mut merged = BTreeMap::new();
        for (key, value, version) in committed {
            seen.push((key.clone(), version));
            merged.insert(key, value);
        }
        for (key, pending) in self.writes.range((bounds.0.as_ref(), bounds.1.as_ref())) {
            match pending {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }

        self.scans.push(ScanRecord { bounds, seen });
        merged.into_iter().collect()
    }

    /// Like [`scan`](Self::scan), decoding every value.
    pub fn scan_as<T: DeserializeOwned, R: RangeBounds<K>>(&mut self, range: R) -> Result<Vec<(K, T)>> {
        self.scan(range)
            .into_iter()
            .map(|(key, bytes)| codec::decode(&bytes).map(|value| (key, value)))
            .collect()
    }

    /// Fail with [`StoreError::Conflict`](crate::StoreError::Conflict) if
    /// anything read so far has changed. Lets a caller tell a concurrent
    /// update apart from an inconsistency in the data it read.
    pub fn validate(&self) -> Result<()> { self.store.validate(&self.reads, &self.scans) }

    /// Whether the transaction has buffered no writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool { self.writes.is_empty() }

    /// Validate and make the writes durable. Returns the transaction id the
    /// writes committed as.
    pub fn commit(self) -> Result<u64> {
        let Self {
            store,
            reads,
            scans,
            writes,
        } = self;
        store.commit(reads, scans, writes)
    }

    /// Discard all buffered writes.
    pub fn rollback(self) {
        trace!(writes = self.writes.len(), "Transaction rolled back");
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{StoreConfig, StoreError};

    fn open(dir: &TempDir) -> Store<u64> {
        Store::open(StoreConfig::builder().path(dir.path()).build()).unwrap()
    }

    fn seed(store: &Store<u64>, keys: &[u64]) {
        let mut tx = store.begin().unwrap();
        for key in keys {
            tx.put_as(*key, &format!("value-{key}")).unwrap();
        }
        tx.commit().unwrap();
    }

    #[test]
    fn test_reads_see_own_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);
        seed(&store, &[1, 2]);

        let mut tx = store.begin().unwrap();
        tx.put_as(3, "fresh").unwrap();
        tx.delete(1);

        assert_eq!(tx.get_as::<String>(&3).unwrap().as_deref(), Some("fresh"));
        assert!(!tx.contains_key(&1));
        assert!(tx.contains_key(&2));
        assert_eq!(tx.scan(..).into_iter().map(|(k, _)| k).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_rollback_discards_writes() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);

        let mut tx = store.begin().unwrap();
        tx.put(1, Bytes::from("one"));
        assert!(!tx.is_read_only());
        tx.rollback();

        let mut tx = store.begin().unwrap();
        tx.put(2, Bytes::from("two"));
        drop(tx);

        assert!(store.is_empty());
        assert_eq!(store.last_txid(), 0);
    }

    #[test]
    fn test_read_only_commit_keeps_txid() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);
        seed(&store, &[1]);

        let mut tx = store.begin().unwrap();
        assert!(tx.get(&1).is_some());
        assert!(tx.is_read_only());
        assert_eq!(tx.commit().unwrap(), 1);
        assert_eq!(store.last_txid(), 1);
    }

    #[test]
    fn test_stale_read_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);
        seed(&store, &[1]);

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        assert!(first.get(&1).is_some());
        assert!(second.get(&1).is_some());
        first.put(1, Bytes::from("first"));
        second.put(1, Bytes::from("second"));

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_conflict());

        let mut check = store.begin().unwrap();
        assert_eq!(check.get(&1), Some(Bytes::from("first")));
    }

    #[test]
    fn test_absent_key_read_conflicts_with_insert() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);

        let mut first = store.begin().unwrap();
        assert!(first.get(&9).is_none());
        first.put(9, Bytes::from("first"));

        let mut second = store.begin().unwrap();
        second.put(9, Bytes::from("second"));
        second.commit().unwrap();

        assert!(matches!(first.commit(), Err(StoreError::Conflict)));
    }

    #[test]
    fn test_scan_conflicts_with_insert_into_range() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);
        seed(&store, &[10, 20]);

        let mut reader = store.begin().unwrap();
        assert_eq!(reader.scan(10..30).len(), 2);
        reader.put(99, Bytes::from("summary"));

        seed(&store, &[15]);

        assert!(reader.commit().unwrap_err().is_conflict());
    }

    #[test]
    fn test_scan_ignores_writes_outside_range() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);
        seed(&store, &[10, 20]);

        let mut reader = store.begin().unwrap();
        let values: Vec<(u64, String)> = reader.scan_as(10..=20).unwrap();
        assert_eq!(values, vec![(10, "value-10".to_string()), (20, "value-20".to_string())]);
        reader.put(99, Bytes::from("summary"));

        seed(&store, &[5, 25]);

        assert!(reader.commit().is_ok());
    }

    #[test]
    fn test_validate_detects_concurrent_change() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);
        seed(&store, &[1]);

        let mut tx = store.begin().unwrap();
        assert!(tx.get(&1).is_some());
        tx.validate().unwrap();

        seed(&store, &[1]);
        assert!(tx.validate().unwrap_err().is_conflict());
    }

    #[test]
    fn test_blind_writes_do_not_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir);

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        first.put(1, Bytes::from("first"));
        second.put(1, Bytes::from("second"));

        assert_eq!(first.commit().unwrap(), 1);
        assert_eq!(second.commit().unwrap(), 2);
    }
}

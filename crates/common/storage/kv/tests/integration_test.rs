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

use std::{sync::Arc, thread};

use ackq_common_storage_kv::{FlushMode, Store, StoreConfig};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use test_case::test_case;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
enum Key {
    Counter,
    Entry(u64),
}

fn config(dir: &TempDir, flush_mode: FlushMode) -> StoreConfig {
    StoreConfig::builder()
        .path(dir.path())
        .flush_mode(flush_mode)
        .compact_threshold(512)
        .build()
}

/// Increment the counter and record the value seen, retrying on conflict.
fn increment(store: &Store<Key>) -> u64 {
    loop {
        let mut tx = store.begin().unwrap();
        let next = tx.get_as::<u64>(&Key::Counter).unwrap().unwrap_or(0) + 1;
        tx.put_as(Key::Counter, &next).unwrap();
        tx.put_as(Key::Entry(next), &format!("entry-{next}")).unwrap();
        match tx.commit() {
            Ok(_) => return next,
            Err(e) if e.is_conflict() => {}
            Err(e) => panic!("commit failed: {e}"),
        }
    }
}

#[test_case(FlushMode::Sync ; "sync")]
#[test_case(FlushMode::Async ; "async")]
#[test_case(FlushMode::Batch { bytes: 256 } ; "batch")]
fn test_concurrent_increments_are_serializable(flush_mode: FlushMode) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(config(&temp_dir, flush_mode)).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || (0..25).map(|_| increment(&store)).collect::<Vec<_>>())
        })
        .collect();

    let mut seen: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, (1..=100).collect::<Vec<_>>());

    store.close().unwrap();
    drop(store);

    let store: Store<Key> = Store::open(config(&temp_dir, flush_mode)).unwrap();
    let mut tx = store.begin().unwrap();
    assert_eq!(tx.get_as::<u64>(&Key::Counter).unwrap(), Some(100));
    let entries: Vec<(Key, String)> = tx.scan_as(Key::Entry(0)..).unwrap();
    assert_eq!(entries.len(), 100);
    assert_eq!(entries[41], (Key::Entry(42), "entry-42".to_string()));
}

#[test]
fn test_multi_key_commit_is_atomic_across_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store: Store<Key> = Store::open(config(&temp_dir, FlushMode::Sync)).unwrap();
        let mut tx = store.begin().unwrap();
        tx.put_as(Key::Counter, &2u64).unwrap();
        tx.put_as(Key::Entry(1), "a").unwrap();
        tx.put_as(Key::Entry(2), "b").unwrap();
        tx.commit().unwrap();

        // Never committed.
        let mut tx = store.begin().unwrap();
        tx.put_as(Key::Counter, &3u64).unwrap();
        tx.put_as(Key::Entry(3), "c").unwrap();
    }

    let store: Store<Key> = Store::open(config(&temp_dir, FlushMode::Sync)).unwrap();
    let mut tx = store.begin().unwrap();
    assert_eq!(tx.get_as::<u64>(&Key::Counter).unwrap(), Some(2));
    assert_eq!(tx.scan(Key::Entry(0)..).len(), 2);
    assert_eq!(store.last_txid(), 1);
}

#[test]
fn test_state_survives_many_compactions() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store: Store<Key> = Store::open(config(&temp_dir, FlushMode::Async)).unwrap();
        for _ in 0..200 {
            increment(&store);
        }
        let mut tx = store.begin().unwrap();
        for n in (1..=200).step_by(2) {
            tx.delete(Key::Entry(n));
        }
        tx.commit().unwrap();
    }

    let store: Store<Key> = Store::open(config(&temp_dir, FlushMode::Async)).unwrap();
    assert_eq!(store.last_txid(), 201);
    assert_eq!(store.len(), 101);

    let mut tx = store.begin().unwrap();
    let entries = tx.scan(Key::Entry(0)..);
    assert!(entries.iter().all(|(key, _)| matches!(key, Key::Entry(n) if n % 2 == 0)));
}

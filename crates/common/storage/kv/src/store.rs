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

//! The store: committed state, durability and commit validation.
//!
//! ## Recovery
//!
//! Opening a store:
//! 1. Loads the current snapshot, if any
//! 2. Replays log records newer than the snapshot, stopping at the first
//!    torn or corrupted frame
//! 3. Cuts the log back to its intact prefix and resumes appending there
//!
//! ## Commit
//!
//! Under the write lock a commit re-validates the transaction's read set and
//! scanned ranges against the committed state, appends one log frame, then
//! applies the writes. Nothing is applied when validation or the append
//! fails.

use std::{
    collections::BTreeMap,
    fmt::Debug,
    ops::Bound,
    path::Path,
};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snafu::ensure;
use tracing::{debug, info, trace, warn};

use crate::{
    Result, StoreConfig,
    codec,
    error::{ClosedSnafu, ConflictSnafu, CorruptedSnafu},
    lock::DirLock,
    snapshot::{SnapshotImage, SnapshotWriter},
    txn::{ScanRecord, Transaction},
    wal::{self, WAL_FILE, WalWriter},
};

/// Bounds required of store keys.
///
/// Keys are kept in order, so range scans follow `Ord`.
pub trait StoreKey: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreKey for T where T: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{}

/// A committed value and the id of the transaction that wrote it.
#[derive(Debug, Clone)]
pub(crate) struct Versioned {
    pub value:   Bytes,
    pub version: u64,
}

/// One committed transaction as written to the log. `None` deletes the key.
#[derive(Debug, Serialize, Deserialize)]
struct WalRecord<K: Ord> {
    txid: u64,
    ops:  BTreeMap<K, Option<Bytes>>,
}

struct Inner<K> {
    data:      BTreeMap<K, Versioned>,
    last_txid: u64,
    /// `None` once the store is closed.
    wal:       Option<WalWriter>,
    snapshots: SnapshotWriter,
    /// Held while open; released by `close` or drop.
    lock:      Option<DirLock>,
}

/// A durable ordered map from `K` to byte values.
///
/// The store is shared by reference between threads; each thread works
/// through its own [`Transaction`]s. Version `0` stands for "absent", so
/// transaction ids start at `1`.
pub struct Store<K: StoreKey> {
    config: StoreConfig,
    inner:  RwLock<Inner<K>>,
}

impl<K: StoreKey> Store<K> {
    /// Open the store at `config.path`, creating the directory if needed and
    /// recovering committed state from disk.
    pub fn open(config: StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;
        let lock = DirLock::acquire(&config.path)?;

        let snapshots = SnapshotWriter::new(&config.path)?;
        let (mut data, mut last_txid) = match snapshots.read_latest()? {
            Some(image) => {
                let entries: Vec<(K, Bytes)> = codec::decode(&image.body)?;
                ensure!(
                    entries.len() as u64 == image.entries,
                    CorruptedSnafu {
                        reason: format!(
                            "snapshot holds {} entries, header says {}",
                            entries.len(),
                            image.entries
                        ),
                    }
                );
                let data = entries
                    .into_iter()
                    .map(|(key, value)| {
                        let version = image.last_txid;
                        (key, Versioned { value, version })
                    })
                    .collect();
                (data, image.last_txid)
            }
            None => (BTreeMap::new(), 0),
        };
        let snapshot_txid = last_txid;

        let wal_path = config.path.join(WAL_FILE);
        let scan = wal::scan(&wal_path, config.verify_on_startup)?;
        let mut replayed = 0usize;
        let mut skipped = 0usize;
        for payload in &scan.records {
            let record: WalRecord<K> = codec::decode(payload)?;
            if record.txid <= last_txid {
                skipped += 1;
                continue;
            }
            ensure!(
                record.txid == last_txid + 1,
                CorruptedSnafu {
                    reason: format!(
                        "log jumps from transaction {last_txid} to {}",
                        record.txid
                    ),
                }
            );
            apply(&mut data, record.txid, record.ops);
            last_txid = record.txid;
            replayed += 1;
        }

        if scan.torn {
            warn!(
                path = ?wal_path,
                valid_len = scan.valid_len,
                "Discarding torn tail of the log"
            );
        }
        let wal = WalWriter::open(&wal_path, scan.valid_len, config.flush_mode)?;

        info!(
            path = ?config.path,
            snapshot_txid,
            replayed,
            skipped,
            last_txid,
            keys = data.len(),
            "Store opened"
        );

        Ok(Self {
            config,
            inner: RwLock::new(Inner {
                data,
                last_txid,
                wal: Some(wal),
                snapshots,
                lock: Some(lock),
            }),
        })
    }

    /// Start a transaction.
    pub fn begin(&self) -> Result<Transaction<'_, K>> {
        ensure!(self.inner.read().wal.is_some(), ClosedSnafu);
        Ok(Transaction::new(self))
    }

    /// Sync the log, release the directory lock and refuse further
    /// transactions. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(mut wal) = inner.wal.take() {
            let synced = wal.sync();
            inner.lock = None;
            synced?;
            info!(path = ?self.config.path, last_txid = inner.last_txid, "Store closed");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.read().wal.is_none() }

    /// Fold the committed state into a snapshot and empty the log.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write();
        ensure!(inner.wal.is_some(), ClosedSnafu);
        compact_locked(&mut inner)
    }

    /// Id of the last committed transaction.
    #[must_use]
    pub fn last_txid(&self) -> u64 { self.inner.read().last_txid }

    /// Number of keys in the committed state.
    #[must_use]
    pub fn len(&self) -> usize { self.inner.read().data.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    #[must_use]
    pub fn path(&self) -> &Path { &self.config.path }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig { &self.config }

    /// Committed value of `key` and its version (`0` when absent).
    pub(crate) fn read(&self, key: &K) -> (Option<Bytes>, u64) {
        self.inner
            .read()
            .data
            .get(key)
            .map_or((None, 0), |v| (Some(v.value.clone()), v.version))
    }

    /// Committed entries inside `bounds`, in key order.
    pub(crate) fn scan(&self, bounds: &(Bound<K>, Bound<K>)) -> Vec<(K, Bytes, u64)> {
        self.inner
            .read()
            .data
            .range((bounds.0.as_ref(), bounds.1.as_ref()))
            .map(|(k, v)| (k.clone(), v.value.clone(), v.version))
            .collect()
    }

    /// Check that nothing in `reads` or `scans` has changed since it was
    /// observed.
    pub(crate) fn validate(&self, reads: &BTreeMap<K, u64>, scans: &[ScanRecord<K>]) -> Result<()> {
        let inner = self.inner.read();
        ensure!(inner.wal.is_some(), ClosedSnafu);
        validate(&inner.data, reads, scans)
    }

    /// Validate and apply a transaction. Returns the id it committed as, or
    /// the last committed id for a read-only transaction.
    pub(crate) fn commit(
        &self,
        reads: BTreeMap<K, u64>,
        scans: Vec<ScanRecord<K>>,
        writes: BTreeMap<K, Option<Bytes>>,
    ) -> Result<u64> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        ensure!(inner.wal.is_some(), ClosedSnafu);
        validate(&inner.data, &reads, &scans)?;

        if writes.is_empty() {
            return Ok(inner.last_txid);
        }

        let txid = inner.last_txid + 1;
        let record = WalRecord { txid, ops: writes };
        let payload = codec::encode_to_vec(&record)?;

        let Some(wal) = inner.wal.as_mut() else {
            return ClosedSnafu.fail();
        };
        wal.append(&payload)?;
        let log_len = wal.position();

        let ops = record.ops.len();
        apply(&mut inner.data, txid, record.ops);
        inner.last_txid = txid;
        trace!(txid, ops, "Transaction committed");

        if log_len >= self.config.compact_threshold {
            // The commit is durable in the log already; a failed compaction
            // leaves it there for the next attempt.
            if let Err(e) = compact_locked(inner) {
                warn!(error = %e, "Snapshot compaction failed");
            }
        }

        Ok(txid)
    }
}

fn validate<K: StoreKey>(
    data: &BTreeMap<K, Versioned>,
    reads: &BTreeMap<K, u64>,
    scans: &[ScanRecord<K>],
) -> Result<()> {
    for (key, seen) in reads {
        let current = data.get(key).map_or(0, |v| v.version);
        if current != *seen {
            debug!(key = ?key, seen, current, "Read key changed, rejecting commit");
            return ConflictSnafu.fail();
        }
    }
    for scan in scans {
        if !scan.matches(data) {
            debug!(range = ?scan.bounds(), "Scanned range changed, rejecting commit");
            return ConflictSnafu.fail();
        }
    }
    Ok(())
}

fn apply<K: Ord>(data: &mut BTreeMap<K, Versioned>, txid: u64, ops: BTreeMap<K, Option<Bytes>>) {
    for (key, op) in ops {
        match op {
            Some(value) => {
                data.insert(key, Versioned {
                    value,
                    version: txid,
                });
            }
            None => {
                data.remove(&key);
            }
        }
    }
}

fn compact_locked<K: StoreKey>(inner: &mut Inner<K>) -> Result<()> {
    let entries: Vec<(&K, &Bytes)> = inner.data.iter().map(|(k, v)| (k, &v.value)).collect();
    let image = SnapshotImage {
        last_txid: inner.last_txid,
        entries:   entries.len() as u64,
        body:      codec::encode_to_vec(&entries)?,
    };

    inner.snapshots.write(&image)?;
    if let Some(wal) = inner.wal.as_mut() {
        wal.reset()?;
    }

    info!(
        last_txid = image.last_txid,
        entries = image.entries,
        bytes = image.body.len(),
        "Store compacted into snapshot"
    );
    Ok(())
}

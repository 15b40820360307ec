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

//! Connection lifecycle and ownership of the backing store.
//!
//! ```text
//! Closed ──connect──▶ Opening ──recovery──▶ Open(n) ──last close──▶ Closed
//! ```
//!
//! The lifecycle mutex serializes store opening, startup recovery,
//! connection registration and teardown. Queue operations themselves only
//! rely on store transactions.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use ackq_common_storage_kv::Store;
use parking_lot::Mutex;
use snafu::OptionExt;
use tracing::{debug, info, warn};

use crate::{
    QueueBuilder, QueueConfig, Result,
    ack::AckSet,
    connection::Connection,
    error::CorruptedSnafu,
    index::QueueIndex,
    record::{Registry, Slot},
    recovery::{self, RecoveryReport},
    retry::{retry_on_conflict, transact},
    signal::Signal,
};

/// Attempts for lifecycle transactions before giving up on conflicts.
const LIFECYCLE_ATTEMPTS: usize = 64;

/// Point-in-time view of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items waiting in the queue.
    pub queued:      u64,
    /// Items dispatched and not yet acknowledged, over all connections.
    pub pending:     u64,
    /// Connections registered in the store.
    pub connections: u64,
}

pub(crate) struct Shared {
    config:     QueueConfig,
    /// The open store; `None` while closed.
    store:      Mutex<Option<Arc<Store<Slot>>>>,
    /// Only changed while `store` is locked.
    opened:     AtomicU64,
    closed:     AtomicU64,
    /// Outcome of the most recent startup recovery.
    recovery:   Mutex<Option<RecoveryReport>>,
    pub signal: Signal,
}

impl Shared {
    pub const fn capacity(&self) -> Option<u64> { self.config.capacity }

    fn live(&self) -> u64 {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }

    /// Open the store and roll back whatever a previous run left pending.
    fn start(&self) -> Result<Store<Slot>> {
        let store = Store::open(self.config.store.clone())?;

        match retry_on_conflict(LIFECYCLE_ATTEMPTS, || transact(&store, recovery::recover)) {
            Ok(report) => {
                self.opened.store(0, Ordering::SeqCst);
                self.closed.store(0, Ordering::SeqCst);
                *self.recovery.lock() = Some(report);
                info!(
                    path = ?self.config.store.path,
                    recovered_connections = report.connections,
                    requeued = report.requeued,
                    "Queue store started"
                );
                Ok(store)
            }
            Err(e) => {
                if let Err(close_err) = store.close() {
                    warn!(error = %close_err, "Failed to close store after failed recovery");
                }
                Err(e)
            }
        }
    }

    fn close_store(&self, slot: &mut Option<Arc<Store<Slot>>>) -> Result<()> {
        let Some(store) = slot.take() else {
            return Ok(());
        };
        if let Err(e) = store.close() {
            warn!(path = ?self.config.store.path, error = %e, "Failed to close queue store");
            return Err(e.into());
        }
        info!(path = ?self.config.store.path, "Last connection closed, queue store closed");
        Ok(())
    }

    /// Roll the connection's ack set back into the queue and unregister it,
    /// then close the store if no connection is left. Returns the number of
    /// items requeued.
    ///
    /// The connection counts as closed even when the rollback fails; its ack
    /// set then stays in the store for the next startup recovery.
    pub fn teardown(&self, connection: u64, store: &Store<Slot>) -> Result<u64> {
        let mut slot = self.store.lock();

        let rolled_back = retry_on_conflict(LIFECYCLE_ATTEMPTS, || {
            transact(store, |tx| {
                let set = AckSet::new(connection);
                let requeued = set.rollback(tx)?;
                set.unregister(tx);
                Ok(requeued)
            })
        });

        let closed = self.closed.fetch_add(1, Ordering::SeqCst) + 1;
        match &rolled_back {
            Ok(requeued) => {
                if *requeued > 0 {
                    self.signal.notify();
                }
                info!(connection, requeued, open = self.live(), "Connection closed");
            }
            Err(e) => warn!(connection, error = %e, "Rollback failed, ack set left for recovery"),
        }

        let closing = if closed == self.opened.load(Ordering::SeqCst) {
            self.close_store(&mut slot)
        } else {
            Ok(())
        };
        let requeued = rolled_back?;
        closing?;
        Ok(requeued)
    }

    /// Release the connection without touching its ack set, the way a
    /// process crash would. The next startup recovery requeues its items.
    pub fn abandon(&self, connection: u64) -> Result<()> {
        let mut slot = self.store.lock();
        let closed = self.closed.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(connection, open = self.live(), "Connection abandoned, pending items left for recovery");
        if closed == self.opened.load(Ordering::SeqCst) {
            self.close_store(&mut slot)?;
        }
        Ok(())
    }
}

pub(crate) fn read_stats(store: &Store<Slot>) -> Result<QueueStats> {
    transact(store, |tx| {
        let queued = QueueIndex::load(tx)?.size();
        let pending = tx.scan(Slot::all_pending()).len() as u64;
        let connections = tx.scan(Slot::connections()).len() as u64;
        Ok(QueueStats {
            queued,
            pending,
            connections,
        })
    })
}

/// A durable queue with acknowledged delivery.
///
/// The backing store opens on the first [`connect`](Self::connect), which
/// also requeues anything a previous run dispatched but never saw
/// acknowledged. It closes again once every connection has closed.
///
/// ```ignore
/// let queue = AckQueue::open("./queue_data")?;
/// let mut conn = queue.connect()?;
/// conn.put("hello")?;
/// if let Some(item) = conn.get()? {
///     conn.ack(&item)?;
/// }
/// conn.close()?;
/// ```
///
/// One `AckQueue` must own a given directory within a process.
pub struct AckQueue {
    shared: Arc<Shared>,
}

impl AckQueue {
    /// Unbounded queue stored under `path`.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> { QueueBuilder::new(path).build() }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                store: Mutex::new(None),
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                recovery: Mutex::new(None),
                signal: Signal::default(),
            }),
        })
    }

    /// Open a new connection, opening and recovering the store first if no
    /// connection is open.
    pub fn connect(&self) -> Result<Connection> {
        let shared = &self.shared;
        let mut slot = shared.store.lock();

        let store = match slot.as_ref() {
            Some(store) => Arc::clone(store),
            None => {
                let store = Arc::new(shared.start()?);
                *slot = Some(Arc::clone(&store));
                store
            }
        };

        let registered = retry_on_conflict(LIFECYCLE_ATTEMPTS, || {
            transact(&store, |tx| {
                let mut registry: Registry = tx.get_as(&Slot::Registry)?.context(CorruptedSnafu {
                    reason: "connection registry is missing",
                })?;
                let connection = registry.next_connection_id;
                registry.next_connection_id += 1;
                tx.put_as(Slot::Registry, &registry)?;
                AckSet::new(connection).register(tx)?;
                Ok(connection)
            })
        });

        let connection = match registered {
            Ok(connection) => connection,
            Err(e) => {
                if shared.live() == 0
                    && let Err(close_err) = shared.close_store(&mut slot)
                {
                    debug!(error = %close_err, "Store close after failed registration also failed");
                }
                return Err(e);
            }
        };

        shared.opened.fetch_add(1, Ordering::SeqCst);
        info!(connection, open = shared.live(), "Connection opened");
        Ok(Connection::new(connection, store, Arc::clone(shared)))
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn connections(&self) -> u64 {
        let _lifecycle = self.shared.store.lock();
        self.shared.live()
    }

    /// Whether the backing store is open.
    #[must_use]
    pub fn is_open(&self) -> bool { self.shared.store.lock().is_some() }

    /// Counts read in one transaction, or `None` while the store is closed.
    pub fn stats(&self) -> Result<Option<QueueStats>> {
        let slot = self.shared.store.lock();
        slot.as_deref().map(read_stats).transpose()
    }

    /// What the most recent store startup rolled back, or `None` if the
    /// store was never opened by this handle.
    #[must_use]
    pub fn last_recovery(&self) -> Option<RecoveryReport> { *self.shared.recovery.lock() }

    #[must_use]
    pub fn path(&self) -> &Path { &self.shared.config.store.path }

    #[must_use]
    pub fn config(&self) -> &QueueConfig { &self.shared.config }
}

impl fmt::Debug for AckQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckQueue")
            .field("path", &self.path())
            .field("capacity", &self.shared.config.capacity)
            .finish_non_exhaustive()
    }
}

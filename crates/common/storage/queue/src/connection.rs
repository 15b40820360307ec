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
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use ackq_common_storage_kv::Store;
use bytes::Bytes;
use snafu::ensure;
use tracing::{trace, warn};

use crate::{
    QueueError, Result,
    ack::AckSet,
    error::{ConnectionClosedSnafu, QueueFullSnafu},
    index::QueueIndex,
    manager::{QueueStats, Shared, read_stats},
    record::{Item, Slot},
    retry::transact,
};

/// A handle for putting, getting and acknowledging items.
///
/// Every item returned by [`get`](Self::get) stays pending on this
/// connection until it is acknowledged. Closing the connection, or dropping
/// it, puts every pending item back at the head of the queue. If the process
/// dies first, the next startup does the same.
///
/// Each call runs as one store transaction. A call that loses a race with
/// another connection fails with [`QueueError::TransactionConflict`] and
/// changes nothing; see [`retry_on_conflict`](crate::retry_on_conflict).
pub struct Connection {
    id:     u64,
    store:  Arc<Store<Slot>>,
    shared: Arc<Shared>,
    closed: bool,
}

impl Connection {
    pub(crate) const fn new(id: u64, store: Arc<Store<Slot>>, shared: Arc<Shared>) -> Self {
        Self {
            id,
            store,
            shared,
            closed: false,
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 { self.id }

    #[must_use]
    pub const fn is_closed(&self) -> bool { self.closed }

    const fn ack_set(&self) -> AckSet { AckSet::new(self.id) }

    fn ensure_open(&self) -> Result<()> {
        ensure!(!self.closed, ConnectionClosedSnafu);
        Ok(())
    }

    /// Append an item to the tail of the queue.
    ///
    /// Fails with [`QueueError::QueueFull`] when the queue is bounded and
    /// full.
    pub fn put(&self, payload: impl Into<Bytes>) -> Result<Item> { self.put_bytes(payload.into()) }

    /// Like [`put`](Self::put), waiting up to `timeout` for space to free up.
    /// Errors other than [`QueueError::QueueFull`] return at once.
    pub fn put_timeout(&self, payload: impl Into<Bytes>, timeout: Duration) -> Result<Item> {
        let payload = payload.into();
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.shared.signal.generation();
            match self.put_bytes(payload.clone()) {
                Err(e @ QueueError::QueueFull { .. }) => {
                    if !self.shared.signal.wait_past(seen, deadline) {
                        return Err(e);
                    }
                }
                result => return result,
            }
        }
    }

    fn put_bytes(&self, payload: Bytes) -> Result<Item> {
        self.ensure_open()?;
        let capacity = self.shared.capacity();

        let item = transact(&self.store, |tx| {
            let mut index = QueueIndex::load(tx)?;
            if let Some(capacity) = capacity {
                ensure!(index.size() < capacity, QueueFullSnafu { capacity });
            }
            let item = Item::new(index.allocate_item_id(tx)?, payload);
            index.enqueue_tail(tx, &item)?;
            Ok(item)
        })?;

        trace!(connection = self.id, item = item.id(), "Item put");
        self.shared.signal.notify();
        Ok(item)
    }

    /// Take the item at the head of the queue, or `None` if the queue is
    /// empty. The item stays pending on this connection until acknowledged.
    pub fn get(&self) -> Result<Option<Item>> {
        self.ensure_open()?;
        let set = self.ack_set();

        let item = transact(&self.store, |tx| {
            let mut index = QueueIndex::load(tx)?;
            let Some(item) = index.dequeue_head(tx)? else {
                return Ok(None);
            };
            let dispatch = index.allocate_dispatch(tx)?;
            set.dispatch(tx, &item, dispatch)?;
            Ok(Some(item))
        })?;

        if let Some(item) = &item {
            trace!(connection = self.id, item = item.id(), "Item dispatched");
            self.shared.signal.notify();
        }
        Ok(item)
    }

    /// Like [`get`](Self::get), waiting up to `timeout` for an item.
    ///
    /// Only an empty queue is waited out. Any error, including
    /// [`QueueError::TransactionConflict`], returns at once, before the
    /// timeout has elapsed; wrap the call in
    /// [`retry_on_conflict`](crate::retry_on_conflict) to retry it.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<Item>> {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.shared.signal.generation();
            match self.get()? {
                Some(item) => return Ok(Some(item)),
                None => {
                    if !self.shared.signal.wait_past(seen, deadline) {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Acknowledge an item returned by [`get`](Self::get) on this
    /// connection. It will not be delivered again.
    pub fn ack(&self, item: &Item) -> Result<()> { self.ack_id(item.id()) }

    /// Acknowledge by item id.
    pub fn ack_id(&self, item: u64) -> Result<()> {
        self.ensure_open()?;
        let set = self.ack_set();
        transact(&self.store, |tx| set.acknowledge(tx, item).map(drop))?;

        trace!(connection = self.id, item, "Item acknowledged");
        self.shared.signal.notify();
        Ok(())
    }

    /// Give a pending item back: it returns to the head of the queue.
    pub fn requeue(&self, item: &Item) -> Result<()> {
        self.ensure_open()?;
        let set = self.ack_set();
        transact(&self.store, |tx| {
            let mut index = QueueIndex::load(tx)?;
            set.requeue(tx, &mut index, item.id()).map(drop)
        })?;

        trace!(connection = self.id, item = item.id(), "Item requeued");
        self.shared.signal.notify();
        Ok(())
    }

    /// Items pending on this connection, oldest dispatch first.
    pub fn pending(&self) -> Result<Vec<Item>> {
        self.ensure_open()?;
        let set = self.ack_set();
        let entries = transact(&self.store, |tx| set.members(tx))?;
        Ok(entries.into_iter().map(|entry| entry.item).collect())
    }

    /// Number of items waiting in the queue.
    pub fn len(&self) -> Result<u64> {
        self.ensure_open()?;
        transact(&self.store, |tx| Ok(QueueIndex::load(tx)?.size()))
    }

    pub fn is_empty(&self) -> Result<bool> { self.len().map(|len| len == 0) }

    /// The item at the head of the queue, without taking it.
    pub fn peek(&self) -> Result<Option<Item>> {
        self.ensure_open()?;
        transact(&self.store, |tx| QueueIndex::load(tx)?.peek_head(tx))
    }

    pub fn stats(&self) -> Result<QueueStats> {
        self.ensure_open()?;
        read_stats(&self.store)
    }

    /// Release the connection but leave its pending items pending, as if the
    /// process had died. They return to the queue at the next store startup,
    /// not before, so other open connections will not see them.
    pub fn abandon(mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.abandon(self.id)
    }

    /// Requeue every pending item and release the connection. Calling it
    /// again does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.teardown(self.id, &self.store).map(drop)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(connection = self.id, error = %e, "Failed to close connection on drop");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use tempfile::TempDir;

    use super::*;
    use crate::{AckQueue, QueueBuilder};

    fn payloads(items: &[Item]) -> Vec<&[u8]> { items.iter().map(|item| item.payload().as_ref()).collect() }

    #[test]
    fn test_put_get_ack() {
        let temp_dir = TempDir::new().unwrap();
        let queue = AckQueue::open(temp_dir.path()).unwrap();
        let conn = queue.connect().unwrap();

        let first = conn.put("first").unwrap();
        let second = conn.put("second").unwrap();
        assert!(second.id() > first.id());
        assert_eq!(conn.len().unwrap(), 2);
        assert_eq!(conn.peek().unwrap(), Some(first.clone()));

        let got = conn.get().unwrap().unwrap();
        assert_eq!(got, first);
        assert_eq!(got.payload().as_ref(), b"first");
        assert_eq!(conn.pending().unwrap(), vec![first.clone()]);

        conn.ack(&got).unwrap();
        assert!(conn.pending().unwrap().is_empty());
        assert!(matches!(
            conn.ack(&got),
            Err(QueueError::AckNotFound { .. })
        ));
        assert_eq!(conn.len().unwrap(), 1);
    }

    #[test]
    fn test_get_on_empty_queue() {
        let temp_dir = TempDir::new().unwrap();
        let queue = AckQueue::open(temp_dir.path()).unwrap();
        let conn = queue.connect().unwrap();

        assert_eq!(conn.get().unwrap(), None);
        assert_eq!(conn.peek().unwrap(), None);
        assert!(conn.is_empty().unwrap());
    }

    #[test]
    fn test_requeue_returns_item_to_head() {
        let temp_dir = TempDir::new().unwrap();
        let queue = AckQueue::open(temp_dir.path()).unwrap();
        let conn = queue.connect().unwrap();

        conn.put("a").unwrap();
        conn.put("b").unwrap();
        let a = conn.get().unwrap().unwrap();
        conn.requeue(&a).unwrap();

        assert!(conn.pending().unwrap().is_empty());
        assert_eq!(conn.get().unwrap(), Some(a));
    }

    #[test]
    fn test_close_requeues_pending_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let queue = AckQueue::open(temp_dir.path()).unwrap();
        let observer = queue.connect().unwrap();

        let mut conn = queue.connect().unwrap();
        for payload in ["a", "b", "c", "d"] {
            conn.put(payload).unwrap();
        }
        let a = conn.get().unwrap().unwrap();
        conn.get().unwrap();
        conn.ack(&a).unwrap();
        conn.close().unwrap();

        let stats = observer.stats().unwrap();
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.connections, 1);

        let rest: Vec<Item> = std::iter::from_fn(|| observer.get().unwrap()).collect();
        assert_eq!(payloads(&rest), vec![&b"b"[..], b"c", b"d"]);
    }

    #[test]
    fn test_abandon_leaves_items_for_next_startup() {
        let temp_dir = TempDir::new().unwrap();
        let queue = AckQueue::open(temp_dir.path()).unwrap();
        let mut observer = queue.connect().unwrap();

        let conn = queue.connect().unwrap();
        conn.put("x").unwrap();
        conn.get().unwrap();
        conn.abandon().unwrap();

        assert_eq!(queue.connections(), 1);
        assert_eq!(observer.len().unwrap(), 0);
        assert_eq!(observer.stats().unwrap().pending, 1);

        observer.close().unwrap();
        assert!(!queue.is_open());

        let conn = queue.connect().unwrap();
        assert_eq!(conn.get().unwrap().map(Item::into_payload), Some(Bytes::from("x")));
    }

    #[test]
    fn test_drop_runs_teardown() {
        let temp_dir = TempDir::new().unwrap();
        let queue = AckQueue::open(temp_dir.path()).unwrap();
        let observer = queue.connect().unwrap();

        {
            let conn = queue.connect().unwrap();
            conn.put("x").unwrap();
            conn.get().unwrap();
        }

        assert_eq!(queue.connections(), 1);
        assert_eq!(observer.len().unwrap(), 1);
    }

    #[test]
    fn test_bounded_put_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let queue = QueueBuilder::new(temp_dir.path()).capacity(2).build().unwrap();
        let conn = queue.connect().unwrap();

        conn.put("1").unwrap();
        conn.put("2").unwrap();
        assert!(matches!(
            conn.put("3"),
            Err(QueueError::QueueFull { capacity: 2 })
        ));
        assert!(matches!(
            conn.put_timeout("3", Duration::from_millis(20)),
            Err(QueueError::QueueFull { capacity: 2 })
        ));

        // Dispatched items no longer count against the capacity.
        conn.get().unwrap();
        conn.put("3").unwrap();
    }

    #[test]
    fn test_rollback_ignores_capacity() {
        let temp_dir = TempDir::new().unwrap();
        let queue = QueueBuilder::new(temp_dir.path()).capacity(1).build().unwrap();
        let observer = queue.connect().unwrap();

        let mut conn = queue.connect().unwrap();
        conn.put("1").unwrap();
        conn.get().unwrap();
        conn.put("2").unwrap();
        conn.close().unwrap();

        assert_eq!(observer.len().unwrap(), 2);
    }

    #[test]
    fn test_put_timeout_waits_for_space() {
        let temp_dir = TempDir::new().unwrap();
        let queue = QueueBuilder::new(temp_dir.path()).capacity(1).build().unwrap();
        let producer = queue.connect().unwrap();
        let consumer = queue.connect().unwrap();
        producer.put("first").unwrap();

        let taker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let item = consumer.get().unwrap().unwrap();
            consumer.ack(&item).unwrap();
        });

        let second = producer.put_timeout("second", Duration::from_secs(10)).unwrap();
        assert_eq!(second.payload().as_ref(), b"second");
        taker.join().unwrap();
    }

    #[test]
    fn test_get_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let queue = AckQueue::open(temp_dir.path()).unwrap();
        let consumer = queue.connect().unwrap();
        let producer = queue.connect().unwrap();

        assert_eq!(consumer.get_timeout(Duration::from_millis(20)).unwrap(), None);

        let putter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            producer.put("late").unwrap();
        });

        let item = consumer.get_timeout(Duration::from_secs(10)).unwrap().unwrap();
        assert_eq!(item.payload().as_ref(), b"late");
        putter.join().unwrap();
    }
}

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

//! Per-connection sets of dispatched, unacknowledged items.

use ackq_common_storage_kv::Transaction;
use snafu::{OptionExt, ensure};

use crate::{
    Result,
    error::{AckNotFoundSnafu, DuplicateDispatchSnafu},
    index::QueueIndex,
    record::{Item, PendingEntry, Registration, Slot},
};

/// The ack set of one connection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AckSet {
    connection: u64,
}

impl AckSet {
    pub const fn new(connection: u64) -> Self { Self { connection } }

    const fn key(self, item: u64) -> Slot {
        Slot::Pending {
            connection: self.connection,
            item,
        }
    }

    /// Record the connection as live.
    pub fn register(self, tx: &mut Transaction<'_, Slot>) -> Result<()> {
        tx.put_as(Slot::Connection(self.connection), &Registration::now())?;
        Ok(())
    }

    pub fn unregister(self, tx: &mut Transaction<'_, Slot>) {
        tx.delete(Slot::Connection(self.connection));
    }

    /// Mark `item` as handed out to this connection at sequence `dispatch`.
    pub fn dispatch(self, tx: &mut Transaction<'_, Slot>, item: &Item, dispatch: u64) -> Result<()> {
        let key = self.key(item.id());
        ensure!(
            !tx.contains_key(&key),
            DuplicateDispatchSnafu {
                connection: self.connection,
                item:       item.id(),
            }
        );
        tx.put_as(key, &PendingEntry {
            dispatch,
            item: item.clone(),
        })?;
        Ok(())
    }

    /// Drop the item from the set for good.
    pub fn acknowledge(self, tx: &mut Transaction<'_, Slot>, item: u64) -> Result<PendingEntry> {
        let key = self.key(item);
        let entry = tx.get_as::<PendingEntry>(&key)?.context(AckNotFoundSnafu {
            connection: self.connection,
            item,
        })?;
        tx.delete(key);
        Ok(entry)
    }

    /// Members in dispatch order.
    pub fn members(self, tx: &mut Transaction<'_, Slot>) -> Result<Vec<PendingEntry>> {
        let mut entries: Vec<PendingEntry> = tx
            .scan_as(Slot::pending_of(self.connection))?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        entries.sort_unstable_by_key(|entry| entry.dispatch);
        Ok(entries)
    }

    /// Move every member back to the head of the queue so the oldest
    /// dispatch ends up first, and empty the set. Returns how many items
    /// were requeued.
    pub fn rollback(self, tx: &mut Transaction<'_, Slot>) -> Result<u64> {
        let members = self.members(tx)?;
        if members.is_empty() {
            return Ok(0);
        }

        let mut index = QueueIndex::load(tx)?;
        for entry in members.iter().rev() {
            tx.delete(self.key(entry.item.id()));
            index.enqueue_head(tx, &entry.item)?;
        }
        Ok(members.len() as u64)
    }

    /// Move one member back to the head of the queue.
    pub fn requeue(self, tx: &mut Transaction<'_, Slot>, index: &mut QueueIndex, item: u64) -> Result<Item> {
        let entry = self.acknowledge(tx, item)?;
        index.enqueue_head(tx, &entry.item)?;
        Ok(entry.item)
    }
}

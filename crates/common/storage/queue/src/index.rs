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

//! Circular buffer over the store's integer-keyed elements.
//!
//! Occupied keys are exactly the modular range `[start, stop)`. Both cursors
//! wrap from `i64::MAX` to `i64::MIN`, and an empty ring is always stored as
//! `start == stop == 0`.
//!
//! Every mutation writes the updated [`QueueHead`] into the transaction it
//! runs in, so the cursors and the elements commit or abort together.

use ackq_common_storage_kv::Transaction;
use snafu::{OptionExt, ensure};

use crate::{
    Result,
    error::{BufferFullSnafu, CorruptedSnafu},
    record::{Item, QueueHead, Slot},
};

/// Number of positions from `start` up to `stop` on the wrapping `i64` ring.
pub(crate) const fn ring_distance(start: i64, stop: i64) -> u64 {
    if stop >= start {
        stop.abs_diff(start)
    } else {
        (i64::MAX.abs_diff(start) + 1) + stop.abs_diff(i64::MIN)
    }
}

/// The queue ring as seen by one transaction.
#[derive(Debug)]
pub(crate) struct QueueIndex {
    head: QueueHead,
}

impl QueueIndex {
    /// Create an empty ring unless one exists. Returns whether it was created.
    pub fn init(tx: &mut Transaction<'_, Slot>) -> Result<bool> {
        if tx.contains_key(&Slot::Head) {
            return Ok(false);
        }
        tx.put_as(Slot::Head, &QueueHead::default())?;
        Ok(true)
    }

    /// Read and validate the persisted head.
    pub fn load(tx: &mut Transaction<'_, Slot>) -> Result<Self> {
        let head: QueueHead = tx.get_as(&Slot::Head)?.context(CorruptedSnafu {
            reason: "queue head is missing",
        })?;

        let distance = ring_distance(head.start, head.stop);
        ensure!(
            distance == head.len,
            CorruptedSnafu {
                reason: format!(
                    "queue head spans {distance} positions but counts {} items",
                    head.len
                ),
            }
        );
        ensure!(
            head.len > 0 || (head.start == 0 && head.stop == 0),
            CorruptedSnafu {
                reason: format!("empty queue with cursors at {}", head.start),
            }
        );
        Ok(Self { head })
    }

    /// Number of items in the ring.
    pub const fn size(&self) -> u64 { self.head.len }

    pub const fn is_empty(&self) -> bool { self.head.len == 0 }

    /// Append `item` behind the newest element.
    pub fn enqueue_tail(&mut self, tx: &mut Transaction<'_, Slot>, item: &Item) -> Result<()> {
        ensure!(self.head.len < u64::MAX, BufferFullSnafu);

        tx.put_as(Slot::Element(self.head.stop), item)?;
        self.head.stop = self.head.stop.wrapping_add(1);
        self.head.len += 1;
        self.store(tx)
    }

    /// Insert `item` in front of the oldest element.
    pub fn enqueue_head(&mut self, tx: &mut Transaction<'_, Slot>, item: &Item) -> Result<()> {
        ensure!(self.head.len < u64::MAX, BufferFullSnafu);

        self.head.start = self.head.start.wrapping_sub(1);
        tx.put_as(Slot::Element(self.head.start), item)?;
        self.head.len += 1;
        self.store(tx)
    }

    /// Remove and return the oldest element.
    pub fn dequeue_head(&mut self, tx: &mut Transaction<'_, Slot>) -> Result<Option<Item>> {
        let Some(item) = self.peek_head(tx)? else {
            return Ok(None);
        };

        tx.delete(Slot::Element(self.head.start));
        self.head.len -= 1;
        if self.head.len == 0 {
            self.head.start = 0;
            self.head.stop = 0;
        } else {
            self.head.start = self.head.start.wrapping_add(1);
        }
        self.store(tx)?;
        Ok(Some(item))
    }

    /// The oldest element, left in place.
    pub fn peek_head(&self, tx: &mut Transaction<'_, Slot>) -> Result<Option<Item>> {
        if self.is_empty() {
            return Ok(None);
        }
        match tx.get_as::<Item>(&Slot::Element(self.head.start))? {
            Some(item) => Ok(Some(item)),
            None => {
                // A concurrent dequeue moved the head: a conflict, not damage.
                tx.validate()?;
                CorruptedSnafu {
                    reason: format!("no element at queue head {}", self.head.start),
                }
                .fail()
            }
        }
    }

    /// Take the next item id.
    pub fn allocate_item_id(&mut self, tx: &mut Transaction<'_, Slot>) -> Result<u64> {
        let id = self.head.next_item_id;
        self.head.next_item_id += 1;
        self.store(tx)?;
        Ok(id)
    }

    /// Take the next dispatch sequence number.
    pub fn allocate_dispatch(&mut self, tx: &mut Transaction<'_, Slot>) -> Result<u64> {
        let dispatch = self.head.next_dispatch;
        self.head.next_dispatch += 1;
        self.store(tx)?;
        Ok(dispatch)
    }

    fn store(&self, tx: &mut Transaction<'_, Slot>) -> Result<()> {
        tx.put_as(Slot::Head, &self.head)?;
        Ok(())
    }
}

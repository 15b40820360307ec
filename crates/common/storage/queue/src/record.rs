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

//! Records the queue persists in the store.
//!
//! ## Key Layout
//!
//! ```text
//! Head                         -> QueueHead       (cursors and allocators)
//! Element(i64)                 -> Item            (ring slot)
//! Registry                     -> Registry        (connection id allocator)
//! Connection(u64)              -> Registration    (one per live connection)
//! Pending { connection, item } -> PendingEntry    (dispatched, not acked)
//! ```
//!
//! `Pending` keys sort by connection first, so one connection's ack set is a
//! contiguous range.

use std::{
    hash::{Hash, Hasher},
    ops::RangeInclusive,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Key of every record the queue keeps in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub(crate) enum Slot {
    Head,
    Element(i64),
    Registry,
    Connection(u64),
    Pending { connection: u64, item: u64 },
}

impl Slot {
    /// Every registration record.
    pub const fn connections() -> RangeInclusive<Self> {
        Self::Connection(0)..=Self::Connection(u64::MAX)
    }

    /// The ack set of one connection.
    pub const fn pending_of(connection: u64) -> RangeInclusive<Self> {
        Self::Pending {
            connection,
            item: 0,
        }..=Self::Pending {
            connection,
            item: u64::MAX,
        }
    }

    /// The ack sets of every connection.
    pub const fn all_pending() -> RangeInclusive<Self> {
        Self::Pending {
            connection: 0,
            item:       0,
        }..=Self::Pending {
            connection: u64::MAX,
            item:       u64::MAX,
        }
    }
}

/// Ring cursors and the persisted id allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QueueHead {
    /// Key of the oldest element.
    pub start:         i64,
    /// Key the next element is written at.
    pub stop:          i64,
    pub len:           u64,
    pub next_item_id:  u64,
    pub next_dispatch: u64,
}

impl Default for QueueHead {
    fn default() -> Self {
        Self {
            start:         0,
            stop:          0,
            len:           0,
            next_item_id:  1,
            next_dispatch: 1,
        }
    }
}

/// An item in the queue.
///
/// Items compare by id: two items are the same item exactly when `put`
/// assigned them the same id, whatever their payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    id:      u64,
    payload: Bytes,
}

impl Item {
    pub(crate) const fn new(id: u64, payload: Bytes) -> Self { Self { id, payload } }

    /// Identifier assigned when the item was put.
    #[must_use]
    pub const fn id(&self) -> u64 { self.id }

    #[must_use]
    pub const fn payload(&self) -> &Bytes { &self.payload }

    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl Eq for Item {}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) { self.id.hash(state); }
}

/// A dispatched item and the order it was handed out in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PendingEntry {
    pub dispatch: u64,
    pub item:     Item,
}

/// Connection id allocator. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct Registry {
    pub next_connection_id: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            next_connection_id: 1,
        }
    }
}

/// Marks a live connection in the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct Registration {
    /// Milliseconds since the Unix epoch.
    pub opened_at_ms: i64,
}

impl Registration {
    pub fn now() -> Self {
        Self {
            opened_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_equality_is_identity() {
        let a = Item::new(1, Bytes::from("same"));
        let b = Item::new(2, Bytes::from("same"));
        let c = Item::new(1, Bytes::from("different"));

        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_pending_ranges_are_per_connection() {
        let range = Slot::pending_of(7);
        assert!(range.contains(&Slot::Pending {
            connection: 7,
            item:       u64::MAX,
        }));
        assert!(!range.contains(&Slot::Pending {
            connection: 8,
            item:       0,
        }));
        assert!(!range.contains(&Slot::Connection(7)));
        assert!(Slot::all_pending().contains(&Slot::Pending {
            connection: 8,
            item:       3,
        }));
    }

    #[test]
    fn test_fresh_allocators_start_at_one() {
        assert_eq!(QueueHead::default().next_item_id, 1);
        assert_eq!(QueueHead::default().next_dispatch, 1);
        assert_eq!(Registry::default().next_connection_id, 1);
    }
}

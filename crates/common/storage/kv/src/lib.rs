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

//! Embedded, crash-durable ordered key-value store.
//!
//! The store keeps its committed state in memory and makes every commit
//! durable through an append-only write-ahead log. The log is periodically
//! folded into a dual-slot snapshot so startup only replays the tail.
//!
//! Transactions are optimistic: reads and range scans are recorded and
//! re-validated at commit time, and a commit whose view went stale fails
//! with [`StoreError::Conflict`] instead of blocking.
//!
//! ```ignore
//! let store: Store<u64> = Store::open(StoreConfig::builder().path(dir).build())?;
//!
//! let mut tx = store.begin()?;
//! tx.put(1, Bytes::from("one"));
//! tx.commit()?;
//! ```

pub mod codec;
pub mod config;
mod crc;
pub mod error;
mod lock;
mod snapshot;
pub mod store;
pub mod txn;
mod wal;

pub use config::{FlushMode, StoreConfig};
pub use error::{Result, StoreError};
pub use store::{Store, StoreKey};
pub use txn::Transaction;

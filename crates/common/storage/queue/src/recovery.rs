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

//! Startup recovery of abandoned ack sets.
//!
//! Any ack set still in the store when it opens belongs to a connection that
//! never tore down. Recovery moves every such item back to the queue head,
//! ordered by dispatch sequence across all connections, so the queue reads in
//! the same order as before those items were handed out.

use std::collections::BTreeSet;

use ackq_common_storage_kv::Transaction;
use tracing::info;

use crate::{
    Result,
    index::QueueIndex,
    record::{PendingEntry, Registry, Slot},
};

/// Outcome of a recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Abandoned connections cleaned up.
    pub connections: u64,
    /// Items moved back into the queue.
    pub requeued:    u64,
}

/// Create the queue records on first open, then roll back every ack set and
/// remove every registration.
pub(crate) fn recover(tx: &mut Transaction<'_, Slot>) -> Result<RecoveryReport> {
    if QueueIndex::init(tx)? {
        info!("Initialized empty queue");
    }
    if !tx.contains_key(&Slot::Registry) {
        tx.put_as(Slot::Registry, &Registry::default())?;
    }

    let mut index = QueueIndex::load(tx)?;
    let report = rollback_all(tx, &mut index)?;
    if report != RecoveryReport::default() {
        info!(
            connections = report.connections,
            requeued = report.requeued,
            queued = index.size(),
            "Recovered abandoned connections"
        );
    }
    Ok(report)
}

/// Roll back the ack sets of all connections into `index`.
pub(crate) fn rollback_all(tx: &mut Transaction<'_, Slot>, index: &mut QueueIndex) -> Result<RecoveryReport> {
    let mut connections = BTreeSet::new();

    let mut pending: Vec<PendingEntry> = Vec::new();
    for (key, entry) in tx.scan_as::<PendingEntry, _>(Slot::all_pending())? {
        if let Slot::Pending { connection, .. } = key {
            connections.insert(connection);
        }
        tx.delete(key);
        pending.push(entry);
    }
    for (key, _) in tx.scan(Slot::connections()) {
        if let Slot::Connection(connection) = key {
            connections.insert(connection);
        }
        tx.delete(key);
    }

    pending.sort_unstable_by_key(|entry| entry.dispatch);
    for entry in pending.iter().rev() {
        index.enqueue_head(tx, &entry.item)?;
    }

    Ok(RecoveryReport {
        connections: connections.len() as u64,
        requeued:    pending.len() as u64,
    })
}

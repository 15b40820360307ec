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

use ackq_common_storage_kv::StoreError;
use snafu::{IntoError, Snafu};

/// Queue operation errors.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// The ring holds `u64::MAX` items and cannot grow.
    #[snafu(display("Queue buffer is full"))]
    BufferFull,

    /// The configured capacity is reached.
    #[snafu(display("Queue is at its capacity of {capacity} items"))]
    QueueFull { capacity: u64 },

    /// The item is already dispatched to this connection.
    #[snafu(display("Item {item} is already pending on connection {connection}"))]
    DuplicateDispatch { connection: u64, item: u64 },

    /// The item is not pending on this connection: acknowledged twice, or
    /// handed out to another connection.
    #[snafu(display("Item {item} is not pending on connection {connection}"))]
    AckNotFound { connection: u64, item: u64 },

    /// Another transaction changed the queue first. Re-running the
    /// operation may succeed.
    #[snafu(display("Transaction conflict, retry the operation"))]
    TransactionConflict,

    #[snafu(display("Queue data corrupted: {reason}"))]
    Corrupted { reason: String },

    #[snafu(display("Connection is closed"))]
    ConnectionClosed,

    #[snafu(display("Store failure"))]
    Store {
        source: StoreError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Invalid queue configuration: {reason}"))]
    InvalidConfig { reason: String },
}

impl QueueError {
    /// Whether re-running the whole operation may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool { matches!(self, Self::TransactionConflict) }
}

impl From<StoreError> for QueueError {
    #[track_caller]
    fn from(source: StoreError) -> Self {
        match source {
            StoreError::Conflict => Self::TransactionConflict,
            StoreError::Closed => Self::ConnectionClosed,
            StoreError::Corrupted { reason } => Self::Corrupted { reason },
            source => StoreSnafu.into_error(source),
        }
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

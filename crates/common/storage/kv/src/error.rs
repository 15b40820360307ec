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

use snafu::Snafu;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store operation errors.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Filesystem I/O failure.
    #[snafu(transparent)]
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to encode record"))]
    Encode {
        source: bincode::error::EncodeError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to decode record"))]
    Decode {
        source: bincode::error::DecodeError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Persisted data failed validation.
    #[snafu(display("Store data corrupted: {reason}"))]
    Corrupted { reason: String },

    #[snafu(display("Unsupported snapshot version: {version}"))]
    UnsupportedVersion { version: u32 },

    #[snafu(display("Record of {size} bytes exceeds the log frame limit"))]
    RecordTooLarge { size: usize },

    /// A key or range read by the transaction changed before it committed.
    #[snafu(display("Transaction conflict, retry the operation"))]
    Conflict,

    #[snafu(display("Store is closed"))]
    Closed,

    /// Another open store owns the directory.
    #[snafu(display("Store directory is locked by another store: {}", path.display()))]
    Locked { path: std::path::PathBuf },
}

impl StoreError {
    /// Whether re-running the whole transaction may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool { matches!(self, Self::Conflict) }
}

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

use std::path::PathBuf;

use smart_default::SmartDefault;

/// Default log size that triggers a snapshot (4 MiB).
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Store configuration
#[derive(Debug, Clone, SmartDefault, bon::Builder)]
pub struct StoreConfig {
    /// Directory holding the write-ahead log and snapshots
    #[default(_code = "PathBuf::from(\"./ackq_data\")")]
    #[builder(into, getter)]
    pub path: PathBuf,

    /// When committed records are forced to disk
    #[builder(default, getter)]
    pub flush_mode: FlushMode,

    /// Log size in bytes after which the state is folded into a snapshot
    #[default(DEFAULT_COMPACT_THRESHOLD)]
    #[builder(default = DEFAULT_COMPACT_THRESHOLD, getter)]
    pub compact_threshold: u64,

    /// Verify frame checksums while replaying the log
    #[default = true]
    #[builder(default = true, getter)]
    pub verify_on_startup: bool,
}

/// Durability policy for log appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// `fsync` after every commit. A committed transaction survives power
    /// loss.
    #[default]
    Sync,
    /// Leave flushing to the OS. A committed transaction survives a process
    /// crash but not power loss.
    Async,
    /// `fsync` once at least `bytes` have been appended since the last sync.
    Batch { bytes: usize },
}

impl FlushMode {
    /// Whether `pending` unsynced bytes require a sync under this mode.
    #[must_use]
    pub const fn should_sync(self, pending: usize) -> bool {
        match self {
            Self::Sync => pending > 0,
            Self::Async => false,
            Self::Batch { bytes } => pending >= bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.path, PathBuf::from("./ackq_data"));
        assert_eq!(config.flush_mode, FlushMode::Sync);
        assert_eq!(config.compact_threshold, DEFAULT_COMPACT_THRESHOLD);
        assert!(config.verify_on_startup);
    }

    #[test]
    fn test_builder_custom_config() {
        let config = StoreConfig::builder()
            .path("/tmp/ackq")
            .flush_mode(FlushMode::Batch { bytes: 4096 })
            .compact_threshold(1024)
            .verify_on_startup(false)
            .build();

        assert_eq!(config.path, PathBuf::from("/tmp/ackq"));
        assert_eq!(config.flush_mode, FlushMode::Batch { bytes: 4096 });
        assert_eq!(config.compact_threshold, 1024);
        assert!(!config.verify_on_startup);
    }

    #[test_case(FlushMode::Sync, 0, false ; "sync with nothing pending")]
    #[test_case(FlushMode::Sync, 1, true ; "sync with pending bytes")]
    #[test_case(FlushMode::Async, 1 << 20, false ; "async never syncs")]
    #[test_case(FlushMode::Batch { bytes: 100 }, 99, false ; "batch below threshold")]
    #[test_case(FlushMode::Batch { bytes: 100 }, 100, true ; "batch at threshold")]
    fn test_should_sync(mode: FlushMode, pending: usize, expected: bool) {
        assert_eq!(mode.should_sync(pending), expected);
    }
}

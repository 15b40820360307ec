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

use ackq_common_storage_kv::FlushMode;

use crate::{AckQueue, QueueConfig, Result};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        let mut config = QueueConfig::default();
        config.store.path = base_path.into();
        Self { config }
    }

    #[must_use]
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.store.flush_mode = mode;
        self
    }

    #[must_use]
    pub fn compact_threshold(mut self, bytes: u64) -> Self {
        self.config.store.compact_threshold = bytes;
        self
    }

    #[must_use]
    pub fn verify_on_startup(mut self, verify: bool) -> Self {
        self.config.store.verify_on_startup = verify;
        self
    }

    /// Bound the queue to `capacity` items.
    #[must_use]
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.config.capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<AckQueue> { AckQueue::with_config(self.config) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueError;

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("/tmp/test_queue");
        assert_eq!(builder.config.store.path, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config.store.flush_mode, FlushMode::Sync);
        assert!(builder.config.store.verify_on_startup);
        assert_eq!(builder.config.capacity, None);
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("/tmp/test_queue")
            .flush_mode(FlushMode::Batch { bytes: 4096 })
            .compact_threshold(1024)
            .verify_on_startup(false)
            .capacity(100);

        assert_eq!(builder.config.store.flush_mode, FlushMode::Batch { bytes: 4096 });
        assert_eq!(builder.config.store.compact_threshold, 1024);
        assert!(!builder.config.store.verify_on_startup);
        assert_eq!(builder.config.capacity, Some(100));
    }

    #[test]
    fn test_build_rejects_zero_capacity() {
        let result = QueueBuilder::new("/tmp/test_queue").capacity(0).build();
        assert!(matches!(result, Err(QueueError::InvalidConfig { .. })));
    }
}

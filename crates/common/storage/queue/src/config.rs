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

use ackq_common_storage_kv::StoreConfig;
use snafu::ensure;

use crate::{Result, error::InvalidConfigSnafu};

#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    /// Settings of the backing store.
    pub store:    StoreConfig,
    /// Most items the queue holds at once. `None` leaves it unbounded.
    pub capacity: Option<u64>,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.capacity != Some(0),
            InvalidConfigSnafu {
                reason: "capacity must be at least 1",
            }
        );
        ensure!(
            self.store.compact_threshold > 0,
            InvalidConfigSnafu {
                reason: "compact threshold must be positive",
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_default_is_unbounded() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, None);
        assert!(config.validate().is_ok());
    }

    #[test_case(Some(0), 1, false ; "zero capacity")]
    #[test_case(Some(1), 1, true ; "capacity of one")]
    #[test_case(None, 0, false ; "zero compact threshold")]
    fn test_validate(capacity: Option<u64>, compact_threshold: u64, valid: bool) {
        let config = QueueConfig {
            store: StoreConfig::builder()
                .path("/tmp/ackq")
                .compact_threshold(compact_threshold)
                .build(),
            capacity,
        };
        assert_eq!(config.validate().is_ok(), valid);
    }
}

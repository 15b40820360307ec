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

use ackq_common_storage_kv::{Store, Transaction};
use tracing::debug;

use crate::{Result, record::Slot};

/// Run `op` again while it fails with
/// [`QueueError::TransactionConflict`](crate::QueueError::TransactionConflict),
/// up to `attempts` runs in total.
///
/// Every run must be a complete operation: a queue call such as
/// [`Connection::put`](crate::Connection::put), never half of one.
///
/// ```ignore
/// let item = retry_on_conflict(8, || conn.get())?;
/// ```
pub fn retry_on_conflict<T>(attempts: usize, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_conflict() && attempt < attempts => {
                debug!(attempt, attempts, "Transaction conflict, retrying");
                attempt += 1;
                std::thread::yield_now();
            }
            result => return result,
        }
    }
}

/// Run `op` in one store transaction and commit it. Nothing is committed
/// when `op` fails.
pub(crate) fn transact<T>(
    store: &Store<Slot>,
    op: impl FnOnce(&mut Transaction<'_, Slot>) -> Result<T>,
) -> Result<T> {
    let mut tx = store.begin()?;
    let value = op(&mut tx)?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use test_case::test_case;

    use super::*;
    use crate::QueueError;

    fn failing(failures: usize, calls: &Cell<usize>) -> Result<usize> {
        calls.set(calls.get() + 1);
        if calls.get() <= failures {
            Err(QueueError::TransactionConflict)
        } else {
            Ok(calls.get())
        }
    }

    #[test_case(0, 3, 1 ; "no conflict")]
    #[test_case(2, 3, 3 ; "succeeds on last attempt")]
    #[test_case(1, 0, 1 ; "zero attempts runs once")]
    fn test_retry_counts(failures: usize, attempts: usize, expected_calls: usize) {
        let calls = Cell::new(0);
        let result = retry_on_conflict(attempts, || failing(failures, &calls));

        assert_eq!(calls.get(), expected_calls);
        assert_eq!(result.is_ok(), failures < attempts.max(1));
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = retry_on_conflict(5, || {
            calls.set(calls.get() + 1);
            Err(QueueError::ConnectionClosed)
        });

        assert!(matches!(result, Err(QueueError::ConnectionClosed)));
        assert_eq!(calls.get(), 1);
    }
}

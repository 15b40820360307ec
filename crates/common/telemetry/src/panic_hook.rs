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

//! Panics reported through `tracing`, with an optional deadlock watchdog
//! behind the `deadlock_detection` feature.

use std::{
    panic,
    sync::{
        Once,
        atomic::{AtomicU64, Ordering},
    },
};

use backtrace::Backtrace;

static PANICS: AtomicU64 = AtomicU64::new(0);

/// Panics observed since [`set_panic_hook`] was installed.
#[must_use]
pub fn panic_count() -> u64 { PANICS.load(Ordering::Relaxed) }

/// Log every panic as an error event with its backtrace, then defer to the
/// previously installed hook. Installing twice is a no-op.
pub fn set_panic_hook() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = format!("{:?}", Backtrace::new());
            match info.location() {
                Some(location) => tracing::error!(
                    message = %info,
                    backtrace = %backtrace,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                ),
                None => tracing::error!(message = %info, backtrace = %backtrace),
            }
            PANICS.fetch_add(1, Ordering::Relaxed);
            previous(info);
        }));

        #[cfg(feature = "deadlock_detection")]
        spawn_deadlock_watchdog();
    });
}

#[cfg(feature = "deadlock_detection")]
fn spawn_deadlock_watchdog() {
    use std::time::Duration;

    let spawned = std::thread::Builder::new()
        .name("deadlock-watchdog".to_string())
        .spawn(|| {
            loop {
                std::thread::sleep(Duration::from_secs(5));
                let deadlocks = parking_lot::deadlock::check_deadlock();
                if deadlocks.is_empty() {
                    continue;
                }

                tracing::error!(count = deadlocks.len(), "Deadlocks detected");
                for (i, threads) in deadlocks.iter().enumerate() {
                    for t in threads {
                        tracing::error!(deadlock = i, thread = ?t.thread_id(), backtrace = ?t.backtrace());
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Failed to start deadlock watchdog");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_is_counted() {
        set_panic_hook();
        set_panic_hook();

        let before = panic_count();
        let result = std::panic::catch_unwind(|| panic!("boom"));
        assert!(result.is_err());
        assert!(panic_count() > before);
    }
}

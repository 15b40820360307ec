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

//! Durable FIFO queue with per-item acknowledgement.
//!
//! Items are delivered at least once: an item handed out by
//! [`Connection::get`] is only gone for good once acknowledged. Items
//! pending on a connection that closes, is dropped, or dies with the process
//! return to the head of the queue in their original order.
//!
//! Any number of threads share one queue, each through its own
//! [`Connection`].

mod ack;
pub mod builder;
pub mod config;
mod connection;
pub mod error;
mod index;
mod manager;
mod record;
mod recovery;
mod retry;
mod signal;

pub use ackq_common_storage_kv::FlushMode;
pub use builder::QueueBuilder;
pub use config::QueueConfig;
pub use connection::Connection;
pub use error::{QueueError, Result};
pub use manager::{AckQueue, QueueStats};
pub use record::Item;
pub use recovery::RecoveryReport;
pub use retry::retry_on_conflict;

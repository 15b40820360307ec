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

//! CRC32 checksums for log frames and snapshot bodies.
//!
//! A frame checksum covers the length prefix as well as the payload so a
//! torn length field is detected the same way as a torn payload.

use crc32fast::Hasher;

/// Checksum of a log frame: length prefix followed by payload.
#[inline]
pub(crate) fn frame_crc(length: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

#[inline]
pub(crate) fn verify_frame_crc(length: u32, payload: &[u8], expected: u32) -> bool {
    frame_crc(length, payload) == expected
}

/// Checksum of a snapshot body.
#[inline]
pub(crate) fn body_crc(body: &[u8]) -> u32 { crc32fast::hash(body) }

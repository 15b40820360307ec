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

//! Append-only write-ahead log.
//!
//! ## On-Disk Frame Format
//!
//! ```text
//! ┌─────────────────┬──────────────────────┬─────────────────┐
//! │  Length (4B)    │   Payload (variable) │   CRC32 (4B)    │
//! │  little-endian  │   encoded record     │   little-endian │
//! └─────────────────┴──────────────────────┴─────────────────┘
//! ```
//!
//! One frame holds one committed transaction. A frame is either entirely
//! valid or it marks the end of the log: replay stops at the first truncated
//! or mismatching frame and the writer cuts the file back to that point.

use std::{
    fs::{File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    FlushMode, Result,
    crc::{frame_crc, verify_frame_crc},
    error::RecordTooLargeSnafu,
};

/// File name of the log inside the store directory.
pub(crate) const WAL_FILE: &str = "wal.log";

/// Size of the length prefix in bytes (4 bytes = u32).
pub(crate) const FRAME_LENGTH_SIZE: usize = 4;

/// Size of the CRC32 checksum in bytes.
pub(crate) const FRAME_CRC_SIZE: usize = 4;

/// Total on-disk size of a frame carrying `payload_len` bytes.
#[inline]
pub(crate) const fn frame_disk_size(payload_len: usize) -> usize {
    FRAME_LENGTH_SIZE + payload_len + FRAME_CRC_SIZE
}

/// Result of scanning an existing log.
#[derive(Debug, Default)]
pub(crate) struct WalScan {
    /// Payloads of every intact frame, in log order.
    pub records:   Vec<Vec<u8>>,
    /// Byte length of the intact prefix of the log.
    pub valid_len: u64,
    /// Whether bytes past `valid_len` were discarded.
    pub torn:      bool,
}

/// Read every intact frame of the log at `path`.
///
/// A missing file is an empty log.
pub(crate) fn scan(path: &Path, verify_crc: bool) -> Result<WalScan> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WalScan::default()),
        Err(e) => return Err(e.into()),
    };

    let mut position = 0usize;
    let mut records = Vec::new();

    while position + FRAME_LENGTH_SIZE <= data.len() {
        let mut length_buf = [0u8; FRAME_LENGTH_SIZE];
        length_buf.copy_from_slice(&data[position..position + FRAME_LENGTH_SIZE]);
        let length = u32::from_le_bytes(length_buf);

        let total_size = frame_disk_size(length as usize);
        if position + total_size > data.len() {
            warn!(
                position,
                length,
                file_size = data.len(),
                "Truncated frame found at end of log"
            );
            break;
        }

        let payload_start = position + FRAME_LENGTH_SIZE;
        let payload = &data[payload_start..payload_start + length as usize];

        if verify_crc {
            let mut crc_buf = [0u8; FRAME_CRC_SIZE];
            crc_buf.copy_from_slice(&data[payload_start + length as usize..position + total_size]);
            if !verify_frame_crc(length, payload, u32::from_le_bytes(crc_buf)) {
                warn!(
                    position,
                    record = records.len(),
                    "CRC verification failed, stopping replay at this point"
                );
                break;
            }
        }

        records.push(payload.to_vec());
        position += total_size;
    }

    debug!(path = ?path, records = records.len(), position, "Log scan complete");

    Ok(WalScan {
        records,
        valid_len: position as u64,
        torn: position < data.len(),
    })
}

/// Appends committed records to the log.
pub(crate) struct WalWriter {
    file:          File,
    path:          PathBuf,
    /// Byte offset of the next frame.
    position:      u64,
    flush_mode:    FlushMode,
    /// Bytes appended since the last sync.
    pending_bytes: usize,
}

impl WalWriter {
    /// Open the log for appending at `position`, discarding anything past it.
    pub fn open(path: &Path, position: u64, flush_mode: FlushMode) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() != position {
            file.set_len(position)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(position))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            position,
            flush_mode,
            pending_bytes: 0,
        })
    }

    /// Append one record as a frame.
    ///
    /// On failure the log is cut back to its previous length so no partial
    /// frame is left behind.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        let Ok(length) = u32::try_from(payload.len()) else {
            return RecordTooLargeSnafu {
                size: payload.len(),
            }
            .fail();
        };

        let mut frame = Vec::with_capacity(frame_disk_size(payload.len()));
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&frame_crc(length, payload).to_le_bytes());

        let pending = self.pending_bytes + frame.len();
        let sync = self.flush_mode.should_sync(pending);

        let written = self
            .file
            .write_all(&frame)
            .and_then(|()| if sync { self.file.sync_data() } else { Ok(()) });

        if let Err(e) = written {
            warn!(path = ?self.path, position = self.position, error = %e, "Log append failed, truncating");
            self.file.set_len(self.position)?;
            self.file.seek(SeekFrom::Start(self.position))?;
            return Err(e.into());
        }

        self.position += frame.len() as u64;
        self.pending_bytes = if sync { 0 } else { pending };
        Ok(())
    }

    /// Force everything appended so far to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.pending_bytes = 0;
        Ok(())
    }

    /// Empty the log once its records are covered by a snapshot.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        self.position = 0;
        self.pending_bytes = 0;
        Ok(())
    }

    /// Current length of the log in bytes.
    pub const fn position(&self) -> u64 { self.position }
}

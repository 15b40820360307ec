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

//! Dual-slot snapshots of the committed state.
//!
//! Two snapshot files are written alternately and `snapshot.current` names
//! the valid one, so at least one complete snapshot exists at any crash
//! point. The pointer is replaced by rename. If it is missing, empty or
//! unreadable, the valid slot with the highest `last_txid` is used.
//!
//! ## Binary Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                       │
//! ├──────────────────┬─────────────────────────────────────┤
//! │ magic: [u8; 4]   │ "AKSN"                              │
//! │ version: u32     │ Format version, currently 1         │
//! │ last_txid: u64   │ Last transaction folded in          │
//! │ entries: u64     │ Number of key/value entries         │
//! │ checksum: u32    │ CRC32 of the body                   │
//! │ reserved: [u8;4] │ Reserved for future use             │
//! ├──────────────────┴─────────────────────────────────────┤
//! │ Body: encoded entries (variable)                       │
//! └────────────────────────────────────────────────────────┘
//! ```

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use snafu::ensure;
use tracing::{debug, info, warn};

use crate::{
    Result,
    crc::body_crc,
    error::{CorruptedSnafu, UnsupportedVersionSnafu},
};

/// Magic bytes identifying a snapshot file.
pub(crate) const SNAPSHOT_MAGIC: [u8; 4] = *b"AKSN";

/// Current snapshot format version.
pub(crate) const SNAPSHOT_VERSION: u32 = 1;

/// Size of the snapshot header in bytes.
pub(crate) const SNAPSHOT_HEADER_SIZE: usize = 32;

const SNAPSHOT_1: &str = "snapshot.1";
const SNAPSHOT_2: &str = "snapshot.2";
const SNAPSHOT_CURRENT: &str = "snapshot.current";
const SNAPSHOT_CURRENT_TMP: &str = "snapshot.current.tmp";

/// A decoded snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SnapshotImage {
    /// Every transaction up to and including this one is in `body`.
    pub last_txid: u64,
    pub entries:   u64,
    pub body:      Vec<u8>,
}

impl SnapshotImage {
    pub fn serialize(&self) -> Vec<u8> {
        let mut header = [0u8; SNAPSHOT_HEADER_SIZE];
        header[0..4].copy_from_slice(&SNAPSHOT_MAGIC);
        header[4..8].copy_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        header[8..16].copy_from_slice(&self.last_txid.to_le_bytes());
        header[16..24].copy_from_slice(&self.entries.to_le_bytes());
        header[24..28].copy_from_slice(&body_crc(&self.body).to_le_bytes());

        let mut result = Vec::with_capacity(SNAPSHOT_HEADER_SIZE + self.body.len());
        result.extend_from_slice(&header);
        result.extend_from_slice(&self.body);
        result
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= SNAPSHOT_HEADER_SIZE,
            CorruptedSnafu {
                reason: format!("snapshot too short: {} bytes", data.len()),
            }
        );
        ensure!(
            data[0..4] == SNAPSHOT_MAGIC,
            CorruptedSnafu {
                reason: "invalid snapshot magic".to_string(),
            }
        );

        let version = u32::from_le_bytes(le_bytes(&data[4..8]));
        ensure!(version == SNAPSHOT_VERSION, UnsupportedVersionSnafu { version });

        let last_txid = u64::from_le_bytes(le_bytes(&data[8..16]));
        let entries = u64::from_le_bytes(le_bytes(&data[16..24]));
        let checksum = u32::from_le_bytes(le_bytes(&data[24..28]));

        let body = &data[SNAPSHOT_HEADER_SIZE..];
        ensure!(
            body_crc(body) == checksum,
            CorruptedSnafu {
                reason: "snapshot checksum mismatch".to_string(),
            }
        );

        Ok(Self {
            last_txid,
            entries,
            body: body.to_vec(),
        })
    }
}

fn le_bytes<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(slice);
    buf
}

pub(crate) struct SnapshotWriter {
    base_path:    PathBuf,
    current_slot: u8,
}

impl SnapshotWriter {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let mut writer = Self {
            base_path:    base_path.as_ref().to_path_buf(),
            current_slot: 0,
        };
        writer.current_slot = writer.locate()?.map_or(0, |(slot, _)| slot);
        Ok(writer)
    }

    pub fn write(&mut self, image: &SnapshotImage) -> Result<()> {
        let next_slot = if self.current_slot == 1 { 2 } else { 1 };
        let snapshot_path = self.slot_path(next_slot);

        write_synced(&snapshot_path, &image.serialize())?;

        let tmp_path = self.base_path.join(SNAPSHOT_CURRENT_TMP);
        write_synced(&tmp_path, &[next_slot])?;
        fs::rename(&tmp_path, self.base_path.join(SNAPSHOT_CURRENT))?;
        sync_dir(&self.base_path)?;

        self.current_slot = next_slot;

        debug!(slot = next_slot, path = ?snapshot_path, last_txid = image.last_txid, "Snapshot written");
        Ok(())
    }

    pub fn read_latest(&self) -> Result<Option<SnapshotImage>> {
        Ok(self.locate()?.map(|(_, image)| image))
    }

    /// The snapshot named by the pointer, or the newest valid slot when the
    /// pointer cannot be used.
    fn locate(&self) -> Result<Option<(u8, SnapshotImage)>> {
        let Some(slot) = self.read_pointer()? else {
            return self.newest_valid_slot();
        };

        let snapshot_path = self.slot_path(slot);
        ensure!(
            snapshot_path.exists(),
            CorruptedSnafu {
                reason: format!("snapshot.{slot} does not exist"),
            }
        );
        let image = SnapshotImage::deserialize(&fs::read(&snapshot_path)?)?;
        Ok(Some((slot, image)))
    }

    fn read_pointer(&self) -> Result<Option<u8>> {
        let current_path = self.base_path.join(SNAPSHOT_CURRENT);
        let data = match fs::read(&current_path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match data.as_slice() {
            [slot @ (1 | 2)] => Ok(Some(*slot)),
            _ => {
                warn!(path = ?current_path, len = data.len(), "Ignoring unreadable snapshot pointer");
                Ok(None)
            }
        }
    }

    fn newest_valid_slot(&self) -> Result<Option<(u8, SnapshotImage)>> {
        let mut newest: Option<(u8, SnapshotImage)> = None;
        for slot in [1, 2] {
            let snapshot_path = self.slot_path(slot);
            let data = match fs::read(&snapshot_path) {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match SnapshotImage::deserialize(&data) {
                Ok(image) => {
                    if newest.as_ref().is_none_or(|(_, best)| image.last_txid > best.last_txid) {
                        newest = Some((slot, image));
                    }
                }
                Err(e) => warn!(path = ?snapshot_path, error = %e, "Skipping invalid snapshot"),
            }
        }

        if let Some((slot, image)) = &newest {
            info!(slot, last_txid = image.last_txid, "Snapshot pointer unusable, using newest valid slot");
        }
        Ok(newest)
    }

    fn slot_path(&self, slot: u8) -> PathBuf {
        match slot {
            1 => self.base_path.join(SNAPSHOT_1),
            2 => self.base_path.join(SNAPSHOT_2),
            _ => unreachable!("invalid slot: {}", slot),
        }
    }
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Make a rename inside `dir` durable.
fn sync_dir(dir: &Path) -> Result<()> {
    if cfg!(unix) {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

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

//! Value encoding shared by the log, the snapshots and typed accessors.
//!
//! Everything is encoded with bincode's standard configuration through its
//! serde integration.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, ensure};

use crate::{
    Result,
    error::{CorruptedSnafu, DecodeSnafu, EncodeSnafu},
};

/// Encode a value into an owned buffer.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    encode_to_vec(value).map(Bytes::from)
}

pub(crate) fn encode_to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).context(EncodeSnafu)
}

/// Decode a value, rejecting trailing bytes.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let (value, read) =
        bincode::serde::decode_from_slice(data, bincode::config::standard()).context(DecodeSnafu)?;
    ensure!(
        read == data.len(),
        CorruptedSnafu {
            reason: format!("{} trailing bytes after record", data.len() - read),
        }
    );
    Ok(value)
}

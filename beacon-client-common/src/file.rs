// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./file_test.rs"]
mod tests;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::Path;

/// Size of the trailing CRC appended by `write_checksummed_data`.
pub const CHECKSUM_LEN: usize = 4;

/// Writes the data and appends a CRC checksum at the end of the slice. The checksum is a 4-byte
/// little-endian CRC32 checksum of the data.
#[must_use]
pub fn write_checksummed_data(bytes: &[u8]) -> Vec<u8> {
  let crc = crc32fast::hash(bytes);

  let mut result = Vec::with_capacity(bytes.len() + CHECKSUM_LEN);
  result.extend_from_slice(bytes);
  result.extend_from_slice(&crc.to_le_bytes());
  result
}

/// Reads the data and checks the CRC checksum at the end of the slice. If the checksum is valid, it
/// returns the data.
pub fn read_checksummed_data(bytes: &[u8]) -> anyhow::Result<&[u8]> {
  if bytes.len() < CHECKSUM_LEN {
    anyhow::bail!("data too small to contain CRC checksum");
  }

  let (data, crc_bytes) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
  let crc = u32::from_le_bytes(crc_bytes.try_into()?);
  let expected_crc = crc32fast::hash(data);

  if expected_crc != crc {
    anyhow::bail!("crc mismatch");
  }

  Ok(data)
}

/// Serializes a value with bincode and appends a checksum.
pub fn write_checksummed_record<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
  let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
  Ok(write_checksummed_data(&bytes))
}

/// Inverse of `write_checksummed_record`. Fails on checksum mismatch or trailing garbage.
pub fn read_checksummed_record<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<T> {
  let data = read_checksummed_data(bytes)?;
  let (value, read) =
    bincode::serde::decode_from_slice::<T, _>(data, bincode::config::standard())?;
  if read != data.len() {
    anyhow::bail!("unexpected trailing data in record");
  }
  Ok(value)
}

/// Replaces the file at `path` with `data` such that readers observe either the old or the new
/// contents, never a partial write.
pub fn write_file_atomically(path: &Path, data: &[u8]) -> anyhow::Result<()> {
  let tmp_path = path.with_extension("tmp");
  {
    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
  }
  std::fs::rename(&tmp_path, path)?;
  Ok(())
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./attempt_store_test.rs"]
mod attempt_store_test;

use crate::retry::DeliveryAttempt;
use beacon_client_common::file::{read_checksummed_record, write_checksummed_record};
use beacon_client_common::file_system::FileSystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ATTEMPTS_DIRECTORY: &str = "attempts";
const SEQUENCE_FILE: &str = "sequence";
const BATCH_FILE_PREFIX: &str = "batch-";
const TEMP_SUFFIX: &str = ".tmp";

/// What a previous process left behind.
#[derive(Debug, Default)]
pub struct Restored {
  /// Undelivered attempts, oldest first.
  pub attempts: Vec<DeliveryAttempt>,
  pub next_sequence: u64,
}

//
// AttemptStore
//

/// Persists sealed batches until they are delivered or dropped, one checksummed file per batch,
/// together with the next batch sequence number so numbers are never reused across restarts.
pub struct AttemptStore {
  fs: Arc<dyn FileSystem>,
  directory: PathBuf,
}

impl AttemptStore {
  #[must_use]
  pub fn new(fs: Arc<dyn FileSystem>) -> Self {
    Self {
      fs,
      directory: PathBuf::from(ATTEMPTS_DIRECTORY),
    }
  }

  pub async fn load(&self) -> anyhow::Result<Restored> {
    self.fs.create_dir(&self.directory).await?;

    let mut restored = Restored::default();
    for name in self.fs.list_files(&self.directory).await? {
      let path = self.directory.join(&name);
      if name.ends_with(TEMP_SUFFIX) {
        // An interrupted write; the previous version, if any, is still in place.
        self.fs.delete_file(&path).await?;
        continue;
      }

      if name == SEQUENCE_FILE {
        match self.read::<u64>(&path).await {
          Ok(next) => restored.next_sequence = restored.next_sequence.max(next),
          Err(e) => log::warn!("ignoring unreadable batch sequence file: {e:#}"),
        }
        continue;
      }

      if !name.starts_with(BATCH_FILE_PREFIX) {
        continue;
      }

      match self.read::<DeliveryAttempt>(&path).await {
        Ok(attempt) => {
          restored.next_sequence = restored.next_sequence.max(attempt.sequence() + 1);
          restored.attempts.push(attempt);
        },
        Err(e) => {
          log::warn!("discarding unreadable batch file {name}: {e:#}");
          self.fs.delete_file(&path).await?;
        },
      }
    }

    restored.attempts.sort_by_key(DeliveryAttempt::sequence);
    log::debug!(
      "restored {} undelivered batches, next sequence {}",
      restored.attempts.len(),
      restored.next_sequence
    );
    Ok(restored)
  }

  /// Records that the batch's sequence number is taken, then persists the batch. The counter goes
  /// first so a failed insert leaves no batch behind, at most a skipped sequence number.
  pub async fn insert(&self, attempt: &DeliveryAttempt) -> anyhow::Result<()> {
    self
      .write(
        &self.directory.join(SEQUENCE_FILE),
        &write_checksummed_record(&(attempt.sequence() + 1))?,
      )
      .await?;
    self.update(attempt).await
  }

  /// Rewrites a stored attempt, e.g. after its retry schedule changed.
  pub async fn update(&self, attempt: &DeliveryAttempt) -> anyhow::Result<()> {
    self
      .write(
        &self.batch_path(attempt.sequence()),
        &write_checksummed_record(attempt)?,
      )
      .await
  }

  pub async fn remove(&self, sequence: u64) -> anyhow::Result<()> {
    self.fs.delete_file(&self.batch_path(sequence)).await
  }

  fn batch_path(&self, sequence: u64) -> PathBuf {
    self
      .directory
      .join(format!("{BATCH_FILE_PREFIX}{sequence:020}"))
  }

  async fn read<T: serde::de::DeserializeOwned>(&self, path: &Path) -> anyhow::Result<T> {
    read_checksummed_record(&self.fs.read_file(path).await?)
  }

  // Write to a temporary file and rename over the target so a crash never leaves a torn file.
  async fn write(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp);

    self.fs.write_file(&temp, data).await?;
    self.fs.rename(&temp, path).await
  }
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::AttemptStore;
use crate::retry::{DeliveryAttempt, RetryController, RetryPolicy};
use crate::test::{START, event};
use beacon_client_common::file_system::{FileSystem, TestFileSystem};
use beacon_delivery::DeliveryError;
use beacon_events::Batch;
use beacon_stats::Collector;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn attempt(sequence: u64) -> DeliveryAttempt {
  DeliveryAttempt::new(
    Batch {
      sequence,
      events: vec![event(&format!("event-{sequence}"))],
    },
    START,
  )
}

fn sequences(attempts: &[DeliveryAttempt]) -> Vec<u64> {
  attempts.iter().map(DeliveryAttempt::sequence).collect()
}

#[tokio::test]
async fn empty() {
  let fs = Arc::new(TestFileSystem::new().unwrap());
  let restored = AttemptStore::new(fs.clone()).load().await.unwrap();
  assert!(restored.attempts.is_empty());
  assert_eq!(restored.next_sequence, 0);
  assert!(fs.exists(Path::new("attempts")).await.unwrap());
}

#[tokio::test]
async fn round_trip_in_sequence_order() {
  let fs = Arc::new(TestFileSystem::new().unwrap());
  let store = AttemptStore::new(fs.clone());
  store.load().await.unwrap();

  // Zero padded names keep listing order numeric past one digit.
  for sequence in [10, 2, 9] {
    store.insert(&attempt(sequence)).await.unwrap();
  }

  let restored = AttemptStore::new(fs).load().await.unwrap();
  assert_eq!(sequences(&restored.attempts), [2, 9, 10]);
  assert_eq!(restored.attempts[0], attempt(2));
  assert_eq!(restored.next_sequence, 11);
}

#[tokio::test]
async fn sequence_survives_removal() {
  let fs = Arc::new(TestFileSystem::new().unwrap());
  let store = AttemptStore::new(fs.clone());
  store.load().await.unwrap();

  store.insert(&attempt(0)).await.unwrap();
  store.insert(&attempt(1)).await.unwrap();
  store.remove(0).await.unwrap();
  store.remove(1).await.unwrap();

  let restored = AttemptStore::new(fs).load().await.unwrap();
  assert!(restored.attempts.is_empty());
  assert_eq!(restored.next_sequence, 2);
}

#[tokio::test]
async fn update_keeps_retry_schedule() {
  let fs = Arc::new(TestFileSystem::new().unwrap());
  let store = AttemptStore::new(fs.clone());
  store.load().await.unwrap();

  store.insert(&attempt(5)).await.unwrap();
  store.insert(&attempt(6)).await.unwrap();

  let controller = RetryController::new(
    RetryPolicy {
      jitter: std::time::Duration::ZERO,
      ..RetryPolicy::from_tuning(&crate::config::Tuning::default())
    },
    &Collector::default().scope("test"),
  );
  let mut first = attempt(5);
  controller.begin(&mut first, START);
  controller.complete(&mut first, &Err(DeliveryError::ServerError(500)), START);
  store.update(&first).await.unwrap();

  let restored = AttemptStore::new(fs).load().await.unwrap();
  assert_eq!(restored.attempts[0].attempt_count(), 1);
  assert_eq!(
    restored.attempts[0].next_eligible_at(),
    first.next_eligible_at()
  );
  // Updating an older attempt does not move the sequence back.
  assert_eq!(restored.next_sequence, 7);
}

#[tokio::test]
async fn corrupt_and_partial_files_are_discarded() {
  let fs = Arc::new(TestFileSystem::new().unwrap());
  let store = AttemptStore::new(fs.clone());
  store.load().await.unwrap();
  store.insert(&attempt(0)).await.unwrap();
  store.insert(&attempt(1)).await.unwrap();

  let path = Path::new("attempts/batch-00000000000000000000");
  let mut bytes = fs.read_file(path).await.unwrap();
  let last = bytes.len() - 1;
  bytes[last] ^= 0xff;
  fs.write_file(path, &bytes).await.unwrap();
  fs.write_file(Path::new("attempts/batch-00000000000000000002.tmp"), b"partial")
    .await
    .unwrap();

  let restored = AttemptStore::new(fs.clone()).load().await.unwrap();
  assert_eq!(sequences(&restored.attempts), [1]);
  assert_eq!(restored.next_sequence, 2);
  assert_eq!(
    fs.list_files(Path::new("attempts")).await.unwrap(),
    ["batch-00000000000000000001", "sequence"]
  );
}

#[tokio::test]
async fn write_failure_is_reported() {
  let fs = Arc::new(TestFileSystem::new().unwrap());
  let store = AttemptStore::new(fs.clone());
  store.load().await.unwrap();

  fs.disk_full.store(true, Ordering::Relaxed);
  assert!(store.insert(&attempt(0)).await.is_err());
  fs.disk_full.store(false, Ordering::Relaxed);

  let restored = AttemptStore::new(fs).load().await.unwrap();
  assert!(restored.attempts.is_empty());
}

#[tokio::test]
async fn failed_insert_leaves_no_batch() {
  let fs = Arc::new(TestFileSystem::new().unwrap());
  let store = AttemptStore::new(fs.clone());
  store.load().await.unwrap();

  fs.fail_next_write("sequence.tmp");
  assert!(store.insert(&attempt(0)).await.is_err());
  let restored = AttemptStore::new(fs.clone()).load().await.unwrap();
  assert!(restored.attempts.is_empty());
  assert_eq!(restored.next_sequence, 0);

  // A failed batch write only burns the sequence number.
  fs.fail_next_write("batch-00000000000000000000.tmp");
  assert!(store.insert(&attempt(0)).await.is_err());
  let restored = AttemptStore::new(fs.clone()).load().await.unwrap();
  assert!(restored.attempts.is_empty());
  assert_eq!(restored.next_sequence, 1);

  store.insert(&attempt(1)).await.unwrap();
  let restored = AttemptStore::new(fs).load().await.unwrap();
  assert_eq!(sequences(&restored.attempts), [1]);
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::{EventKind, Tags};
use assert_matches::assert_matches;
use beacon_time::TestTimeProvider;
use time::ext::NumericalDuration;
use time::macros::datetime;

fn setup() -> (TestTimeProvider, TimingRegistry) {
  let time_provider = TestTimeProvider::new(datetime!(2024-03-01 10:00 UTC));
  let registry = TimingRegistry::new(Arc::new(time_provider.clone()), DEFAULT_TIMING_TTL);
  (time_provider, registry)
}

#[test]
fn duration_uses_monotonic_clock() {
  let (time_provider, registry) = setup();

  let handle = registry.start("network", "fetch").unwrap();
  time_provider.advance(1500.milliseconds());
  // A wall clock jump does not affect the measured duration.
  time_provider.set_time(datetime!(2020-01-01 00:00 UTC));

  let event = registry.finish(handle, [("status", "ok")]).unwrap();
  assert_eq!(event.kind(), EventKind::TimedEvent);
  assert_eq!(event.duration_ms(), Some(1500));
  assert_eq!(event.timestamp().wall, datetime!(2024-03-01 10:00 UTC));
  assert_eq!(event.tags()["status"], "ok");
  assert_eq!(registry.pending(), 0);
}

#[test]
fn explicit_duration() {
  let (_, registry) = setup();
  let handle = registry.start("c", "n").unwrap();
  let event = registry.finish_with_duration(handle, 42, Tags::new()).unwrap();
  assert_eq!(event.duration_ms(), Some(42));
}

#[test]
fn host_timestamps() {
  let (_, registry) = setup();

  let handle = registry.start_at("c", "n", 10_000).unwrap();
  let event = registry.finish_at(handle, 12_500, Tags::new()).unwrap();
  assert_eq!(event.duration_ms(), Some(2_500));
  assert_eq!(event.timestamp().wall.unix_timestamp_ms(), 10_000);

  // Host clocks may go backwards.
  let handle = registry.start_at("c", "n", 10_000).unwrap();
  let event = registry.finish_at(handle, 9_000, Tags::new()).unwrap();
  assert_eq!(event.duration_ms(), Some(1_000));
}

#[test]
fn foreign_handle_is_invalid() {
  let (_, registry) = setup();
  let (_, other) = setup();

  let handle = other.start("c", "n").unwrap();
  assert_matches!(
    registry.finish(handle, Tags::new()),
    Err(TimingError::InvalidHandle)
  );
  assert_eq!(other.pending(), 1);
}

#[test]
fn expired_handle_is_invalid() {
  let (time_provider, registry) = setup();

  let handle = registry.start("c", "n").unwrap();
  assert!(registry.is_pending(&handle));
  time_provider.advance(DEFAULT_TIMING_TTL + 1.seconds());
  assert!(!registry.is_pending(&handle));
  assert_eq!(registry.pending(), 0);
  assert_matches!(
    registry.finish(handle, Tags::new()),
    Err(TimingError::InvalidHandle)
  );
}

#[test]
fn start_validates() {
  let (_, registry) = setup();
  assert_matches!(
    registry.start("", "n"),
    Err(ValidationError::EmptyField("category"))
  );
  assert_eq!(registry.pending(), 0);

  let handle = registry.start("c", "n").unwrap();
  assert_matches!(
    registry.finish(handle, [("", "v")]),
    Err(TimingError::Validation(ValidationError::EmptyTagKey))
  );
}

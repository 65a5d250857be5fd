// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./lib_test.rs"]
mod lib_test;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

//
// OffsetDateTimeExt
//

pub trait OffsetDateTimeExt {
  #[must_use]
  fn unix_timestamp_ms(&self) -> i64;
}

impl OffsetDateTimeExt for OffsetDateTime {
  fn unix_timestamp_ms(&self) -> i64 {
    self.unix_timestamp() * 1_000 + i64::from(self.nanosecond() / 1_000_000)
  }
}

/// Converts milliseconds since the unix epoch back into a timestamp. Out of range values clamp to
/// the epoch.
#[must_use]
pub fn from_unix_timestamp_ms(ms: i64) -> OffsetDateTime {
  OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
    .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

//
// TimeProvider
//

/// Source of both clocks used by the pipeline: the wall clock, which is stamped onto events and
/// persisted, and a monotonic uptime which is used to measure durations and is immune to wall
/// clock adjustments.
#[async_trait::async_trait]
pub trait TimeProvider: Send + Sync {
  fn now(&self) -> OffsetDateTime;
  fn uptime(&self) -> Duration;
  async fn sleep(&self, duration: time::Duration);
}

//
// SystemTimeProvider
//

pub struct SystemTimeProvider {
  start: std::time::Instant,
}

impl Default for SystemTimeProvider {
  fn default() -> Self {
    Self {
      start: std::time::Instant::now(),
    }
  }
}

#[async_trait::async_trait]
impl TimeProvider for SystemTimeProvider {
  fn now(&self) -> OffsetDateTime {
    OffsetDateTime::now_utc()
  }

  fn uptime(&self) -> Duration {
    self.start.elapsed()
  }

  async fn sleep(&self, duration: time::Duration) {
    if duration.is_positive() {
      tokio::time::sleep(duration.unsigned_abs()).await;
    }
  }
}

//
// TestTimeProvider
//

struct TestClocks {
  now: OffsetDateTime,
  uptime: Duration,
}

/// Manually driven clocks for tests. Clones share the same clocks.
#[derive(Clone)]
pub struct TestTimeProvider {
  inner: Arc<Mutex<TestClocks>>,
}

impl TestTimeProvider {
  #[must_use]
  pub fn new(now: OffsetDateTime) -> Self {
    Self {
      inner: Arc::new(Mutex::new(TestClocks {
        now,
        uptime: Duration::ZERO,
      })),
    }
  }

  /// Moves both clocks forward.
  pub fn advance(&self, duration: time::Duration) {
    let mut clocks = self.inner.lock();
    clocks.now += duration;
    clocks.uptime += duration.unsigned_abs();
  }

  /// Jumps the wall clock only, as a user changing the device time would.
  pub fn set_time(&self, new_time: OffsetDateTime) {
    self.inner.lock().now = new_time;
  }
}

#[async_trait::async_trait]
impl TimeProvider for TestTimeProvider {
  fn now(&self) -> OffsetDateTime {
    self.inner.lock().now
  }

  fn uptime(&self) -> Duration {
    self.inner.lock().uptime
  }

  async fn sleep(&self, duration: time::Duration) {
    // Sleeping moves both clocks instantly, then yields so that a loop around sleep cannot starve
    // the rest of the test.
    if duration.is_positive() {
      self.advance(duration);
    }
    tokio::task::yield_now().await;
  }
}

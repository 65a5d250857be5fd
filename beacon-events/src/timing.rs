// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./timing_test.rs"]
mod timing_test;

use crate::{Event, EventTimestamp, ValidationError};
use beacon_time::{OffsetDateTimeExt, TimeProvider, from_unix_timestamp_ms};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// How long a started timing stays valid if it is never tracked.
pub const DEFAULT_TIMING_TTL: time::Duration = time::Duration::hours(24);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TimingError {
  #[error("unknown, expired or already tracked timing handle")]
  InvalidHandle,
  #[error(transparent)]
  Validation(#[from] ValidationError),
}

//
// TimingHandle
//

/// Token returned when a timing starts. Tracking consumes it, and a handle only ever resolves in
/// the registry that issued it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TimingHandle {
  id: Uuid,
}

impl TimingHandle {
  #[must_use]
  pub const fn id(&self) -> Uuid {
    self.id
  }
}

struct PendingTiming {
  category: String,
  name: String,
  started: EventTimestamp,

  // Start time as reported by a host runtime, in ms since the epoch. When set, durations are
  // computed against host supplied end times instead of our own clock.
  host_start_ms: Option<i64>,
}

//
// TimingRegistry
//

/// Tracks timings that have been started but not yet tracked.
pub struct TimingRegistry {
  time_provider: Arc<dyn TimeProvider>,
  ttl: time::Duration,
  pending: Mutex<HashMap<Uuid, PendingTiming>>,
}

impl TimingRegistry {
  #[must_use]
  pub fn new(time_provider: Arc<dyn TimeProvider>, ttl: time::Duration) -> Self {
    Self {
      time_provider,
      ttl,
      pending: Mutex::default(),
    }
  }

  /// Starts timing now.
  pub fn start(
    &self,
    category: impl Into<String>,
    name: impl Into<String>,
  ) -> Result<TimingHandle, ValidationError> {
    let started = EventTimestamp::now(self.time_provider.as_ref());
    self.insert(category.into(), name.into(), started, None)
  }

  /// Starts a timing whose start time was taken by the host, in ms since the epoch.
  pub fn start_at(
    &self,
    category: impl Into<String>,
    name: impl Into<String>,
    start_ms: i64,
  ) -> Result<TimingHandle, ValidationError> {
    let started = EventTimestamp {
      wall: from_unix_timestamp_ms(start_ms),
      uptime: self.time_provider.uptime(),
    };
    self.insert(category.into(), name.into(), started, Some(start_ms))
  }

  fn insert(
    &self,
    category: String,
    name: String,
    started: EventTimestamp,
    host_start_ms: Option<i64>,
  ) -> Result<TimingHandle, ValidationError> {
    if category.is_empty() {
      return Err(ValidationError::EmptyField("category"));
    }
    if name.is_empty() {
      return Err(ValidationError::EmptyField("name"));
    }

    let id = Uuid::new_v4();
    let mut pending = self.pending.lock();
    self.purge_expired(&mut pending);
    pending.insert(
      id,
      PendingTiming {
        category,
        name,
        started,
        host_start_ms,
      },
    );
    Ok(TimingHandle { id })
  }

  /// Completes the timing, measuring the duration on the monotonic clock.
  pub fn finish<K: Into<String>, V: Into<String>>(
    &self,
    handle: TimingHandle,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<Event, TimingError> {
    let timing = self.take(&handle)?;
    let elapsed = self
      .time_provider
      .uptime()
      .saturating_sub(timing.started.uptime);
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    Self::build(timing, tags, duration_ms)
  }

  /// Completes the timing with a duration measured by the caller.
  pub fn finish_with_duration<K: Into<String>, V: Into<String>>(
    &self,
    handle: TimingHandle,
    duration_ms: u64,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<Event, TimingError> {
    let timing = self.take(&handle)?;
    Self::build(timing, tags, duration_ms)
  }

  /// Completes the timing at a host supplied end time in ms since the epoch. The duration is the
  /// distance between start and end, whichever order the host clock put them in.
  pub fn finish_at<K: Into<String>, V: Into<String>>(
    &self,
    handle: TimingHandle,
    end_ms: i64,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<Event, TimingError> {
    let timing = self.take(&handle)?;
    let start_ms = timing
      .host_start_ms
      .unwrap_or_else(|| timing.started.wall.unix_timestamp_ms());
    Self::build(timing, tags, end_ms.abs_diff(start_ms))
  }

  /// Number of timings currently started and not expired.
  #[must_use]
  pub fn pending(&self) -> usize {
    let mut pending = self.pending.lock();
    self.purge_expired(&mut pending);
    pending.len()
  }

  /// Whether the handle can still be tracked.
  #[must_use]
  pub fn is_pending(&self, handle: &TimingHandle) -> bool {
    let mut pending = self.pending.lock();
    self.purge_expired(&mut pending);
    pending.contains_key(&handle.id)
  }

  fn take(&self, handle: &TimingHandle) -> Result<PendingTiming, TimingError> {
    let mut pending = self.pending.lock();
    self.purge_expired(&mut pending);
    pending
      .remove(&handle.id)
      .ok_or(TimingError::InvalidHandle)
  }

  fn build<K: Into<String>, V: Into<String>>(
    timing: PendingTiming,
    tags: impl IntoIterator<Item = (K, V)>,
    duration_ms: u64,
  ) -> Result<Event, TimingError> {
    Ok(Event::timed(
      timing.category,
      timing.name,
      tags,
      timing.started,
      duration_ms,
    )?)
  }

  fn purge_expired(&self, pending: &mut HashMap<Uuid, PendingTiming>) {
    let uptime = self.time_provider.uptime();
    let ttl = self.ttl.unsigned_abs();
    let before = pending.len();
    pending.retain(|_, timing| uptime.saturating_sub(timing.started.uptime) < ttl);
    let purged = before - pending.len();
    if purged > 0 {
      log::debug!(
        "purged {purged} timings started more than {}s ago",
        self.ttl.whole_seconds()
      );
    }
  }
}

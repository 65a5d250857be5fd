// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./batcher_test.rs"]
mod batcher_test;

use beacon_events::{Batch, Event};
use time::OffsetDateTime;

//
// Batcher
//

/// Groups events into batches. A batch is sealed when it holds `max_size` events, when its oldest
/// event is `max_age` old, or when flushed. Every sealed batch takes the next sequence number.
pub struct Batcher {
  max_size: usize,
  max_age: time::Duration,
  next_sequence: u64,
  pending: Vec<Event>,
}

impl Batcher {
  #[must_use]
  pub const fn new(max_size: usize, max_age: time::Duration, next_sequence: u64) -> Self {
    Self {
      max_size,
      max_age,
      next_sequence,
      pending: Vec::new(),
    }
  }

  /// Adds an event, returning the sealed batch if it filled up.
  pub fn offer(&mut self, event: Event) -> Option<Batch> {
    self.pending.push(event);
    self.limit_reached().then(|| self.take())
  }

  /// Seals whatever is pending.
  pub fn flush(&mut self) -> Option<Batch> {
    (!self.pending.is_empty()).then(|| self.take())
  }

  /// Seals the pending events if the oldest has reached the maximum age at `now`.
  pub fn poll_expired(&mut self, now: OffsetDateTime) -> Option<Batch> {
    let oldest = self.pending.first()?.timestamp().wall;
    // A wall clock that moved backwards seals rather than stalling.
    if now - oldest >= self.max_age || now < oldest {
      return Some(self.take());
    }
    None
  }

  /// When the pending events will expire, if there are any.
  #[must_use]
  pub fn deadline(&self) -> Option<OffsetDateTime> {
    self
      .pending
      .first()
      .map(|event| event.timestamp().wall + self.max_age)
  }

  #[must_use]
  pub fn pending(&self) -> usize {
    self.pending.len()
  }

  #[must_use]
  pub const fn next_sequence(&self) -> u64 {
    self.next_sequence
  }

  /// Drops the pending events without consuming a sequence number.
  pub fn reset(&mut self) {
    self.pending.clear();
  }

  fn limit_reached(&self) -> bool {
    self.pending.len() >= self.max_size
  }

  fn take(&mut self) -> Batch {
    let sequence = self.next_sequence;
    self.next_sequence += 1;
    Batch {
      sequence,
      events: std::mem::take(&mut self.pending),
    }
  }
}

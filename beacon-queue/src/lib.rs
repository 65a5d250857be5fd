// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![deny(
  clippy::expect_used,
  clippy::panic,
  clippy::todo,
  clippy::unimplemented,
  clippy::unreachable,
  clippy::unwrap_used
)]

#[cfg(test)]
#[path = "./queue_test.rs"]
mod tests;

mod journal;

use beacon_events::{Event, EventTimestamp};
use beacon_log::warn_every;
use beacon_stats::{Counter, Scope};
use journal::{Journal, JournalEntry, JournalRecord};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use time::ext::NumericalDuration;

/// Name of the journal file inside the queue directory.
pub const JOURNAL_FILE: &str = "journal";

//
// QueueFull
//

/// The event could not be admitted, even after evicting older events. This happens when the
/// journal cannot be written.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("queue full: event could not be persisted")]
pub struct QueueFull;

//
// QueueConfig
//

#[derive(Clone, Debug)]
pub struct QueueConfig {
  /// Maximum number of events held. Enqueueing beyond this evicts the oldest events.
  pub capacity: usize,

  /// Whether every journal write is synced to the device before returning.
  pub sync_writes: bool,

  /// Number of obsolete records tolerated in the journal before it is rewritten.
  pub compaction_threshold: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      capacity: 10_000,
      sync_writes: true,
      compaction_threshold: 1_000,
    }
  }
}

//
// Peeked
//

/// Events read from the head of the queue without removing them. Pass to `commit` once the
/// events are safe elsewhere.
#[derive(Debug)]
pub struct Peeked {
  pub events: Vec<Event>,
  through: u64,
}

struct Stats {
  dropped_events: Counter,
  rejected_events: Counter,
  compactions: Counter,
}

struct Inner {
  journal: Journal,
  events: VecDeque<(u64, Event)>,
  next_seq: u64,

  // Records in the journal that no longer describe a queued event.
  obsolete_records: usize,

  // Set when a write failed in a way that left the journal out of sync with memory. The next
  // write rewrites the journal in full.
  needs_rewrite: bool,
}

//
// DurableQueue
//

/// A bounded FIFO of events persisted to an append-only journal. All mutations go through a
/// single lock, so concurrent producers never interleave journal writes.
pub struct DurableQueue {
  inner: Mutex<Inner>,
  config: QueueConfig,
  stats: Stats,
}

impl DurableQueue {
  /// Opens the queue stored in `directory`, replaying the journal left by a previous process.
  pub fn open(directory: &Path, config: QueueConfig, scope: &Scope) -> anyhow::Result<Self> {
    anyhow::ensure!(config.capacity > 0, "queue capacity must be positive");

    let scope = scope.scope("queue");
    let stats = Stats {
      dropped_events: scope.counter("dropped_events"),
      rejected_events: scope.counter("rejected_events"),
      compactions: scope.counter("compactions"),
    };

    std::fs::create_dir_all(directory)?;
    let (journal, records) = Journal::open(&directory.join(JOURNAL_FILE), config.sync_writes)?;

    let mut events = VecDeque::new();
    let mut next_seq = 0;
    let total_records = records.len();
    for record in records {
      match record {
        JournalRecord::Push { seq, event } => {
          next_seq = next_seq.max(seq + 1);
          events.push_back((seq, event));
        },
        JournalRecord::Pop { through } => {
          while events.front().is_some_and(|(seq, _)| *seq <= through) {
            events.pop_front();
          }
        },
      }
    }

    // A crash between appending an event and recording its eviction can leave one extra event.
    let mut needs_rewrite = false;
    while events.len() > config.capacity {
      events.pop_front();
      stats.dropped_events.inc();
      needs_rewrite = true;
    }

    log::debug!(
      "opened queue with {} events from {total_records} journal records",
      events.len()
    );

    let obsolete_records = total_records - events.len();
    Ok(Self {
      inner: Mutex::new(Inner {
        journal,
        events,
        next_seq,
        obsolete_records,
        needs_rewrite,
      }),
      config,
      stats,
    })
  }

  /// Appends an event. The event is in the journal when this returns `Ok`. At capacity the oldest
  /// events are evicted to make room.
  pub fn enqueue(&self, event: Event) -> Result<(), QueueFull> {
    let mut inner = self.inner.lock();
    if let Err(e) = self.repair(&mut inner) {
      log::debug!("unable to repair journal before enqueue: {e:#}");
    }

    let seq = inner.next_seq;
    if let Err(e) = inner.journal.append(&JournalEntry::Push { seq, event: &event }) {
      self.stats.rejected_events.inc();
      warn_every!(30.seconds(), "failed to persist event, dropping it: {:#}", e);
      return Err(QueueFull);
    }

    inner.next_seq += 1;
    inner.events.push_back((seq, event));

    let overflow = inner.events.len().saturating_sub(self.config.capacity);
    if overflow > 0 {
      let mut through = 0;
      for _ in 0 .. overflow {
        if let Some((seq, _)) = inner.events.pop_front() {
          through = seq;
        }
      }
      self.stats.dropped_events.inc_by(overflow as u64);
      warn_every!(
        30.seconds(),
        "queue at capacity ({}), dropped {} oldest events",
        self.config.capacity,
        overflow
      );
      self.record_pop(&mut inner, through, overflow);
    }

    Ok(())
  }

  /// Removes and returns up to `max_count` of the oldest events.
  pub fn drain(&self, max_count: usize) -> Vec<Event> {
    let mut inner = self.inner.lock();
    let count = max_count.min(inner.events.len());
    let drained: Vec<_> = inner.events.drain(.. count).collect();
    if let Some((through, _)) = drained.last() {
      self.record_pop(&mut inner, *through, drained.len());
    }
    drained.into_iter().map(|(_, event)| event).collect()
  }

  /// Returns up to `max_count` of the oldest events while leaving them queued.
  pub fn peek(&self, max_count: usize) -> Peeked {
    let inner = self.inner.lock();
    let head: Vec<_> = inner.events.iter().take(max_count).collect();
    Peeked {
      through: head.last().map_or(0, |(seq, _)| *seq),
      events: head.into_iter().map(|(_, event)| event.clone()).collect(),
    }
  }

  /// Removes the events returned by `peek`. Events that were evicted in the meantime are already
  /// gone and are not affected.
  pub fn commit(&self, peeked: &Peeked) {
    if peeked.events.is_empty() {
      return;
    }

    let mut inner = self.inner.lock();
    let mut removed = 0;
    while inner
      .events
      .front()
      .is_some_and(|(seq, _)| *seq <= peeked.through)
    {
      inner.events.pop_front();
      removed += 1;
    }
    if removed > 0 {
      self.record_pop(&mut inner, peeked.through, removed);
    }
  }

  #[must_use]
  pub fn peek_size(&self) -> usize {
    self.inner.lock().events.len()
  }

  #[must_use]
  pub fn oldest_timestamp(&self) -> Option<EventTimestamp> {
    self
      .inner
      .lock()
      .events
      .front()
      .map(|(_, event)| *event.timestamp())
  }

  fn record_pop(&self, inner: &mut Inner, through: u64, removed: usize) {
    // The removed pushes plus the pop record itself.
    inner.obsolete_records += removed + 1;
    if let Err(e) = inner.journal.append(&JournalEntry::Pop { through }) {
      // The events are gone from memory; make sure the journal catches up before they could be
      // replayed.
      log::debug!("failed to record removal, scheduling rewrite: {e:#}");
      inner.needs_rewrite = true;
    }

    if inner.obsolete_records >= self.config.compaction_threshold
      && inner.obsolete_records > inner.events.len()
    {
      inner.needs_rewrite = true;
    }

    if let Err(e) = self.repair(inner) {
      log::debug!("journal rewrite failed: {e:#}");
    }
  }

  // Rewrites the journal from memory if it was flagged as stale or oversized.
  fn repair(&self, inner: &mut Inner) -> anyhow::Result<()> {
    if !inner.needs_rewrite && !inner.journal.is_torn() {
      return Ok(());
    }

    inner.journal.rewrite(inner.events.iter())?;
    inner.needs_rewrite = false;
    inner.obsolete_records = 0;
    self.stats.compactions.inc();
    log::debug!("rewrote queue journal with {} events", inner.events.len());
    Ok(())
  }
}

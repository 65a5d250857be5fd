// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{DurableQueue, JOURNAL_FILE, QueueConfig};
use beacon_events::{Event, EventTimestamp, Tags};
use beacon_stats::Collector;
use beacon_stats::test::StatsHelper;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::macros::datetime;

#[ctor::ctor]
fn test_global_init() {
  beacon_test_helpers::test_global_init();
}

fn event(i: u64) -> Event {
  Event::app_event(
    "test",
    format!("event-{i}"),
    [("index", i.to_string())],
    EventTimestamp {
      wall: datetime!(2024-03-01 10:00 UTC) + time::Duration::milliseconds(i as i64),
      uptime: Duration::from_millis(i),
    },
  )
  .unwrap()
}

fn names(events: &[Event]) -> Vec<String> {
  events
    .iter()
    .map(|e| e.name().unwrap().to_string())
    .collect()
}

struct Setup {
  directory: tempfile::TempDir,
  collector: Collector,
}

impl Setup {
  fn new() -> Self {
    Self {
      directory: tempfile::tempdir().unwrap(),
      collector: Collector::default(),
    }
  }

  fn open(&self, config: QueueConfig) -> DurableQueue {
    DurableQueue::open(self.directory.path(), config, &self.collector.scope("")).unwrap()
  }

  fn journal(&self) -> std::path::PathBuf {
    self.directory.path().join(JOURNAL_FILE)
  }
}

fn config(capacity: usize) -> QueueConfig {
  QueueConfig {
    capacity,
    ..Default::default()
  }
}

#[test]
fn fifo_preserved_across_reopen() {
  let setup = Setup::new();

  let events: Vec<_> = (0 .. 5)
    .map(|i| {
      if i == 2 {
        Event::non_fatal(
          Some("reason"),
          Some("trace"),
          Tags::from([("k".to_string(), "v".to_string())]),
          EventTimestamp {
            wall: datetime!(2024-03-01 10:00 UTC),
            uptime: Duration::from_secs(2),
          },
        )
        .unwrap()
      } else {
        event(i)
      }
    })
    .collect();

  {
    let queue = setup.open(config(100));
    for e in &events {
      queue.enqueue(e.clone()).unwrap();
    }
    assert_eq!(queue.peek_size(), 5);
  }

  let queue = setup.open(config(100));
  assert_eq!(queue.peek_size(), 5);
  assert_eq!(queue.drain(3), events[.. 3].to_vec());
  assert_eq!(queue.drain(10), events[3 ..].to_vec());
  assert!(queue.drain(10).is_empty());

  drop(queue);
  assert_eq!(setup.open(config(100)).peek_size(), 0);
}

#[test]
fn eviction_drops_oldest() {
  let setup = Setup::new();
  let queue = setup.open(config(5));

  for i in 0 .. 5 {
    queue.enqueue(event(i)).unwrap();
  }
  setup
    .collector
    .assert_counter_eq(0, "queue:dropped_events", beacon_stats::labels! {});

  for i in 5 .. 8 {
    queue.enqueue(event(i)).unwrap();
  }
  setup
    .collector
    .assert_counter_eq(3, "queue:dropped_events", beacon_stats::labels! {});
  assert_eq!(queue.peek_size(), 5);

  drop(queue);
  let queue = setup.open(config(5));
  assert_eq!(
    names(&queue.drain(10)),
    ["event-3", "event-4", "event-5", "event-6", "event-7"]
  );
}

#[test]
fn torn_tail_is_discarded() {
  let setup = Setup::new();
  {
    let queue = setup.open(config(10));
    for i in 0 .. 3 {
      queue.enqueue(event(i)).unwrap();
    }
  }

  // Simulate a crash in the middle of writing a frame.
  let mut file = std::fs::OpenOptions::new()
    .append(true)
    .open(setup.journal())
    .unwrap();
  file.write_all(&[200, 0, 0, 0, 1, 2, 3]).unwrap();
  drop(file);

  {
    let queue = setup.open(config(10));
    assert_eq!(queue.peek_size(), 3);
    queue.enqueue(event(3)).unwrap();
  }

  let queue = setup.open(config(10));
  assert_eq!(
    names(&queue.drain(10)),
    ["event-0", "event-1", "event-2", "event-3"]
  );
}

#[test]
fn corrupt_frame_stops_replay() {
  let setup = Setup::new();
  {
    let queue = setup.open(config(10));
    for i in 0 .. 3 {
      queue.enqueue(event(i)).unwrap();
    }
  }

  let mut contents = std::fs::read(setup.journal()).unwrap();
  let last = contents.len() - 1;
  contents[last] ^= 0xff;
  std::fs::write(setup.journal(), contents).unwrap();

  let queue = setup.open(config(10));
  assert_eq!(names(&queue.drain(10)), ["event-0", "event-1"]);
}

#[test]
fn commit_skips_evicted_events() {
  let setup = Setup::new();
  let queue = setup.open(config(3));
  for i in 0 .. 3 {
    queue.enqueue(event(i)).unwrap();
  }

  let peeked = queue.peek(2);
  assert_eq!(names(&peeked.events), ["event-0", "event-1"]);
  assert_eq!(queue.peek_size(), 3);

  // Evicts event-0 while the peeked events are in flight.
  queue.enqueue(event(3)).unwrap();
  queue.commit(&peeked);

  assert_eq!(names(&queue.peek(10).events), ["event-2", "event-3"]);

  drop(queue);
  let queue = setup.open(config(3));
  assert_eq!(names(&queue.drain(10)), ["event-2", "event-3"]);
}

#[test]
fn compaction_shrinks_journal() {
  let setup = Setup::new();
  let queue = setup.open(QueueConfig {
    capacity: 100,
    sync_writes: false,
    compaction_threshold: 4,
  });

  for i in 0 .. 10 {
    queue.enqueue(event(i)).unwrap();
  }
  let full_size = std::fs::metadata(setup.journal()).unwrap().len();
  assert_eq!(queue.drain(10).len(), 10);

  assert!(setup.collector.counter_value("queue:compactions") >= 1);
  assert!(std::fs::metadata(setup.journal()).unwrap().len() < full_size);

  queue.enqueue(event(10)).unwrap();
  drop(queue);

  let queue = setup.open(config(100));
  assert_eq!(names(&queue.drain(10)), ["event-10"]);
}

#[test]
fn oldest_timestamp_tracks_head() {
  let setup = Setup::new();
  let queue = setup.open(config(10));
  assert!(queue.oldest_timestamp().is_none());

  queue.enqueue(event(7)).unwrap();
  queue.enqueue(event(9)).unwrap();
  assert_eq!(
    queue.oldest_timestamp().unwrap().uptime,
    Duration::from_millis(7)
  );

  queue.drain(1);
  assert_eq!(
    queue.oldest_timestamp().unwrap().uptime,
    Duration::from_millis(9)
  );
}

#[test]
fn concurrent_producers() {
  let setup = Setup::new();
  let queue = Arc::new(setup.open(QueueConfig {
    capacity: 1_000,
    sync_writes: false,
    compaction_threshold: 1_000,
  }));

  let threads: Vec<_> = (0 .. 4)
    .map(|t| {
      let queue = queue.clone();
      std::thread::spawn(move || {
        for i in 0 .. 50 {
          queue.enqueue(event(t * 1_000 + i)).unwrap();
        }
      })
    })
    .collect();
  for thread in threads {
    thread.join().unwrap();
  }
  drop(queue);

  let queue = setup.open(config(1_000));
  let events = queue.drain(1_000);
  assert_eq!(events.len(), 200);

  // Each producer's events stay in the order it enqueued them.
  for t in 0 .. 4 {
    let indexes: Vec<u64> = events
      .iter()
      .map(|e| e.tags()["index"].parse::<u64>().unwrap())
      .filter(|i| i / 1_000 == t)
      .collect();
    assert_eq!(indexes, (0 .. 50).map(|i| t * 1_000 + i).collect::<Vec<_>>());
  }
}

#[test]
fn zero_capacity_is_rejected() {
  let directory = tempfile::tempdir().unwrap();
  assert!(
    DurableQueue::open(
      Path::new(directory.path()),
      config(0),
      &Collector::default().scope("")
    )
    .is_err()
  );
}

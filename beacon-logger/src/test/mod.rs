// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::config::ConfigBuilder;
use crate::pipeline::{FeedbackPresenter, PipelineHandle, Shared};
use crate::worker::FlushRequest;
use beacon_events::{Batch, Event, EventTimestamp};
use beacon_queue::{DurableQueue, QueueConfig};
use beacon_stats::Collector;
use beacon_time::TestTimeProvider;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::{Notify, mpsc};

pub const START: OffsetDateTime = datetime!(2024-03-01 10:00 UTC);

pub const NO_TAGS: [(&str, &str); 0] = [];

/// An app event named `name`, `offset_ms` after `START`.
pub fn event_at(name: &str, offset_ms: u64) -> Event {
  Event::app_event(
    "test",
    name,
    [("offset", offset_ms.to_string())],
    EventTimestamp {
      wall: START + time::Duration::milliseconds(offset_ms.try_into().unwrap()),
      uptime: Duration::from_millis(offset_ms),
    },
  )
  .unwrap()
}

pub fn event(name: &str) -> Event {
  event_at(name, 0)
}

pub fn names(batch: &Batch) -> Vec<&str> {
  batch.events.iter().filter_map(Event::name).collect()
}

//
// TestPipeline
//

/// A pipeline handle over a real queue in a temporary directory, without a worker.
pub struct TestPipeline {
  pub directory: tempfile::TempDir,
  pub handle: PipelineHandle,
  pub queue: Arc<DurableQueue>,
  pub time_provider: Arc<TestTimeProvider>,
  pub collector: Collector,
  pub flush_rx: mpsc::Receiver<FlushRequest>,
}

impl TestPipeline {
  pub fn new(configure: impl FnOnce(&mut ConfigBuilder)) -> Self {
    Self::with_feedback(configure, None)
  }

  pub fn with_feedback(
    configure: impl FnOnce(&mut ConfigBuilder),
    feedback: Option<Arc<dyn FeedbackPresenter>>,
  ) -> Self {
    let mut builder = ConfigBuilder::new("https://collector.test", "project");
    configure(&mut builder);
    let config = Arc::new(builder.build().unwrap());

    let directory = tempfile::tempdir().unwrap();
    let collector = Collector::default();
    let scope = collector.scope("beacon");
    let queue = Arc::new(
      DurableQueue::open(
        directory.path(),
        QueueConfig {
          capacity: config.tuning.queue_capacity,
          ..Default::default()
        },
        &scope,
      )
      .unwrap(),
    );
    let time_provider = Arc::new(TestTimeProvider::new(START));
    let (flush_tx, flush_rx) = mpsc::channel(1);

    let handle = PipelineHandle::new(Arc::new(Shared::new(
      config,
      queue.clone(),
      Arc::new(Notify::new()),
      flush_tx,
      time_provider.clone(),
      feedback,
      &scope,
    )));

    Self {
      directory,
      handle,
      queue,
      time_provider,
      collector,
      flush_rx,
    }
  }

  pub fn queued(&self) -> Vec<Event> {
    self.queue.peek(usize::MAX).events
  }

  pub fn single(&self) -> Event {
    let mut events = self.queued();
    assert_eq!(events.len(), 1, "{events:?}");
    events.remove(0)
  }
}

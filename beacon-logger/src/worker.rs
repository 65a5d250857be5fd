// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./worker_test.rs"]
mod worker_test;

use crate::attempt_store::AttemptStore;
use crate::batcher::Batcher;
use crate::retry::{AttemptState, DeliveryAttempt, RetryController};
use beacon_client_common::error::handle_unexpected;
use beacon_delivery::DeliveryClient;
use beacon_log::warn_every;
use beacon_queue::DurableQueue;
use beacon_shutdown::ComponentShutdown;
use beacon_stats::{Counter, Scope};
use beacon_time::TimeProvider;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use time::ext::NumericalDuration;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::Instrument as _;

// How long to wait before trying to seal again after the attempt store could not be written.
const STORE_RETRY_INTERVAL: time::Duration = time::Duration::seconds(5);

/// Asks the worker to seal everything queued regardless of size and age. `done` fires once the
/// queue is empty and no batch is waiting for delivery.
#[derive(Debug, Default)]
pub struct FlushRequest {
  pub done: Option<oneshot::Sender<()>>,
}

enum Sealing {
  Sealed(DeliveryAttempt),
  // Nothing to seal yet. Holds how long until the oldest queued event forces a batch.
  Idle(Option<time::Duration>),
}

enum Outcome {
  Finished,
  Retry(DeliveryAttempt),
  Abandoned,
}

struct Stats {
  sealed_batches: Counter,
  store_errors: Counter,
}

//
// DeliveryWorker
//

/// The single background task that turns queued events into batches and delivers them. Only one
/// batch is in flight at a time and batches go out in sequence order. Batches keep being sealed
/// while an older one waits to be retried, up to `max_stored_batches`; past that a collector
/// outage backs up into the bounded queue.
pub struct DeliveryWorker {
  queue: Arc<DurableQueue>,
  store: AttemptStore,
  client: Arc<dyn DeliveryClient>,
  controller: RetryController,
  time_provider: Arc<dyn TimeProvider>,
  wake: Arc<Notify>,
  flush_rx: mpsc::Receiver<FlushRequest>,
  shutdown: ComponentShutdown,

  max_batch_size: usize,
  max_batch_age: time::Duration,
  max_stored_batches: usize,
  shutdown_grace: Duration,

  pending: VecDeque<DeliveryAttempt>,
  flush_requested: bool,
  flush_waiters: Vec<oneshot::Sender<()>>,
  stats: Stats,
}

pub struct WorkerParams {
  pub queue: Arc<DurableQueue>,
  pub store: AttemptStore,
  pub client: Arc<dyn DeliveryClient>,
  pub controller: RetryController,
  pub time_provider: Arc<dyn TimeProvider>,
  pub wake: Arc<Notify>,
  pub flush_rx: mpsc::Receiver<FlushRequest>,
  pub shutdown: ComponentShutdown,
  pub max_batch_size: usize,
  pub max_batch_age: time::Duration,
  pub max_stored_batches: usize,
  pub shutdown_grace: time::Duration,
}

impl DeliveryWorker {
  #[must_use]
  pub fn new(params: WorkerParams, scope: &Scope) -> Self {
    let scope = scope.scope("worker");
    Self {
      queue: params.queue,
      store: params.store,
      client: params.client,
      controller: params.controller,
      time_provider: params.time_provider,
      wake: params.wake,
      flush_rx: params.flush_rx,
      shutdown: params.shutdown,
      max_batch_size: params.max_batch_size,
      max_batch_age: params.max_batch_age,
      max_stored_batches: params.max_stored_batches,
      shutdown_grace: params.shutdown_grace.unsigned_abs(),
      pending: VecDeque::new(),
      flush_requested: false,
      flush_waiters: Vec::new(),
      stats: Stats {
        sealed_batches: scope.counter("sealed_batches"),
        store_errors: scope.counter("store_errors"),
      },
    }
  }

  pub async fn run(mut self) {
    let span = tracing::info_span!("delivery_worker");
    handle_unexpected(
      self.run_inner().instrument(span).await,
      "delivery worker",
    );
    log::debug!("delivery worker stopped");
  }

  async fn run_inner(&mut self) -> anyhow::Result<()> {
    let restored = self.store.load().await?;
    let mut batcher = Batcher::new(
      self.max_batch_size,
      self.max_batch_age,
      restored.next_sequence,
    );
    self.pending = restored.attempts.into();

    while !self.shutdown.is_shutting_down() {
      // Sealing continues while the oldest batch waits out its backoff, so the age bound holds
      // during an outage until the stored batch limit is reached.
      let seal_wait = if self.pending.len() < self.max_stored_batches {
        match self.seal(&mut batcher).await {
          Sealing::Sealed(attempt) => {
            self.pending.push_back(attempt);
            continue;
          },
          Sealing::Idle(wait) => wait,
        }
      } else {
        None
      };

      let Some(attempt) = self.pending.pop_front() else {
        if seal_wait.is_none() {
          self.complete_flushes();
        }
        self.wait(seal_wait).await;
        continue;
      };

      let now = self.time_provider.now();
      if !attempt.is_due(now) {
        let retry_wait = attempt.next_eligible_at() - now;
        self.pending.push_front(attempt);
        let wait = seal_wait.map_or(retry_wait, |seal_wait| seal_wait.min(retry_wait));
        self.wait(Some(wait)).await;
        continue;
      }

      match self.deliver(attempt).await {
        Outcome::Finished => {},
        Outcome::Retry(attempt) => self.pending.push_front(attempt),
        Outcome::Abandoned => break,
      }
    }

    Ok(())
  }

  async fn seal(&mut self, batcher: &mut Batcher) -> Sealing {
    let peeked = self.queue.peek(self.max_batch_size);
    if peeked.events.is_empty() {
      return Sealing::Idle(None);
    }

    let now = self.time_provider.now();
    let mut sealed = None;
    for event in peeked.events.iter().cloned() {
      if let Some(batch) = batcher.offer(event) {
        sealed = Some(batch);
      }
    }
    let sealed = sealed
      .or_else(|| batcher.poll_expired(now))
      .or_else(|| {
        if self.flush_requested {
          batcher.flush()
        } else {
          None
        }
      });

    let Some(batch) = sealed else {
      let wait = batcher.deadline().map(|deadline| deadline - now);
      // The events stay in the queue until a batch is sealed.
      batcher.reset();
      return Sealing::Idle(wait);
    };

    let attempt = DeliveryAttempt::new(batch, now);
    if let Err(e) = self.store.insert(&attempt).await {
      self.stats.store_errors.inc();
      warn_every!(
        30.seconds(),
        "failed to persist batch {}, events stay queued: {:#}",
        attempt.sequence(),
        e
      );
      return Sealing::Idle(Some(STORE_RETRY_INTERVAL));
    }

    self.queue.commit(&peeked);
    self.stats.sealed_batches.inc();
    log::debug!(
      "sealed batch {} with {} events",
      attempt.sequence(),
      attempt.batch().len()
    );
    Sealing::Sealed(attempt)
  }

  async fn deliver(&mut self, mut attempt: DeliveryAttempt) -> Outcome {
    let sequence = attempt.sequence();
    if !self
      .controller
      .begin(&mut attempt, self.time_provider.now())
    {
      self.remove(sequence).await;
      return Outcome::Finished;
    }

    let span = tracing::debug_span!(
      "deliver",
      sequence,
      attempt = attempt.attempt_count() + 1,
      events = attempt.batch().len()
    );
    let client = self.client.clone();
    let batch = attempt.batch().clone();
    let send = client.send(&batch).instrument(span);
    tokio::pin!(send);

    let mut shutting_down = false;
    let result = tokio::select! {
      result = &mut send => result,
      () = self.shutdown.cancelled() => {
        shutting_down = true;
        match tokio::time::timeout(self.shutdown_grace, &mut send).await {
          Ok(result) => result,
          Err(_) => {
            // The stored copy is delivered on the next start.
            log::info!("abandoning batch {sequence} still in flight at shutdown");
            return Outcome::Abandoned;
          },
        }
      },
    };

    let outcome = match self
      .controller
      .complete(&mut attempt, &result, self.time_provider.now())
    {
      AttemptState::Delivered | AttemptState::Dropped(_) => {
        self.remove(sequence).await;
        Outcome::Finished
      },
      _ => {
        if let Err(e) = self.store.update(&attempt).await {
          self.stats.store_errors.inc();
          log::debug!("failed to persist retry schedule of batch {sequence}: {e:#}");
        }
        Outcome::Retry(attempt)
      },
    };

    if shutting_down {
      Outcome::Abandoned
    } else {
      outcome
    }
  }

  async fn remove(&self, sequence: u64) {
    if let Err(e) = self.store.remove(sequence).await {
      // The batch is sent again after a restart and the collector drops the duplicate.
      self.stats.store_errors.inc();
      log::warn!("failed to remove finished batch {sequence}: {e:#}");
    }
  }

  // Waits for new events, a flush request, shutdown, or the timeout.
  async fn wait(&mut self, timeout: Option<time::Duration>) {
    let time_provider = self.time_provider.clone();
    let sleep = async move {
      match timeout {
        Some(timeout) => time_provider.sleep(timeout).await,
        None => std::future::pending().await,
      }
    };

    tokio::select! {
      () = self.shutdown.cancelled() => {},
      () = self.wake.notified() => {},
      Some(request) = self.flush_rx.recv() => {
        log::debug!("flush requested");
        self.flush_requested = true;
        self.flush_waiters.extend(request.done);
      },
      () = sleep => {},
    }
  }

  fn complete_flushes(&mut self) {
    if !self.flush_requested {
      return;
    }
    self.flush_requested = false;
    for waiter in self.flush_waiters.drain(..) {
      let _ignored = waiter.send(());
    }
  }
}

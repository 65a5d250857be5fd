// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./pipeline_test.rs"]
mod pipeline_test;

use crate::config::Config;
use crate::worker::FlushRequest;
use beacon_events::{
  Event,
  EventKind,
  EventTimestamp,
  LogLevel,
  TimingError,
  TimingHandle,
  TimingRegistry,
  ValidationError,
};
use beacon_queue::{DurableQueue, QueueFull};
use beacon_stats::{Counter, Scope};
use beacon_time::TimeProvider;
use mockall::automock;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc, oneshot};

/// Target of the records emitted for the console log destination.
pub const CONSOLE_TARGET: &str = "beacon::console";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error("unknown, expired or already tracked timing handle")]
  InvalidHandle,
  #[error(transparent)]
  QueueFull(#[from] QueueFull),
}

impl From<TimingError> for TrackError {
  fn from(e: TimingError) -> Self {
    match e {
      TimingError::InvalidHandle => Self::InvalidHandle,
      TimingError::Validation(e) => Self::Validation(e),
    }
  }
}

//
// FeedbackPresenter
//

/// Shows the host's feedback UI.
#[automock]
pub trait FeedbackPresenter: Send + Sync {
  fn present(&self);
}

struct Stats {
  filtered_events: Counter,
  invalid_events: Counter,
  queue_full: Counter,
}

pub(crate) struct Shared {
  pub config: Arc<Config>,
  pub queue: Arc<DurableQueue>,
  pub timings: TimingRegistry,
  pub wake: Arc<Notify>,
  pub flush_tx: mpsc::Sender<FlushRequest>,
  pub time_provider: Arc<dyn TimeProvider>,
  pub feedback: Option<Arc<dyn FeedbackPresenter>>,
  pub session_id: String,
  stats: Stats,
}

impl Shared {
  pub fn new(
    config: Arc<Config>,
    queue: Arc<DurableQueue>,
    wake: Arc<Notify>,
    flush_tx: mpsc::Sender<FlushRequest>,
    time_provider: Arc<dyn TimeProvider>,
    feedback: Option<Arc<dyn FeedbackPresenter>>,
    scope: &Scope,
  ) -> Self {
    let scope = scope.scope("pipeline");
    Self {
      timings: TimingRegistry::new(time_provider.clone(), config.tuning.timing_ttl),
      config,
      queue,
      wake,
      flush_tx,
      time_provider,
      feedback,
      session_id: uuid::Uuid::new_v4().to_string(),
      stats: Stats {
        filtered_events: scope.counter("filtered_events"),
        invalid_events: scope.counter("invalid_events"),
        queue_full: scope.counter("queue_full"),
      },
    }
  }

  fn allows(&self, kind: EventKind) -> bool {
    match kind {
      kind if kind.is_analytics() => self.config.analytics_enabled,
      EventKind::NonFatal => self.config.analytics_enabled && self.config.non_fatal_enabled,
      _ => true,
    }
  }
}

fn format_fields(fields: &BTreeMap<String, String>) -> String {
  let mut formatted = String::new();
  for (key, value) in fields {
    let _ignored = write!(formatted, " {key}={value}");
  }
  formatted
}

//
// PipelineHandle
//

/// Cheap to clone entry point for tracking. Calls never block on delivery: events are validated,
/// persisted to the queue, and the background worker is woken.
#[derive(Clone)]
pub struct PipelineHandle {
  shared: Arc<Shared>,
}

impl PipelineHandle {
  pub(crate) const fn new(shared: Arc<Shared>) -> Self {
    Self { shared }
  }

  #[must_use]
  pub fn config(&self) -> &Config {
    &self.shared.config
  }

  #[must_use]
  pub fn session_id(&self) -> &str {
    &self.shared.session_id
  }

  /// Number of events waiting to be batched.
  #[must_use]
  pub fn queue_depth(&self) -> usize {
    self.shared.queue.peek_size()
  }

  fn now(&self) -> EventTimestamp {
    EventTimestamp::now(self.shared.time_provider.as_ref())
  }

  fn checked<T, E: Into<TrackError>>(&self, result: Result<T, E>) -> Result<T, TrackError> {
    result.map_err(|e| {
      let e = e.into();
      self.shared.stats.invalid_events.inc();
      log::debug!("rejected tracking call: {e}");
      e
    })
  }

  pub(crate) fn admit(&self, event: Event) -> Result<(), TrackError> {
    if !self.shared.allows(event.kind()) {
      self.shared.stats.filtered_events.inc();
      log::trace!("filtered {} event by configuration", event.kind());
      return Ok(());
    }

    if let Err(e) = self.shared.queue.enqueue(event) {
      self.shared.stats.queue_full.inc();
      return Err(e.into());
    }
    self.shared.wake.notify_one();
    Ok(())
  }

  pub fn track_event<K: Into<String>, V: Into<String>>(
    &self,
    category: &str,
    name: &str,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<(), TrackError> {
    let event = self.checked(Event::app_event(category, name, tags, self.now()))?;
    self.admit(event)
  }

  pub fn track_screen_appearing<K: Into<String>, V: Into<String>>(
    &self,
    title: &str,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<(), TrackError> {
    let event = self.checked(Event::screen_appear(title, tags, self.now()))?;
    self.admit(event)
  }

  pub fn track_screen_disappearing<K: Into<String>, V: Into<String>>(
    &self,
    title: &str,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<(), TrackError> {
    let event = self.checked(Event::screen_disappear(title, tags, self.now()))?;
    self.admit(event)
  }

  pub fn start_timing(&self, category: &str, name: &str) -> Result<TimingHandle, TrackError> {
    self.checked(self.shared.timings.start(category, name))
  }

  /// Starts a timing at a host supplied time in ms since the epoch.
  pub fn start_timing_at(
    &self,
    category: &str,
    name: &str,
    start_ms: i64,
  ) -> Result<TimingHandle, TrackError> {
    self.checked(self.shared.timings.start_at(category, name, start_ms))
  }

  /// Whether the timing can still be tracked.
  #[must_use]
  pub fn is_timing_pending(&self, handle: &TimingHandle) -> bool {
    self.shared.timings.is_pending(handle)
  }

  pub fn track_timing<K: Into<String>, V: Into<String>>(
    &self,
    handle: TimingHandle,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<(), TrackError> {
    let event = self.checked(self.shared.timings.finish(handle, tags))?;
    self.admit(event)
  }

  pub fn track_timing_with_duration<K: Into<String>, V: Into<String>>(
    &self,
    handle: TimingHandle,
    duration_ms: u64,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<(), TrackError> {
    let event = self.checked(
      self
        .shared
        .timings
        .finish_with_duration(handle, duration_ms, tags),
    )?;
    self.admit(event)
  }

  /// Completes a timing at a host supplied end time in ms since the epoch.
  pub fn track_timing_at<K: Into<String>, V: Into<String>>(
    &self,
    handle: TimingHandle,
    end_ms: i64,
    tags: impl IntoIterator<Item = (K, V)>,
  ) -> Result<(), TrackError> {
    let event = self.checked(self.shared.timings.finish_at(handle, end_ms, tags))?;
    self.admit(event)
  }

  pub fn report_non_fatal<K: Into<String>, V: Into<String>>(
    &self,
    reason: Option<&str>,
    error: Option<&str>,
    user_info: impl IntoIterator<Item = (K, V)>,
  ) -> Result<(), TrackError> {
    let event = self.checked(Event::non_fatal(reason, error, user_info, self.now()))?;
    self.admit(event)
  }

  /// Writes a log line to the configured destinations, each filtered by its own minimum level.
  pub fn log<K: Into<String>, V: Into<String>>(
    &self,
    level: LogLevel,
    message: &str,
    fields: impl IntoIterator<Item = (K, V)>,
  ) -> Result<(), TrackError> {
    if message.is_empty() {
      return self.checked(Err(ValidationError::EmptyField("message")));
    }

    let config = &self.shared.config;
    let to_console = config.log_destination.console() && level >= config.console_min_level;
    let to_remote = config.log_destination.remote() && level >= config.remote_min_level;
    if !to_console && !to_remote {
      return Ok(());
    }

    let fields: BTreeMap<String, String> = fields
      .into_iter()
      .map(|(k, v)| (k.into(), v.into()))
      .collect();

    if to_console {
      let console_level: log::Level = level.into();
      log::log!(
        target: CONSOLE_TARGET,
        console_level,
        "{message}{}",
        format_fields(&fields)
      );
    }

    if to_remote {
      let event = self.checked(Event::log(level, message, fields, self.now()))?;
      self.admit(event)?;
    }
    Ok(())
  }

  /// Shows the feedback UI if feedback is enabled. Returns whether it was shown.
  pub fn invoke_feedback(&self) -> bool {
    if !self.shared.config.feedback.is_enabled() {
      log::debug!("ignoring feedback invocation, feedback is disabled");
      return false;
    }

    match &self.shared.feedback {
      Some(presenter) => {
        presenter.present();
        true
      },
      None => {
        log::debug!("ignoring feedback invocation, no presenter registered");
        false
      },
    }
  }

  /// Asks the worker to send everything queued without waiting for batches to fill.
  pub fn flush(&self) {
    if self.shared.flush_tx.try_send(FlushRequest::default()).is_err() {
      // A flush is already pending or the worker has stopped.
      log::debug!("flush request not delivered");
    }
  }

  /// Like `flush`, and resolves once the queue is empty and no batch awaits delivery, or once the
  /// pipeline shuts down.
  pub async fn flush_and_wait(&self) {
    let (done_tx, done_rx) = oneshot::channel();
    let request = FlushRequest {
      done: Some(done_tx),
    };
    if self.shared.flush_tx.send(request).await.is_err() {
      return;
    }
    let _ignored = done_rx.await;
  }
}

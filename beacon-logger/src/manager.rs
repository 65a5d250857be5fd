// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./manager_test.rs"]
mod manager_test;

use crate::attempt_store::AttemptStore;
use crate::config::{Config, ConfigBuilder, ConfigError};
use crate::crash::{CrashConsent, collect_crash_events};
use crate::pipeline::{FeedbackPresenter, PipelineHandle, Shared};
use crate::retry::{RetryController, RetryPolicy};
use crate::worker::{DeliveryWorker, WorkerParams};
use beacon_client_common::error::{
  ContextErrorReporter,
  ReportContext,
  Reporter,
  UnexpectedErrorHandler,
};
use beacon_client_common::file_system::{FileSystem, RealFileSystem};
use beacon_delivery::{DeliveryClient, DeliveryConfig, HttpDeliveryClient};
use beacon_events::{Event, EventTimestamp};
use beacon_log::SwapLogger;
use beacon_queue::{DurableQueue, QueueConfig};
use beacon_shutdown::ComponentShutdownTrigger;
use beacon_stats::Collector;
use beacon_time::{SystemTimeProvider, TimeProvider};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

/// Directory of the event queue journal inside the SDK directory.
pub const QUEUE_DIRECTORY: &str = "queue";

// Extra time given to the worker beyond the delivery grace period to persist and exit.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

// Identifies the pipeline in unexpected error reports.
struct PipelineContext {
  project: String,
  session_id: String,
}

impl ReportContext for PipelineContext {
  fn fields(&self) -> BTreeMap<String, String> {
    BTreeMap::from([
      ("project".to_string(), self.project.clone()),
      ("session_id".to_string(), self.session_id.clone()),
    ])
  }
}

struct Running {
  handle: PipelineHandle,
  shutdown_trigger: ComponentShutdownTrigger,
  worker: JoinHandle<()>,
}

//
// TelemetryManager
//

/// Composition root of the pipeline. It owns the configuration until `start`, after which the
/// configuration is locked and tracking goes through the returned `PipelineHandle`.
pub struct TelemetryManager {
  sdk_directory: PathBuf,
  builder: ConfigBuilder,
  time_provider: Arc<dyn TimeProvider>,
  collector: Collector,
  crash_consent: Option<Arc<dyn CrashConsent>>,
  feedback: Option<Arc<dyn FeedbackPresenter>>,
  client: Option<Arc<dyn DeliveryClient>>,
  error_reporter: Option<Arc<dyn Reporter>>,
  running: Option<Running>,
  locked: bool,
}

impl TelemetryManager {
  #[must_use]
  pub fn new(sdk_directory: impl Into<PathBuf>, builder: ConfigBuilder) -> Self {
    Self {
      sdk_directory: sdk_directory.into(),
      builder,
      time_provider: Arc::new(SystemTimeProvider::default()),
      collector: Collector::default(),
      crash_consent: None,
      feedback: None,
      client: None,
      error_reporter: None,
      running: None,
      locked: false,
    }
  }

  #[must_use]
  pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
    self.time_provider = time_provider;
    self
  }

  #[must_use]
  pub fn with_crash_consent(mut self, consent: Arc<dyn CrashConsent>) -> Self {
    self.crash_consent = Some(consent);
    self
  }

  #[must_use]
  pub fn with_feedback_presenter(mut self, presenter: Arc<dyn FeedbackPresenter>) -> Self {
    self.feedback = Some(presenter);
    self
  }

  /// Replaces the HTTP client built from the configuration.
  #[must_use]
  pub fn with_delivery_client(mut self, client: Arc<dyn DeliveryClient>) -> Self {
    self.client = Some(client);
    self
  }

  /// Receives internal failures the pipeline swallows, such as a delivery worker that could not
  /// open its persisted state. Installed process wide at `start`.
  #[must_use]
  pub fn with_error_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
    self.error_reporter = Some(reporter);
    self
  }

  #[must_use]
  pub fn with_collector(mut self, collector: Collector) -> Self {
    self.collector = collector;
    self
  }

  /// Changes the configuration. Fails with `ConfigurationLocked`, leaving everything as it was,
  /// once the pipeline has started.
  pub fn configure(&mut self, f: impl FnOnce(&mut ConfigBuilder)) -> Result<(), ConfigError> {
    if self.locked {
      return Err(ConfigError::ConfigurationLocked);
    }
    f(&mut self.builder);
    Ok(())
  }

  /// The configuration in effect: the started one, or what `start` would use.
  pub fn config(&self) -> Result<Config, ConfigError> {
    match &self.running {
      Some(running) => Ok(running.handle.config().clone()),
      None => self.builder.build(),
    }
  }

  #[must_use]
  pub const fn stats(&self) -> &Collector {
    &self.collector
  }

  #[must_use]
  pub fn handle(&self) -> Option<PipelineHandle> {
    self.running.as_ref().map(|running| running.handle.clone())
  }

  /// Validates the configuration, opens the persisted state, ingests crash reports from the
  /// previous run and spawns the delivery worker. Starting twice returns the running pipeline; a
  /// pipeline that was shut down cannot be started again.
  pub async fn start(&mut self) -> anyhow::Result<PipelineHandle> {
    if let Some(running) = &self.running {
      return Ok(running.handle.clone());
    }
    anyhow::ensure!(!self.locked, "the pipeline has been shut down");

    let config = Arc::new(self.builder.build()?);
    if config.debug_log
      && let Err(e) = SwapLogger::set_debug(true)
    {
      log::debug!("unable to enable debug logging: {e}");
    }

    let scope = self.collector.scope("beacon");
    UnexpectedErrorHandler::register_stats(&scope);

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new(self.sdk_directory.clone()));
    let queue = Arc::new(DurableQueue::open(
      &self.sdk_directory.join(QUEUE_DIRECTORY),
      QueueConfig {
        capacity: config.tuning.queue_capacity,
        sync_writes: config.tuning.sync_writes,
        ..Default::default()
      },
      &scope,
    )?);

    let client = match &self.client {
      Some(client) => client.clone(),
      None => Arc::new(HttpDeliveryClient::new(DeliveryConfig {
        timeout: config.tuning.request_timeout.unsigned_abs(),
        validate_certificates: config.validate_certificates,
        ..DeliveryConfig::new(&config.server_url, &config.project)
      })?),
    };

    let wake = Arc::new(Notify::new());
    let (flush_tx, flush_rx) = mpsc::channel(16);
    let handle = PipelineHandle::new(Arc::new(Shared::new(
      config.clone(),
      queue.clone(),
      wake.clone(),
      flush_tx,
      self.time_provider.clone(),
      self.feedback.clone(),
      &scope,
    )));

    if let Some(reporter) = &self.error_reporter {
      UnexpectedErrorHandler::set_reporter(Arc::new(ContextErrorReporter::new(
        reporter.clone(),
        Arc::new(PipelineContext {
          project: config.project.clone(),
          session_id: handle.session_id().to_string(),
        }),
      )));
    }

    let crash_events = collect_crash_events(
      fs.as_ref(),
      config.crash_reporting,
      self.crash_consent.as_deref(),
      self.time_provider.as_ref(),
    )
    .await;
    for event in crash_events {
      if let Err(e) = handle.admit(event) {
        log::warn!("unable to queue crash report: {e}");
      }
    }

    if config.session_recording {
      let event = Event::session_start(
        handle.session_id(),
        EventTimestamp::now(self.time_provider.as_ref()),
      );
      if let Err(e) = handle.admit(event) {
        log::debug!("unable to queue session start: {e}");
      }
    }

    let shutdown_trigger = ComponentShutdownTrigger::default();
    let worker = DeliveryWorker::new(
      WorkerParams {
        queue,
        store: AttemptStore::new(fs),
        client,
        controller: RetryController::new(RetryPolicy::from_tuning(&config.tuning), &scope),
        time_provider: self.time_provider.clone(),
        wake,
        flush_rx,
        shutdown: shutdown_trigger.make_shutdown(),
        max_batch_size: config.tuning.max_batch_size,
        max_batch_age: config.tuning.max_batch_age,
        max_stored_batches: config.tuning.max_stored_batches,
        shutdown_grace: config.tuning.shutdown_grace,
      },
      &scope,
    );
    let worker = tokio::spawn(worker.run());

    log::info!(
      "telemetry pipeline started for project {} (session {})",
      config.project,
      handle.session_id()
    );

    self.locked = true;
    self.running = Some(Running {
      handle: handle.clone(),
      shutdown_trigger,
      worker,
    });
    Ok(handle)
  }

  /// Stops the worker. An in-flight delivery gets the configured grace period; anything not
  /// delivered stays persisted for the next start. Handles held by the host keep persisting
  /// events, which the next process delivers.
  pub async fn shutdown(&mut self) {
    let Some(running) = self.running.take() else {
      return;
    };

    let config = running.handle.config();
    if config.session_recording {
      let event = Event::session_end(
        running.handle.session_id(),
        EventTimestamp::now(self.time_provider.as_ref()),
      );
      if let Err(e) = running.handle.admit(event) {
        log::debug!("unable to queue session end: {e}");
      }
    }

    let deadline = config.tuning.shutdown_grace.unsigned_abs() + SHUTDOWN_SLACK;
    if !running.shutdown_trigger.shutdown_with_deadline(deadline).await {
      running.worker.abort();
    }
    if let Err(e) = running.worker.await
      && !e.is_cancelled()
    {
      log::warn!("delivery worker failed: {e}");
    }

    log::info!("telemetry pipeline stopped");
  }
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./error_test.rs"]
mod error_test;

use beacon_stats::{Counter, Scope};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

/// Number of unexpected errors forwarded to the reporter before further errors are only counted.
const MAX_REPORTS: usize = 5;

//
// Reporter
//

/// Receives unexpected internal errors. These are never surfaced to the host application as
/// failures; they exist so that the embedding platform layer can forward them somewhere useful.
pub trait Reporter: Send + Sync {
  fn report(&self, message: &str, fields: &BTreeMap<String, String>);
}

// Fires a debug assert so that unexpected errors fail tests unless a reporter is installed.
struct DefaultErrorReporter;

impl Reporter for DefaultErrorReporter {
  fn report(&self, message: &str, _fields: &BTreeMap<String, String>) {
    debug_assert!(false, "unexpected error: {message}");
  }
}

//
// ReportContext
//

/// Supplies the fields which identify where an error came from, e.g. project and session.
pub trait ReportContext: Send + Sync {
  fn fields(&self) -> BTreeMap<String, String>;
}

//
// ContextErrorReporter
//

/// Decorates another reporter, attaching the context fields as `x-` prefixed entries.
pub struct ContextErrorReporter {
  reporter: Arc<dyn Reporter>,
  context: Arc<dyn ReportContext>,
}

impl ContextErrorReporter {
  pub fn new(reporter: Arc<dyn Reporter>, context: Arc<dyn ReportContext>) -> Self {
    Self { reporter, context }
  }
}

impl Reporter for ContextErrorReporter {
  fn report(&self, message: &str, fields: &BTreeMap<String, String>) {
    let mut fields = fields.clone();
    for (key, value) in self.context.fields() {
      fields.insert(format!("x-{}", key.replace('_', "-")), value);
    }

    self.reporter.report(message, &fields);
  }
}

//
// UnexpectedErrorHandler
//

/// Process-wide sink for errors which the pipeline swallows instead of propagating.
pub struct UnexpectedErrorHandler {
  reporter: Arc<dyn Reporter>,
  remaining_reports: usize,

  // Counts errors that were not forwarded because the report limit was hit.
  dropped_errors: Option<Counter>,
}

impl UnexpectedErrorHandler {
  fn new() -> Self {
    Self {
      reporter: Arc::new(DefaultErrorReporter),
      remaining_reports: MAX_REPORTS,
      dropped_errors: None,
    }
  }

  pub fn set_reporter(reporter: Arc<dyn Reporter>) {
    ERROR_HANDLER.lock().reporter = reporter;
  }

  pub fn clear_reporter() {
    let mut handler = ERROR_HANDLER.lock();
    handler.reporter = Arc::new(DefaultErrorReporter);
    handler.remaining_reports = MAX_REPORTS;
  }

  pub fn register_stats(stats: &Scope) {
    ERROR_HANDLER.lock().dropped_errors =
      Some(stats.scope("error_reporter").counter("dropped_errors"));
  }

  /// Runs `f` with `reporter` overriding the global reporter for the current thread.
  pub fn with_reporter<T>(reporter: Arc<dyn Reporter>, f: impl FnOnce() -> T) -> T {
    PER_THREAD_REPORTER.with(|per_thread| {
      *per_thread.borrow_mut() = Some(reporter);
      let r = f();
      *per_thread.borrow_mut() = None;
      r
    })
  }

  fn report(&mut self, error: &anyhow::Error, description: &str) {
    let message = format!("{description}: {error:#}");
    log::warn!("unexpected error: {message}");

    if self.remaining_reports == 0 {
      log::debug!("not reporting error, limit hit");
      if let Some(dropped_errors) = &self.dropped_errors {
        dropped_errors.inc();
      }
      return;
    }
    self.remaining_reports -= 1;

    let fields = BTreeMap::new();
    let reporter = PER_THREAD_REPORTER
      .with(|per_thread| per_thread.borrow().clone())
      .unwrap_or_else(|| self.reporter.clone());
    reporter.report(&message, &fields);
  }
}

static ERROR_HANDLER: LazyLock<parking_lot::Mutex<UnexpectedErrorHandler>> =
  LazyLock::new(|| parking_lot::Mutex::new(UnexpectedErrorHandler::new()));

thread_local! {
  static PER_THREAD_REPORTER: RefCell<Option<Arc<dyn Reporter>>> = const { RefCell::new(None) };
}

/// Logs and reports the error, if any, instead of propagating it.
pub fn handle_unexpected<T, E: Into<anyhow::Error> + Sync>(
  r: std::result::Result<T, E>,
  description: &str,
) {
  if let Err(e) = r {
    ERROR_HANDLER.lock().report(&e.into(), description);
  }
}

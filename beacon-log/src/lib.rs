// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod rate_limit_log;

use parking_lot::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::Handle as ReloadHandle;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

const DEFAULT_FILTER_RULES: &str = "info,hyper_util=warn,rustls=warn";

// Filter used while the pipeline's debug logging flag is set.
const DEBUG_FILTER_RULES: &str = "debug,hyper=info,hyper_util=info,rustls=info";

//
// SwapLogger
//

// Process wide log output whose filter can be replaced at runtime.
pub struct SwapLogger {
  handle: Mutex<Option<ReloadHandle<EnvFilter, Registry>>>,
  initial_rules: Mutex<String>,
}

impl SwapLogger {
  const fn new() -> Self {
    Self {
      handle: Mutex::new(None),
      initial_rules: Mutex::new(String::new()),
    }
  }

  fn get() -> &'static Self {
    static LOGGER: SwapLogger = SwapLogger::new();

    &LOGGER
  }

  // Initializes output to stderr, filtered by RUST_LOG. Later calls are ignored so that tests and
  // binaries can both call this unconditionally.
  pub fn initialize() {
    let logger = Self::get();
    let mut handle = logger.handle.lock();
    if handle.is_some() {
      return;
    }

    // ANSI is off unless BEACON_LOG_ANSI is set, which keeps captured output readable.
    let stderr = tracing_subscriber::fmt::layer()
      .with_writer(std::io::stderr)
      .with_ansi(std::env::var("BEACON_LOG_ANSI").is_ok())
      .with_line_number(true)
      .with_thread_ids(true)
      .with_target(true)
      .compact();

    let rules = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER_RULES.to_string());
    let (filter, reload_handle) = tracing_subscriber::reload::Layer::new(EnvFilter::new(&rules));

    if Registry::default().with(filter).with(stderr).try_init().is_err() {
      // Someone else owns the global subscriber; leave it in place.
      return;
    }

    *handle = Some(reload_handle);
    *logger.initial_rules.lock() = rules;
  }

  // Swap in a new filter with the provided RUST_LOG string.
  pub fn swap(new_rust_log: &str) -> anyhow::Result<()> {
    let handle = Self::get().handle.lock();
    let Some(handle) = handle.as_ref() else {
      anyhow::bail!("logger not initialized");
    };
    handle.reload(EnvFilter::new(new_rust_log))?;

    // The max level of the log facade is only computed at init, so it has to follow the reload.
    log::set_max_level(tracing_log::AsLog::as_log(
      &tracing_subscriber::filter::LevelFilter::current(),
    ));

    Ok(())
  }

  /// Raises output to debug for the SDK's own crates, or restores the rules in effect at
  /// initialization.
  pub fn set_debug(enabled: bool) -> anyhow::Result<()> {
    let rules = if enabled {
      DEBUG_FILTER_RULES.to_string()
    } else {
      Self::get().initial_rules.lock().clone()
    };
    Self::swap(&rules)
  }
}

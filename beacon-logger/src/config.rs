// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use beacon_events::{DEFAULT_TIMING_TTL, LogLevel};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use time::ext::NumericalDuration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error("configuration is locked once the pipeline has started")]
  ConfigurationLocked,
  #[error("invalid configuration: {0}")]
  Invalid(String),
}

//
// CrashReportingMode
//

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CrashReportingMode {
  /// Reports from a previous run are deleted without being sent.
  #[default]
  Disabled,
  /// The host's `CrashConsent` decides per report.
  AlwaysAsk,
  AlwaysSend,
}

//
// LogDestination
//

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
  #[default]
  None,
  Console,
  Remote,
  Both,
}

impl LogDestination {
  #[must_use]
  pub const fn console(self) -> bool {
    matches!(self, Self::Console | Self::Both)
  }

  #[must_use]
  pub const fn remote(self) -> bool {
    matches!(self, Self::Remote | Self::Both)
  }
}

//
// FeedbackInvocation
//

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackInvocation {
  #[default]
  Disabled,
  Enabled,
  /// Enabled, and the host may also start feedback when the device is shaken.
  Shake,
}

impl FeedbackInvocation {
  #[must_use]
  pub const fn is_enabled(self) -> bool {
    !matches!(self, Self::Disabled)
  }
}

//
// Tuning
//

/// Limits and timers of the pipeline. The defaults suit a mobile app; tests shrink them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuning {
  pub queue_capacity: usize,
  pub sync_writes: bool,
  pub max_batch_size: usize,
  pub max_batch_age: time::Duration,
  /// Sealed batches kept awaiting delivery before sealing pauses.
  pub max_stored_batches: usize,
  pub request_timeout: time::Duration,
  pub retry_base: time::Duration,
  pub retry_cap: time::Duration,
  pub retry_jitter: time::Duration,
  pub max_attempts: u32,
  pub max_attempt_age: time::Duration,
  pub shutdown_grace: time::Duration,
  pub timing_ttl: time::Duration,
}

impl Default for Tuning {
  fn default() -> Self {
    Self {
      queue_capacity: 10_000,
      sync_writes: true,
      max_batch_size: 50,
      max_batch_age: 30.seconds(),
      max_stored_batches: 100,
      request_timeout: 15.seconds(),
      retry_base: 1.seconds(),
      retry_cap: 5.minutes(),
      retry_jitter: 1.seconds(),
      max_attempts: 8,
      max_attempt_age: 24.hours(),
      shutdown_grace: 5.seconds(),
      timing_ttl: DEFAULT_TIMING_TTL,
    }
  }
}

//
// BridgeConfig
//

/// The configuration object a host runtime passes at initialization. Every key is optional and
/// unknown keys are ignored. An unrecognized value for an enumerated key resolves to that key's
/// fallback rather than rejecting the object.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
  #[serde(deserialize_with = "or_fallback")]
  pub crash_handling: Option<CrashReportingMode>,
  #[serde(alias = "loggingDestination", deserialize_with = "or_fallback")]
  pub log_type: Option<LogDestination>,
  #[serde(deserialize_with = "or_fallback")]
  pub minimum_log_level_console: Option<LogLevel>,
  #[serde(deserialize_with = "or_fallback")]
  pub minimum_log_level_remote: Option<LogLevel>,
  #[serde(deserialize_with = "or_fallback")]
  pub feedback_invocation: Option<FeedbackInvocation>,
  pub is_analytics_enabled: Option<bool>,
  pub is_session_recording_enabled: Option<bool>,
  pub is_non_fatal_issues_enabled: Option<bool>,
  #[serde(alias = "tpaDebugLog")]
  pub debug_log: Option<bool>,
}

/// Value used for a bridge key whose value is not recognized.
trait BridgeFallback {
  const FALLBACK: Self;
}

impl BridgeFallback for CrashReportingMode {
  const FALLBACK: Self = Self::Disabled;
}

impl BridgeFallback for LogDestination {
  const FALLBACK: Self = Self::Console;
}

impl BridgeFallback for LogLevel {
  const FALLBACK: Self = Self::Debug;
}

impl BridgeFallback for FeedbackInvocation {
  const FALLBACK: Self = Self::Disabled;
}

fn or_fallback<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned + BridgeFallback,
{
  let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
    return Ok(None);
  };
  Ok(Some(T::deserialize(&value).unwrap_or_else(|e| {
    log::warn!("unrecognized bridge config value {value}: {e}");
    T::FALLBACK
  })))
}

//
// Config
//

/// Configuration of a started pipeline. Never changes after `TelemetryManager::start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub server_url: String,
  pub project: String,
  pub crash_reporting: CrashReportingMode,
  pub log_destination: LogDestination,
  pub console_min_level: LogLevel,
  pub remote_min_level: LogLevel,
  pub feedback: FeedbackInvocation,
  pub analytics_enabled: bool,
  pub session_recording: bool,
  pub non_fatal_enabled: bool,
  pub debug_log: bool,
  pub validate_certificates: bool,
  pub tuning: Tuning,
}

//
// ConfigBuilder
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBuilder {
  server_url: Option<String>,
  project: Option<String>,
  crash_reporting: CrashReportingMode,
  log_destination: LogDestination,
  console_min_level: LogLevel,
  remote_min_level: LogLevel,
  feedback: FeedbackInvocation,
  analytics_enabled: bool,
  session_recording: bool,
  non_fatal_enabled: bool,
  debug_log: bool,
  validate_certificates: bool,
  tuning: Tuning,
}

impl Default for ConfigBuilder {
  fn default() -> Self {
    Self {
      server_url: None,
      project: None,
      crash_reporting: CrashReportingMode::default(),
      log_destination: LogDestination::default(),
      console_min_level: LogLevel::Debug,
      remote_min_level: LogLevel::Debug,
      feedback: FeedbackInvocation::default(),
      analytics_enabled: true,
      session_recording: false,
      non_fatal_enabled: false,
      debug_log: false,
      validate_certificates: true,
      tuning: Tuning::default(),
    }
  }
}

impl ConfigBuilder {
  #[must_use]
  pub fn new(server_url: impl Into<String>, project: impl Into<String>) -> Self {
    Self {
      server_url: Some(server_url.into()),
      project: Some(project.into()),
      ..Default::default()
    }
  }

  pub fn server_url(&mut self, server_url: impl Into<String>) -> &mut Self {
    self.server_url = Some(server_url.into());
    self
  }

  pub fn project(&mut self, project: impl Into<String>) -> &mut Self {
    self.project = Some(project.into());
    self
  }

  pub const fn crash_reporting(&mut self, mode: CrashReportingMode) -> &mut Self {
    self.crash_reporting = mode;
    self
  }

  pub const fn log_destination(&mut self, destination: LogDestination) -> &mut Self {
    self.log_destination = destination;
    self
  }

  pub const fn console_min_level(&mut self, level: LogLevel) -> &mut Self {
    self.console_min_level = level;
    self
  }

  pub const fn remote_min_level(&mut self, level: LogLevel) -> &mut Self {
    self.remote_min_level = level;
    self
  }

  pub const fn feedback(&mut self, feedback: FeedbackInvocation) -> &mut Self {
    self.feedback = feedback;
    self
  }

  pub const fn analytics_enabled(&mut self, enabled: bool) -> &mut Self {
    self.analytics_enabled = enabled;
    self
  }

  pub const fn session_recording(&mut self, enabled: bool) -> &mut Self {
    self.session_recording = enabled;
    self
  }

  pub const fn non_fatal_enabled(&mut self, enabled: bool) -> &mut Self {
    self.non_fatal_enabled = enabled;
    self
  }

  pub const fn debug_log(&mut self, enabled: bool) -> &mut Self {
    self.debug_log = enabled;
    self
  }

  pub const fn validate_certificates(&mut self, enabled: bool) -> &mut Self {
    self.validate_certificates = enabled;
    self
  }

  pub fn tuning(&mut self, tuning: Tuning) -> &mut Self {
    self.tuning = tuning;
    self
  }

  /// Applies the keys present in a host supplied configuration object.
  pub fn apply_bridge(&mut self, bridge: BridgeConfig) -> &mut Self {
    if let Some(mode) = bridge.crash_handling {
      self.crash_reporting = mode;
    }
    if let Some(destination) = bridge.log_type {
      self.log_destination = destination;
    }
    if let Some(level) = bridge.minimum_log_level_console {
      self.console_min_level = level;
    }
    if let Some(level) = bridge.minimum_log_level_remote {
      self.remote_min_level = level;
    }
    if let Some(feedback) = bridge.feedback_invocation {
      self.feedback = feedback;
    }
    if let Some(enabled) = bridge.is_analytics_enabled {
      self.analytics_enabled = enabled;
    }
    if let Some(enabled) = bridge.is_session_recording_enabled {
      self.session_recording = enabled;
    }
    if let Some(enabled) = bridge.is_non_fatal_issues_enabled {
      self.non_fatal_enabled = enabled;
    }
    if let Some(enabled) = bridge.debug_log {
      self.debug_log = enabled;
    }
    self
  }

  /// Parses a JSON configuration object and applies it.
  pub fn apply_bridge_json(&mut self, json: &str) -> Result<&mut Self, ConfigError> {
    let bridge: BridgeConfig =
      serde_json::from_str(json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(self.apply_bridge(bridge))
  }

  pub fn build(&self) -> Result<Config, ConfigError> {
    let server_url = self
      .server_url
      .clone()
      .filter(|url| !url.is_empty())
      .ok_or_else(|| ConfigError::Invalid("server url is required".to_string()))?;
    if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
      return Err(ConfigError::Invalid(format!(
        "server url must be http or https: {server_url}"
      )));
    }

    let project = self
      .project
      .clone()
      .filter(|project| !project.is_empty())
      .ok_or_else(|| ConfigError::Invalid("project is required".to_string()))?;

    let tuning = &self.tuning;
    if tuning.queue_capacity == 0 {
      return Err(ConfigError::Invalid("queue capacity must be positive".to_string()));
    }
    if tuning.max_batch_size == 0 {
      return Err(ConfigError::Invalid("max batch size must be positive".to_string()));
    }
    if tuning.max_stored_batches == 0 {
      return Err(ConfigError::Invalid("max stored batches must be positive".to_string()));
    }
    if tuning.max_attempts == 0 {
      return Err(ConfigError::Invalid("max attempts must be positive".to_string()));
    }
    if !tuning.max_batch_age.is_positive() || !tuning.request_timeout.is_positive() {
      return Err(ConfigError::Invalid(
        "batch age and request timeout must be positive".to_string(),
      ));
    }
    if tuning.retry_base > tuning.retry_cap {
      return Err(ConfigError::Invalid(
        "retry base must not exceed retry cap".to_string(),
      ));
    }

    Ok(Config {
      server_url,
      project,
      crash_reporting: self.crash_reporting,
      log_destination: self.log_destination,
      console_min_level: self.console_min_level,
      remote_min_level: self.remote_min_level,
      feedback: self.feedback,
      analytics_enabled: self.analytics_enabled,
      session_recording: self.session_recording,
      non_fatal_enabled: self.non_fatal_enabled,
      debug_log: self.debug_log,
      validate_certificates: self.validate_certificates,
      tuning: self.tuning.clone(),
    })
  }
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./event_test.rs"]
mod event_test;

use beacon_time::TimeProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

/// Free-form string key/value pairs attached to an event.
pub type Tags = HashMap<String, String>;

//
// ValidationError
//

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("{0} must not be empty")]
  EmptyField(&'static str),
  #[error("tag keys must not be empty")]
  EmptyTagKey,
}

//
// EventKind
//

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  AppEvent,
  ScreenAppear,
  ScreenDisappear,
  TimedEvent,
  Crash,
  NonFatal,
  Log,
  SessionStart,
  SessionEnd,
}

impl EventKind {
  /// Name used on the wire.
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::AppEvent => "app_event",
      Self::ScreenAppear => "screen_appear",
      Self::ScreenDisappear => "screen_disappear",
      Self::TimedEvent => "timed_event",
      Self::Crash => "crash",
      Self::NonFatal => "non_fatal",
      Self::Log => "log",
      Self::SessionStart => "session_start",
      Self::SessionEnd => "session_end",
    }
  }

  /// Whether the kind is product analytics, which the analytics switch turns off.
  #[must_use]
  pub const fn is_analytics(self) -> bool {
    matches!(
      self,
      Self::AppEvent | Self::ScreenAppear | Self::ScreenDisappear | Self::TimedEvent
    )
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

//
// LogLevel
//

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Debug,
  Info,
  Warning,
  Error,
}

impl LogLevel {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Debug => "debug",
      Self::Info => "info",
      Self::Warning => "warning",
      Self::Error => "error",
    }
  }
}

impl From<LogLevel> for log::Level {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Debug => Self::Debug,
      LogLevel::Info => Self::Info,
      LogLevel::Warning => Self::Warn,
      LogLevel::Error => Self::Error,
    }
  }
}

//
// EventTimestamp
//

/// When an event happened, on both clocks. The wall clock is what the collector sees; uptime
/// orders events and measures durations even if the device clock jumps.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTimestamp {
  pub wall: OffsetDateTime,
  pub uptime: Duration,
}

impl EventTimestamp {
  #[must_use]
  pub fn now(time_provider: &dyn TimeProvider) -> Self {
    Self {
      wall: time_provider.now(),
      uptime: time_provider.uptime(),
    }
  }
}

//
// Event
//

/// A single trackable occurrence. Constructors validate their input so that every `Event` in
/// existence satisfies:
/// * `category` and `name` are non-empty when present.
/// * tag keys are non-empty.
/// * `duration_ms` is only set on timed events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Event {
  kind: EventKind,
  category: Option<String>,
  name: Option<String>,
  tags: HashMap<String, String>,
  timestamp: EventTimestamp,
  duration_ms: Option<u64>,
  detail: Option<String>,
}

fn required(value: impl Into<String>, field: &'static str) -> Result<String, ValidationError> {
  let value = value.into();
  if value.is_empty() {
    return Err(ValidationError::EmptyField(field));
  }
  Ok(value)
}

fn optional(
  value: Option<impl Into<String>>,
  field: &'static str,
) -> Result<Option<String>, ValidationError> {
  value.map(|value| required(value, field)).transpose()
}

fn collect_tags<K: Into<String>, V: Into<String>>(
  tags: impl IntoIterator<Item = (K, V)>,
) -> Result<HashMap<String, String>, ValidationError> {
  tags
    .into_iter()
    .map(|(k, v)| {
      let key = k.into();
      if key.is_empty() {
        return Err(ValidationError::EmptyTagKey);
      }
      Ok((key, v.into()))
    })
    .collect()
}

impl Event {
  fn new(
    kind: EventKind,
    category: Option<String>,
    name: Option<String>,
    tags: HashMap<String, String>,
    timestamp: EventTimestamp,
  ) -> Self {
    Self {
      kind,
      category,
      name,
      tags,
      timestamp,
      duration_ms: None,
      detail: None,
    }
  }

  pub fn app_event<K: Into<String>, V: Into<String>>(
    category: impl Into<String>,
    name: impl Into<String>,
    tags: impl IntoIterator<Item = (K, V)>,
    timestamp: EventTimestamp,
  ) -> Result<Self, ValidationError> {
    Ok(Self::new(
      EventKind::AppEvent,
      Some(required(category, "category")?),
      Some(required(name, "name")?),
      collect_tags(tags)?,
      timestamp,
    ))
  }

  pub fn screen_appear<K: Into<String>, V: Into<String>>(
    title: impl Into<String>,
    tags: impl IntoIterator<Item = (K, V)>,
    timestamp: EventTimestamp,
  ) -> Result<Self, ValidationError> {
    Ok(Self::new(
      EventKind::ScreenAppear,
      None,
      Some(required(title, "screen title")?),
      collect_tags(tags)?,
      timestamp,
    ))
  }

  pub fn screen_disappear<K: Into<String>, V: Into<String>>(
    title: impl Into<String>,
    tags: impl IntoIterator<Item = (K, V)>,
    timestamp: EventTimestamp,
  ) -> Result<Self, ValidationError> {
    Ok(Self::new(
      EventKind::ScreenDisappear,
      None,
      Some(required(title, "screen title")?),
      collect_tags(tags)?,
      timestamp,
    ))
  }

  /// A timed event. `timestamp` is when the timing started.
  pub fn timed<K: Into<String>, V: Into<String>>(
    category: impl Into<String>,
    name: impl Into<String>,
    tags: impl IntoIterator<Item = (K, V)>,
    timestamp: EventTimestamp,
    duration_ms: u64,
  ) -> Result<Self, ValidationError> {
    let mut event = Self::new(
      EventKind::TimedEvent,
      Some(required(category, "category")?),
      Some(required(name, "name")?),
      collect_tags(tags)?,
      timestamp,
    );
    event.duration_ms = Some(duration_ms);
    Ok(event)
  }

  /// A crash captured by the crash detector in a previous run. `reason` is a short summary of the
  /// report, `report` the full body.
  pub fn crash(
    reason: impl Into<String>,
    report: impl Into<String>,
    timestamp: EventTimestamp,
  ) -> Result<Self, ValidationError> {
    let mut event = Self::new(
      EventKind::Crash,
      None,
      Some(required(reason, "crash reason")?),
      HashMap::new(),
      timestamp,
    );
    event.detail = Some(report.into());
    Ok(event)
  }

  /// A non-fatal issue. Both the reason and the error description are optional; `user_info`
  /// becomes the tags.
  pub fn non_fatal<K: Into<String>, V: Into<String>>(
    reason: Option<impl Into<String>>,
    error: Option<impl Into<String>>,
    user_info: impl IntoIterator<Item = (K, V)>,
    timestamp: EventTimestamp,
  ) -> Result<Self, ValidationError> {
    let mut event = Self::new(
      EventKind::NonFatal,
      None,
      optional(reason, "reason")?,
      collect_tags(user_info)?,
      timestamp,
    );
    event.detail = error.map(Into::into);
    Ok(event)
  }

  /// A remote log line. The level is recorded as the category.
  pub fn log<K: Into<String>, V: Into<String>>(
    level: LogLevel,
    message: impl Into<String>,
    fields: impl IntoIterator<Item = (K, V)>,
    timestamp: EventTimestamp,
  ) -> Result<Self, ValidationError> {
    Ok(Self::new(
      EventKind::Log,
      Some(level.as_str().to_string()),
      Some(required(message, "message")?),
      collect_tags(fields)?,
      timestamp,
    ))
  }

  #[must_use]
  pub fn session_start(session_id: &str, timestamp: EventTimestamp) -> Self {
    Self::new(
      EventKind::SessionStart,
      None,
      None,
      HashMap::from([("session_id".to_string(), session_id.to_string())]),
      timestamp,
    )
  }

  #[must_use]
  pub fn session_end(session_id: &str, timestamp: EventTimestamp) -> Self {
    Self::new(
      EventKind::SessionEnd,
      None,
      None,
      HashMap::from([("session_id".to_string(), session_id.to_string())]),
      timestamp,
    )
  }

  #[must_use]
  pub const fn kind(&self) -> EventKind {
    self.kind
  }

  #[must_use]
  pub fn category(&self) -> Option<&str> {
    self.category.as_deref()
  }

  #[must_use]
  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  #[must_use]
  pub const fn tags(&self) -> &HashMap<String, String> {
    &self.tags
  }

  #[must_use]
  pub const fn timestamp(&self) -> &EventTimestamp {
    &self.timestamp
  }

  #[must_use]
  pub const fn duration_ms(&self) -> Option<u64> {
    self.duration_ms
  }

  #[must_use]
  pub fn detail(&self) -> Option<&str> {
    self.detail.as_deref()
  }
}

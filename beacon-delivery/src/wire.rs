// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! JSON body posted to the collector.

use beacon_events::{Batch, Event};
use beacon_time::OffsetDateTimeExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct BatchPayload {
  pub project: String,
  pub sequence: u64,
  pub sdk_version: String,
  pub events: Vec<EventPayload>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct EventPayload {
  pub kind: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub tags: HashMap<String, String>,

  /// Wall clock time in ms since the unix epoch.
  pub timestamp: i64,
  pub uptime_ms: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration_ms: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
}

impl From<&Event> for EventPayload {
  fn from(event: &Event) -> Self {
    Self {
      kind: event.kind().as_str().to_string(),
      category: event.category().map(ToString::to_string),
      name: event.name().map(ToString::to_string),
      tags: event.tags().clone(),
      timestamp: event.timestamp().wall.unix_timestamp_ms(),
      uptime_ms: u64::try_from(event.timestamp().uptime.as_millis()).unwrap_or(u64::MAX),
      duration_ms: event.duration_ms(),
      detail: event.detail().map(ToString::to_string),
    }
  }
}

impl BatchPayload {
  #[must_use]
  pub fn new(project: &str, sdk_version: &str, batch: &Batch) -> Self {
    Self {
      project: project.to_string(),
      sequence: batch.sequence,
      sdk_version: sdk_version.to_string(),
      events: batch.events.iter().map(EventPayload::from).collect(),
    }
  }
}

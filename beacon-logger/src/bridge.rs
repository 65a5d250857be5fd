// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./bridge_test.rs"]
mod bridge_test;

use crate::pipeline::{PipelineHandle, TrackError};
use beacon_events::{LogLevel, Tags, TimingHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
  #[error("malformed request: {0}")]
  Malformed(String),
  #[error(transparent)]
  Track(#[from] TrackError),
}

//
// BridgeRequest
//

/// A call from a host runtime, e.g. `{"method": "trackEvent", "params": {...}}`. Timestamps are in
/// ms since the epoch as taken by the host.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum BridgeRequest {
  TrackEvent {
    category: String,
    name: String,
    #[serde(default)]
    tags: Tags,
  },
  TrackScreenAppearing {
    title: String,
    #[serde(default)]
    tags: Tags,
  },
  TrackScreenDisappearing {
    title: String,
    #[serde(default)]
    tags: Tags,
  },
  #[serde(rename_all = "camelCase")]
  StartTimingEvent {
    identifier: String,
    start_timestamp: i64,
    category: String,
    name: String,
  },
  #[serde(rename_all = "camelCase")]
  TrackTimingEvent {
    identifier: String,
    end_timestamp: i64,
    #[serde(default)]
    tags: Tags,
  },
  #[serde(rename_all = "camelCase")]
  ReportNonFatalIssue {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user_info: HashMap<String, Value>,
  },
  Log {
    level: LogLevel,
    message: String,
    #[serde(default)]
    fields: Tags,
  },
  StartFeedback,
  Flush,
}

//
// BridgeResponse
//

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BridgeResponse {
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl From<Result<(), BridgeError>> for BridgeResponse {
  fn from(result: Result<(), BridgeError>) -> Self {
    match result {
      Ok(()) => Self {
        ok: true,
        error: None,
      },
      Err(e) => Self {
        ok: false,
        error: Some(e.to_string()),
      },
    }
  }
}

// Host values may be any JSON; strings are taken as is and everything else in its JSON form.
fn stringify(user_info: HashMap<String, Value>) -> Tags {
  user_info
    .into_iter()
    .map(|(key, value)| {
      let value = match value {
        Value::String(s) => s,
        other => other.to_string(),
      };
      (key, value)
    })
    .collect()
}

//
// Bridge
//

/// Dispatches host runtime calls against a running pipeline. The host names timings with its own
/// string identifiers, which are mapped to typed handles here.
pub struct Bridge {
  handle: PipelineHandle,
  timings: Mutex<HashMap<String, TimingHandle>>,
}

impl Bridge {
  #[must_use]
  pub fn new(handle: PipelineHandle) -> Self {
    Self {
      handle,
      timings: Mutex::default(),
    }
  }

  pub fn dispatch(&self, request: BridgeRequest) -> Result<(), BridgeError> {
    match request {
      BridgeRequest::TrackEvent {
        category,
        name,
        tags,
      } => self.handle.track_event(&category, &name, tags)?,
      BridgeRequest::TrackScreenAppearing { title, tags } => {
        self.handle.track_screen_appearing(&title, tags)?;
      },
      BridgeRequest::TrackScreenDisappearing { title, tags } => {
        self.handle.track_screen_disappearing(&title, tags)?;
      },
      BridgeRequest::StartTimingEvent {
        identifier,
        start_timestamp,
        category,
        name,
      } => {
        let mut timings = self.timings.lock();
        // Drop identifiers whose timing expired without being tracked.
        timings.retain(|_, handle| self.handle.is_timing_pending(handle));
        let handle = self
          .handle
          .start_timing_at(&category, &name, start_timestamp)?;
        // A reused identifier replaces the earlier timing, which is left to expire.
        timings.insert(identifier, handle);
      },
      BridgeRequest::TrackTimingEvent {
        identifier,
        end_timestamp,
        tags,
      } => {
        let handle = self
          .timings
          .lock()
          .remove(&identifier)
          .ok_or(TrackError::InvalidHandle)?;
        self.handle.track_timing_at(handle, end_timestamp, tags)?;
      },
      BridgeRequest::ReportNonFatalIssue {
        reason,
        error,
        user_info,
      } => self.handle.report_non_fatal(
        reason.as_deref(),
        error.as_deref(),
        stringify(user_info),
      )?,
      BridgeRequest::Log {
        level,
        message,
        fields,
      } => self.handle.log(level, &message, fields)?,
      BridgeRequest::StartFeedback => {
        self.handle.invoke_feedback();
      },
      BridgeRequest::Flush => self.handle.flush(),
    }
    Ok(())
  }

  /// Parses and dispatches a JSON request, answering with a JSON `BridgeResponse`.
  #[must_use]
  pub fn dispatch_json(&self, request: &str) -> String {
    let result = serde_json::from_str(request)
      .map_err(|e| BridgeError::Malformed(e.to_string()))
      .and_then(|request| self.dispatch(request));
    if let Err(e) = &result {
      log::debug!("bridge call failed: {e}");
    }

    serde_json::to_string(&BridgeResponse::from(result))
      .unwrap_or_else(|_| r#"{"ok":false}"#.to_string())
  }
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{Bridge, BridgeError, BridgeRequest};
use crate::config::{LogDestination, Tuning};
use crate::pipeline::TrackError;
use crate::test::{START, TestPipeline};
use assert_matches::assert_matches;
use beacon_events::{EventKind, LogLevel};
use beacon_time::OffsetDateTimeExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use time::ext::NumericalDuration;

fn setup(configure: impl FnOnce(&mut crate::config::ConfigBuilder)) -> (TestPipeline, Bridge) {
  let pipeline = TestPipeline::new(configure);
  let bridge = Bridge::new(pipeline.handle.clone());
  (pipeline, bridge)
}

fn call(bridge: &Bridge, request: &serde_json::Value) -> serde_json::Value {
  serde_json::from_str(&bridge.dispatch_json(&request.to_string())).unwrap()
}

#[test]
fn parses_host_requests() {
  let request: BridgeRequest = serde_json::from_value(json!({
    "method": "startTimingEvent",
    "params": {
      "identifier": "feed-1",
      "startTimestamp": 1_700_000_000_000_i64,
      "category": "load",
      "name": "feed",
    },
  }))
  .unwrap();
  assert_eq!(
    request,
    BridgeRequest::StartTimingEvent {
      identifier: "feed-1".to_string(),
      start_timestamp: 1_700_000_000_000,
      category: "load".to_string(),
      name: "feed".to_string(),
    }
  );

  let request: BridgeRequest = serde_json::from_value(json!({"method": "flush"})).unwrap();
  assert_eq!(request, BridgeRequest::Flush);

  let request: BridgeRequest = serde_json::from_value(json!({
    "method": "log",
    "params": {"level": "warning", "message": "low memory"},
  }))
  .unwrap();
  assert_matches!(
    request,
    BridgeRequest::Log { level: LogLevel::Warning, message, fields } if message == "low memory"
      && fields.is_empty()
  );
}

#[test]
fn track_event() {
  let (pipeline, bridge) = setup(|_| {});

  let response = call(
    &bridge,
    &json!({
      "method": "trackEvent",
      "params": {"category": "purchase", "name": "checkout", "tags": {"item": "book"}},
    }),
  );
  assert_eq!(response, json!({"ok": true}));

  let event = pipeline.single();
  assert_eq!(event.kind(), EventKind::AppEvent);
  assert_eq!(event.name(), Some("checkout"));
  assert_eq!(event.tags()["item"], "book");
}

#[test]
fn timing_by_identifier() {
  let (pipeline, bridge) = setup(|_| {});
  let start = START.unix_timestamp_ms();

  bridge
    .dispatch(BridgeRequest::StartTimingEvent {
      identifier: "feed-1".to_string(),
      start_timestamp: start,
      category: "load".to_string(),
      name: "feed".to_string(),
    })
    .unwrap();
  // Restarting a live identifier replaces its start time.
  bridge
    .dispatch(BridgeRequest::StartTimingEvent {
      identifier: "feed-1".to_string(),
      start_timestamp: start + 140,
      category: "load".to_string(),
      name: "feed".to_string(),
    })
    .unwrap();

  let track = |identifier: &str| {
    bridge.dispatch(BridgeRequest::TrackTimingEvent {
      identifier: identifier.to_string(),
      end_timestamp: start + 640,
      tags: [("screen".to_string(), "home".to_string())].into(),
    })
  };
  track("feed-1").unwrap();
  let event = pipeline.single();
  assert_eq!(event.kind(), EventKind::TimedEvent);
  assert_eq!(event.duration_ms(), Some(500));
  assert_eq!(event.tags()["screen"], "home");

  // The identifier is released once tracked.
  assert_eq!(
    track("feed-1"),
    Err(BridgeError::Track(TrackError::InvalidHandle))
  );
  assert_eq!(
    track("never-started"),
    Err(BridgeError::Track(TrackError::InvalidHandle))
  );
}

#[test]
fn expired_identifier_can_be_reused() {
  let (pipeline, bridge) = setup(|builder| {
    builder.tuning(Tuning {
      timing_ttl: 1.minutes(),
      ..Default::default()
    });
  });
  let start = |identifier: &str| {
    bridge.dispatch(BridgeRequest::StartTimingEvent {
      identifier: identifier.to_string(),
      start_timestamp: START.unix_timestamp_ms(),
      category: "load".to_string(),
      name: "feed".to_string(),
    })
  };

  start("feed-1").unwrap();
  pipeline.time_provider.advance(2.minutes());
  start("feed-1").unwrap();
}

#[test]
fn non_fatal_user_info_is_stringified() {
  let (pipeline, bridge) = setup(|builder| {
    builder.non_fatal_enabled(true);
  });

  let response = call(
    &bridge,
    &json!({
      "method": "reportNonFatalIssue",
      "params": {
        "reason": "decode failed",
        "error": "unexpected token",
        "userInfo": {"attempt": 3, "cached": false, "source": "feed"},
      },
    }),
  );
  assert_eq!(response, json!({"ok": true}));

  let event = pipeline.single();
  assert_eq!(event.kind(), EventKind::NonFatal);
  assert_eq!(event.detail(), Some("unexpected token"));
  assert_eq!(event.tags()["attempt"], "3");
  assert_eq!(event.tags()["cached"], "false");
  assert_eq!(event.tags()["source"], "feed");
}

#[test]
fn log_and_flush() {
  let (mut pipeline, bridge) = setup(|builder| {
    builder.log_destination(LogDestination::Remote);
  });

  let response = call(
    &bridge,
    &json!({
      "method": "log",
      "params": {"level": "error", "message": "sync failed", "fields": {"code": "E42"}},
    }),
  );
  assert_eq!(response, json!({"ok": true}));
  assert_eq!(pipeline.single().category(), Some("error"));

  assert_eq!(call(&bridge, &json!({"method": "flush"})), json!({"ok": true}));
  assert!(pipeline.flush_rx.try_recv().is_ok());

  // Feedback is disabled by default; the call still succeeds.
  assert_eq!(
    call(&bridge, &json!({"method": "startFeedback"})),
    json!({"ok": true})
  );
}

#[test]
fn failures_are_reported_in_the_response() {
  let (pipeline, bridge) = setup(|_| {});

  let response = call(&bridge, &json!({"method": "launchRockets"}));
  assert_eq!(response["ok"], false);
  assert!(
    response["error"]
      .as_str()
      .unwrap()
      .starts_with("malformed request")
  );

  let response: serde_json::Value =
    serde_json::from_str(&bridge.dispatch_json("not json")).unwrap();
  assert_eq!(response["ok"], false);

  let response = call(
    &bridge,
    &json!({"method": "trackEvent", "params": {"category": "", "name": "checkout"}}),
  );
  assert_eq!(
    response,
    json!({"ok": false, "error": "category must not be empty"})
  );
  assert!(pipeline.queued().is_empty());
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use assert_matches::assert_matches;
use beacon_client_common::file::{read_checksummed_record, write_checksummed_record};
use pretty_assertions::assert_eq;
use time::macros::datetime;

fn ts() -> EventTimestamp {
  EventTimestamp {
    wall: datetime!(2024-03-01 10:00:00.123 UTC),
    uptime: Duration::from_millis(4_500),
  }
}

#[test]
fn app_event_requires_category_and_name() {
  assert_matches!(
    Event::app_event("", "name", Tags::new(), ts()),
    Err(ValidationError::EmptyField("category"))
  );
  assert_matches!(
    Event::app_event("category", "", Tags::new(), ts()),
    Err(ValidationError::EmptyField("name"))
  );
  assert_matches!(
    Event::app_event("category", "name", [("", "v")], ts()),
    Err(ValidationError::EmptyTagKey)
  );

  let event = Event::app_event("checkout", "purchase", [("item", "shoe")], ts()).unwrap();
  assert_eq!(event.kind(), EventKind::AppEvent);
  assert_eq!(event.category(), Some("checkout"));
  assert_eq!(event.name(), Some("purchase"));
  assert_eq!(event.tags()["item"], "shoe");
  assert_eq!(event.duration_ms(), None);
}

#[test]
fn screen_events_require_title() {
  assert_matches!(
    Event::screen_appear("", Tags::new(), ts()),
    Err(ValidationError::EmptyField("screen title"))
  );
  let event = Event::screen_disappear("Home", Tags::new(), ts()).unwrap();
  assert_eq!(event.kind(), EventKind::ScreenDisappear);
  assert_eq!(event.name(), Some("Home"));
  assert_eq!(event.category(), None);
}

#[test]
fn tags_are_copied() {
  let mut tags = Tags::from([("a".to_string(), "1".to_string())]);
  let event = Event::app_event("c", "n", tags.clone(), ts()).unwrap();
  tags.insert("b".to_string(), "2".to_string());
  assert_eq!(event.tags().len(), 1);
}

#[test]
fn non_fatal_optional_fields() {
  let event = Event::non_fatal(
    None::<String>,
    Some("stack trace"),
    [("user", "1")],
    ts(),
  )
  .unwrap();
  assert_eq!(event.kind(), EventKind::NonFatal);
  assert_eq!(event.name(), None);
  assert_eq!(event.detail(), Some("stack trace"));

  assert_matches!(
    Event::non_fatal(Some(""), None::<String>, Tags::new(), ts()),
    Err(ValidationError::EmptyField("reason"))
  );
}

#[test]
fn log_and_session_events() {
  let event = Event::log(LogLevel::Warning, "disk low", [("free", "10")], ts()).unwrap();
  assert_eq!(event.category(), Some("warning"));
  assert_eq!(event.name(), Some("disk low"));
  assert_matches!(
    Event::log(LogLevel::Info, "", Tags::new(), ts()),
    Err(ValidationError::EmptyField("message"))
  );

  let start = Event::session_start("abc", ts());
  assert_eq!(start.kind(), EventKind::SessionStart);
  assert_eq!(start.tags()["session_id"], "abc");
  assert!(!EventKind::SessionStart.is_analytics());
  assert!(EventKind::TimedEvent.is_analytics());
}

#[test]
fn persisted_form_preserves_every_field() {
  let event = Event::crash("SIGSEGV", "{\"reason\":\"SIGSEGV\"}", ts()).unwrap();
  let bytes = write_checksummed_record(&event).unwrap();
  assert_eq!(read_checksummed_record::<Event>(&bytes).unwrap(), event);

  let timed = Event::timed("load", "feed", [("k", "v")], ts(), 250).unwrap();
  let bytes = write_checksummed_record(&timed).unwrap();
  assert_eq!(read_checksummed_record::<Event>(&bytes).unwrap(), timed);
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{
  ContextErrorReporter,
  ERROR_HANDLER,
  ReportContext,
  Reporter,
  UnexpectedErrorHandler,
  handle_unexpected,
};
use anyhow::anyhow;
use beacon_stats::Collector;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct TestReporter {
  messages: Mutex<Vec<String>>,
  fields: Mutex<Option<BTreeMap<String, String>>>,
}

impl Reporter for TestReporter {
  fn report(&self, message: &str, fields: &BTreeMap<String, String>) {
    self.messages.lock().unwrap().push(message.to_string());
    *self.fields.lock().unwrap() = Some(fields.clone());
  }
}

struct FixedContext;

impl ReportContext for FixedContext {
  fn fields(&self) -> BTreeMap<String, String> {
    BTreeMap::from([
      ("project_id".to_string(), "abc".to_string()),
      ("session_id".to_string(), "s1".to_string()),
    ])
  }
}

// The handler is process global so everything touching the global reporter lives in one test.
#[test]
fn global_reporter_with_limit() {
  let reporter = Arc::new(TestReporter::default());
  UnexpectedErrorHandler::set_reporter(Arc::new(ContextErrorReporter::new(
    reporter.clone(),
    Arc::new(FixedContext),
  )));
  UnexpectedErrorHandler::register_stats(&Collector::default().scope(""));

  handle_unexpected::<(), anyhow::Error>(Err(anyhow!("blah")), "test");
  assert_eq!(reporter.messages.lock().unwrap().as_slice(), ["test: blah"]);
  assert_eq!(
    reporter.fields.lock().unwrap().clone().unwrap(),
    BTreeMap::from([
      ("x-project-id".to_string(), "abc".to_string()),
      ("x-session-id".to_string(), "s1".to_string()),
    ])
  );

  for i in 0 .. 6 {
    handle_unexpected::<(), anyhow::Error>(Err(anyhow!("{i}")), "test");
  }

  // Only five reports make it through: "blah" and 0..=3.
  assert_eq!(reporter.messages.lock().unwrap().len(), 5);
  assert_eq!(reporter.messages.lock().unwrap().last().unwrap(), "test: 3");
  assert_eq!(
    ERROR_HANDLER.lock().dropped_errors.as_ref().unwrap().get(),
    2
  );

  UnexpectedErrorHandler::clear_reporter();
}

#[test]
fn ok_results_are_not_reported() {
  let reporter = Arc::new(TestReporter::default());
  UnexpectedErrorHandler::with_reporter(reporter.clone(), || {
    handle_unexpected::<u32, anyhow::Error>(Ok(1), "ok");
  });
  assert!(reporter.messages.lock().unwrap().is_empty());
}

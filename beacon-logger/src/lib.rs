// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![deny(
  clippy::expect_used,
  clippy::panic,
  clippy::todo,
  clippy::unimplemented,
  clippy::unreachable,
  clippy::unwrap_used
)]

mod attempt_store;
mod batcher;
pub mod bridge;
pub mod config;
mod crash;
mod manager;
mod pipeline;
mod retry;
mod worker;

#[cfg(test)]
mod test;

pub use attempt_store::{ATTEMPTS_DIRECTORY, AttemptStore, Restored};
pub use batcher::Batcher;
pub use beacon_events::{LogLevel, Tags, TimingHandle};
pub use crash::{CrashConsent, CrashReport, MockCrashConsent, NEW_REPORTS_DIRECTORY};
pub use manager::{QUEUE_DIRECTORY, TelemetryManager};
pub use pipeline::{
  CONSOLE_TARGET,
  FeedbackPresenter,
  MockFeedbackPresenter,
  PipelineHandle,
  TrackError,
};
pub use retry::{AttemptState, DeliveryAttempt, DropReason, RetryController, RetryPolicy};

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  beacon_test_helpers::test_global_init();
}

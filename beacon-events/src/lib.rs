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

mod batch;
mod event;
mod timing;

pub use batch::Batch;
pub use event::{Event, EventKind, EventTimestamp, LogLevel, Tags, ValidationError};
pub use timing::{DEFAULT_TIMING_TTL, TimingError, TimingHandle, TimingRegistry};

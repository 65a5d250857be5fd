// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./rate_limit_log_test.rs"]
mod rate_limit_log_test;

use parking_lot::Mutex;
use time::Duration;
use tokio::time::Instant;

//
// LogThrottle
//

/// Per call site state for warnings that may repeat on every event, such as a full queue or an
/// unreachable collector. Messages inside the window are demoted to debug and counted.
#[derive(Default)]
pub struct LogThrottle {
  state: Mutex<ThrottleState>,
}

#[derive(Default)]
struct ThrottleState {
  last_logged: Option<Instant>,
  suppressed: u64,
}

impl LogThrottle {
  /// Returns `Some(suppressed)` when the message may be logged at its full level, carrying the
  /// number of messages demoted since the last full level one.
  pub fn admit(&self, window: Duration) -> Option<u64> {
    let now = Instant::now();
    let mut state = self.state.lock();
    let open = state
      .last_logged
      .is_none_or(|last_logged| now - last_logged > window);
    if !open {
      state.suppressed += 1;
      return None;
    }

    state.last_logged = Some(now);
    Some(std::mem::take(&mut state.suppressed))
  }
}

#[macro_export]
macro_rules! warn_every {
  ($window:expr, $first:tt) => {
    $crate::log_every!(log::Level::Warn, $window, "{}", $first);
  };
  ($window:expr, $first:tt, $($arg:tt)+) => {
    $crate::log_every!(log::Level::Warn, $window, $first, $($arg)+);
  };
}

// Logs at `$level` at most once per `$window` for each call site, and at debug otherwise.
#[macro_export]
macro_rules! log_every {
  ($level:expr, $window:expr, $first:tt, $($arg:tt)+) => {
    {
      use $crate::rate_limit_log::LogThrottle;
      use std::sync::OnceLock;

      static THROTTLE: OnceLock<LogThrottle> = OnceLock::new();

      match THROTTLE.get_or_init(LogThrottle::default).admit($window) {
        Some(0) => log::log!($level, $first, $($arg)+),
        Some(suppressed) => log::log!(
          $level,
          "{} ({} similar messages suppressed)",
          format_args!($first, $($arg)+),
          suppressed
        ),
        None => log::debug!($first, $($arg)+),
      }
    }
  };
}

pub use {log_every, warn_every};

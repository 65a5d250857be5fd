// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::LogThrottle;
use crate::warn_every;
use time::ext::NumericalDuration;

trait Sleep {
  async fn sleep(self);
}

impl Sleep for time::Duration {
  async fn sleep(self) {
    tokio::time::sleep(self.unsigned_abs()).await;
  }
}

#[tokio::test(start_paused = true)]
async fn throttle_counts_suppressed_messages() {
  let throttle = LogThrottle::default();
  assert_eq!(throttle.admit(1.seconds()), Some(0));
  assert_eq!(throttle.admit(1.seconds()), None);

  500.milliseconds().sleep().await;
  assert_eq!(throttle.admit(1.seconds()), None);

  501.milliseconds().sleep().await;
  assert_eq!(throttle.admit(1.seconds()), Some(2));
  assert_eq!(throttle.admit(1.seconds()), None);
}

#[tokio::test(start_paused = true)]
async fn macro_expands_per_call_site() {
  for i in 0 .. 3 {
    warn_every!(1.seconds(), "queue full, dropped {}", i);
  }
  warn_every!(1.seconds(), "collector unreachable");

  2.seconds().sleep().await;
  for i in 0 .. 2 {
    warn_every!(1.seconds(), "queue full, dropped {}", i);
  }
}

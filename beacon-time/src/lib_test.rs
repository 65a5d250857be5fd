// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::{OffsetDateTimeExt as _, TestTimeProvider, TimeProvider, from_unix_timestamp_ms};
use std::time::Duration;
use time::ext::NumericalDuration;
use time::macros::datetime;

#[test]
fn unix_timestamp_ms() {
  let test_cases = &[
    (datetime!(1970-01-01 00:00:00 UTC), 0),
    (datetime!(1970-01-01 00:00:01.5 UTC), 1_500),
    (datetime!(2024-01-01 00:00:00.123456 UTC), 1_704_067_200_123),
  ];

  for (input, expected) in test_cases {
    assert_eq!(input.unix_timestamp_ms(), *expected, "{input}");
    assert_eq!(
      from_unix_timestamp_ms(*expected).unix_timestamp_ms(),
      *expected
    );
  }
}

#[tokio::test]
async fn test_provider_clocks() {
  let provider = TestTimeProvider::new(datetime!(2024-01-01 00:00:00 UTC));

  provider.advance(5.seconds());
  assert_eq!(provider.now(), datetime!(2024-01-01 00:00:05 UTC));
  assert_eq!(provider.uptime(), Duration::from_secs(5));

  // Wall clock jumps don't move the monotonic clock.
  provider.set_time(datetime!(2023-01-01 00:00:00 UTC));
  assert_eq!(provider.uptime(), Duration::from_secs(5));

  provider.sleep(1.seconds()).await;
  assert_eq!(provider.now(), datetime!(2023-01-01 00:00:01 UTC));
  assert_eq!(provider.uptime(), Duration::from_secs(6));
}

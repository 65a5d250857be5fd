// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

// Test code only.
#![allow(clippy::panic)]

use crate::Collector;
use std::collections::BTreeMap;

pub trait StatsHelper {
  fn assert_counter_eq(&self, value: u64, name: &str, labels: BTreeMap<String, String>);
  fn counter_value(&self, name: &str) -> u64;
}

impl StatsHelper for Collector {
  #[allow(clippy::needless_pass_by_value)]
  fn assert_counter_eq(&self, value: u64, name: &str, labels: BTreeMap<String, String>) {
    assert_eq!(
      value,
      self
        .find_counter(name, &labels)
        .unwrap_or_else(|| panic!("Counter not found: {name} {labels:?}"))
        .get(),
      "{name} {labels:?}"
    );
  }

  // Missing counters read as zero.
  fn counter_value(&self, name: &str) -> u64 {
    self
      .find_counter(name, &BTreeMap::new())
      .map_or(0, |c| c.get())
  }
}

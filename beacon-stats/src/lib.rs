// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod test;

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const SEP: &str = ":";

//
// Counter
//

/// A monotonically increasing counter. Clones share the same value so a counter can be handed to
/// any thread and incremented without locking.
#[derive(Clone, Debug, Default)]
pub struct Counter {
  value: Arc<AtomicU64>,
}

impl Counter {
  pub fn inc(&self) {
    self.value.fetch_add(1, Ordering::Relaxed);
  }

  pub fn inc_by(&self, value: u64) {
    self.value.fetch_add(value, Ordering::Relaxed);
  }

  #[must_use]
  pub fn get(&self) -> u64 {
    self.value.load(Ordering::Relaxed)
  }
}

//
// Id
//

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
  pub name: String,
  pub labels: BTreeMap<String, String>,
}

impl Id {
  #[must_use]
  pub const fn new(name: String, labels: BTreeMap<String, String>) -> Self {
    Self { name, labels }
  }
}

//
// Collector
//

/// Owns every counter registered through its scopes.
#[derive(Clone, Default)]
pub struct Collector {
  counters: Arc<Mutex<HashMap<Id, Counter>>>,
}

impl Collector {
  #[must_use]
  pub fn scope(&self, name: &str) -> Scope {
    Scope {
      name: name.to_string(),
      collector: self.clone(),
    }
  }

  #[must_use]
  pub fn find_counter(&self, name: &str, labels: &BTreeMap<String, String>) -> Option<Counter> {
    self
      .counters
      .lock()
      .get(&Id::new(name.to_string(), labels.clone()))
      .cloned()
  }

  /// Returns the current value of every counter, keyed by its fully scoped name. Labels are
  /// rendered as `name{k=v,...}`.
  #[must_use]
  pub fn snapshot(&self) -> BTreeMap<String, u64> {
    self
      .counters
      .lock()
      .iter()
      .map(|(id, counter)| {
        let key = if id.labels.is_empty() {
          id.name.clone()
        } else {
          let labels: Vec<_> = id.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
          format!("{}{{{}}}", id.name, labels.join(","))
        };
        (key, counter.get())
      })
      .collect()
  }

  fn counter(&self, id: Id) -> Counter {
    self.counters.lock().entry(id).or_default().clone()
  }
}

//
// Scope
//

/// A named prefix under which counters are registered, e.g. `queue:dropped_events`.
#[derive(Clone)]
pub struct Scope {
  name: String,
  collector: Collector,
}

impl Scope {
  #[must_use]
  pub fn scope(&self, name: &str) -> Self {
    Self {
      name: self.metric_name(name),
      collector: self.collector.clone(),
    }
  }

  #[must_use]
  pub fn counter(&self, name: &str) -> Counter {
    self.counter_with_labels(name, BTreeMap::new())
  }

  #[must_use]
  pub fn counter_with_labels(&self, name: &str, labels: BTreeMap<String, String>) -> Counter {
    self
      .collector
      .counter(Id::new(self.metric_name(name), labels))
  }

  // Build the final metric name from the current scope.
  fn metric_name(&self, name: &str) -> String {
    if self.name.is_empty() {
      name.to_string()
    } else {
      format!("{}{SEP}{name}", self.name)
    }
  }
}

/// Builds a label map from `key => value` pairs.
#[macro_export]
macro_rules! labels {
  ( $( $key:expr => $value:expr ),* $(,)? ) => {{
    #[allow(unused_mut)]
    let mut labels = std::collections::BTreeMap::<String, String>::new();
    $( labels.insert($key.to_string(), $value.to_string()); )*
    labels
  }};
}

// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::Event;
use serde::{Deserialize, Serialize};

//
// Batch
//

/// A sealed, ordered group of events delivered as one unit. The sequence number is assigned when
/// the batch is sealed and increases strictly from batch to batch, which lets the collector drop
/// duplicates caused by retries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Batch {
  pub sequence: u64,
  pub events: Vec<Event>,
}

impl Batch {
  #[must_use]
  pub fn len(&self) -> usize {
    self.events.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }
}

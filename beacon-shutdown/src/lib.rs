// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Resolves on CTRL-C. The command line driver stops waiting for delivery when this fires.
pub async fn ctrl_c() {
  if tokio::signal::ctrl_c().await.is_err() {
    log::warn!("unable to listen for CTRL-C, waiting forever");
    std::future::pending::<()>().await;
  }
  log::info!("received CTRL-C");
}

//
// ComponentStatus
//

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComponentStatus {
  Running,
  PendingShutdown,
}

//
// ComponentShutdownTrigger
//

/// Owned by whoever starts a component (the pipeline's composition root). Dropping every
/// `ComponentShutdown` created from the trigger is what completes a shutdown.
#[derive(Debug)]
pub struct ComponentShutdownTrigger {
  status_tx: Arc<watch::Sender<ComponentStatus>>,
}

impl Default for ComponentShutdownTrigger {
  fn default() -> Self {
    let (status_tx, _) = watch::channel(ComponentStatus::Running);
    Self {
      status_tx: Arc::new(status_tx),
    }
  }
}

impl ComponentShutdownTrigger {
  #[must_use]
  pub fn make_shutdown(&self) -> ComponentShutdown {
    ComponentShutdown {
      status_rx: self.status_tx.subscribe(),
    }
  }

  /// Signals shutdown and waits for all components to drop their `ComponentShutdown`.
  pub async fn shutdown(self) {
    self
      .status_tx
      .send_replace(ComponentStatus::PendingShutdown);
    self.status_tx.closed().await;
  }

  /// Like `shutdown`, but gives up waiting once `deadline` elapses. Returns whether every
  /// component finished in time.
  pub async fn shutdown_with_deadline(self, deadline: Duration) -> bool {
    self
      .status_tx
      .send_replace(ComponentStatus::PendingShutdown);
    let finished = tokio::time::timeout(deadline, self.status_tx.closed())
      .await
      .is_ok();
    if !finished {
      log::warn!("components did not shut down within {deadline:?}");
    }
    finished
  }
}

//
// ComponentShutdown
//

/// Held by a running component (e.g. the delivery worker) to observe shutdown requests. The
/// trigger knows the component has finished when this is dropped.
#[derive(Clone, Debug)]
pub struct ComponentShutdown {
  status_rx: watch::Receiver<ComponentStatus>,
}

impl ComponentShutdown {
  /// Returns when the component has been cancelled.
  pub async fn cancelled(&mut self) {
    if *self.status_rx.borrow_and_update() == ComponentStatus::PendingShutdown {
      return;
    }
    let _ignored = self.status_rx.changed().await;
  }

  #[must_use]
  pub fn component_status(&self) -> ComponentStatus {
    *self.status_rx.borrow()
  }

  #[must_use]
  pub fn is_shutting_down(&self) -> bool {
    self.component_status() == ComponentStatus::PendingShutdown
  }
}

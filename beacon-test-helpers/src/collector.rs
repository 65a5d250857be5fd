// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::post;
use beacon_shutdown::{ComponentShutdown, ComponentShutdownTrigger};
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

//
// ReceivedBatch
//

/// A request as seen by the fake collector.
#[derive(Debug, Clone)]
pub struct ReceivedBatch {
  pub project: String,
  pub headers: HashMap<String, String>,
  pub body: serde_json::Value,

  // The status the collector answered with.
  pub status: u16,
}

impl ReceivedBatch {
  #[must_use]
  pub fn sequence(&self) -> Option<u64> {
    self.body["sequence"].as_u64()
  }

  /// The event names in payload order.
  #[must_use]
  pub fn event_names(&self) -> Vec<String> {
    self.body["events"]
      .as_array()
      .map(|events| {
        events
          .iter()
          .map(|e| e["name"].as_str().unwrap_or_default().to_string())
          .collect()
      })
      .unwrap_or_default()
  }
}

#[derive(Default)]
struct Behavior {
  scripted: VecDeque<u16>,
  default_status: Option<u16>,
  delay: Option<Duration>,
}

#[derive(Clone)]
struct CollectorState {
  behavior: Arc<Mutex<Behavior>>,
  received: Arc<Mutex<Vec<ReceivedBatch>>>,
  tx: mpsc::UnboundedSender<ReceivedBatch>,
}

//
// FakeCollector
//

/// An HTTP collector running on its own thread. Responds 200 unless told otherwise.
pub struct FakeCollector {
  address: String,
  state: CollectorState,
  rx: mpsc::UnboundedReceiver<ReceivedBatch>,
  _shutdown: ComponentShutdownTrigger,
}

impl FakeCollector {
  #[must_use]
  pub fn start() -> Self {
    // Bind to a random port.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let shutdown_trigger = ComponentShutdownTrigger::default();
    let shutdown = shutdown_trigger.make_shutdown();

    let (tx, rx) = mpsc::unbounded_channel();
    let state = CollectorState {
      behavior: Arc::default(),
      received: Arc::default(),
      tx,
    };

    let server_state = state.clone();
    std::thread::spawn(move || {
      tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(Self::serve(listener, server_state, shutdown));
    });

    Self {
      address: format!("http://{address}"),
      state,
      rx,
      _shutdown: shutdown_trigger,
    }
  }

  async fn serve(listener: TcpListener, state: CollectorState, mut shutdown: ComponentShutdown) {
    listener.set_nonblocking(true).unwrap();
    axum::serve(
      tokio::net::TcpListener::from_std(listener).unwrap(),
      Router::new()
        .route("/api/v1/projects/{project}/events", post(handler))
        .with_state(state),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .unwrap();
  }

  #[must_use]
  pub fn address(&self) -> &str {
    &self.address
  }

  /// Status returned once the scripted responses are used up.
  pub fn set_default_status(&self, status: u16) {
    self.state.behavior.lock().default_status = Some(status);
  }

  /// Queues statuses to be returned for the next requests, in order.
  pub fn push_statuses(&self, statuses: &[u16]) {
    self
      .state
      .behavior
      .lock()
      .scripted
      .extend(statuses.iter().copied());
  }

  /// Delays every response, e.g. to trip the client's request timeout.
  pub fn set_delay(&self, delay: Duration) {
    self.state.behavior.lock().delay = Some(delay);
  }

  #[must_use]
  pub fn received(&self) -> Vec<ReceivedBatch> {
    self.state.received.lock().clone()
  }

  pub async fn next_batch(&mut self) -> ReceivedBatch {
    self.rx.recv().await.unwrap()
  }

  pub fn blocking_next_batch(&mut self) -> ReceivedBatch {
    self.rx.blocking_recv().unwrap()
  }
}

async fn handler(
  State(state): State<CollectorState>,
  Path(project): Path<String>,
  headers: HeaderMap,
  body: Bytes,
) -> StatusCode {
  let (status, delay) = {
    let mut behavior = state.behavior.lock();
    let status = behavior
      .scripted
      .pop_front()
      .or(behavior.default_status)
      .unwrap_or(200);
    (status, behavior.delay)
  };

  if let Some(delay) = delay {
    tokio::time::sleep(delay).await;
  }

  let received = ReceivedBatch {
    project,
    headers: headers
      .iter()
      .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap().to_string()))
      .collect(),
    body: serde_json::from_slice(&body).unwrap(),
    status,
  };

  state.received.lock().push(received.clone());
  let _ignored = state.tx.send(received);

  StatusCode::from_u16(status).unwrap()
}

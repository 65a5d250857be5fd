// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./client_test.rs"]
mod client_test;

use crate::tls::{is_certificate_error, make_connector};
use crate::wire::BatchPayload;
use async_trait::async_trait;
use beacon_events::Batch;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use mockall::automock;
use std::time::Duration;

pub const PROJECT_HEADER: &str = "x-beacon-project";
pub const SEQUENCE_HEADER: &str = "x-beacon-sequence";

//
// DeliveryError
//

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
  /// The collector could not be reached or did not answer in time.
  #[error("network error: {0}")]
  Network(String),
  #[error("collector rejected batch with status {0}")]
  ServerRejected(u16),
  #[error("collector failed with status {0}")]
  ServerError(u16),
  #[error("invalid server certificate: {0}")]
  CertificateInvalid(String),
  /// The request could not be built from the configuration, e.g. an unusable project identifier.
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

//
// Ack
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
  pub status: u16,
}

//
// DeliveryClient
//

/// Sends one batch to the collector. Implementations never retry.
#[automock]
#[async_trait]
pub trait DeliveryClient: Send + Sync {
  async fn send(&self, batch: &Batch) -> Result<Ack, DeliveryError>;
}

//
// DeliveryConfig
//

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
  pub base_url: String,
  pub project: String,
  pub sdk_version: String,
  pub timeout: Duration,
  pub validate_certificates: bool,
}

impl DeliveryConfig {
  #[must_use]
  pub fn new(base_url: impl Into<String>, project: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      project: project.into(),
      sdk_version: env!("CARGO_PKG_VERSION").to_string(),
      timeout: Duration::from_secs(15),
      validate_certificates: true,
    }
  }
}

//
// HttpDeliveryClient
//

/// Posts batches as JSON over HTTP/1.1 or HTTP/2, with TLS through rustls.
pub struct HttpDeliveryClient {
  client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
  uri: String,
  config: DeliveryConfig,
}

impl HttpDeliveryClient {
  pub fn new(config: DeliveryConfig) -> anyhow::Result<Self> {
    let connector = make_connector(config.validate_certificates, config.timeout)?;
    let client = Client::builder(TokioExecutor::new()).build(connector);
    let uri = format!(
      "{}/api/v1/projects/{}/events",
      config.base_url.trim_end_matches('/'),
      config.project
    );
    // Surface unusable URLs at construction rather than on every send.
    let _: http::Uri = uri.parse()?;

    Ok(Self {
      client,
      uri,
      config,
    })
  }

  fn build_request(&self, batch: &Batch) -> Result<Request<Full<Bytes>>, DeliveryError> {
    let payload = BatchPayload::new(&self.config.project, &self.config.sdk_version, batch);
    let body =
      serde_json::to_vec(&payload).map_err(|e| DeliveryError::InvalidRequest(e.to_string()))?;

    Request::builder()
      .method(Method::POST)
      .uri(&self.uri)
      .header(http::header::CONTENT_TYPE, "application/json")
      .header(PROJECT_HEADER, &self.config.project)
      .header(SEQUENCE_HEADER, batch.sequence.to_string())
      .body(Full::new(Bytes::from(body)))
      .map_err(|e| DeliveryError::InvalidRequest(e.to_string()))
  }

  async fn round_trip(&self, request: Request<Full<Bytes>>) -> Result<StatusCode, DeliveryError> {
    let response = self.client.request(request).await.map_err(|e| {
      if is_certificate_error(&e) {
        DeliveryError::CertificateInvalid(format!("{e:?}"))
      } else {
        DeliveryError::Network(format!("{e:?}"))
      }
    })?;

    let status = response.status();
    // Read the body so the connection can be reused.
    let body: Result<_, hyper::Error> = response.into_body().collect().await;
    if let Err(e) = body {
      log::debug!("failed to read collector response body: {e}");
    }
    Ok(status)
  }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
  async fn send(&self, batch: &Batch) -> Result<Ack, DeliveryError> {
    let request = self.build_request(batch)?;

    log::debug!(
      "sending batch {} with {} events to {}",
      batch.sequence,
      batch.len(),
      self.uri
    );

    let status = tokio::time::timeout(self.config.timeout, self.round_trip(request))
      .await
      .map_err(|_| {
        DeliveryError::Network(format!(
          "request timed out after {:?}",
          self.config.timeout
        ))
      })??;

    classify_status(status)
  }
}

fn classify_status(status: StatusCode) -> Result<Ack, DeliveryError> {
  if status.is_success() {
    Ok(Ack {
      status: status.as_u16(),
    })
  } else if status.is_server_error() {
    Err(DeliveryError::ServerError(status.as_u16()))
  } else {
    // 4xx, and anything else the collector is not expected to send.
    Err(DeliveryError::ServerRejected(status.as_u16()))
  }
}

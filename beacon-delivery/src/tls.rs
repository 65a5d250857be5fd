// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./tls_test.rs"]
mod tls_test;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;

/// Builds the connector used for collector requests. With validation disabled any server
/// certificate is accepted, though handshake signatures are still checked.
pub fn make_connector(
  validate_certificates: bool,
  connect_timeout: Duration,
) -> anyhow::Result<HttpsConnector<HttpConnector>> {
  let mut connector = HttpConnector::new();
  connector.enforce_http(false);
  connector.set_connect_timeout(Some(connect_timeout));

  let builder = if validate_certificates {
    HttpsConnectorBuilder::new().with_webpki_roots()
  } else {
    log::warn!("certificate validation is disabled for collector connections");
    HttpsConnectorBuilder::new().with_tls_config(accept_any_certificate_config()?)
  };

  Ok(
    builder
      .https_or_http()
      .enable_http1()
      .enable_http2()
      .wrap_connector(connector),
  )
}

fn accept_any_certificate_config() -> anyhow::Result<ClientConfig> {
  let provider = Arc::new(rustls::crypto::ring::default_provider());
  Ok(
    ClientConfig::builder_with_provider(provider.clone())
      .with_safe_default_protocol_versions()?
      .dangerous()
      .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
      .with_no_client_auth(),
  )
}

/// Walks the error chain looking for a rejected server certificate. rustls errors usually arrive
/// wrapped in an `io::Error` by the connector, so those are unwrapped as well.
pub fn is_certificate_error(error: &(dyn std::error::Error + 'static)) -> bool {
  let mut current = Some(error);
  while let Some(error) = current {
    if matches!(
      error.downcast_ref::<rustls::Error>(),
      Some(rustls::Error::InvalidCertificate(_))
    ) {
      return true;
    }

    if let Some(inner) = error
      .downcast_ref::<std::io::Error>()
      .and_then(std::io::Error::get_ref)
      && is_certificate_error(inner)
    {
      return true;
    }

    current = error.source();
  }

  false
}

//
// AcceptAnyCertificate
//

#[derive(Debug)]
struct AcceptAnyCertificate {
  provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
  fn verify_server_cert(
    &self,
    _end_entity: &CertificateDer<'_>,
    _intermediates: &[CertificateDer<'_>],
    _server_name: &ServerName<'_>,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> Result<ServerCertVerified, rustls::Error> {
    Ok(ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    rustls::crypto::verify_tls12_signature(
      message,
      cert,
      dss,
      &self.provider.signature_verification_algorithms,
    )
  }

  fn verify_tls13_signature(
    &self,
    message: &[u8],
    cert: &CertificateDer<'_>,
    dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    rustls::crypto::verify_tls13_signature(
      message,
      cert,
      dss,
      &self.provider.signature_verification_algorithms,
    )
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    self
      .provider
      .signature_verification_algorithms
      .supported_schemes()
  }
}

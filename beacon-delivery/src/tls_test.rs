// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{is_certificate_error, make_connector};
use rustls::CertificateError;
use std::time::Duration;

#[test]
fn certificate_errors_are_found_through_io_errors() {
  let error = std::io::Error::other(rustls::Error::InvalidCertificate(
    CertificateError::UnknownIssuer,
  ));
  assert!(is_certificate_error(&error));

  let error = std::io::Error::other(rustls::Error::DecryptError);
  assert!(!is_certificate_error(&error));

  let error = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
  assert!(!is_certificate_error(&error));
}

#[test]
fn connectors_build_with_and_without_validation() {
  assert!(make_connector(true, Duration::from_secs(1)).is_ok());
  assert!(make_connector(false, Duration::from_secs(1)).is_ok());
}

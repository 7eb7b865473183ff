//! Caller identification for gRPC
//!
//! Provides:
//! - Client name from the common name of the TLS client certificate
//! - Source IP from the peer address

use crate::checker::Credentials;
use tonic::Request;
use tracing::debug;
use x509_parser::prelude::*;

/// Credentials of the caller of `request`.
///
/// Without a verified client certificate the client name is empty, which
/// every access check denies.
pub fn credentials<T>(request: &Request<T>) -> Credentials {
    let client = request
        .peer_certs()
        .and_then(|certs| certs.first().and_then(|cert| common_name(cert.as_ref())))
        .unwrap_or_default();

    let mut credentials = Credentials::new(client);
    if let Some(addr) = request.remote_addr() {
        credentials = credentials.with_ip(addr.ip().to_string());
    }
    debug!(client = %credentials.client, ip = ?credentials.ip, "Request credentials");
    credentials
}

/// Common name of a DER-encoded certificate's subject
pub fn common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let cn = cert.subject().iter_common_name().next()?;
    cn.as_str().ok().map(str::to_string)
}

//! TLS credential loading.
//!
//! Certificate mode pairs a caller-supplied CA bundle with a client
//! certificate and key; APNs authenticates the provider through the client
//! certificate. JWT mode presents no client certificate and trusts the
//! system store — authentication happens per-request via the bearer token.
//!
//! All files are read once, when the session is constructed.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::Resumption;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::{certs, private_key};

use crate::connection::ConnectionInfo;
use crate::error::{ApnsError, Result};

/// Build the TLS client configuration for a session.
///
/// The configuration restricts the protocol to TLS 1.2/1.3 with ALPN `h2`,
/// disables session resumption and early data, and leaves SNI on.
pub(crate) fn client_config(info: &ConnectionInfo) -> Result<Arc<ClientConfig>> {
    let roots = if info.use_jwt {
        system_roots()?
    } else {
        let ca_path = info
            .ca_path
            .as_deref()
            .ok_or_else(|| ApnsError::Credentials("CA bundle path is required".to_string()))?;
        bundle_roots(ca_path)?
    };

    let builder = ClientConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_root_certificates(roots);

    let mut config = if info.use_jwt {
        builder.with_no_client_auth()
    } else {
        let cert_path = info.cert_path.as_deref().ok_or_else(|| {
            ApnsError::Credentials("client certificate path is required".to_string())
        })?;
        let key_path = info
            .key_path
            .as_deref()
            .ok_or_else(|| ApnsError::Credentials("private key path is required".to_string()))?;
        let chain = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        builder.with_client_auth_cert(chain, key)?
    };

    config.alpn_protocols = vec![b"h2".to_vec()];
    config.resumption = Resumption::disabled();
    config.enable_early_data = false;

    Ok(Arc::new(config))
}

/// Check whether a session configuration's credentials load.
///
/// Returns true only when the trust store and, in certificate mode, the
/// client credential all assemble into a usable TLS configuration.
pub fn check_credentials(info: &ConnectionInfo) -> bool {
    client_config(info).is_ok()
}

/// Trust anchors from the platform's certificate store.
fn system_roots() -> Result<RootCertStore> {
    let native = rustls_native_certs::load_native_certs().map_err(|e| {
        ApnsError::Credentials(format!("failed to load system trust store: {e}"))
    })?;

    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(native);
    if added == 0 {
        return Err(ApnsError::Credentials(
            "system trust store contains no usable roots".to_string(),
        ));
    }
    Ok(roots)
}

/// Trust anchors from the configured CA bundle file.
fn bundle_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| {
            ApnsError::Credentials(format!(
                "invalid certificate in CA bundle {}: {e}",
                path.display()
            ))
        })?;
    }
    if roots.is_empty() {
        return Err(ApnsError::Credentials(format!(
            "CA bundle {} contains no certificates",
            path.display()
        )));
    }
    Ok(roots)
}

/// Load a certificate chain from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        ApnsError::Credentials(format!("failed to open certificate file {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    let chain = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            ApnsError::Credentials(format!(
                "failed to parse certificates in {}: {e}",
                path.display()
            ))
        })?;
    if chain.is_empty() {
        return Err(ApnsError::Credentials(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(chain)
}

/// Load a private key from a PEM file.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        ApnsError::Credentials(format!("failed to open key file {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| {
            ApnsError::Credentials(format!("failed to read private key {}: {e}", path.display()))
        })?
        .ok_or_else(|| {
            ApnsError::Credentials(format!("no private key found in {}", path.display()))
        })
}

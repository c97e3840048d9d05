// MIT License
// Copyright 2023--present liaison developers

//! TLS material for the TCP transport.
//!
//! Certificates and keys are PEM files named by a [`TlsConfig`]. Both sides
//! use the `ring` provider with rustls' safe default protocol versions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use super::TransportError;
use crate::config::TlsConfig;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_error(context: impl std::fmt::Display, error: impl std::fmt::Display) -> TransportError {
    TransportError::Tls(format!("{context}: {error}"))
}

fn required<'a>(path: &'a Option<PathBuf>, field: &str) -> Result<&'a Path, TransportError> {
    path.as_deref()
        .ok_or_else(|| TransportError::Tls(format!("`{field}` is required")))
}

fn read(path: &Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|e| tls_error(path.display(), e))
}

fn certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = CertificateDer::pem_slice_iter(&read(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(path.display(), e))?;
    if certs.is_empty() {
        return Err(tls_error(path.display(), "no certificate found"));
    }
    Ok(certs)
}

fn private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    PrivateKeyDer::from_pem_slice(&read(path)?).map_err(|e| tls_error(path.display(), e))
}

fn roots(path: &Path) -> Result<Arc<RootCertStore>, TransportError> {
    let mut store = RootCertStore::empty();
    for cert in certificates(path)? {
        store.add(cert).map_err(|e| tls_error(path.display(), e))?;
    }
    Ok(Arc::new(store))
}

/// Acceptor for a listening session.
///
/// Clients must present a certificate when `root_ca_certificate` is set.
pub(crate) fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TransportError> {
    let certs = certificates(required(&config.listen_certificate, "listen_certificate")?)?;
    let key = private_key(required(&config.listen_private_key, "listen_private_key")?)?;

    let builder = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error("server config", e))?;
    let builder = match config.root_ca_certificate.as_deref() {
        Some(ca) => {
            let verifier = WebPkiClientVerifier::builder_with_provider(roots(ca)?, provider())
                .build()
                .map_err(|e| tls_error("client verifier", e))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    let server = builder
        .with_single_cert(certs, key)
        .map_err(|e| tls_error("listen_certificate", e))?;
    Ok(TlsAcceptor::from(Arc::new(server)))
}

/// Connector for a connecting session.
///
/// The server is verified against `root_ca_certificate`. A client identity is
/// presented only when both `connect_certificate` and `connect_private_key`
/// are set.
pub(crate) fn connector(config: &TlsConfig) -> Result<TlsConnector, TransportError> {
    let roots = roots(required(&config.root_ca_certificate, "root_ca_certificate")?)?;
    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error("client config", e))?
        .with_root_certificates(roots);
    let client = match (&config.connect_certificate, &config.connect_private_key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(certificates(cert)?, private_key(key)?)
            .map_err(|e| tls_error("connect_certificate", e))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(TransportError::Tls(
                "`connect_certificate` and `connect_private_key` must be given together".into(),
            ))
        }
    };
    Ok(TlsConnector::from(Arc::new(client)))
}

/// Name the server certificate must carry for a `host:port` address.
pub(crate) fn server_name(address: &str) -> Result<ServerName<'static>, TransportError> {
    let host = address
        .rsplit_once(':')
        .map_or(address, |(host, _)| host)
        .trim_start_matches('[')
        .trim_end_matches(']');
    ServerName::try_from(host.to_owned()).map_err(|e| tls_error(address, e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A self-signed identity valid for `localhost` and `127.0.0.1`, as PEM
    /// files `<name>.pem` and `<name>.key` under `dir`.
    pub(crate) fn identity(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
        let certified =
            rcgen::generate_simple_self_signed(vec!["localhost".into(), "127.0.0.1".into()])
                .unwrap();
        let cert = dir.join(format!("{name}.pem"));
        let key = dir.join(format!("{name}.key"));
        std::fs::write(&cert, certified.cert.pem()).unwrap();
        std::fs::write(&key, certified.key_pair.serialize_pem()).unwrap();
        (cert, key)
    }

    #[test]
    fn server_names_follow_the_address() {
        assert_eq!(
            server_name("localhost:7447").unwrap(),
            ServerName::try_from("localhost").unwrap()
        );
        assert!(matches!(
            server_name("127.0.0.1:7447").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name("[::1]:7447").unwrap(),
            ServerName::IpAddress(_)
        ));
    }

    #[test]
    fn listening_needs_an_identity() {
        let err = acceptor(&TlsConfig::default()).err().unwrap();
        assert!(err.to_string().contains("listen_certificate"), "{err}");
    }

    #[test]
    fn connecting_needs_a_root() {
        let err = connector(&TlsConfig::default()).err().unwrap();
        assert!(err.to_string().contains("root_ca_certificate"), "{err}");
    }

    #[test]
    fn half_a_client_identity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = identity(dir.path(), "server");
        let config = TlsConfig {
            root_ca_certificate: Some(cert.clone()),
            connect_certificate: Some(cert),
            ..TlsConfig::default()
        };
        let err = connector(&config).err().unwrap();
        assert!(err.to_string().contains("together"), "{err}");
    }

    #[test]
    fn garbage_pem_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        std::fs::write(&ca, "not a certificate").unwrap();
        let config = TlsConfig {
            root_ca_certificate: Some(ca),
            ..TlsConfig::default()
        };
        let err = connector(&config).err().unwrap();
        assert!(err.to_string().contains("ca.pem"), "{err}");
    }
}

//! Server-side TLS setup
//!
//! Turns a listener's [`BindInfo`] into a rustls acceptor. A listener
//! terminates TLS when both `server_key` and `server_cert` are set and
//! additionally requires client certificates when `client_ca` is set.

use crate::error::{Result, SeederError};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use seeder_config::BindInfo;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Install the ring provider as the process default, once
///
/// If the application already installed a provider this does nothing.
pub(crate) fn ensure_crypto_provider_installed() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| SeederError::io(path, e))
}

/// Every certificate in a PEM bundle, in order
pub(crate) fn parse_certs(pem: &[u8]) -> std::result::Result<Vec<CertificateDer<'static>>, String> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid PEM: {e:?}"))?;
    if certs.is_empty() {
        return Err("no certificates found".to_string());
    }
    Ok(certs)
}

/// The first private key in a PEM document (PKCS#8, SEC1 or PKCS#1)
pub(crate) fn parse_private_key(pem: &[u8]) -> std::result::Result<PrivateKeyDer<'static>, String> {
    PrivateKeyDer::from_pem_slice(pem).map_err(|e| format!("no usable private key: {e:?}"))
}

fn root_store(path: &Path) -> Result<Arc<RootCertStore>> {
    let certs = parse_certs(&read_file(path)?)
        .map_err(|e| SeederError::Tls(format!("client CA {}: {e}", path.display())))?;

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs);
    debug!(path = %path.display(), added, ignored, "Loaded client CA bundle");

    if store.is_empty() {
        return Err(SeederError::Tls(format!(
            "client CA {}: no certificate was accepted as a trust anchor",
            path.display()
        )));
    }
    Ok(Arc::new(store))
}

/// Build the TLS acceptor for a listener, or `None` for a plain listener
pub(crate) fn acceptor(bind: &BindInfo) -> Result<Option<TlsAcceptor>> {
    let (key_path, cert_path) = match (&bind.server_key, &bind.server_cert) {
        (Some(key), Some(cert)) => (key, cert),
        (None, None) => {
            if let Some(ca) = &bind.client_ca {
                return Err(SeederError::Tls(format!(
                    "client_ca {} is set on a listener without server_key and server_cert",
                    ca.display()
                )));
            }
            return Ok(None);
        }
        _ => {
            return Err(SeederError::Tls(
                "server_key and server_cert must be set together".to_string(),
            ))
        }
    };

    ensure_crypto_provider_installed();

    let certs = parse_certs(&read_file(cert_path)?)
        .map_err(|e| SeederError::Tls(format!("server certificate {}: {e}", cert_path.display())))?;
    let key = parse_private_key(&read_file(key_path)?)
        .map_err(|e| SeederError::Tls(format!("server key {}: {e}", key_path.display())))?;

    let builder = ServerConfig::builder();
    let builder = match &bind.client_ca {
        Some(ca_path) => {
            let verifier = WebPkiClientVerifier::builder(root_store(ca_path)?)
                .build()
                .map_err(|e| SeederError::Tls(format!("client CA {}: {e}", ca_path.display())))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| SeederError::Tls(format!("server certificate {}: {e}", cert_path.display())))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_pem, TestCa};
    use std::path::PathBuf;

    #[test]
    fn test_plain_listener_has_no_acceptor() {
        let bind = BindInfo::plain(["127.0.0.1:0"]);
        assert!(acceptor(&bind).unwrap().is_none());
    }

    #[test]
    fn test_half_configured_tls_is_rejected() {
        let bind = BindInfo {
            server_key: Some(PathBuf::from("/etc/seeder/tls/server.key")),
            ..BindInfo::plain(["127.0.0.1:0"])
        };
        assert!(matches!(acceptor(&bind), Err(SeederError::Tls(_))));
    }

    #[test]
    fn test_client_ca_without_server_material_is_rejected() {
        let bind = BindInfo {
            client_ca: Some(PathBuf::from("/etc/seeder/tls/client-ca.pem")),
            ..BindInfo::plain(["127.0.0.1:0"])
        };
        assert!(matches!(acceptor(&bind), Err(SeederError::Tls(_))));
    }

    #[test]
    fn test_tls_and_mtls_acceptors() {
        let dir = tempfile::tempdir().unwrap();
        let ca = TestCa::new("Seeder Test CA");
        let server = ca.leaf("localhost");

        let mut bind = BindInfo {
            server_key: Some(write_pem(dir.path(), "server.key", &server.key_pem)),
            server_cert: Some(write_pem(dir.path(), "server.pem", &server.cert_pem)),
            ..BindInfo::plain(["127.0.0.1:0"])
        };
        assert!(acceptor(&bind).unwrap().is_some());

        bind.client_ca = Some(write_pem(dir.path(), "client-ca.pem", &ca.cert_pem));
        assert!(acceptor(&bind).unwrap().is_some());
    }

    #[test]
    fn test_garbage_material_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bind = BindInfo {
            server_key: Some(write_pem(dir.path(), "server.key", "not a key")),
            server_cert: Some(write_pem(dir.path(), "server.pem", "not a cert")),
            ..BindInfo::plain(["127.0.0.1:0"])
        };
        assert!(matches!(acceptor(&bind), Err(SeederError::Tls(_))));

        let missing = BindInfo {
            server_key: Some(dir.path().join("missing.key")),
            server_cert: Some(dir.path().join("missing.pem")),
            ..BindInfo::plain(["127.0.0.1:0"])
        };
        assert!(matches!(acceptor(&missing), Err(SeederError::Io { .. })));
    }
}

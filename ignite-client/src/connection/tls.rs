//! Secure transport setup.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use ignite_core::{IgniteError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;
use tokio_rustls::TlsConnector;

use crate::config::TlsConfig;

/// Builds a connector and SNI name for a node reachable at `host`.
///
/// Trust comes from the configured CA bundle, falling back to the bundled
/// web PKI roots. A client certificate is presented when one is configured.
pub(crate) fn create_tls_connector(
    config: &TlsConfig,
    host: &str,
) -> Result<(TlsConnector, ServerName<'static>)> {
    let mut roots = RootCertStore::empty();
    match config.ca_cert_path() {
        Some(path) => {
            for cert in load_certs(path)? {
                roots
                    .add(cert)
                    .map_err(|e| IgniteError::Tls(format!("rejected CA certificate: {}", e)))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let client_config = match config.client_identity() {
        Some((cert_path, key_path)) => builder
            .with_client_auth_cert(load_certs(cert_path)?, load_private_key(key_path)?)
            .map_err(|e| IgniteError::Tls(format!("rejected client certificate: {}", e)))?,
        None => builder.with_no_client_auth(),
    };

    let name = config.server_name().unwrap_or(host).to_string();
    let server_name = ServerName::try_from(name.clone())
        .map_err(|_| IgniteError::Tls(format!("invalid server name {:?}", name)))?;

    Ok((TlsConnector::from(Arc::new(client_config)), server_name))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| IgniteError::Tls(format!("cannot open certificate {:?}: {}", path, e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| IgniteError::Tls(format!("unreadable certificate {:?}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(IgniteError::Tls(format!("no certificate in {:?}", path)));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| IgniteError::Tls(format!("cannot open key {:?}: {}", path, e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| IgniteError::Tls(format!("unreadable key {:?}: {}", path, e)))?
        .ok_or_else(|| IgniteError::Tls(format!("no private key in {:?}", path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfigBuilder;

    #[test]
    fn test_missing_ca_file() {
        let config = TlsConfigBuilder::new()
            .enabled(true)
            .ca_cert_path("/nonexistent/ca.pem")
            .build()
            .unwrap();
        let err = create_tls_connector(&config, "127.0.0.1")
            .err()
            .expect("expected TLS error");
        assert!(matches!(err, IgniteError::Tls(_)));
        assert!(err.to_string().contains("cannot open"));
    }

    #[test]
    fn test_missing_key_file() {
        let err = load_private_key(Path::new("/nonexistent/key.pem")).unwrap_err();
        assert!(err.to_string().contains("cannot open"));
    }

    #[test]
    fn test_default_roots_with_ip_host() {
        let config = TlsConfigBuilder::new().enabled(true).build().unwrap();
        let (_, name) = create_tls_connector(&config, "10.0.0.5").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn test_configured_server_name_wins() {
        let config = TlsConfigBuilder::new()
            .enabled(true)
            .server_name("ignite.internal")
            .build()
            .unwrap();
        let (_, name) = create_tls_connector(&config, "10.0.0.5").unwrap();
        assert!(matches!(name, ServerName::DnsName(_)));
    }
}

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::bootstrap::StartupError;
use crate::config::TlsPaths;

fn open(path: &std::path::Path) -> Result<BufReader<File>, StartupError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| StartupError::Tls(format!("{}: {e}", path.display())))
}

/// Build the listener's TLS configuration from PEM files.
pub fn load_server_config(paths: &TlsPaths) -> Result<rustls::ServerConfig, StartupError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut open(&paths.cert_path)?)
        .collect::<Result<_, _>>()
        .map_err(|e| StartupError::Tls(format!("{}: {e}", paths.cert_path.display())))?;
    if certs.is_empty() {
        return Err(StartupError::Tls(format!(
            "{}: no certificates found",
            paths.cert_path.display()
        )));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut open(&paths.key_path)?)
        .map_err(|e| StartupError::Tls(format!("{}: {e}", paths.key_path.display())))?
        .ok_or_else(|| {
            StartupError::Tls(format!("{}: no private key found", paths.key_path.display()))
        })?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| StartupError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| StartupError::Tls(e.to_string()))
}

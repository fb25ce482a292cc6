//! Wiring from configuration to the protocol components.

use std::sync::Arc;

use kirin::{
    Authenticator, BackendError, Challenger, ChallengerConfig, InvoiceBackend, KeyError, LndConfig,
    LndRestBackend, MemoryInvoiceBackend, Minter, RootKey,
};

use crate::config::{PaymentBackendConfig, ProxyConfig};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid root key: {0}")]
    RootKey(#[from] KeyError),

    #[error("payment backend: {0}")]
    Backend(#[from] BackendError),

    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("TLS: {0}")]
    Tls(String),

    #[error("HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Connect the configured payment backend.
pub fn payment_backend(config: &ProxyConfig) -> Result<Arc<dyn InvoiceBackend>, StartupError> {
    match &config.payment_backend {
        PaymentBackendConfig::Lnd {
            rest_url,
            macaroon_hex,
            tls_cert_path,
        } => {
            let tls_cert_pem = tls_cert_path
                .as_ref()
                .map(|p| {
                    std::fs::read(p).map_err(|e| StartupError::Read {
                        path: p.display().to_string(),
                        reason: e.to_string(),
                    })
                })
                .transpose()?;
            let backend = LndRestBackend::new(LndConfig {
                rest_url: rest_url.clone(),
                macaroon_hex: macaroon_hex.clone(),
                tls_cert_pem,
                request_timeout: config.auth_timeout,
                invoice_expiry: config.challenge_ttl,
            })?;
            tracing::info!(rest_url = %rest_url, "Using LND payment backend");
            Ok(Arc::new(backend))
        }
        PaymentBackendConfig::Memory => {
            tracing::info!("Using in-memory payment backend");
            Ok(Arc::new(MemoryInvoiceBackend::new()))
        }
    }
}

/// Build the challenger and authenticator over `backend`.
pub fn authenticator(
    config: &ProxyConfig,
    backend: Arc<dyn InvoiceBackend>,
) -> Result<(Arc<Challenger>, Arc<Authenticator>), StartupError> {
    let challenger = Arc::new(Challenger::new(
        backend,
        ChallengerConfig {
            memo: config.invoice_memo.clone(),
            challenge_ttl: config.challenge_ttl,
            backend_timeout: config.auth_timeout,
            ..Default::default()
        },
    ));
    let signer = Arc::new(RootKey::new(config.root_key.clone())?);
    let minter = Minter::new(signer, challenger.clone());
    let authenticator = Arc::new(Authenticator::new(challenger.clone(), minter));
    Ok((challenger, authenticator))
}

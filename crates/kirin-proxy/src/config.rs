use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kirin::{
    CaveatTemplate, MIN_ROOT_KEY_LEN, DEFAULT_BACKEND_TIMEOUT_SECS, DEFAULT_CHALLENGE_TTL_SECS,
    DEFAULT_INVOICE_MEMO,
};
use serde::Deserialize;

use crate::router::RouteTable;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_SERVICES_FILE: &str = "./services.json";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// One entry of the services file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    pub name: String,
    pub path_prefix: String,
    /// Base URL of the backend, e.g. `http://127.0.0.1:9000`.
    pub backend: String,
    /// Price in satoshis; zero makes the service free.
    #[serde(default)]
    pub price: u64,
    #[serde(default)]
    pub caveats: Vec<CaveatTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone)]
pub enum PaymentBackendConfig {
    Lnd {
        rest_url: String,
        macaroon_hex: Option<String>,
        tls_cert_path: Option<PathBuf>,
    },
    /// In-process backend; invoices never settle on their own.
    Memory,
}

impl std::fmt::Debug for PaymentBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentBackendConfig::Lnd {
                rest_url,
                macaroon_hex,
                tls_cert_path,
            } => f
                .debug_struct("Lnd")
                .field("rest_url", rest_url)
                .field("macaroon_hex", &macaroon_hex.as_ref().map(|_| "[REDACTED]"))
                .field("tls_cert_path", tls_cert_path)
                .finish(),
            PaymentBackendConfig::Memory => f.write_str("Memory"),
        }
    }
}

#[derive(Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    /// Serve HTTPS when set
    pub tls: Option<TlsPaths>,
    pub routes: RouteTable,
    /// Fallback directory for requests no service matches
    pub static_root: Option<PathBuf>,
    /// Token signing secret
    pub root_key: Vec<u8>,
    pub payment_backend: PaymentBackendConfig,
    pub invoice_memo: String,
    pub challenge_ttl: Duration,
    /// Bound on each payment backend call
    pub auth_timeout: Duration,
    /// Bound on waiting for a proxied backend's response
    pub upstream_timeout: Duration,
    /// Separate listener for /health and /metrics (None = not served)
    pub metrics_addr: Option<SocketAddr>,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("listen_addr", &self.listen_addr)
            .field("tls", &self.tls)
            .field("routes", &self.routes)
            .field("static_root", &self.static_root)
            .field("root_key", &"[REDACTED]")
            .field("payment_backend", &self.payment_backend)
            .field("invoice_memo", &self.invoice_memo)
            .field("challenge_ttl", &self.challenge_ttl)
            .field("auth_timeout", &self.auth_timeout)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("metrics_addr", &self.metrics_addr)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_addr = parse_addr(
            "KIRIN_LISTEN_ADDR",
            &var("KIRIN_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
        )?;

        let tls = match (var("KIRIN_TLS_CERT_PATH"), var("KIRIN_TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingRequired("KIRIN_TLS_KEY_PATH")),
            (None, Some(_)) => return Err(ConfigError::MissingRequired("KIRIN_TLS_CERT_PATH")),
        };

        let services_file =
            var("KIRIN_SERVICES_FILE").unwrap_or_else(|| DEFAULT_SERVICES_FILE.to_string());
        let routes = RouteTable::new(load_services(Path::new(&services_file))?)?;

        let static_root = var("KIRIN_STATIC_ROOT").map(PathBuf::from);
        if let Some(ref root) = static_root {
            if !root.is_dir() {
                return Err(ConfigError::InvalidStaticRoot(root.display().to_string()));
            }
        }

        let root_key_hex = var("KIRIN_ROOT_KEY").ok_or(ConfigError::MissingRequired("KIRIN_ROOT_KEY"))?;
        let root_key = hex::decode(root_key_hex.trim()).map_err(|_| ConfigError::InvalidRootKey)?;
        if root_key.len() < MIN_ROOT_KEY_LEN {
            tracing::error!(
                "KIRIN_ROOT_KEY is too short ({} bytes, minimum {MIN_ROOT_KEY_LEN}) - \
                 use `openssl rand -hex 32` to generate one",
                root_key.len()
            );
            return Err(ConfigError::InvalidRootKey);
        }

        let payment_backend = match var("KIRIN_BACKEND").as_deref().unwrap_or("lnd") {
            "lnd" => {
                let rest_url = var("LND_REST_URL").ok_or(ConfigError::MissingRequired("LND_REST_URL"))?;
                let parsed =
                    url::Url::parse(&rest_url).map_err(|_| ConfigError::InvalidUrl(rest_url.clone()))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidUrl(rest_url));
                }
                PaymentBackendConfig::Lnd {
                    rest_url,
                    macaroon_hex: var("LND_MACAROON_HEX"),
                    tls_cert_path: var("LND_TLS_CERT_PATH").map(PathBuf::from),
                }
            }
            "memory" => {
                tracing::warn!(
                    "KIRIN_BACKEND=memory - invoices are never paid, DO NOT use this in production"
                );
                PaymentBackendConfig::Memory
            }
            other => return Err(ConfigError::InvalidBackend(other.to_string())),
        };

        let invoice_memo = var("KIRIN_INVOICE_MEMO").unwrap_or_else(|| DEFAULT_INVOICE_MEMO.to_string());
        let challenge_ttl = parse_secs(&var, "KIRIN_CHALLENGE_TTL_SECS", DEFAULT_CHALLENGE_TTL_SECS)?;
        let auth_timeout = parse_secs(&var, "KIRIN_AUTH_TIMEOUT_SECS", DEFAULT_BACKEND_TIMEOUT_SECS)?;
        let upstream_timeout =
            parse_secs(&var, "KIRIN_UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS)?;

        let metrics_addr = var("KIRIN_METRICS_ADDR")
            .map(|a| parse_addr("KIRIN_METRICS_ADDR", &a))
            .transpose()?;
        let metrics_token = var("KIRIN_METRICS_TOKEN");
        if metrics_addr.is_some() && metrics_token.is_none() {
            tracing::warn!("KIRIN_METRICS_TOKEN not set - /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            listen_addr,
            tls,
            routes,
            static_root,
            root_key,
            payment_backend,
            invoice_memo,
            challenge_ttl,
            auth_timeout,
            upstream_timeout,
            metrics_addr,
            metrics_token,
        })
    }
}

fn parse_addr(key: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key, value.to_string()))
}

fn parse_secs(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs = match var(key) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or(ConfigError::InvalidValue(key, v))?,
        None => default,
    };
    Ok(Duration::from_secs(secs))
}

/// Read the ordered service list from a JSON file.
pub fn load_services(path: &Path) -> Result<Vec<ServiceConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ServicesFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::ServicesFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("KIRIN_ROOT_KEY must be hex encoding at least {min} bytes", min = MIN_ROOT_KEY_LEN)]
    InvalidRootKey,

    #[error("unknown payment backend: {0} (expected lnd or memory)")]
    InvalidBackend(String),

    #[error("static root is not a directory: {0}")]
    InvalidStaticRoot(String),

    #[error("cannot load services from {path}: {reason}")]
    ServicesFile { path: String, reason: String },

    #[error("invalid service {name:?}: {reason}")]
    InvalidService { name: String, reason: String },

    #[error("duplicate service name: {0}")]
    DuplicateService(String),
}

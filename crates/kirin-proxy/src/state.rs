use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kirin::Authenticator;

use crate::router::RouteTable;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub authenticator: Arc<Authenticator>,
    pub http_client: reqwest::Client,
    /// Bound on waiting for a backend's response headers
    pub upstream_timeout: Duration,
    /// Fallback directory for unmatched paths (None = 404)
    pub static_root: Option<PathBuf>,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
}

impl AppState {
    pub fn new(
        routes: RouteTable,
        authenticator: Arc<Authenticator>,
        upstream_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(upstream_timeout)
            .redirect(reqwest::redirect::Policy::none()) // Redirects go back to the client
            .build()?;

        Ok(Self {
            routes: Arc::new(routes),
            authenticator,
            http_client,
            upstream_timeout,
            static_root: None,
            metrics_token: None,
        })
    }

    pub fn with_static_root(mut self, root: Option<PathBuf>) -> Self {
        self.static_root = root;
        self
    }

    pub fn with_metrics_token(mut self, token: Option<String>) -> Self {
        self.metrics_token = token;
        self
    }
}

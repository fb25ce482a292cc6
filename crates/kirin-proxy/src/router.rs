//! Ordered route table with longest-prefix matching.

use std::collections::HashSet;

use kirin::caveat::path_has_prefix;
use kirin::{check_caveats, AuthPolicy, Caveat, CaveatTemplate};
use url::Url;

use crate::config::{ConfigError, ServiceConfig};

/// A validated service route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub path_prefix: String,
    pub backend: Url,
    pub price: u64,
    pub caveats: Vec<CaveatTemplate>,
}

impl Route {
    pub fn policy(&self) -> AuthPolicy<'_> {
        AuthPolicy {
            service: &self.name,
            path_prefix: &self.path_prefix,
            price: self.price,
            caveats: &self.caveats,
        }
    }

    /// Backend URL for a request to the canonical `path` with an optional
    /// query string. Characters not allowed in a URL path are re-encoded.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = self.backend.clone();
        let base = self.backend.path().trim_end_matches('/');
        url.set_path(&format!("{base}{path}"));
        url.set_query(query.filter(|q| !q.is_empty()));
        url.to_string()
    }
}

/// Routes in configuration order. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(services: Vec<ServiceConfig>) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        let mut routes = Vec::with_capacity(services.len());

        for service in services {
            let invalid = |reason: &str| ConfigError::InvalidService {
                name: service.name.clone(),
                reason: reason.to_string(),
            };

            if service.name.is_empty() {
                return Err(invalid("name must not be empty"));
            }
            if !names.insert(service.name.clone()) {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
            if !service.path_prefix.starts_with('/') {
                return Err(invalid("path_prefix must start with /"));
            }
            let backend = Url::parse(&service.backend).map_err(|_| invalid("backend is not a URL"))?;
            if !matches!(backend.scheme(), "http" | "https") {
                return Err(invalid("backend must be http or https"));
            }
            if backend.query().is_some() || backend.fragment().is_some() {
                return Err(invalid("backend must not carry a query or fragment"));
            }
            let minted: Vec<Caveat> = service
                .caveats
                .iter()
                .map(|t| t.instantiate(&service.name, &service.path_prefix, u64::MAX))
                .collect();
            if let Err(e) = check_caveats(&minted) {
                return Err(invalid(&e.to_string()));
            }

            routes.push(Route {
                name: service.name,
                path_prefix: service.path_prefix,
                backend,
                price: service.price,
                caveats: service.caveats,
            });
        }

        Ok(Self { routes })
    }

    /// The route with the longest prefix matching `path`. Among equally long
    /// prefixes the first configured wins.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if !path_has_prefix(path, &route.path_prefix) {
                continue;
            }
            match best {
                Some(b) if b.path_prefix.len() >= route.path_prefix.len() => {}
                _ => best = Some(route),
            }
        }
        best
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

//! Caveats: restrictions embedded in a token and evaluated on every use.
//!
//! A caveat travels as a `key=value` string inside the token. Route
//! configuration carries [`CaveatTemplate`]s which are bound to the concrete
//! route when a token is minted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// A restriction predicate carried by a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caveat {
    /// Valid while the current unix time is strictly before this value.
    Expiry(u64),
    /// Valid only for request paths under this prefix.
    PathPrefix(String),
    /// Valid only for the named service.
    Service(String),
    /// Valid for at most this many admitted requests.
    Capacity(u32),
}

/// What a caveat is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub path: &'a str,
    pub service: &'a str,
    pub now: u64,
    /// Requests already admitted with this payment hash.
    pub uses: u64,
}

impl Caveat {
    pub fn key(&self) -> &'static str {
        match self {
            Caveat::Expiry(_) => "expiry",
            Caveat::PathPrefix(_) => "path_prefix",
            Caveat::Service(_) => "service",
            Caveat::Capacity(_) => "capacity",
        }
    }

    pub fn evaluate(&self, ctx: &RequestContext<'_>) -> bool {
        match self {
            Caveat::Expiry(deadline) => ctx.now < *deadline,
            Caveat::PathPrefix(prefix) => path_has_prefix(ctx.path, prefix),
            Caveat::Service(name) => ctx.service == name,
            Caveat::Capacity(limit) => ctx.uses < u64::from(*limit),
        }
    }
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caveat::Expiry(v) => write!(f, "expiry={v}"),
            Caveat::PathPrefix(v) => write!(f, "path_prefix={v}"),
            Caveat::Service(v) => write!(f, "service={v}"),
            Caveat::Capacity(v) => write!(f, "capacity={v}"),
        }
    }
}

impl FromStr for Caveat {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| DecodeError::InvalidCaveat(format!("missing '=' in {s:?}")))?;
        let invalid = || DecodeError::InvalidCaveat(format!("bad value for {key}: {value:?}"));

        match key {
            "expiry" => value.parse().map(Caveat::Expiry).map_err(|_| invalid()),
            "capacity" => value.parse().map(Caveat::Capacity).map_err(|_| invalid()),
            "path_prefix" if value.starts_with('/') => Ok(Caveat::PathPrefix(value.to_string())),
            "path_prefix" => Err(invalid()),
            "service" if !value.is_empty() => Ok(Caveat::Service(value.to_string())),
            "service" => Err(invalid()),
            other => Err(DecodeError::InvalidCaveat(format!("unknown caveat {other:?}"))),
        }
    }
}

/// True when `path` is `prefix` or lies below it on a segment boundary.
///
/// `/api` covers `/api` and `/api/v1` but not `/apikeys`.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

/// Caveat shape configured on a route, bound to concrete values at mint time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaveatTemplate {
    /// Token expires `ttl_secs` after minting.
    Expiry { ttl_secs: u64 },
    /// Token is confined to the route's path prefix.
    PathPrefix,
    /// Token is confined to the route's service name.
    Service,
    /// Token admits at most `uses` requests.
    Capacity { uses: u32 },
}

impl CaveatTemplate {
    pub fn instantiate(&self, service: &str, path_prefix: &str, now: u64) -> Caveat {
        match self {
            CaveatTemplate::Expiry { ttl_secs } => Caveat::Expiry(now.saturating_add(*ttl_secs)),
            CaveatTemplate::PathPrefix => Caveat::PathPrefix(path_prefix.to_string()),
            CaveatTemplate::Service => Caveat::Service(service.to_string()),
            CaveatTemplate::Capacity { uses } => Caveat::Capacity(*uses),
        }
    }
}

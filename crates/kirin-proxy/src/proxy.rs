use std::time::{Duration, Instant};

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse};
use bytes::Bytes;
use kirin::{
    Admission, AUTH_SCHEME, CAVEATS_HEADER, LEGACY_AUTH_SCHEME, PAYMENT_HASH_HEADER,
    TOKEN_ID_HEADER,
};

use crate::error::ProxyError;
use crate::metrics::{UPSTREAM_ERRORS, UPSTREAM_LATENCY};

/// Hop-by-hop headers never forwarded in either direction
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers recomputed by the proxy or its HTTP client
const RECOMPUTED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
];

/// Metadata headers only the proxy may set
const METADATA_HEADERS: &[&str] = &[TOKEN_ID_HEADER, PAYMENT_HASH_HEADER, CAVEATS_HEADER];

fn is_listed(list: &[&str], name: &str) -> bool {
    list.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Header names the `Connection` header marks as hop-by-hop.
fn connection_tokens<'a>(values: impl Iterator<Item = &'a [u8]>) -> Vec<String> {
    values
        .filter_map(|v| std::str::from_utf8(v).ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Whether an `Authorization` value carries an L402 credential.
fn is_l402_credential(value: &[u8]) -> bool {
    let Ok(value) = std::str::from_utf8(value) else {
        return false;
    };
    let scheme = value.trim_start().split_whitespace().next().unwrap_or("");
    scheme.eq_ignore_ascii_case(AUTH_SCHEME) || scheme.eq_ignore_ascii_case(LEGACY_AUTH_SCHEME)
}

fn forwardable_request_header(name: &str, value: &[u8], connection: &[String]) -> bool {
    if is_listed(HOP_BY_HOP_HEADERS, name)
        || is_listed(RECOMPUTED_HEADERS, name)
        || is_listed(METADATA_HEADERS, name)
        || connection.iter().any(|t| t.eq_ignore_ascii_case(name))
    {
        return false;
    }
    // The token is consumed here; other credentials belong to the backend.
    !(name.eq_ignore_ascii_case("authorization") && is_l402_credential(value))
}

/// Metadata describing an admitted token, as forwarded to the backend.
pub fn admission_headers(admission: &Admission) -> Vec<(&'static str, String)> {
    let caveats = admission
        .caveats
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    vec![
        (TOKEN_ID_HEADER, admission.token_id.to_hex()),
        (PAYMENT_HASH_HEADER, admission.payment_hash.to_hex()),
        (CAVEATS_HEADER, caveats),
    ]
}

/// Forward `req` to `target_url` and stream the backend's response back.
pub async fn forward(
    client: &reqwest::Client,
    req: &HttpRequest,
    target_url: &str,
    body: Bytes,
    admission: Option<&Admission>,
    timeout: Duration,
) -> Result<HttpResponse, ProxyError> {
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|_| ProxyError::BadRequest("unsupported HTTP method".to_string()))?;

    let mut request_builder = client.request(method, target_url);

    let connection = connection_tokens(
        req.headers()
            .get_all("connection")
            .map(|v| v.as_bytes()),
    );
    for (name, value) in req.headers() {
        if forwardable_request_header(name.as_str(), value.as_bytes(), &connection) {
            request_builder = request_builder.header(name.as_str(), value.as_bytes());
        }
    }

    let prior = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let forwarded_for = match (prior, req.peer_addr()) {
        (Some(prior), Some(peer)) => Some(format!("{prior}, {}", peer.ip())),
        (None, Some(peer)) => Some(peer.ip().to_string()),
        (Some(prior), None) => Some(prior.to_string()),
        (None, None) => None,
    };
    if let Some(forwarded_for) = forwarded_for {
        request_builder = request_builder.header("x-forwarded-for", forwarded_for);
    }
    let info = req.connection_info().clone();
    request_builder = request_builder
        .header("x-forwarded-host", info.host())
        .header("x-forwarded-proto", info.scheme());

    if let Some(admission) = admission {
        for (name, value) in admission_headers(admission) {
            request_builder = request_builder.header(name, value);
        }
    }

    if !body.is_empty() {
        request_builder = request_builder.body(body);
    }

    let started = Instant::now();
    let response = match tokio::time::timeout(timeout, request_builder.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            UPSTREAM_ERRORS.inc();
            return Err(ProxyError::BackendUnreachable(format!("{target_url}: {e}")));
        }
        Err(_) => {
            UPSTREAM_ERRORS.inc();
            return Err(ProxyError::BackendUnreachable(format!(
                "{target_url}: no response within {timeout:?}"
            )));
        }
    };
    UPSTREAM_LATENCY.observe(started.elapsed().as_secs_f64());

    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|_| ProxyError::BackendUnreachable("invalid upstream status".to_string()))?;
    let mut builder = HttpResponse::build(status);

    let upstream_connection = connection_tokens(
        response
            .headers()
            .get_all("connection")
            .iter()
            .map(|v| v.as_bytes()),
    );
    for (name, value) in response.headers() {
        let name = name.as_str();
        if is_listed(HOP_BY_HOP_HEADERS, name)
            || name == "content-length"
            || upstream_connection.iter().any(|t| t == name)
        {
            continue;
        }
        builder.append_header((name, value.as_bytes()));
    }
    if let Some(len) = response.content_length() {
        builder.no_chunking(len);
    }

    Ok(builder.streaming(response.bytes_stream()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kirin::{Caveat, Preimage, TokenId};

    #[test]
    fn strips_hop_by_hop_and_metadata() {
        let none: Vec<String> = vec![];
        assert!(!forwardable_request_header("Connection", b"close", &none));
        assert!(!forwardable_request_header("Transfer-Encoding", b"chunked", &none));
        assert!(!forwardable_request_header("host", b"proxy.example", &none));
        assert!(!forwardable_request_header("X-Kirin-Token-Id", b"spoofed", &none));
        assert!(forwardable_request_header("content-type", b"application/json", &none));
        assert!(forwardable_request_header("cookie", b"a=b", &none));
    }

    #[test]
    fn strips_headers_named_by_connection() {
        let tokens = connection_tokens([b"close, X-Trace".as_slice()].into_iter());
        assert!(!forwardable_request_header("x-trace", b"1", &tokens));
    }

    #[test]
    fn only_l402_authorization_is_stripped() {
        let none: Vec<String> = vec![];
        assert!(!forwardable_request_header("authorization", b"L402 abc:def", &none));
        assert!(!forwardable_request_header("Authorization", b"lsat abc:def", &none));
        assert!(forwardable_request_header("authorization", b"Bearer xyz", &none));
    }

    #[test]
    fn admission_metadata() {
        let payment_hash = Preimage::random().payment_hash();
        let admission = Admission {
            token_id: TokenId::random(),
            payment_hash,
            caveats: vec![Caveat::PathPrefix("/api".into()), Caveat::Capacity(3)],
        };
        let headers = admission_headers(&admission);
        assert_eq!(headers[1], (PAYMENT_HASH_HEADER, payment_hash.to_hex()));
        assert_eq!(headers[2].1, "path_prefix=/api; capacity=3");
    }
}

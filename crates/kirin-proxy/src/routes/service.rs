use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use kirin::AuthOutcome;

use crate::error::ProxyError;
use crate::metrics::{
    CHALLENGES_ISSUED, PAYMENT_BACKEND_ERRORS, REQUESTS_TOTAL, TOKENS_ADMITTED, VERIFY_FAILURES,
};
use crate::proxy::forward;
use crate::state::AppState;
use crate::static_files;

/// Label for requests no service route matched.
const UNROUTED: &str = "-";

/// Decode and normalize a request path. Routing, authentication and the
/// forwarded URL all use the result, so an encoded spelling cannot match a
/// different route than the one the backend serves.
fn canonical_path(path: &str) -> Result<String, ProxyError> {
    let decoded = urlencoding::decode(path)
        .map_err(|_| ProxyError::BadRequest("invalid URL encoding in path".to_string()))?;

    if decoded.chars().any(|c| c.is_control() || c == '\\' || c == '%') {
        return Err(ProxyError::BadRequest(
            "path contains a disallowed character".to_string(),
        ));
    }

    let mut segments = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(ProxyError::BadRequest(
                    "path traversal not allowed".to_string(),
                ))
            }
            s => segments.push(s),
        }
    }

    let mut canonical = format!("/{}", segments.join("/"));
    if decoded.ends_with('/') && !segments.is_empty() {
        canonical.push('/');
    }
    Ok(canonical)
}

async fn dispatch(
    req: &HttpRequest,
    body: web::Bytes,
    state: &AppState,
    route_name: &mut String,
) -> Result<HttpResponse, ProxyError> {
    let path = canonical_path(req.path())?;

    let Some(route) = state.routes.resolve(&path) else {
        return match &state.static_root {
            Some(root) => static_files::serve(req, root).await,
            None => Err(ProxyError::RouteNotFound(path)),
        };
    };
    route_name.clone_from(&route.name);

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let admission = match state
        .authenticator
        .authenticate(&path, authorization, &route.policy())
        .await
    {
        AuthOutcome::Free => None,
        AuthOutcome::Admitted(admission) => {
            TOKENS_ADMITTED.with_label_values(&[route.name.as_str()]).inc();
            Some(admission)
        }
        AuthOutcome::Challenge(challenge) => {
            CHALLENGES_ISSUED.with_label_values(&[route.name.as_str()]).inc();
            tracing::debug!(
                route = %route.name,
                payment_hash = %challenge.invoice.payment_hash,
                price = route.price,
                "payment required"
            );
            return Err(ProxyError::PaymentRequired(Box::new(challenge)));
        }
        AuthOutcome::Rejected(e) => {
            VERIFY_FAILURES.with_label_values(&[e.reason()]).inc();
            tracing::warn!(route = %route.name, reason = e.reason(), "token rejected");
            return Err(ProxyError::Unauthorized(e));
        }
        AuthOutcome::Unavailable(reason) => {
            PAYMENT_BACKEND_ERRORS.inc();
            return Err(ProxyError::PaymentBackendUnavailable(reason));
        }
        AuthOutcome::Misconfigured(e) => return Err(ProxyError::Internal(e.to_string())),
    };

    let target_url = route.target_url(&path, req.uri().query());
    forward(
        &state.http_client,
        req,
        &target_url,
        body,
        admission.as_ref(),
        state.upstream_timeout,
    )
    .await
}

/// Catch-all handler: route, authenticate, then proxy or serve static content.
pub async fn handle(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let mut route_name = UNROUTED.to_string();
    let response = match dispatch(&req, body, &state, &mut route_name).await {
        Ok(response) => response,
        Err(e) => e.error_response(),
    };
    REQUESTS_TOTAL
        .with_label_values(&[route_name.as_str(), response.status().as_str()])
        .inc();
    response
}

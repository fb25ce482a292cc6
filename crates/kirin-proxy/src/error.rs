use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use kirin::{Challenge, VerifyError, CHALLENGE_HEADER};

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No service route and no static file for the path
    #[error("no route for {0}")]
    RouteNotFound(String),

    /// Request rejected before routing
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Payment required; carries the challenge to return
    #[error("payment required")]
    PaymentRequired(Box<Challenge>),

    /// Presented token failed verification
    #[error("unauthorized: {}", .0.reason())]
    Unauthorized(VerifyError),

    /// Payment backend unreachable or timed out
    #[error("payment backend unavailable: {0}")]
    PaymentBackendUnavailable(String),

    /// Proxied service unreachable or timed out
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::PaymentBackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ProxyError::RouteNotFound(_) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "not_found",
                "message": "No service or content at this path"
            })),
            ProxyError::BadRequest(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "bad_request",
                "message": msg
            })),
            ProxyError::PaymentRequired(challenge) => HttpResponse::PaymentRequired()
                .insert_header((CHALLENGE_HEADER, challenge.header_value()))
                .json(serde_json::json!({
                    "error": "payment_required",
                    "message": "Pay the invoice, then retry with the token and preimage",
                    "invoice": challenge.invoice.payment_request,
                    "macaroon": challenge.token.encode(),
                    "payment_hash": challenge.invoice.payment_hash.to_hex(),
                    "amount": challenge.invoice.amount,
                })),
            // Verification reasons stay server-side.
            ProxyError::Unauthorized(_) => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Invalid or unauthorized token"
            })),
            ProxyError::PaymentBackendUnavailable(msg) => {
                tracing::error!("Payment backend unavailable: {}", msg);
                HttpResponse::ServiceUnavailable()
                    .insert_header(("Retry-After", "5"))
                    .json(serde_json::json!({
                        "error": "payment_backend_unavailable",
                        "message": "Payment service temporarily unavailable, retry shortly"
                    }))
            }
            ProxyError::BackendUnreachable(msg) => {
                tracing::error!("Backend unreachable: {}", msg);
                HttpResponse::BadGateway().json(serde_json::json!({
                    "error": "bad_gateway",
                    "message": "Failed to reach upstream service"
                }))
            }
            ProxyError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}

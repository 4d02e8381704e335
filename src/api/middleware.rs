//! API Middleware
//!
//! Operation context extraction and request logging.

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::{AppError, ErrorResponse};

pub const ACTOR_HEADER: &str = "X-Actor-Id";
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Longest accepted idempotency key
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

// =========================================================================
// Operation context
// =========================================================================

/// Build the [`OperationContext`] for the request.
///
/// The actor comes from `X-Actor-Id`, set by the identity component in front
/// of this service. Reads may omit it; mutations reject a context without one.
/// A missing correlation id is generated.
pub async fn context_middleware(mut request: Request<Body>, next: Next) -> Result<Response, Response> {
    let headers = request.headers();

    let actor_id = match headers.get(ACTOR_HEADER).map(|v| v.to_str()) {
        None => None,
        Some(Ok(raw)) => match Uuid::parse_str(raw.trim()) {
            Ok(id) => Some(id),
            Err(_) => return Err(bad_header("Invalid X-Actor-Id header format", "invalid_actor_id")),
        },
        Some(Err(_)) => return Err(bad_header("Invalid X-Actor-Id header format", "invalid_actor_id")),
    };

    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .unwrap_or_else(Uuid::new_v4);

    let mut context = OperationContext::new().with_correlation_id(correlation_id);
    if let Some(actor_id) = actor_id {
        context = context.with_actor(actor_id);
    }

    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

fn bad_header(error: &str, error_code: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            error_code: error_code.to_string(),
            details: None,
        }),
    )
        .into_response()
}

/// The `Idempotency-Key` header. A blank header counts as absent; an
/// unreadable or oversized one is rejected rather than ignored.
pub fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| AppError::InvalidRequest("Idempotency-Key must be visible ASCII".to_string()))?
        .trim();

    if key.is_empty() {
        return Ok(None);
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Idempotency-Key longer than {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(Some(key.to_string()))
}

// =========================================================================
// Request logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware. Runs inside [`context_middleware`] so the
/// correlation id is known.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    let (correlation_id, actor_id) = request
        .extensions()
        .get::<OperationContext>()
        .map(|ctx| (ctx.correlation_id, ctx.actor_id))
        .unwrap_or((None, None));

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        actor_id = ?actor_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    let duration = start.elapsed();

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            correlation_id = ?correlation_id,
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            correlation_id = ?correlation_id,
            "Request completed"
        );
    }

    response
}

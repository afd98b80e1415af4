//! Admin token middleware
//!
//! Guards the mapping and session endpoints with a static bearer token.
//! When no token is configured every request passes, matching a server
//! started without `--admin-token`.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::models::ErrorResponse;

/// Token state shared across middleware instances
#[derive(Debug, Clone)]
pub struct AdminAuth {
    token: Option<String>,
}

impl AdminAuth {
    pub fn new(token: Option<String>) -> Self {
        // An empty token would accept "Bearer " and is treated as unset
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

fn unauthorized(error: &str, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(error, code)),
    )
}

/// Check `Authorization: Bearer <token>` against the configured token
///
/// # Errors
/// Returns 401 Unauthorized if:
/// - The Authorization header is missing
/// - The header is not a bearer token
/// - The token does not match
pub async fn require_admin_token(
    State(auth): State<Arc<AdminAuth>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let Some(expected) = auth.token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header", "MISSING_AUTH"))?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        unauthorized(
            "Invalid Authorization header format. Expected 'Bearer <token>'",
            "INVALID_AUTH_FORMAT",
        )
    })?;

    // Slices of different lengths compare unequal
    let matches: bool = token.as_bytes().ct_eq(expected.as_bytes()).into();
    if !matches {
        return Err(unauthorized("Invalid admin token", "INVALID_TOKEN"));
    }

    Ok(next.run(request).await)
}

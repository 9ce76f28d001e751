//! Bearer token authentication middleware

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::api::secrets::Secrets;

/// Name of the authenticated API user, available to handlers as an extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

/// Authentication middleware
///
/// Resolves the Bearer token to a user from the secrets file and stores it
/// in the request extensions as [`Caller`].
pub async fn auth_middleware(
    State(secrets): State<Arc<Secrets>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?;

    let user = secrets.user_for(token).ok_or(AuthError::InvalidToken)?;
    debug!("authenticated request from {user}");
    request.extensions_mut().insert(Caller(user.to_string()));

    Ok(next.run(request).await)
}

/// Authentication errors
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing Authorization header"),
            AuthError::InvalidFormat => (
                StatusCode::UNAUTHORIZED,
                "Invalid Authorization format (expected: Bearer <token>)",
            ),
            AuthError::InvalidToken => (StatusCode::FORBIDDEN, "Invalid token"),
        };

        (status, message).into_response()
    }
}

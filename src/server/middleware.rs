use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request},
    middleware::Next,
    response::Response,
};

use super::AppState;
use crate::error::AppError;

/// API Key authentication middleware for the internal producer routes.
/// Validates the X-API-Key header against the configured api.key.
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    // If no API key is configured, allow all requests (development mode)
    let Some(expected_key) = &state.settings.api.key else {
        return Ok(next.run(req).await);
    };

    let api_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    match api_key {
        Some(key) if key == expected_key => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(AppError::Auth("Invalid API key".into()))
        }
        None => {
            tracing::warn!("Missing API key header");
            Err(AppError::Auth("Missing API key".into()))
        }
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// The subscriber behind a valid bearer token.
///
/// Handlers that take this extractor reject unauthenticated requests with
/// 401 before any subsystem work starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedSubscriber(pub i64);

impl FromRequestParts<AppState> for AuthenticatedSubscriber {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(parts)
            .ok_or_else(|| AppError::Auth("Missing authentication token".into()))?;
        let subscriber_id = state.jwt_validator.subscriber_id(token)?;
        Ok(Self(subscriber_id))
    }
}

use crate::errors::ApiError;
use crate::handlers::auth::verify_access_token;
use crate::AppState;
use axum::{
    extract::{Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

pub async fn auth_middleware(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| ApiError::Auth("Missing Authorization header".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| ApiError::Auth("Invalid Authorization header format".to_string()))?;

    let token = auth_str.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::Auth("Invalid Authorization header format. Expected 'Bearer <token>'".to_string())
    })?;

    let claims = verify_access_token(token, &state.config).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        ApiError::Auth("Invalid or expired token".to_string())
    })?;

    // Make the claims available to handlers downstream.
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

use crate::config::AppConfig;
use crate::errors::ApiError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::*;
use crate::AppState;
use axum::{
    extract::Extension,
    response::Json,
    routing::{post, Router},
};
use base64::Engine;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub fn auth_routes() -> Router {
    let public = Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh));

    let protected = Router::new()
        .route("/auth/logout", post(logout))
        .layer(axum::middleware::from_fn(auth_middleware));

    public.merge(protected)
}

pub fn issue_access_token(
    user_id: i32,
    config: &AppConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = now + Duration::minutes(config.access_token_minutes);

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_ref()),
    )
}

pub fn verify_access_token(
    token: &str,
    config: &AppConfig,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Opaque long-lived credential; 32 random bytes, URL-safe.
fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::prelude::BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

fn validate_signup(payload: &SignupRequest) -> Result<(), ApiError> {
    if payload.name.len() < 2 || payload.name.len() > 100 {
        return Err(ApiError::Validation(
            "Name must be between 2 and 100 characters".to_string(),
        ));
    }
    if !EMAIL_RE.is_match(&payload.email) {
        return Err(ApiError::Validation(format!(
            "Invalid email address: {}",
            payload.email
        )));
    }
    if payload.password.len() < 6 {
        return Err(ApiError::Validation(
            "Password must be at least 6 characters long".to_string(),
        ));
    }
    if !(1..=120).contains(&payload.age) {
        return Err(ApiError::Validation(
            "Age must be between 1 and 120".to_string(),
        ));
    }
    if !(10.0..=50.0).contains(&payload.bmi) {
        return Err(ApiError::Validation(
            "BMI must be between 10.0 and 50.0".to_string(),
        ));
    }
    Ok(())
}

/// Issue the access/refresh pair for a user and record the refresh token.
async fn issue_session(state: &AppState, user_id: i32) -> Result<(String, String), ApiError> {
    let access_token = issue_access_token(user_id, &state.config).map_err(|e| {
        tracing::error!("failed to sign access token: {}", e);
        ApiError::Internal("Internal server error".to_string())
    })?;

    let refresh_token = generate_refresh_token();
    let now = Utc::now();
    let expires_at = now + Duration::days(state.config.refresh_token_days);

    sqlx::query(
        "INSERT INTO refresh_tokens (user_id, token, expires_at, created_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(&refresh_token)
    .bind(expires_at)
    .bind(now)
    .execute(&state.db_pool)
    .await?;

    Ok((access_token, refresh_token))
}

async fn signup(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<AuthSuccessResponse>, ApiError> {
    validate_signup(&payload)?;

    let existing =
        sqlx::query_scalar::<_, i32>("SELECT user_id FROM user_profiles WHERE email = $1")
            .bind(&payload.email)
            .fetch_optional(&state.db_pool)
            .await?;
    if existing.is_some() {
        return Err(ApiError::Validation("Email already registered".to_string()));
    }

    let password_hash = hash(&payload.password, DEFAULT_COST).map_err(|e| {
        tracing::error!("password hashing failed: {}", e);
        ApiError::Internal("Internal server error".to_string())
    })?;

    let now = Utc::now();
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO user_profiles (name, email, password_hash, age, bmi, gender, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING user_id, name, email, password_hash, age, bmi, gender, created_at, updated_at",
    )
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(&password_hash)
    .bind(payload.age)
    .bind(payload.bmi)
    .bind(payload.gender)
    .bind(now)
    .bind(now)
    .fetch_one(&state.db_pool)
    .await?;

    let (access_token, refresh_token) = issue_session(&state, user.user_id).await?;
    tracing::info!("new user registered: {}", user.email);

    Ok(Json(AuthSuccessResponse {
        message: "User created successfully".to_string(),
        user: user.into(),
        access_token,
        refresh_token,
        token_type: "bearer".to_string(),
    }))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthSuccessResponse>, ApiError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT user_id, name, email, password_hash, age, bmi, gender, created_at, updated_at
         FROM user_profiles WHERE email = $1",
    )
    .bind(&payload.email)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::Auth("Invalid email or password".to_string()))?;

    match verify(&payload.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return Err(ApiError::Auth("Invalid email or password".to_string()));
        }
        Err(e) => {
            tracing::error!("password verification failed: {}", e);
            return Err(ApiError::Internal("Internal server error".to_string()));
        }
    }

    let (access_token, refresh_token) = issue_session(&state, user.user_id).await?;

    Ok(Json(AuthSuccessResponse {
        message: "Login successful".to_string(),
        user: user.into(),
        access_token,
        refresh_token,
        token_type: "bearer".to_string(),
    }))
}

async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<Json<TokenRefreshResponse>, ApiError> {
    // Expired rows are never purged; they simply fail this check.
    let user_id = sqlx::query_scalar::<_, i32>(
        "SELECT user_id FROM refresh_tokens WHERE token = $1 AND expires_at > $2",
    )
    .bind(&payload.refresh_token)
    .bind(Utc::now())
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::Auth("Invalid or expired refresh token".to_string()))?;

    let access_token = issue_access_token(user_id, &state.config).map_err(|e| {
        tracing::error!("failed to sign access token: {}", e);
        ApiError::Internal("Internal server error".to_string())
    })?;

    Ok(Json(TokenRefreshResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    Extension(_claims): Extension<Claims>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
        .bind(&payload.refresh_token)
        .execute(&state.db_pool)
        .await?;

    Ok(Json(json!({ "message": "Logged out successfully" })))
}

use crate::errors::ApiError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::*;
use crate::AppState;
use axum::{
    extract::Extension,
    response::Json,
    routing::{get, Router},
};
use bcrypt::{hash, DEFAULT_COST};
use chrono::Utc;
use std::sync::Arc;

pub fn profile_routes() -> Router {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .layer(axum::middleware::from_fn(auth_middleware))
}

async fn fetch_user(state: &AppState, user_id: i32) -> Result<User, ApiError> {
    sqlx::query_as::<_, User>(
        "SELECT user_id, name, email, password_hash, age, bmi, gender, created_at, updated_at
         FROM user_profiles WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}

async fn get_profile(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfileResponse>, ApiError> {
    let user_id = claims.sub.parse::<i32>().unwrap_or(0);
    let user = fetch_user(&state, user_id).await?;
    Ok(Json(UserProfileResponse { user: user.into() }))
}

async fn update_profile(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ProfileUpdateRequest>,
) -> Result<Json<ProfileUpdateResponse>, ApiError> {
    let user_id = claims.sub.parse::<i32>().unwrap_or(0);

    if let Some(name) = payload.name.as_deref() {
        if name.len() < 2 || name.len() > 100 {
            return Err(ApiError::Validation(
                "Name must be between 2 and 100 characters".to_string(),
            ));
        }
    }
    if let Some(age) = payload.age {
        if !(1..=120).contains(&age) {
            return Err(ApiError::Validation(
                "Age must be between 1 and 120".to_string(),
            ));
        }
    }
    if let Some(bmi) = payload.bmi {
        if !(10.0..=50.0).contains(&bmi) {
            return Err(ApiError::Validation(
                "BMI must be between 10.0 and 50.0".to_string(),
            ));
        }
    }

    let password_hash = match payload.new_password.as_deref() {
        Some(password) if password.len() < 6 => {
            return Err(ApiError::Validation(
                "Password must be at least 6 characters long".to_string(),
            ));
        }
        Some(password) => Some(hash(password, DEFAULT_COST).map_err(|e| {
            tracing::error!("password hashing failed: {}", e);
            ApiError::Internal("Internal server error".to_string())
        })?),
        None => None,
    };

    let user = sqlx::query_as::<_, User>(
        "UPDATE user_profiles
         SET name = COALESCE($2, name),
             age = COALESCE($3, age),
             bmi = COALESCE($4, bmi),
             gender = COALESCE($5, gender),
             password_hash = COALESCE($6, password_hash),
             updated_at = $7
         WHERE user_id = $1
         RETURNING user_id, name, email, password_hash, age, bmi, gender, created_at, updated_at",
    )
    .bind(user_id)
    .bind(payload.name)
    .bind(payload.age)
    .bind(payload.bmi)
    .bind(payload.gender)
    .bind(password_hash)
    .bind(Utc::now())
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(ProfileUpdateResponse {
        message: "Profile updated successfully".to_string(),
        user: user.into(),
    }))
}

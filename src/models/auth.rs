// src/models/auth.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "gender", rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i32,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub age: i32,
    pub bmi: f64,
    pub gender: Gender,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a user record; never carries the password hash.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: i32,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub bmi: f64,
    pub gender: Gender,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        UserProfile {
            user_id: user.user_id,
            name: user.name,
            email: user.email,
            age: user.age,
            bmi: user.bmi,
            gender: user.gender,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub age: i32,
    pub bmi: f64,
    pub gender: Gender,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthSuccessResponse {
    pub message: String,
    pub user: UserProfile,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

#[derive(Debug, Serialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Serialize)]
pub struct UserProfileResponse {
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdateRequest {
    pub name: Option<String>,
    pub age: Option<i32>,
    pub bmi: Option<f64>,
    pub gender: Option<Gender>,
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileUpdateResponse {
    pub message: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub exp: usize,  // expiration time
    pub iat: usize,  // issued at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Gender::Male).unwrap(), "\"male\"");
        assert_eq!(
            serde_json::from_str::<Gender>("\"other\"").unwrap(),
            Gender::Other
        );
        assert!(serde_json::from_str::<Gender>("\"MALE\"").is_err());
    }

    #[test]
    fn profile_drops_the_password_hash() {
        let user = User {
            user_id: 1,
            name: "Al".to_string(),
            email: "a@x.com".to_string(),
            password_hash: "$2b$12$hash".to_string(),
            age: 30,
            bmi: 22.0,
            gender: Gender::Male,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let profile: UserProfile = user.into();
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("password"));
        assert!(json.contains("\"email\":\"a@x.com\""));
    }
}

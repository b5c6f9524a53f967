// src/config.rs
use std::env;
use std::path::PathBuf;

/// Runtime configuration gathered once at startup and carried in AppState.
/// Components receive plain values from here instead of reading the process
/// environment themselves.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
    pub model_path: PathBuf,
    pub symptoms_path: PathBuf,
    pub disease_mapping_path: PathBuf,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let jwt_secret = env::var("SECRET_KEY").unwrap_or_else(|_| {
            tracing::warn!("SECRET_KEY not set; using a development-only fallback");
            "dev-only-fallback-secret".to_string()
        });

        Self {
            jwt_secret,
            access_token_minutes: 30,
            refresh_token_days: 7,
            model_path: env::var("MODEL_PATH")
                .unwrap_or_else(|_| "models/disease_model.onnx".to_string())
                .into(),
            symptoms_path: env::var("SYMPTOMS_PATH")
                .unwrap_or_else(|_| "dataset/symptoms.csv".to_string())
                .into(),
            disease_mapping_path: env::var("DISEASE_MAPPING_PATH")
                .unwrap_or_else(|_| "dataset/disease_mapping.csv".to_string())
                .into(),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
        }
    }
}

#[cfg(test)]
impl AppConfig {
    /// Fixed-secret config for unit tests.
    pub fn for_tests() -> Self {
        Self {
            jwt_secret: "test-secret".to_string(),
            access_token_minutes: 30,
            refresh_token_days: 7,
            model_path: "models/disease_model.onnx".into(),
            symptoms_path: "dataset/symptoms.csv".into(),
            disease_mapping_path: "dataset/disease_mapping.csv".into(),
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

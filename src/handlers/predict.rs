use crate::classifier::top_prediction;
use crate::confidence::format_confidence;
use crate::errors::ApiError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::models::chat::{MessageLog, PredictionResponse, SymptomsRequest, SymptomsResponse};
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    response::Json,
    routing::{get, post, Router},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const SYMPTOM_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct SymptomSearchQuery {
    #[serde(default)]
    query: String,
}

pub fn predict_routes() -> Router {
    let public = Router::new()
        .route("/get_symptoms", get(get_symptoms))
        .route("/health", get(health));

    let protected = Router::new()
        .route("/predict", post(predict))
        .layer(axum::middleware::from_fn(auth_middleware));

    public.merge(protected)
}

async fn get_symptoms(
    Query(params): Query<SymptomSearchQuery>,
    Extension(state): Extension<Arc<AppState>>,
) -> Json<SymptomsResponse> {
    let symptoms = state
        .vocabulary
        .search(&params.query, SYMPTOM_SEARCH_LIMIT)
        .into_iter()
        .map(str::to_string)
        .collect();
    Json(SymptomsResponse { symptoms })
}

async fn predict(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SymptomsRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let user_id = claims.sub.parse::<i32>().unwrap_or(0);

    if payload.symptoms.is_empty() {
        return Err(ApiError::Validation(
            "At least one symptom must be provided".to_string(),
        ));
    }
    let unknown = state.vocabulary.unknown(&payload.symptoms);
    if !unknown.is_empty() {
        return Err(ApiError::Validation(format!(
            "Invalid symptoms: {unknown:?}"
        )));
    }

    let features = state.vocabulary.vectorize(&payload.symptoms);
    let distribution = state.model.predict(&features).map_err(|e| {
        tracing::error!("prediction failed: {}", e);
        ApiError::Collaborator(format!("Prediction failed: {e}"))
    })?;

    let (class, probability) = top_prediction(&distribution).ok_or_else(|| {
        ApiError::Collaborator("Prediction failed: empty model output".to_string())
    })?;
    let disease = state
        .disease_mapping
        .disease_for(class)
        .ok_or_else(|| {
            ApiError::Collaborator("Prediction failed: Disease mapping not found".to_string())
        })?
        .to_string();

    let confidence = format_confidence(probability);
    tracing::debug!(%disease, %confidence, "prediction computed");

    // The chat is created atomically with the prediction; its log starts empty.
    let chat_id = state
        .chat_store
        .create(
            user_id,
            Utc::now(),
            &MessageLog::new(),
            Some(&disease),
            Some(&payload.symptoms),
            Some(&confidence),
        )
        .await?;

    Ok(Json(PredictionResponse {
        disease,
        confidence,
        symptoms_count: payload.symptoms.len(),
        chat_id,
    }))
}

async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "model": state.config.model_path.display().to_string(),
        "symptoms_loaded": state.vocabulary.len(),
    }))
}

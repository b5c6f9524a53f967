// src/handlers/chat.rs
use crate::confidence::{compute_confidence, resolve_confidence, RecomputeBudget};
use crate::conversation::{run_chat_turn, ConversationError};
use crate::errors::ApiError;
use crate::middleware::auth::auth_middleware;
use crate::models::auth::Claims;
use crate::models::chat::{
    ChatHistoryQuery, ChatHistoryResponse, ChatSummary, LlmResponse, MessageLog, PaginationInfo,
    UpdateConfidenceQuery, UpdateConfidenceResponse, UserPrompt,
};
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    response::Json,
    routing::{get, post, Router},
};
use std::sync::Arc;

pub fn chat_routes() -> Router {
    Router::new()
        .route("/chat-message", post(chat_message))
        .route("/chat-history", get(chat_history))
        .route("/update-confidence", post(update_confidence))
        .layer(axum::middleware::from_fn(auth_middleware))
}

async fn chat_message(
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UserPrompt>,
) -> Result<Json<LlmResponse>, ApiError> {
    let user_id = claims.sub.parse::<i32>().unwrap_or(0);

    let chat = state
        .chat_store
        .get(user_id, payload.chat_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chat not found".to_string()))?;

    let client = state.gemini_client.as_ref().ok_or_else(|| {
        ApiError::Collaborator("Failed to process chat: assistant not configured".to_string())
    })?;

    let (response, response_at) = run_chat_turn(client, &state.chat_store, &chat, &payload.query)
        .await
        .map_err(|e| {
            tracing::error!("chat turn failed for chat {}: {}", payload.chat_id, e);
            match e {
                ConversationError::Collaborator(inner) => {
                    ApiError::Collaborator(format!("Failed to process chat: {inner}"))
                }
                ConversationError::Storage(_) => {
                    ApiError::Storage("Failed to process chat".to_string())
                }
            }
        })?;

    Ok(Json(LlmResponse {
        chat_id: chat.chat_id,
        response,
        response_at,
    }))
}

async fn chat_history(
    Query(params): Query<ChatHistoryQuery>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ChatHistoryResponse>, ApiError> {
    let user_id = claims.sub.parse::<i32>().unwrap_or(0);
    let page = params.page.max(1);
    let per_page = params.per_page.clamp(5, 100);

    let (rows, total) = state.chat_store.list(user_id, page, per_page).await?;
    if rows.is_empty() {
        return Ok(Json(ChatHistoryResponse {
            chats: Vec::new(),
            pagination: None,
        }));
    }

    // The recompute allowance is scoped to this one listing call.
    let mut budget = RecomputeBudget::per_page();
    let mut chats = Vec::with_capacity(rows.len());

    for row in rows {
        let log = row.message_log();
        let preview = log.preview();
        let symptoms = row.symptom_names();

        let outcome = resolve_confidence(
            row.confidence.as_deref(),
            &symptoms,
            params.recompute_confidence,
            &mut budget,
            &state.vocabulary,
            state.model.as_ref(),
        );

        // Freshly computed values are written back best-effort; a storage
        // failure must not fail the listing.
        if outcome.write_back {
            if let Some(value) = outcome.value.as_deref() {
                if let Err(e) = state.chat_store.update_confidence(row.chat_id, value).await {
                    tracing::warn!("confidence write-back failed for chat {}: {}", row.chat_id, e);
                }
            }
        }

        chats.push(ChatSummary {
            chat_id: row.chat_id,
            user_id: row.user_id,
            created_at: row.created_at,
            messages: if params.include_messages {
                log
            } else {
                MessageLog::new()
            },
            preview,
            disease: row.disease,
            confidence: outcome.value,
        });
    }

    let pages = (total + per_page - 1) / per_page;
    Ok(Json(ChatHistoryResponse {
        chats,
        pagination: Some(PaginationInfo {
            page,
            per_page,
            total,
            pages,
        }),
    }))
}

async fn update_confidence(
    Query(params): Query<UpdateConfidenceQuery>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UpdateConfidenceResponse>, ApiError> {
    let user_id = claims.sub.parse::<i32>().unwrap_or(0);

    let chat = state
        .chat_store
        .get(user_id, params.chat_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chat not found".to_string()))?;

    if chat.symptoms.as_deref().map_or(true, str::is_empty) {
        return Err(ApiError::Validation(
            "No symptoms found for this chat".to_string(),
        ));
    }
    let symptoms = chat.symptom_names();
    if symptoms.is_empty() {
        return Err(ApiError::Validation("Invalid symptoms data".to_string()));
    }

    let confidence = compute_confidence(&symptoms, &state.vocabulary, state.model.as_ref())
        .map_err(|e| {
            tracing::error!("forced recompute failed for chat {}: {}", params.chat_id, e);
            ApiError::Collaborator(format!("Failed to update confidence: {e}"))
        })?;

    // This endpoint's persist is the operation itself, so failures surface.
    state
        .chat_store
        .update_confidence(params.chat_id, &confidence)
        .await?;

    Ok(Json(UpdateConfidenceResponse {
        chat_id: params.chat_id,
        confidence,
        message: "Confidence updated successfully".to_string(),
    }))
}

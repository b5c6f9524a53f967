// src/chat_store.rs
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;

use crate::models::chat::{ChatRow, MessageLog};

#[derive(Debug, Error)]
pub enum ChatStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Postgres SQLSTATE for a reference to a column that does not exist.
const UNDEFINED_COLUMN: &str = "42703";

fn is_undefined_column(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_COLUMN))
}

/// Persistence for diagnosis chats. One row per chat; the message log and
/// symptom list are stored as JSON text.
#[derive(Debug, Clone)]
pub struct ChatStore {
    pool: PgPool,
}

impl ChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a chat. Installations predating the confidence column get the
    /// reduced insert instead of a failed request.
    pub async fn create(
        &self,
        user_id: i32,
        created_at: DateTime<Utc>,
        messages: &MessageLog,
        disease: Option<&str>,
        symptoms: Option<&[String]>,
        confidence: Option<&str>,
    ) -> Result<i32, ChatStoreError> {
        let serialized_messages = messages.to_json()?;
        let serialized_symptoms = match symptoms {
            Some(list) => Some(serde_json::to_string(list)?),
            None => None,
        };

        let inserted = sqlx::query_scalar::<_, i32>(
            "INSERT INTO chat_details (user_id, messages, disease, symptoms, confidence, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING chat_id",
        )
        .bind(user_id)
        .bind(&serialized_messages)
        .bind(disease)
        .bind(&serialized_symptoms)
        .bind(confidence)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(chat_id) => Ok(chat_id),
            Err(e) if is_undefined_column(&e) => {
                tracing::warn!("confidence column missing, inserting chat without it");
                let chat_id = sqlx::query_scalar::<_, i32>(
                    "INSERT INTO chat_details (user_id, messages, disease, symptoms, created_at)
                     VALUES ($1, $2, $3, $4, $5)
                     RETURNING chat_id",
                )
                .bind(user_id)
                .bind(&serialized_messages)
                .bind(disease)
                .bind(&serialized_symptoms)
                .bind(created_at)
                .fetch_one(&self.pool)
                .await?;
                Ok(chat_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(
        &self,
        user_id: i32,
        chat_id: i32,
    ) -> Result<Option<ChatRow>, ChatStoreError> {
        let row = sqlx::query_as::<_, ChatRow>(
            "SELECT chat_id, user_id, messages, disease, symptoms, confidence, created_at
             FROM chat_details
             WHERE chat_id = $1 AND user_id = $2",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn update_messages(
        &self,
        user_id: i32,
        chat_id: i32,
        messages: &MessageLog,
    ) -> Result<(), ChatStoreError> {
        let serialized = messages.to_json()?;
        sqlx::query("UPDATE chat_details SET messages = $1 WHERE chat_id = $2 AND user_id = $3")
            .bind(&serialized)
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Overwrites unconditionally; the confidence memoizer is the only
    /// caller.
    pub async fn update_confidence(
        &self,
        chat_id: i32,
        confidence: &str,
    ) -> Result<(), ChatStoreError> {
        sqlx::query("UPDATE chat_details SET confidence = $1 WHERE chat_id = $2")
            .bind(confidence)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Newest-first page of a user's chats plus the total count.
    pub async fn list(
        &self,
        user_id: i32,
        page: i64,
        per_page: i64,
    ) -> Result<(Vec<ChatRow>, i64), ChatStoreError> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chat_details WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let offset = (page - 1) * per_page;
        let rows = sqlx::query_as::<_, ChatRow>(
            "SELECT chat_id, user_id, messages, disease, symptoms, confidence, created_at
             FROM chat_details
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }
}

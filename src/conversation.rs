// src/conversation.rs
//! Replays a chat's stored history into the LLM collaborator and records the
//! new turn.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::chat_store::{ChatStore, ChatStoreError};
use crate::gemini_client::{Content, GeminiClient, GeminiError};
use crate::models::chat::ChatRow;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("assistant call failed: {0}")]
    Collaborator(#[from] GeminiError),
    #[error("failed to persist chat turn: {0}")]
    Storage(#[from] ChatStoreError),
}

/// Canned follow-up questions offered by the UI. Each renders through a
/// disease-specific template before reaching the model; anything else goes
/// through the generic template.
pub const SUGGESTED_QUERIES: [&str; 4] = [
    "Explain my disease in simple words",
    "Is this curable? If yes, how long?",
    "Write prescription & health tips",
    "When should I see a doctor?",
];

/// The model-facing rendering of a query. The raw text is what gets
/// persisted in the log.
pub fn render_query(query: &str, disease: &str) -> String {
    if query == SUGGESTED_QUERIES[0] {
        format!("Explain my {disease} in simple words.")
    } else if query == SUGGESTED_QUERIES[1] {
        format!("Is {disease} curable? If yes, how long?")
    } else if query == SUGGESTED_QUERIES[2] {
        format!("Write prescription & health tips for me to recover from {disease}.")
    } else if query == SUGGESTED_QUERIES[3] {
        format!("When should I see a doctor for my {disease}?")
    } else {
        format!("Disease: {disease}\n{query}")
    }
}

pub fn system_prompt(disease: &str, symptoms: &[String]) -> String {
    format!(
        "You are Medibot, a highly knowledgeable and reliable medical expert assistant.\n\
         The user is concerned about the following disease: {disease}.\n\
         The user has reported the following symptoms: {symptoms:?}.\n\
         \n\
         Your role is to:\n\
         - Explain the disease and its symptoms in simple, empathetic language.\n\
         - Provide medically accurate, evidence-based, and easy-to-understand information.\n\
         - Suggest possible causes, risk factors, and lifestyle recommendations.\n\
         - Offer guidance on general treatment approaches and health tips.\n\
         - Highlight red flags that require urgent medical consultation.\n\
         - Always remind the user that this information is for educational purposes only and \
         does not substitute professional medical advice.\n\
         \n\
         Be clear, supportive, and professional in all responses."
    )
}

/// Gemini contents for one turn: the replayed ordered log (empty turns
/// skipped) followed by the rendered new query.
pub fn build_contents(chat: &ChatRow, rendered_query: &str) -> Vec<Content> {
    let log = chat.message_log();
    let mut contents = Vec::new();
    for turn in log.ordered_turns() {
        if let Some(query) = turn.query.as_deref() {
            contents.push(Content::user(query));
        }
        if let Some(response) = turn.response.as_deref() {
            contents.push(Content::model(response));
        }
    }
    contents.push(Content::user(rendered_query));
    contents
}

/// One full chat turn: invoke the collaborator with the chat's context, then
/// append and persist the new turn. Nothing is persisted on failure.
pub async fn run_chat_turn(
    client: &GeminiClient,
    store: &ChatStore,
    chat: &ChatRow,
    query: &str,
) -> Result<(String, DateTime<Utc>), ConversationError> {
    let disease = chat
        .disease
        .as_deref()
        .unwrap_or("an undetermined condition");
    let symptoms = chat.symptom_names();
    let instruction = system_prompt(disease, &symptoms);
    let contents = build_contents(chat, &render_query(query, disease));

    let response = client.complete(&instruction, contents).await?;

    let mut log = chat.message_log();
    log.append(query, response.as_str());
    store.update_messages(chat.user_id, chat.chat_id, &log).await?;

    Ok((response, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chat_with_messages(messages: &str) -> ChatRow {
        ChatRow {
            chat_id: 7,
            user_id: 3,
            messages: messages.to_string(),
            disease: Some("Malaria".to_string()),
            symptoms: Some(r#"["fever","chills"]"#.to_string()),
            confidence: Some("73.42%".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn suggested_queries_render_disease_templates() {
        assert_eq!(
            render_query("Explain my disease in simple words", "Malaria"),
            "Explain my Malaria in simple words."
        );
        assert_eq!(
            render_query("When should I see a doctor?", "Malaria"),
            "When should I see a doctor for my Malaria?"
        );
    }

    #[test]
    fn free_form_queries_use_the_generic_template() {
        assert_eq!(
            render_query("What should I eat?", "Dengue"),
            "Disease: Dengue\nWhat should I eat?"
        );
    }

    #[test]
    fn system_prompt_embeds_disease_and_symptoms() {
        let prompt = system_prompt("Malaria", &["fever".to_string(), "chills".to_string()]);
        assert!(prompt.contains("Malaria"));
        assert!(prompt.contains("fever"));
        assert!(prompt.contains("educational purposes only"));
    }

    #[test]
    fn contents_replay_history_before_the_new_query() {
        let raw = r#"{
            "message2": {"query": "second", "response": "answer two"},
            "message1": {"query": "first", "response": "answer one"}
        }"#;
        let chat = chat_with_messages(raw);
        let contents = build_contents(&chat, "rendered new query");

        let texts: Vec<(&str, &str)> = contents
            .iter()
            .map(|content| {
                (
                    content.role.as_deref().unwrap_or(""),
                    content.parts[0].text.as_str(),
                )
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                ("user", "first"),
                ("model", "answer one"),
                ("user", "second"),
                ("model", "answer two"),
                ("user", "rendered new query"),
            ]
        );
    }

    #[test]
    fn contents_skip_empty_turns_and_corrupt_logs() {
        let chat = chat_with_messages("corrupt");
        let contents = build_contents(&chat, "only query");
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].parts[0].text, "only query");

        let raw = r#"{"message1": {"query": null, "response": null}}"#;
        let chat = chat_with_messages(raw);
        assert_eq!(build_contents(&chat, "q").len(), 1);
    }
}

//! Conversation REST endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use flowplane_conversation::CreateConversationInput;
use flowplane_core::{AgentId, ConversationId, PageParams};
use flowplane_store::MessageRole;

use crate::error::ApiError;
use crate::extract::AuthPrincipal;
use crate::state::AppState;

/// Body of `POST /conversations/`.
#[derive(Debug, Deserialize)]
pub struct CreateConversationBody {
    /// Agent whose deployment answers in this conversation.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Optional title.
    #[serde(default)]
    pub title: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

/// Body of `POST /conversations/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct AppendMessageBody {
    /// Author role.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

/// `POST /conversations/`.
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<CreateConversationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversations
        .create_conversation(
            &principal,
            CreateConversationInput {
                agent_id: body.agent_id,
                title: body.title,
                metadata: body.metadata.unwrap_or_else(|| serde_json::json!({})),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// `GET /conversations/{conversation_id}`.
pub async fn get_conversation(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(conversation_id): Path<ConversationId>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversations
        .get_conversation(&principal, conversation_id)
        .await?;
    Ok(Json(conversation))
}

/// `GET /conversations/{conversation_id}/messages`.
pub async fn list_messages(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(conversation_id): Path<ConversationId>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .conversations
        .list_messages(&principal, conversation_id, page)
        .await?;
    Ok(Json(messages))
}

/// `POST /conversations/{conversation_id}/messages`.
pub async fn append_message(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(conversation_id): Path<ConversationId>,
    Json(body): Json<AppendMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .conversations
        .append_message(
            &principal,
            conversation_id,
            body.role,
            body.content,
            body.metadata.unwrap_or_else(|| serde_json::json!({})),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coach::TurnError;
use crate::memory::session::SessionId;
use crate::memory::types::ConversationMessage;
use crate::server::{ApiError, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub environment: String,
    pub message: String,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        environment: state.config.environment.clone(),
        message: "ILPA Backend is running".to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_type: String,
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id must not be empty"));
    }

    let session_id = request
        .session_id
        .map(SessionId::try_from)
        .transpose()
        .map_err(|e| ApiError::bad_request(format!("Invalid session_id: {e}")))?;

    let reply = state
        .orchestrator
        .process_message(&request.user_id, &request.content, session_id)
        .await
        .map_err(|e| match e {
            TurnError::Aborted { .. } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "turn_aborted",
                e.to_string(),
            ),
        })?;

    Ok(Json(ChatResponse {
        response: reply.content,
        session_id: reply.session_id.into(),
        timestamp: reply.timestamp,
        agent_type: reply.agent_type,
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub conversations: Vec<ConversationMessage>,
}

pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(state.config.history_limit)
        .min(state.config.max_history_limit);

    let conversations = state
        .log
        .recent_messages(&user_id, limit)
        .await
        .map_err(|e| {
            tracing::error!("Error getting conversation history for {user_id}: {e}");
            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                e.to_string(),
            )
        })?;

    Ok(Json(HistoryResponse { conversations }))
}

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ApiError;
use crate::state::AppState;

// GET /api/health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub reply: String,
    pub session_key: String,
}

// POST /api/owners/{owner}/flows/{flow_id}/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path((owner, flow_id)): Path<(String, String)>,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let session_key = body
        .session_key
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    debug!(owner = %owner, flow_id = %flow_id, session_key = %session_key, "Inbound message");
    let outcome = state
        .service
        .handle_message(&owner, &flow_id, &session_key, &body.message)
        .await?;

    if !outcome.actions.is_empty() {
        info!(flow_id = %flow_id, actions = outcome.actions.len(), "Run recorded actions");
    }

    Ok(Json(SendMessageResponse {
        reply: outcome.reply.to_wire(),
        session_key,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_key: String,
    pub last_node_id: Option<String>,
    pub last_message: Option<String>,
}

// GET /api/owners/{owner}/flows/{flow_id}/sessions/{key}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path((owner, flow_id, key)): Path<(String, String, String)>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .service
        .session(&owner, &flow_id, &key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", key)))?;

    Ok(Json(SessionView {
        last_node_id: session.resume.awaiting().map(str::to_string),
        last_message: session.last_message,
        session_key: session.session_key,
    }))
}

// DELETE /api/owners/{owner}/flows/{flow_id}/sessions/{key}
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path((owner, flow_id, key)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    if state.service.reset_session(&owner, &flow_id, &key).await? {
        info!(flow_id = %flow_id, session_key = %key, "Session reset");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Session not found: {}", key)))
    }
}

use super::state::AppState;
use crate::session::{SelectionInfo, SessionError, SessionState};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    /// Optional source language code (e.g. "pt-BR")
    pub source_lang: Option<String>,

    /// Optional target language code (e.g. "en-US")
    pub target_lang: Option<String>,

    /// Optional voice id (e.g. "Kore")
    pub voice_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub voice_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: SessionState,
    pub speaking: bool,
    pub usage_seconds: u64,
    pub usage_locked: bool,
    pub selection: SelectionInfo,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "voicebridge"
    }))
}

/// POST /session/start
/// Start the live translation session, optionally setting the selection
/// first. The body may be empty.
pub async fn start_session(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let req: StartSessionRequest = if body.is_empty() {
        StartSessionRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid request body: {e}"),
                );
            }
        }
    };

    if req.source_lang.is_some() || req.target_lang.is_some() || req.voice_id.is_some() {
        if let Err(e) = state
            .controller
            .update_selection(
                req.source_lang.as_deref(),
                req.target_lang.as_deref(),
                req.voice_id.as_deref(),
            )
            .await
        {
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    }

    info!("starting translation session");
    match state.controller.start(None).await {
        Ok(()) => (
            StatusCode::OK,
            Json(SessionResponse {
                state: state.controller.state(),
                message: "session started".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "session start failed");
            let status = match e {
                SessionError::UsageLocked => StatusCode::PAYMENT_REQUIRED,
                SessionError::MicPermissionDenied(_) => StatusCode::FORBIDDEN,
                SessionError::OpenFailure(_) => StatusCode::BAD_GATEWAY,
            };
            error_response(status, e.to_string())
        }
    }
}

/// POST /session/stop
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("stopping translation session");
    state.controller.stop().await;
    Json(SessionResponse {
        state: state.controller.state(),
        message: "session stopped".to_string(),
    })
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        state: state.controller.state(),
        speaking: state.controller.is_speaking(),
        usage_seconds: state.controller.usage_seconds(),
        usage_locked: state.controller.usage_locked(),
        selection: state.controller.selection_info(),
    })
}

/// GET /session/transcript
/// Current in-flight transcript pair (empty strings between turns)
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.partial_transcript())
}

/// GET /session/history
/// Finalized translation records, oldest first
pub async fn get_history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.history())
}

/// PUT /session/selection
/// Update languages and/or voice. A live session restarts with the new
/// selection.
pub async fn update_selection(
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    let req: SelectionRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"));
        }
    };

    match state
        .controller
        .update_selection(
            req.source_lang.as_deref(),
            req.target_lang.as_deref(),
            req.voice_id.as_deref(),
        )
        .await
    {
        Ok(()) => Json(state.controller.selection_info()).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

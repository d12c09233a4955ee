use super::state::AppState;
use crate::error::SessionError;
use crate::sales::{AssistantProfile, AssistantTone, VoiceName};
use crate::session::{SessionState, SessionStats, TranscriptSegment};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Per-session overrides of the configured assistant profile
#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    pub company_name: Option<String>,
    pub voice: Option<VoiceName>,
    pub tone: Option<AssistantTone>,
}

impl StartSessionRequest {
    fn apply(self, mut profile: AssistantProfile) -> AssistantProfile {
        if let Some(company_name) = self.company_name {
            profile.company_name = company_name;
        }
        if let Some(voice) = self.voice {
            profile.voice = voice;
        }
        if let Some(tone) = self.tone {
            profile.tone = tone;
        }
        profile
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopSessionResponse {
    pub session_id: Uuid,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> axum::response::Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn start_failure_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::PermissionDenied(_) | SessionError::OutputDevice(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::ChannelOpen(_) => StatusCode::BAD_GATEWAY,
        SessionError::ConnectTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions/start
/// Start a new voice session
pub async fn start_session(
    State(state): State<AppState>,
    request: Option<Json<StartSessionRequest>>,
) -> impl IntoResponse {
    let request = request.map(|Json(req)| req).unwrap_or_default();
    let profile = request.apply(state.controller.default_profile().clone());

    info!("Starting voice session for {}", profile.company_name);

    match state.controller.start_session(Some(profile)).await {
        Ok(handle) => {
            info!("Voice session {} started", handle.id());
            (
                StatusCode::OK,
                Json(StartSessionResponse {
                    session_id: handle.id(),
                    state: handle.state(),
                    message: "Voice session started".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to start voice session: {}", e);
            error_response(
                start_failure_status(&e),
                format!("Failed to start voice session: {}", e),
            )
        }
    }
}

/// POST /sessions/stop/:session_id
/// Stop a voice session
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    info!("Stopping voice session: {}", session_id);

    match state.controller.stop_session(session_id).await {
        Some(stats) => (
            StatusCode::OK,
            Json(StopSessionResponse {
                session_id,
                message: "Voice session stopped".to_string(),
                stats,
            }),
        )
            .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

/// GET /sessions
/// List registered sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<SessionStats> = state.controller.active_sessions().await;
    (StatusCode::OK, Json(sessions))
}

/// GET /sessions/:session_id/status
/// Get stats of a voice session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.controller.session_stats(session_id).await {
        Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

/// GET /sessions/:session_id/transcript
/// Get transcript for a session (accumulated so far)
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.controller.transcript(session_id).await {
        Some(transcript) => {
            let transcript: Vec<TranscriptSegment> = transcript;
            (StatusCode::OK, Json(transcript)).into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

//! HTTP API for controlling voice sessions
//!
//! - POST /sessions/start - Start a new session
//! - POST /sessions/stop/:id - Stop a session
//! - GET /sessions - List registered sessions
//! - GET /sessions/:id/status - Query session stats
//! - GET /sessions/:id/transcript - Get accumulated transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{StartSessionRequest, StartSessionResponse, StopSessionResponse};
pub use routes::create_router;
pub use state::AppState;

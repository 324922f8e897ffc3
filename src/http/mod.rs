//! HTTP API for external control (desktop shell / web frontend)
//!
//! - POST /session/start - Start the translation session
//! - POST /session/stop - Stop the translation session
//! - GET /session/status - Session state, speaking flag, usage
//! - GET /session/transcript - In-flight transcript pair
//! - GET /session/history - Finalized translation records
//! - PUT /session/selection - Change languages or voice
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

//! Live HLS transcoding sessions.
//!
//! Each playback request gets its own ffmpeg process writing an HLS
//! manifest and MPEG-TS segments into a private working directory. The
//! [`SessionRegistry`] bounds how many run at once, the handlers wait
//! (boundedly) for output to appear, and the sweeper reclaims sessions that
//! went idle or failed.
//!
//! # Routes
//!
//! - `GET /stream/start?path&profile&audio&start&sub&replace` - Start a session
//! - `GET /stream/profiles` - Configured encode profiles
//! - `GET /stream/sessions` - Active sessions
//! - `GET /stream/{id}/playlist.m3u8` - Media playlist (stub until ready)
//! - `GET /stream/{id}/{segment}` - MPEG-TS segment
//! - `DELETE /stream/{id}` - Stop a session

pub mod error;
pub mod handlers;
pub mod manifest;
pub mod poll;
pub mod registry;
pub mod session;
pub mod sweeper;

pub use error::StreamError;
pub use registry::SessionRegistry;
pub use session::{Session, SessionParams, SessionStatus, SessionSummary};
pub use sweeper::{start_sweeper, sweep};

use crate::server::AppContext;
use axum::{
    extract::State,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;

/// Create the streaming router.
pub fn stream_router() -> Router<AppContext> {
    Router::new()
        .route("/start", get(handlers::start_stream))
        .route("/profiles", get(list_profiles))
        .route("/sessions", get(list_sessions))
        .route("/:session_id", delete(handlers::stop_stream))
        .route("/:session_id/playlist.m3u8", get(handlers::playlist))
        .route("/:session_id/:segment", get(handlers::segment))
}

#[derive(Debug, Serialize)]
pub(crate) struct ProfileEntry {
    name: String,
    passthrough: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_bitrate: Option<String>,
}

pub(crate) fn profile_entries(ctx: &AppContext) -> Vec<ProfileEntry> {
    ctx.profiles
        .profiles()
        .iter()
        .map(|p| {
            let passthrough = p.is_passthrough();
            ProfileEntry {
                name: p.name.clone(),
                passthrough,
                width: (!passthrough).then(|| p.target_width()),
                video_bitrate: (!passthrough).then(|| p.target_video_bitrate().to_string()),
                audio_bitrate: (!passthrough).then(|| p.target_audio_bitrate().to_string()),
            }
        })
        .collect()
}

async fn list_profiles(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "profiles": profile_entries(&ctx) }))
}

async fn list_sessions(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "max_sessions": ctx.registry.max_sessions(),
        "sessions": ctx.registry.summaries(),
    }))
}

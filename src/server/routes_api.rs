use crate::server::AppContext;
use crate::streaming::{self, StreamError};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use kino_common::paths::resolve_media_file;
use serde::Deserialize;

pub fn api_routes() -> Router<AppContext> {
    Router::new().route("/media/info", get(media_info))
}

#[derive(Debug, Deserialize)]
struct MediaInfoQuery {
    #[serde(default)]
    path: String,
}

/// Probe a file under the media root, alongside the profiles it can be
/// played at.
async fn media_info(
    State(ctx): State<AppContext>,
    Query(query): Query<MediaInfoQuery>,
) -> Result<Json<serde_json::Value>, StreamError> {
    if query.path.trim().is_empty() {
        return Err(StreamError::invalid_input("missing 'path'"));
    }
    let source = resolve_media_file(&ctx.config.media.root, &query.path)?;

    let info = ctx.prober.probe(&source).await.map_err(|e| match e {
        kino_av::Error::FileNotFound { path } => {
            StreamError::not_found(path.display().to_string())
        }
        e => {
            tracing::warn!(source = %source.display(), error = %e, "Probe failed");
            StreamError::ProbeFailed(e.to_string())
        }
    })?;

    Ok(Json(serde_json::json!({
        "duration": info.duration,
        "video_tracks": info.video_tracks,
        "audio_tracks": info.audio_tracks,
        "subtitle_tracks": info.subtitle_tracks,
        "profiles": streaming::profile_entries(&ctx),
    })))
}

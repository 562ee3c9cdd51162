//! HTTP handlers for live HLS sessions.
//!
//! - `GET /api/stream/start` admits and launches a session
//! - `GET /api/stream/{id}/playlist.m3u8` serves the manifest (or a stub)
//! - `GET /api/stream/{id}/{segment}` serves a finished segment
//! - `DELETE /api/stream/{id}` stops a session

use super::error::StreamError;
use super::manifest::{
    is_servable_name, playlist_url, stub_manifest, MANIFEST_CONTENT_TYPE, SEGMENT_CONTENT_TYPE,
};
use super::poll::{poll_until, PollOutcome, Probe};
use super::registry::{kill_all, Admitted};
use super::session::{Session, SessionParams};
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use kino_av::{keyframe, EncodePlan, MediaInfo, PlanRequest, SubtitleDelivery};
use kino_common::paths::resolve_media_file;
use kino_common::SessionId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// Profile used when the client does not name one.
const DEFAULT_PROFILE: &str = "720p";

/// Seek offsets closer than this to the request are not reported back.
const START_EPSILON: f64 = 0.001;

/// Raw query of a start request. Every field is parsed by hand so that bad
/// input gets the same JSON error body as every other failure.
#[derive(Debug, Default, Deserialize)]
pub struct StartQuery {
    pub path: Option<String>,
    pub profile: Option<String>,
    pub audio: Option<String>,
    pub start: Option<String>,
    pub sub: Option<String>,
    pub replace: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct StartRequest {
    path: String,
    profile: String,
    audio: Option<u32>,
    start: f64,
    subtitle: Option<u32>,
    replace: Option<SessionId>,
}

impl StartQuery {
    fn parse(self) -> Result<StartRequest, StreamError> {
        let path = non_empty(self.path)
            .ok_or_else(|| StreamError::invalid_input("missing 'path'"))?;

        let start = match non_empty(self.start) {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| StreamError::invalid_input(format!("invalid 'start': {raw}")))?,
            None => 0.0,
        };

        let replace = match non_empty(self.replace) {
            Some(raw) => Some(
                raw.parse::<SessionId>()
                    .map_err(|_| StreamError::invalid_input(format!("invalid 'replace': {raw}")))?,
            ),
            None => None,
        };

        Ok(StartRequest {
            path,
            profile: non_empty(self.profile).unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            audio: parse_index("audio", self.audio)?,
            start,
            subtitle: parse_index("sub", self.sub)?,
            replace,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_index(name: &str, value: Option<String>) -> Result<Option<u32>, StreamError> {
    non_empty(value)
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|_| StreamError::invalid_input(format!("invalid '{name}': {raw}")))
        })
        .transpose()
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub session_id: SessionId,
    pub playlist_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_info: Option<MediaInfo>,
    /// Where playback actually begins, when that differs from the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_start: Option<f64>,
    /// How the requested subtitle track is delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<SubtitleDelivery>,
}

/// What a successful launch learned about the source.
struct Launched {
    media: Option<MediaInfo>,
    resolved_start: f64,
    subtitles: SubtitleDelivery,
}

/// Admit and launch a new session.
pub async fn start_stream(
    State(ctx): State<AppContext>,
    Query(query): Query<StartQuery>,
) -> Result<Json<StartResponse>, StreamError> {
    let request = query.parse()?;
    let source = resolve_media_file(&ctx.config.media.root, &request.path)?;
    let profile = ctx.profiles.resolve(&request.profile);

    let session = Arc::new(Session::new(
        SessionParams {
            source,
            profile,
            audio_index: request.audio,
            subtitle_index: request.subtitle,
            start: request.start,
        },
        &ctx.tmp_dir,
        ctx.config.transcoding.kill_grace(),
    ));
    let id = session.id();

    let admitted = ctx.registry.admit(session.clone(), request.replace.as_ref())?;

    // The session holds a slot from here on; launch or rollback finishes on
    // its own task even if the client goes away.
    let launched = tokio::spawn(launch_admitted(ctx.clone(), session, admitted))
        .await
        .map_err(|e| StreamError::LaunchFailed(format!("launch task failed: {e}")))??;

    let actual_start = ((launched.resolved_start - request.start).abs() > START_EPSILON)
        .then_some(launched.resolved_start);
    let subtitles = (launched.subtitles != SubtitleDelivery::None).then_some(launched.subtitles);

    Ok(Json(StartResponse {
        session_id: id,
        playlist_url: playlist_url(&id.to_string()),
        media_info: launched.media,
        actual_start,
        subtitles,
    }))
}

/// Kill whatever the admission displaced, then launch. A failed launch
/// removes and kills the new session.
async fn launch_admitted(
    ctx: AppContext,
    session: Arc<Session>,
    admitted: Admitted,
) -> Result<Launched, StreamError> {
    let id = session.id();
    if let Some(replaced) = &admitted.replaced {
        tracing::info!(
            session_id = %id,
            replaced = %replaced.id(),
            "Replacing session"
        );
    }
    if !admitted.failed.is_empty() {
        tracing::info!(
            session_id = %id,
            evicted = admitted.failed.len(),
            "Evicting failed sessions"
        );
    }
    kill_all(admitted.into_sessions()).await;

    match launch(&ctx, &session).await {
        Ok(launched) => Ok(launched),
        Err(e) => {
            let log = session.failure_log().await;
            tracing::error!(
                session_id = %id,
                error = %e,
                %log,
                "Transcoder launch failed"
            );
            if let Some(session) = ctx.registry.pop(&id) {
                session.kill().await;
            }
            Err(e)
        }
    }
}

/// Plan and spawn the transcoder, probing and resolving the seek point
/// alongside the spawn wherever the plan does not depend on them.
async fn launch(ctx: &AppContext, session: &Session) -> Result<Launched, StreamError> {
    let probe = async {
        match ctx.prober.probe(session.source()).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(session_id = %session.id(), error = %e, "Probe failed");
                None
            }
        }
    };

    let (media, plan, spawned, resolved_start) =
        if EncodePlan::needs_probe(session.profile(), session.subtitle_index()) {
            let media = probe.await;
            let plan = build_plan(ctx, session, media.as_ref());
            let (spawned, resolved) =
                tokio::join!(spawn(ctx, session, &plan), resolve_start(ctx, session, &plan));
            (media, plan, spawned, resolved)
        } else {
            let plan = build_plan(ctx, session, None);
            let (media, spawned, resolved) = tokio::join!(
                probe,
                spawn(ctx, session, &plan),
                resolve_start(ctx, session, &plan)
            );
            (media, plan, spawned, resolved)
        };

    spawned?;
    session.set_resolved_start(resolved_start);

    Ok(Launched {
        media,
        resolved_start,
        subtitles: plan.subtitles,
    })
}

fn build_plan(ctx: &AppContext, session: &Session, media: Option<&MediaInfo>) -> EncodePlan {
    let transcoding = &ctx.config.transcoding;
    let plan = EncodePlan::build(&PlanRequest {
        source: session.source(),
        profile: session.profile(),
        media,
        hardware: transcoding.hardware,
        vaapi_device: &transcoding.vaapi_device,
        audio_index: session.audio_index(),
        subtitle_index: session.subtitle_index(),
        start: session.requested_start(),
        segment_duration: transcoding.segment_duration,
    });

    tracing::debug!(
        session_id = %session.id(),
        video = ?plan.video,
        audio = ?plan.audio,
        subtitles = ?plan.subtitles,
        hardware = %plan.hardware,
        "Encode plan"
    );
    plan
}

async fn spawn(ctx: &AppContext, session: &Session, plan: &EncodePlan) -> Result<(), StreamError> {
    let args = plan.ffmpeg_args(session.dir());
    session.start(&ctx.tools.ffmpeg, &args).await
}

/// Stream copies start on the keyframe at or before the requested time;
/// re-encodes start exactly where asked.
async fn resolve_start(ctx: &AppContext, session: &Session, plan: &EncodePlan) -> f64 {
    let requested = session.requested_start();
    if plan.requires_reencode() || requested <= 0.0 {
        return requested;
    }
    keyframe::resolve_start(ctx.prober.as_ref(), session.source(), requested).await
}

fn lookup(ctx: &AppContext, id: &str) -> Result<Arc<Session>, StreamError> {
    id.parse::<SessionId>()
        .ok()
        .and_then(|id| ctx.registry.get(&id))
        .filter(|session| !session.is_terminated())
        .ok_or_else(|| StreamError::not_found(format!("session {id}")))
}

/// Serve the session manifest, or a stub while no segment exists yet.
pub async fn playlist(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, StreamError> {
    let session = lookup(&ctx, &id)?;
    session.touch();

    let transcoding = &ctx.config.transcoding;
    let outcome = {
        let session = &session;
        poll_until(
            transcoding.poll_interval(),
            transcoding.playlist_wait(),
            move || async move {
                if session.is_terminated() {
                    Probe::Failed
                } else if session.has_segments() {
                    Probe::Ready(())
                } else if session.has_failed() {
                    Probe::Failed
                } else {
                    Probe::Pending
                }
            },
        )
        .await
    };

    let body = match outcome {
        PollOutcome::Ready(()) => match tokio::fs::read_to_string(session.manifest_path()).await {
            Ok(manifest) => manifest,
            Err(_) if session.is_terminated() => {
                return Err(StreamError::not_found(format!("session {id}")))
            }
            Err(e) => return Err(e.into()),
        },
        PollOutcome::Failed if session.is_terminated() => {
            return Err(StreamError::not_found(format!("session {id}")));
        }
        PollOutcome::Failed => return Err(runtime_failure(&session).await),
        PollOutcome::TimedOut => {
            tracing::debug!(session_id = %session.id(), "No segments yet, serving stub manifest");
            stub_manifest(transcoding.segment_duration)
        }
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// Serve a segment once the transcoder has finished writing it.
pub async fn segment(
    State(ctx): State<AppContext>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, StreamError> {
    let session = lookup(&ctx, &id)?;
    if !is_servable_name(&name) {
        return Err(StreamError::invalid_input(format!("invalid segment name: {name}")));
    }
    if !name.ends_with(".ts") {
        return Err(StreamError::not_found(format!("segment {name}")));
    }
    session.touch();

    let path = session.dir().join(&name);
    let transcoding = &ctx.config.transcoding;

    // Ready once the size holds still across two checks, or as soon as it is
    // non-empty after the transcoder has exited.
    let outcome = {
        let session = &session;
        let path = &path;
        // Zero until a non-empty size has been seen
        let last_size = &AtomicU64::new(0);
        poll_until(
            transcoding.poll_interval(),
            transcoding.segment_wait(),
            move || async move {
                if session.is_terminated() {
                    return Probe::Failed;
                }
                let exited = session.exit_status().is_some();
                match tokio::fs::metadata(path).await {
                    Ok(meta) if meta.len() > 0 => {
                        let size = meta.len();
                        if last_size.swap(size, Ordering::Relaxed) == size || exited {
                            Probe::Ready(size)
                        } else {
                            Probe::Pending
                        }
                    }
                    _ if exited => Probe::Failed,
                    _ => {
                        last_size.store(0, Ordering::Relaxed);
                        Probe::Pending
                    }
                }
            },
        )
        .await
    };

    let size = match outcome {
        PollOutcome::Ready(size) => size,
        PollOutcome::Failed if session.has_failed() => {
            return Err(runtime_failure(&session).await)
        }
        PollOutcome::Failed => return Err(StreamError::not_found(format!("segment {name}"))),
        PollOutcome::TimedOut => return Err(StreamError::DeliveryTimeout(name)),
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StreamError::not_found(format!("segment {name}")))
        }
        Err(e) => return Err(e.into()),
    };
    session.touch();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE.to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn runtime_failure(session: &Session) -> StreamError {
    let status = session
        .exit_status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown exit status".to_string());
    let log = session.failure_log().await;
    tracing::error!(
        session_id = %session.id(),
        source = %session.source().display(),
        %status,
        %log,
        "Transcoder failed before producing output"
    );
    StreamError::RuntimeFailed(status)
}

/// Stop a session and delete its output.
pub async fn stop_stream(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StreamError> {
    let popped = match id.parse::<SessionId>() {
        Ok(session_id) => ctx.registry.pop_and_kill(&session_id).await,
        Err(_) => false,
    };

    if !popped {
        return Err(StreamError::not_found(format!("session {id}")));
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn query(pairs: &[(&str, &str)]) -> StartQuery {
        let mut q = StartQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "path" => q.path = value,
                "profile" => q.profile = value,
                "audio" => q.audio = value,
                "start" => q.start = value,
                "sub" => q.sub = value,
                "replace" => q.replace = value,
                _ => unreachable!(),
            }
        }
        q
    }

    #[test]
    fn test_parse_defaults() {
        let request = query(&[("path", "movies/a.mkv")]).parse().unwrap();
        assert_eq!(request.path, "movies/a.mkv");
        assert_eq!(request.profile, DEFAULT_PROFILE);
        assert_eq!(request.audio, None);
        assert_eq!(request.subtitle, None);
        assert_eq!(request.start, 0.0);
        assert_eq!(request.replace, None);
    }

    #[test]
    fn test_parse_full() {
        let id = SessionId::new();
        let id_str = id.to_string();
        let request = query(&[
            ("path", "a.mkv"),
            ("profile", "original"),
            ("audio", "2"),
            ("start", "93.5"),
            ("sub", "4"),
            ("replace", &id_str),
        ])
        .parse()
        .unwrap();

        assert_eq!(request.audio, Some(2));
        assert_eq!(request.subtitle, Some(4));
        assert_eq!(request.start, 93.5);
        assert_eq!(request.replace, Some(id));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_matches!(query(&[]).parse(), Err(StreamError::InvalidInput(_)));
        assert_matches!(
            query(&[("path", "  ")]).parse(),
            Err(StreamError::InvalidInput(_))
        );
        assert_matches!(
            query(&[("path", "a.mkv"), ("start", "-3")]).parse(),
            Err(StreamError::InvalidInput(_))
        );
        assert_matches!(
            query(&[("path", "a.mkv"), ("start", "NaN")]).parse(),
            Err(StreamError::InvalidInput(_))
        );
        assert_matches!(
            query(&[("path", "a.mkv"), ("audio", "one")]).parse(),
            Err(StreamError::InvalidInput(_))
        );
        assert_matches!(
            query(&[("path", "a.mkv"), ("replace", "not-a-uuid")]).parse(),
            Err(StreamError::InvalidInput(_))
        );
    }

    #[test]
    fn test_empty_optional_params_are_ignored() {
        let request = query(&[("path", "a.mkv"), ("sub", ""), ("audio", "")])
            .parse()
            .unwrap();
        assert_eq!(request.subtitle, None);
        assert_eq!(request.audio, None);
    }
}

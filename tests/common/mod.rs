//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which lays out a temporary media root, points
//! the transcoder at a shell script standing in for ffmpeg, and builds a
//! full [`AppContext`] around a [`FakeProber`]. Requests go through the real
//! router with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use http_body_util::BodyExt;
use kino::config::Config;
use kino::server::{create_router, AppContext};
use kino_av::{AudioTrack, MediaInfo, Prober, SubtitleTrack, ToolPaths, VideoTrack};
use tempfile::TempDir;
use tower::ServiceExt;

/// Writes one finished segment and a manifest listing it, then keeps running.
pub const PRODUCING_FFMPEG: &str = r#"
printf '%s\n' "$@" > "$dir/args.txt"
printf 'segment-zero' > "$dir/segment_0.ts"
printf '#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.000000,\nsegment_0.ts\n' > "$dir/playlist.m3u8"
exec sleep 30
"#;

/// Never produces output.
pub const IDLE_FFMPEG: &str = r#"
printf '%s\n' "$@" > "$dir/args.txt"
exec sleep 30
"#;

/// Exits with an error before writing anything.
pub const FAILING_FFMPEG: &str = r#"
echo "Invalid data found when processing input" >&2
exit 1
"#;

/// Writes its first segment in two chunks, a short pause apart.
pub const CHUNKED_FFMPEG: &str = r#"
printf 'first-half-' > "$dir/segment_0.ts"
sleep 0.05
printf 'second-half' >> "$dir/segment_0.ts"
printf '#EXTM3U\n#EXTINF:4.000000,\nsegment_0.ts\n' > "$dir/playlist.m3u8"
exec sleep 30
"#;

/// Ignores SIGTERM, so stopping it takes the whole kill grace period.
pub const STUBBORN_FFMPEG: &str = r#"
trap '' TERM
printf '%s\n' "$@" > "$dir/args.txt"
while :; do sleep 1; done
"#;

/// Writes one segment and exits cleanly, like a finished short file.
pub const FINISHING_FFMPEG: &str = r#"
printf 'tail' > "$dir/segment_0.ts"
printf '#EXTM3U\n#EXTINF:2.000000,\nsegment_0.ts\n#EXT-X-ENDLIST\n' > "$dir/playlist.m3u8"
exit 0
"#;

/// Prober returning canned results.
#[derive(Debug, Clone, Default)]
pub struct FakeProber {
    pub info: MediaInfo,
    pub keyframes: Vec<f64>,
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, path: &Path) -> kino_av::Result<MediaInfo> {
        if !path.exists() {
            return Err(kino_av::Error::file_not_found(path));
        }
        Ok(self.info.clone())
    }

    async fn keyframes(&self, _path: &Path, from: f64, to: f64) -> kino_av::Result<Vec<f64>> {
        Ok(self
            .keyframes
            .iter()
            .copied()
            .filter(|t| *t >= from && *t <= to)
            .collect())
    }
}

/// Media info of a plain h264/aac file with one text subtitle.
pub fn h264_info() -> MediaInfo {
    media_info("h264", "aac")
}

pub fn media_info(video_codec: &str, audio_codec: &str) -> MediaInfo {
    MediaInfo {
        duration: 600.0,
        bit_rate: Some(5_000_000),
        video_tracks: vec![VideoTrack {
            index: 0,
            codec: video_codec.to_string(),
            width: 1920,
            height: 1080,
            bit_rate: Some(4_500_000),
            lang: "und".into(),
            title: String::new(),
        }],
        audio_tracks: vec![AudioTrack {
            index: 1,
            codec: audio_codec.to_string(),
            channels: 6,
            lang: "eng".into(),
            title: "Surround".into(),
        }],
        subtitle_tracks: vec![SubtitleTrack {
            index: 2,
            codec: "subrip".into(),
            lang: "eng".into(),
            title: String::new(),
            bitmap: false,
        }],
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: TempDir,
}

impl TestHarness {
    /// Harness whose transcoder runs `script` with at most `max_sessions`
    /// concurrent sessions.
    pub fn new(script: &str, max_sessions: usize) -> Self {
        Self::with_prober(script, max_sessions, FakeProber {
            info: h264_info(),
            keyframes: vec![0.0, 10.0, 20.0, 30.0],
        })
    }

    pub fn with_prober(script: &str, max_sessions: usize, prober: FakeProber) -> Self {
        Self::build(script, prober, |config| {
            config.transcoding.max_sessions = max_sessions;
        })
    }

    /// Harness with test-speed timings, adjusted by `tweak`.
    pub fn build(script: &str, prober: FakeProber, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir_all(media.join("movies")).unwrap();
        std::fs::write(media.join("movies/a.mkv"), b"not really a movie").unwrap();
        std::fs::write(media.join("movies/b.mp4"), b"not really a movie").unwrap();
        std::fs::write(dir.path().join("secret.mkv"), b"outside the root").unwrap();

        let ffmpeg = write_script(dir.path(), "ffmpeg", script);

        let mut config = Config::default();
        config.media.root = media;
        let transcoding = &mut config.transcoding;
        transcoding.tmp_dir = dir.path().join("sessions");
        transcoding.poll_interval_ms = 20;
        transcoding.playlist_wait_ms = 400;
        transcoding.segment_wait_secs = 2;
        transcoding.kill_grace_secs = 1;
        tweak(&mut config);

        let tools = ToolPaths {
            ffmpeg,
            ffprobe: PathBuf::from("ffprobe"),
        };
        let ctx = AppContext::new(config, tools, Arc::new(prober)).unwrap();

        Self { ctx, dir }
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone(), None)
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request("GET", uri).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.request("DELETE", uri).await
    }

    async fn request(&self, method: &str, uri: &str) -> Response<Body> {
        self.router()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Start a session and return its id.
    pub async fn start(&self, query: &str) -> String {
        let resp = self.get(&format!("/api/stream/start?{query}")).await;
        assert_eq!(resp.status(), 200, "start failed for {query}");
        let json = body_to_json(resp.into_body()).await;
        json["session_id"].as_str().unwrap().to_string()
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.ctx.tmp_dir.join(id)
    }

    /// Wait for the fake transcoder to write `name` into a session directory.
    pub async fn wait_for_file(&self, id: &str, name: &str) -> PathBuf {
        let path = self.session_dir(id).join(name);
        for _ in 0..200 {
            if path.exists() {
                return path;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never appeared", path.display());
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        // Leave no fake transcoders behind
        for session in self.ctx.registry.snapshot() {
            if let Some(session) = self.ctx.registry.pop(&session.id()) {
                let _ = std::fs::remove_dir_all(session.dir());
            }
        }
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\nfor last; do :; done\ndir=$(dirname \"$last\")\n{body}"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub async fn body_to_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_to_json(body: Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

use kino_common::{HardwareAccel, Profile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub transcoding: TranscodingConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Frontend build to serve at `/`, with SPA fallback to `index.html`
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    /// Every client-supplied path is resolved under this directory
    #[serde(default = "default_media_root")]
    pub root: PathBuf,
}

fn default_media_root() -> PathBuf {
    PathBuf::from("/media")
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: default_media_root(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodingConfig {
    #[serde(default)]
    pub hardware: HardwareAccel,

    /// DRM render node used when `hardware = "vaapi"`
    #[serde(default = "default_vaapi_device")]
    pub vaapi_device: String,

    /// Target HLS segment length in seconds
    #[serde(default = "default_segment_duration")]
    pub segment_duration: u32,

    /// Ceiling on concurrently registered sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Parent of the per-session working directories
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Sessions not read from for this long are reclaimed (default: 300)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Time between SIGTERM and SIGKILL when stopping ffmpeg
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long a playlist request waits for the first segment before
    /// answering with an empty manifest
    #[serde(default = "default_playlist_wait")]
    pub playlist_wait_ms: u64,

    /// How long a segment request waits for the file to be complete
    #[serde(default = "default_segment_wait")]
    pub segment_wait_secs: u64,

    #[serde(default = "default_profiles")]
    pub profiles: Vec<Profile>,
}

fn default_vaapi_device() -> String {
    "/dev/dri/renderD128".to_string()
}

fn default_segment_duration() -> u32 {
    4
}

fn default_max_sessions() -> usize {
    4
}

fn default_tmp_dir() -> PathBuf {
    std::env::temp_dir().join("kino")
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_kill_grace() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    100
}

fn default_playlist_wait() -> u64 {
    15_000
}

fn default_segment_wait() -> u64 {
    30
}

fn default_profiles() -> Vec<Profile> {
    let fixed = |name: &str, width, height, video: &str, audio: &str| Profile {
        name: name.to_string(),
        width: Some(width),
        height: Some(height),
        video_bitrate: Some(video.to_string()),
        audio_bitrate: Some(audio.to_string()),
    };

    vec![
        Profile::passthrough(),
        fixed("1080p", 1920, 1080, "6M", "192k"),
        fixed("720p", 1280, 720, "3M", "128k"),
        fixed("480p", 854, 480, "1500k", "128k"),
    ]
}

impl Default for TranscodingConfig {
    fn default() -> Self {
        Self {
            hardware: HardwareAccel::default(),
            vaapi_device: default_vaapi_device(),
            segment_duration: default_segment_duration(),
            max_sessions: default_max_sessions(),
            tmp_dir: default_tmp_dir(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            kill_grace_secs: default_kill_grace(),
            poll_interval_ms: default_poll_interval(),
            playlist_wait_ms: default_playlist_wait(),
            segment_wait_secs: default_segment_wait(),
            profiles: default_profiles(),
        }
    }
}

impl TranscodingConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn playlist_wait(&self) -> Duration {
        Duration::from_millis(self.playlist_wait_ms)
    }

    pub fn segment_wait(&self) -> Duration {
        Duration::from_secs(self.segment_wait_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

/// Named encode targets, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ProfileCatalog {
    profiles: Vec<Profile>,
}

impl ProfileCatalog {
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self { profiles }
    }

    /// Look up a profile by name.
    ///
    /// Unknown names fall back to the first configured profile; an empty
    /// catalog resolves everything to pass-through.
    pub fn resolve(&self, name: &str) -> Profile {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.profiles.first())
            .cloned()
            .unwrap_or_else(Profile::passthrough)
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }
}

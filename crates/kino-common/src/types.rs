//! Core type definitions for encode profiles and hardware backends.
//!
//! Enums serialize in lowercase to match the configuration file format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Profile name meaning "copy the source streams when the player can take them".
pub const PASSTHROUGH_PROFILE: &str = "original";

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_VIDEO_BITRATE: &str = "6M";
const DEFAULT_AUDIO_BITRATE: &str = "192k";

/// A named encode target loaded from configuration.
///
/// Bitrates use ffmpeg notation (`"6M"`, `"192k"`) and are passed through to
/// the encoder verbatim. Missing fields fall back to 1080p at 6 Mbit/s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
}

impl Profile {
    /// The pass-through sentinel profile.
    #[must_use]
    pub fn passthrough() -> Self {
        Self {
            name: PASSTHROUGH_PROFILE.to_string(),
            width: None,
            height: None,
            video_bitrate: None,
            audio_bitrate: None,
        }
    }

    /// Whether this profile asks for the source streams unmodified.
    pub fn is_passthrough(&self) -> bool {
        self.name == PASSTHROUGH_PROFILE
    }

    pub fn target_width(&self) -> u32 {
        self.width.unwrap_or(DEFAULT_WIDTH)
    }

    pub fn target_height(&self) -> u32 {
        self.height.unwrap_or(DEFAULT_HEIGHT)
    }

    pub fn target_video_bitrate(&self) -> &str {
        self.video_bitrate.as_deref().unwrap_or(DEFAULT_VIDEO_BITRATE)
    }

    pub fn target_audio_bitrate(&self) -> &str {
        self.audio_bitrate.as_deref().unwrap_or(DEFAULT_AUDIO_BITRATE)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Hardware encode backend.
///
/// Only changes the concrete filter and encoder names ffmpeg is given; the
/// decision of what resolution and bitrate to produce is backend-agnostic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareAccel {
    /// CPU encoding with libx264.
    #[default]
    Software,
    /// VA-API (Intel/AMD on Linux).
    Vaapi,
    /// Intel Quick Sync Video.
    Qsv,
}

impl fmt::Display for HardwareAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Software => write!(f, "software"),
            Self::Vaapi => write!(f, "vaapi"),
            Self::Qsv => write!(f, "qsv"),
        }
    }
}

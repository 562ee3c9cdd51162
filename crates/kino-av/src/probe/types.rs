//! Media information types.

use serde::{Deserialize, Serialize};

/// Subtitle codecs that are images rather than text.
///
/// These cannot be extracted as a text track and can only be burned in with
/// an overlay.
pub const BITMAP_SUBTITLE_CODECS: &[&str] = &["hdmv_pgs_subtitle", "dvd_subtitle", "dvb_subtitle"];

/// Information about a media file.
///
/// Stream `index` fields are absolute stream indices within the container,
/// the same numbering ffmpeg's `-map 0:N` uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds (0 when unknown).
    pub duration: f64,
    /// Container bitrate in bits per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u64>,
    /// Video tracks in the file.
    pub video_tracks: Vec<VideoTrack>,
    /// Audio tracks in the file.
    pub audio_tracks: Vec<AudioTrack>,
    /// Subtitle tracks in the file.
    pub subtitle_tracks: Vec<SubtitleTrack>,
}

/// Information about a video track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoTrack {
    pub index: u32,
    /// Codec name as ffprobe reports it (e.g., "h264", "hevc").
    pub codec: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u64>,
    pub lang: String,
    pub title: String,
}

/// Information about an audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub index: u32,
    pub codec: String,
    pub channels: u32,
    pub lang: String,
    pub title: String,
}

/// Information about a subtitle track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub index: u32,
    pub codec: String,
    pub lang: String,
    pub title: String,
    /// Image-based subtitle format, unsuitable for text extraction.
    pub bitmap: bool,
}

impl MediaInfo {
    /// Get the primary (first) video track.
    pub fn primary_video(&self) -> Option<&VideoTrack> {
        self.video_tracks.first()
    }

    /// Look up an audio track by absolute stream index.
    pub fn audio_track(&self, index: u32) -> Option<&AudioTrack> {
        self.audio_tracks.iter().find(|t| t.index == index)
    }

    /// Look up a subtitle track by absolute stream index, returning it along
    /// with its position among subtitle streams.
    pub fn subtitle_track(&self, index: u32) -> Option<(usize, &SubtitleTrack)> {
        self.subtitle_tracks
            .iter()
            .enumerate()
            .find(|(_, t)| t.index == index)
    }

    /// Best known bitrate of the primary video stream.
    ///
    /// Falls back to the container bitrate, which over-estimates slightly
    /// because it includes audio.
    pub fn video_bit_rate(&self) -> Option<u64> {
        self.primary_video()
            .and_then(|v| v.bit_rate)
            .or(self.bit_rate)
    }
}

//! FFprobe-based media probing.

use super::types::*;
use super::Prober;
use crate::{Error, Result, ToolCommand};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for a full stream probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a keyframe scan; keyframe lookups are best-effort.
const KEYFRAME_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
    title: Option<String>,
}

/// [`Prober`] backed by the ffprobe command-line tool.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }

        let output = ToolCommand::new(self.ffprobe.clone())
            .args(["-v", "quiet", "-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path.to_string_lossy())
            .timeout(PROBE_TIMEOUT)
            .execute()
            .await?;

        parse_ffprobe_json(&output.stdout)
    }

    async fn keyframes(&self, path: &Path, from: f64, to: f64) -> Result<Vec<f64>> {
        let output = ToolCommand::new(self.ffprobe.clone())
            .args(["-v", "error", "-select_streams", "v:0"])
            .arg("-read_intervals")
            .arg(format!("{from:.3}%{to:.3}"))
            .args(["-show_entries", "packet=pts_time,flags", "-of", "csv=p=0"])
            .arg(path.to_string_lossy())
            .timeout(KEYFRAME_SCAN_TIMEOUT)
            .execute()
            .await?;

        Ok(parse_keyframe_packets(&output.stdout))
    }
}

/// Parse `ffprobe -show_format -show_streams -print_format json` output.
pub fn parse_ffprobe_json(json: &str) -> Result<MediaInfo> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::parse_error("ffprobe", e.to_string()))?;

    let mut info = MediaInfo {
        duration: output
            .format
            .duration
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0),
        bit_rate: output.format.bit_rate.and_then(|s| s.parse().ok()),
        ..MediaInfo::default()
    };

    for stream in output.streams {
        let lang = stream.tags.language.unwrap_or_else(|| "und".to_string());
        let title = stream.tags.title.unwrap_or_default();
        let codec = stream.codec_name.unwrap_or_default();

        match stream.codec_type.as_deref() {
            Some("video") => info.video_tracks.push(VideoTrack {
                index: stream.index,
                codec,
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
                bit_rate: stream.bit_rate.and_then(|s| s.parse().ok()),
                lang,
                title,
            }),
            Some("audio") => info.audio_tracks.push(AudioTrack {
                index: stream.index,
                codec,
                channels: stream.channels.unwrap_or(2),
                lang,
                title,
            }),
            Some("subtitle") => {
                let bitmap = BITMAP_SUBTITLE_CODECS.contains(&codec.as_str());
                info.subtitle_tracks.push(SubtitleTrack {
                    index: stream.index,
                    codec,
                    lang,
                    title,
                    bitmap,
                });
            }
            _ => {}
        }
    }

    Ok(info)
}

/// Parse `-show_entries packet=pts_time,flags -of csv=p=0` output into the
/// timestamps of keyframe packets.
///
/// Lines look like `12.345000,K__`; packets without a usable timestamp
/// (`N/A`) are skipped.
pub fn parse_keyframe_packets(output: &str) -> Vec<f64> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split(',');
            let pts = fields.next()?.parse::<f64>().ok()?;
            let flags = fields.next()?;
            flags.contains('K').then_some(pts)
        })
        .collect()
}

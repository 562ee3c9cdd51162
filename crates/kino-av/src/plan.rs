//! Encode planning for live HLS sessions.
//!
//! [`EncodePlan::build`] decides *what* ffmpeg has to do for a playback
//! request (copy or re-encode, at which size and bitrate, whether subtitles
//! are burned in) and [`EncodePlan::ffmpeg_args`] renders that decision for
//! the configured hardware backend. The backend never changes the decision,
//! only the filter and encoder names.

use crate::probe::MediaInfo;
use kino_common::{HardwareAccel, Profile};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Manifest written by the HLS muxer inside a session directory.
pub const MANIFEST_NAME: &str = "playlist.m3u8";

/// Segment filename pattern handed to the HLS muxer.
pub const SEGMENT_PATTERN: &str = "segment_%d.ts";

/// Video codecs browsers play from MPEG-TS HLS without help.
pub const NATIVE_VIDEO_CODECS: &[&str] = &["h264"];

/// Audio codecs that can be copied into MPEG-TS HLS.
pub const NATIVE_AUDIO_CODECS: &[&str] = &["aac", "mp3"];

/// Target bitrate when a source must be re-encoded and its bitrate is unknown.
pub const FALLBACK_VIDEO_BITRATE: &str = "8M";

/// What happens to the video stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VideoPlan {
    /// Stream copied unmodified.
    Copy,
    /// Re-encoded. `width: None` keeps the source resolution.
    Encode { width: Option<u32>, bitrate: String },
}

/// What happens to the selected audio stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AudioPlan {
    Copy,
    /// Re-encoded to stereo AAC.
    Encode { bitrate: String },
}

/// How a requested subtitle track reaches the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SubtitleDelivery {
    None,
    /// Rendered into the video. `position` is the track's rank among the
    /// file's subtitle streams (what the `subtitles` filter calls `si`).
    Burned {
        stream: u32,
        position: usize,
        bitmap: bool,
    },
    /// Left for the player to fetch as a separate text track.
    Sidecar { stream: u32 },
}

/// Everything the planner needs to know about one playback request.
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub source: &'a Path,
    pub profile: &'a Profile,
    /// Probe result; `None` when probing was skipped or failed.
    pub media: Option<&'a MediaInfo>,
    pub hardware: HardwareAccel,
    pub vaapi_device: &'a str,
    /// Absolute index of the audio stream to play; the first audio stream
    /// when `None`.
    pub audio_index: Option<u32>,
    /// Absolute index of the subtitle stream to show, if any.
    pub subtitle_index: Option<u32>,
    /// Seek offset in seconds.
    pub start: f64,
    /// Target segment length in seconds.
    pub segment_duration: u32,
}

/// A concrete transcoding decision for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodePlan {
    pub source: PathBuf,
    pub video: VideoPlan,
    pub audio: AudioPlan,
    pub subtitles: SubtitleDelivery,
    pub hardware: HardwareAccel,
    #[serde(skip)]
    vaapi_device: String,
    audio_index: Option<u32>,
    start: f64,
    segment_duration: u32,
}

impl EncodePlan {
    /// Whether [`EncodePlan::build`] looks at probe data for this request.
    ///
    /// Fixed-target profiles without subtitles plan identically with or
    /// without a probe, so their launch does not have to wait for one.
    pub fn needs_probe(profile: &Profile, subtitle_index: Option<u32>) -> bool {
        profile.is_passthrough() || subtitle_index.is_some()
    }

    /// Decide how to deliver a request.
    pub fn build(req: &PlanRequest<'_>) -> Self {
        let video = plan_video(req.profile, req.media);
        let reencode = !matches!(video, VideoPlan::Copy);

        let source_audio = req.media.and_then(|m| match req.audio_index {
            Some(index) => m.audio_track(index),
            None => m.audio_tracks.first(),
        });
        let audio = match (&video, source_audio) {
            (VideoPlan::Copy, Some(track))
                if NATIVE_AUDIO_CODECS.contains(&track.codec.as_str()) =>
            {
                AudioPlan::Copy
            }
            _ => AudioPlan::Encode {
                bitrate: req.profile.target_audio_bitrate().to_string(),
            },
        };

        let subtitles = match req.subtitle_index {
            None => SubtitleDelivery::None,
            Some(stream) if !reencode => SubtitleDelivery::Sidecar { stream },
            Some(stream) => match req.media.and_then(|m| m.subtitle_track(stream)) {
                Some((position, track)) => SubtitleDelivery::Burned {
                    stream,
                    position,
                    bitmap: track.bitmap,
                },
                None => {
                    tracing::warn!(stream, "Requested subtitle stream not found, not burning in");
                    SubtitleDelivery::None
                }
            },
        };

        Self {
            source: req.source.to_path_buf(),
            video,
            audio,
            subtitles,
            hardware: req.hardware,
            vaapi_device: req.vaapi_device.to_string(),
            audio_index: req.audio_index,
            start: req.start,
            segment_duration: req.segment_duration.max(1),
        }
    }

    /// Whether the video stream is re-encoded.
    pub fn requires_reencode(&self) -> bool {
        !matches!(self.video, VideoPlan::Copy)
    }

    /// Render the ffmpeg command line (without the program name) writing the
    /// manifest and segments into `output_dir`.
    pub fn ffmpeg_args(&self, output_dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];

        if self.start > 0.0 {
            args.extend(["-ss".into(), format!("{:.3}", self.start)]);
        }

        if self.requires_reencode() {
            match self.hardware {
                HardwareAccel::Software => {}
                HardwareAccel::Vaapi => {
                    args.extend(["-vaapi_device".into(), self.vaapi_device.clone()]);
                }
                HardwareAccel::Qsv => {
                    args.extend([
                        "-init_hw_device".into(),
                        "qsv=qsv:MFX_IMPL_hw".into(),
                        "-filter_hw_device".into(),
                        "qsv".into(),
                    ]);
                }
            }
        }

        args.extend(["-i".into(), self.source.to_string_lossy().into_owned()]);

        match &self.video {
            VideoPlan::Copy => {
                args.extend(["-map".into(), "0:v:0".into()]);
                args.extend(["-c:v".into(), "copy".into()]);
            }
            VideoPlan::Encode { width, bitrate } => {
                self.push_video_filters(&mut args, *width);
                let (encoder, extra): (&str, &[&str]) = match self.hardware {
                    HardwareAccel::Software => ("libx264", &["-preset", "veryfast"]),
                    HardwareAccel::Vaapi => ("h264_vaapi", &[]),
                    HardwareAccel::Qsv => ("h264_qsv", &[]),
                };
                args.extend(["-c:v".into(), encoder.into()]);
                args.extend(extra.iter().map(|s| s.to_string()));
                args.extend(["-b:v".into(), bitrate.clone()]);
            }
        }

        let audio_map = match self.audio_index {
            Some(index) => format!("0:{index}"),
            None => "0:a:0".to_string(),
        };
        args.extend(["-map".into(), audio_map]);
        match &self.audio {
            AudioPlan::Copy => args.extend(["-c:a".into(), "copy".into()]),
            AudioPlan::Encode { bitrate } => args.extend([
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                bitrate.clone(),
                "-ac".into(),
                "2".into(),
            ]),
        }

        args.extend([
            "-f".into(),
            "hls".into(),
            "-hls_time".into(),
            self.segment_duration.to_string(),
            "-hls_list_size".into(),
            "0".into(),
            "-hls_flags".into(),
            "independent_segments+temp_file".into(),
            "-hls_segment_filename".into(),
            output_dir.join(SEGMENT_PATTERN).to_string_lossy().into_owned(),
            output_dir.join(MANIFEST_NAME).to_string_lossy().into_owned(),
        ]);

        args
    }

    /// Push `-map`/`-vf` or `-filter_complex` for an encoded video stream.
    fn push_video_filters(&self, args: &mut Vec<String>, width: Option<u32>) {
        let scale = self.scale_filter(width);

        match &self.subtitles {
            SubtitleDelivery::Burned {
                stream,
                bitmap: true,
                ..
            } => {
                let mut chain = vec!["overlay".to_string()];
                chain.extend(scale);
                args.extend([
                    "-filter_complex".into(),
                    format!("[0:v:0][0:{stream}]{}[v]", chain.join(",")),
                    "-map".into(),
                    "[v]".into(),
                ]);
            }
            SubtitleDelivery::Burned { position, .. } => {
                // Input seeking restarts timestamps at zero while the subtitle
                // file is read from its beginning, so shift into file time
                // for the burn and back afterwards.
                let mut chain = vec![
                    format!("setpts=PTS+{:.3}/TB", self.start),
                    format!(
                        "subtitles=filename={}:si={position}",
                        escape_filter_value(&self.source.to_string_lossy())
                    ),
                    "setpts=PTS-STARTPTS".to_string(),
                ];
                chain.extend(scale);
                args.extend(["-map".into(), "0:v:0".into(), "-vf".into(), chain.join(",")]);
            }
            SubtitleDelivery::None | SubtitleDelivery::Sidecar { .. } => {
                args.extend(["-map".into(), "0:v:0".into()]);
                if !scale.is_empty() {
                    args.extend(["-vf".into(), scale.join(",")]);
                }
            }
        }
    }

    /// Backend-specific filters that realize the resolution decision.
    fn scale_filter(&self, width: Option<u32>) -> Vec<String> {
        match (self.hardware, width) {
            (HardwareAccel::Vaapi, Some(w)) => vec![
                "format=nv12".into(),
                "hwupload".into(),
                format!("scale_vaapi=w={w}:h=-2"),
            ],
            (HardwareAccel::Vaapi, None) => vec!["format=nv12".into(), "hwupload".into()],
            (_, Some(w)) => vec![format!("scale={w}:-2")],
            (_, None) => Vec::new(),
        }
    }
}

fn plan_video(profile: &Profile, media: Option<&MediaInfo>) -> VideoPlan {
    if !profile.is_passthrough() {
        return VideoPlan::Encode {
            width: Some(profile.target_width()),
            bitrate: profile.target_video_bitrate().to_string(),
        };
    }

    let source = media.and_then(|m| m.primary_video());
    match source {
        Some(video) if NATIVE_VIDEO_CODECS.contains(&video.codec.as_str()) => VideoPlan::Copy,
        _ => {
            let bitrate = media
                .and_then(|m| m.video_bit_rate())
                .filter(|bps| *bps > 0)
                .map(|bps| format!("{}k", bps / 1000))
                .unwrap_or_else(|| FALLBACK_VIDEO_BITRATE.to_string());
            VideoPlan::Encode {
                width: None,
                bitrate,
            }
        }
    }
}

/// Escape a value for use as a filter option inside a filtergraph.
///
/// Two levels apply: the option parser (`\`, `'`, `:`) and then the
/// filtergraph parser (`\`, `'`, `[`, `]`, `,`, `;`).
fn escape_filter_value(value: &str) -> String {
    fn escape(input: &str, special: &[char]) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            if special.contains(&c) {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    let option_level = escape(value, &['\\', '\'', ':']);
    escape(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{AudioTrack, SubtitleTrack, VideoTrack};

    fn media(video_codec: &str, audio_codec: &str) -> MediaInfo {
        MediaInfo {
            duration: 600.0,
            bit_rate: Some(10_000_000),
            video_tracks: vec![VideoTrack {
                index: 0,
                codec: video_codec.into(),
                width: 1920,
                height: 1080,
                bit_rate: Some(4_500_000),
                lang: "und".into(),
                title: String::new(),
            }],
            audio_tracks: vec![AudioTrack {
                index: 1,
                codec: audio_codec.into(),
                channels: 6,
                lang: "eng".into(),
                title: String::new(),
            }],
            subtitle_tracks: vec![
                SubtitleTrack {
                    index: 2,
                    codec: "subrip".into(),
                    lang: "eng".into(),
                    title: String::new(),
                    bitmap: false,
                },
                SubtitleTrack {
                    index: 3,
                    codec: "hdmv_pgs_subtitle".into(),
                    lang: "eng".into(),
                    title: String::new(),
                    bitmap: true,
                },
            ],
        }
    }

    fn p720() -> Profile {
        Profile {
            name: "720p".into(),
            width: Some(1280),
            height: Some(720),
            video_bitrate: Some("3M".into()),
            audio_bitrate: Some("128k".into()),
        }
    }

    fn request<'a>(profile: &'a Profile, media: Option<&'a MediaInfo>) -> PlanRequest<'a> {
        PlanRequest {
            source: Path::new("/media/movie.mkv"),
            profile,
            media,
            hardware: HardwareAccel::Software,
            vaapi_device: "/dev/dri/renderD128",
            audio_index: Some(1),
            subtitle_index: None,
            start: 0.0,
            segment_duration: 4,
        }
    }

    fn window<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_passthrough_native_codec_copies() {
        let profile = Profile::passthrough();
        let info = media("h264", "aac");
        let plan = EncodePlan::build(&request(&profile, Some(&info)));

        assert_eq!(plan.video, VideoPlan::Copy);
        assert_eq!(plan.audio, AudioPlan::Copy);
        assert!(!plan.requires_reencode());

        let args = plan.ffmpeg_args(Path::new("/tmp/s"));
        assert_eq!(window(&args, "-c:v"), Some("copy"));
        assert_eq!(window(&args, "-c:a"), Some("copy"));
        assert!(!args.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_passthrough_copies_video_but_encodes_foreign_audio() {
        let profile = Profile::passthrough();
        let info = media("h264", "dts");
        let plan = EncodePlan::build(&request(&profile, Some(&info)));

        assert_eq!(plan.video, VideoPlan::Copy);
        assert_eq!(
            plan.audio,
            AudioPlan::Encode {
                bitrate: "192k".into()
            }
        );
    }

    #[test]
    fn test_passthrough_non_native_codec_transcodes_at_source_resolution() {
        let profile = Profile::passthrough();
        let info = media("hevc", "aac");
        let plan = EncodePlan::build(&request(&profile, Some(&info)));

        assert_eq!(
            plan.video,
            VideoPlan::Encode {
                width: None,
                bitrate: "4500k".into()
            }
        );
        assert_eq!(
            plan.audio,
            AudioPlan::Encode {
                bitrate: "192k".into()
            }
        );

        let args = plan.ffmpeg_args(Path::new("/tmp/s"));
        assert_eq!(window(&args, "-c:v"), Some("libx264"));
        assert_eq!(window(&args, "-b:v"), Some("4500k"));
        assert!(!args.iter().any(|a| a.starts_with("scale")));
    }

    #[test]
    fn test_passthrough_unknown_bitrate_uses_fallback() {
        let profile = Profile::passthrough();
        let mut info = media("vp9", "opus");
        info.bit_rate = None;
        info.video_tracks[0].bit_rate = None;
        let plan = EncodePlan::build(&request(&profile, Some(&info)));

        assert_eq!(
            plan.video,
            VideoPlan::Encode {
                width: None,
                bitrate: FALLBACK_VIDEO_BITRATE.into()
            }
        );
    }

    #[test]
    fn test_passthrough_without_probe_transcodes() {
        let profile = Profile::passthrough();
        let plan = EncodePlan::build(&request(&profile, None));
        assert!(plan.requires_reencode());
    }

    #[test]
    fn test_fixed_profile_scales_regardless_of_codec() {
        let profile = p720();
        for codec in ["h264", "hevc"] {
            let info = media(codec, "aac");
            let plan = EncodePlan::build(&request(&profile, Some(&info)));
            assert_eq!(
                plan.video,
                VideoPlan::Encode {
                    width: Some(1280),
                    bitrate: "3M".into()
                }
            );

            let args = plan.ffmpeg_args(Path::new("/tmp/s"));
            assert_eq!(window(&args, "-vf"), Some("scale=1280:-2"));
            assert_eq!(window(&args, "-b:a"), Some("128k"));
            assert_eq!(window(&args, "-ac"), Some("2"));
        }
    }

    #[test]
    fn test_hardware_changes_names_not_decision() {
        let profile = p720();
        let info = media("hevc", "aac");

        let mut req = request(&profile, Some(&info));
        let software = EncodePlan::build(&req);
        req.hardware = HardwareAccel::Vaapi;
        let vaapi = EncodePlan::build(&req);
        req.hardware = HardwareAccel::Qsv;
        let qsv = EncodePlan::build(&req);

        assert_eq!(software.video, vaapi.video);
        assert_eq!(software.video, qsv.video);

        let args = vaapi.ffmpeg_args(Path::new("/tmp/s"));
        assert_eq!(window(&args, "-vaapi_device"), Some("/dev/dri/renderD128"));
        assert_eq!(
            window(&args, "-vf"),
            Some("format=nv12,hwupload,scale_vaapi=w=1280:h=-2")
        );
        assert_eq!(window(&args, "-c:v"), Some("h264_vaapi"));

        let args = qsv.ffmpeg_args(Path::new("/tmp/s"));
        assert_eq!(window(&args, "-init_hw_device"), Some("qsv=qsv:MFX_IMPL_hw"));
        assert_eq!(window(&args, "-c:v"), Some("h264_qsv"));
        assert_eq!(window(&args, "-vf"), Some("scale=1280:-2"));
    }

    #[test]
    fn test_no_hw_init_for_copy() {
        let profile = Profile::passthrough();
        let info = media("h264", "aac");
        let mut req = request(&profile, Some(&info));
        req.hardware = HardwareAccel::Vaapi;
        let args = EncodePlan::build(&req).ffmpeg_args(Path::new("/tmp/s"));
        assert!(!args.iter().any(|a| a == "-vaapi_device"));
    }

    #[test]
    fn test_text_subtitle_burned_with_seek_offset() {
        let profile = p720();
        let info = media("h264", "aac");
        let mut req = request(&profile, Some(&info));
        req.subtitle_index = Some(2);
        req.start = 90.5;
        let plan = EncodePlan::build(&req);

        assert_eq!(
            plan.subtitles,
            SubtitleDelivery::Burned {
                stream: 2,
                position: 0,
                bitmap: false
            }
        );

        let args = plan.ffmpeg_args(Path::new("/tmp/s"));
        assert_eq!(window(&args, "-ss"), Some("90.500"));
        let vf = window(&args, "-vf").unwrap();
        assert!(vf.starts_with("setpts=PTS+90.500/TB,subtitles=filename="), "{vf}");
        assert!(vf.contains(":si=0,setpts=PTS-STARTPTS,scale=1280:-2"), "{vf}");
    }

    #[test]
    fn test_bitmap_subtitle_uses_overlay() {
        let profile = p720();
        let info = media("h264", "aac");
        let mut req = request(&profile, Some(&info));
        req.subtitle_index = Some(3);
        let plan = EncodePlan::build(&req);

        let args = plan.ffmpeg_args(Path::new("/tmp/s"));
        assert_eq!(
            window(&args, "-filter_complex"),
            Some("[0:v:0][0:3]overlay,scale=1280:-2[v]")
        );
        assert_eq!(window(&args, "-map"), Some("[v]"));
        assert!(!args.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_subtitle_on_copy_goes_sidecar() {
        let profile = Profile::passthrough();
        let info = media("h264", "aac");
        let mut req = request(&profile, Some(&info));
        req.subtitle_index = Some(2);
        let plan = EncodePlan::build(&req);

        assert_eq!(plan.video, VideoPlan::Copy);
        assert_eq!(plan.subtitles, SubtitleDelivery::Sidecar { stream: 2 });
        let args = plan.ffmpeg_args(Path::new("/tmp/s"));
        assert!(!args.iter().any(|a| a.contains("subtitles=")));
    }

    #[test]
    fn test_unknown_subtitle_stream_is_ignored() {
        let profile = p720();
        let info = media("h264", "aac");
        let mut req = request(&profile, Some(&info));
        req.subtitle_index = Some(9);
        assert_eq!(EncodePlan::build(&req).subtitles, SubtitleDelivery::None);
    }

    #[test]
    fn test_hls_output_arguments() {
        let profile = p720();
        let plan = EncodePlan::build(&request(&profile, None));
        let args = plan.ffmpeg_args(Path::new("/tmp/session"));

        assert_eq!(window(&args, "-f"), Some("hls"));
        assert_eq!(window(&args, "-hls_time"), Some("4"));
        assert_eq!(window(&args, "-hls_list_size"), Some("0"));
        assert_eq!(
            window(&args, "-hls_segment_filename"),
            Some("/tmp/session/segment_%d.ts")
        );
        assert_eq!(args.last().map(String::as_str), Some("/tmp/session/playlist.m3u8"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:1"));
        assert!(!args.iter().any(|a| a == "-ss"));
    }

    #[test]
    fn test_default_audio_is_first_stream() {
        let profile = Profile::passthrough();
        let info = media("h264", "aac");
        let mut req = request(&profile, Some(&info));
        req.audio_index = None;
        let plan = EncodePlan::build(&req);

        assert_eq!(plan.audio, AudioPlan::Copy);
        let args = plan.ffmpeg_args(Path::new("/tmp/s"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:a:0"));
    }

    #[test]
    fn test_needs_probe() {
        assert!(EncodePlan::needs_probe(&Profile::passthrough(), None));
        assert!(EncodePlan::needs_probe(&p720(), Some(2)));
        assert!(!EncodePlan::needs_probe(&p720(), None));
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("/m/a.mkv"), "/m/a.mkv");
        assert_eq!(escape_filter_value("/m/a:b.mkv"), "/m/a\\\\:b.mkv");
        assert_eq!(escape_filter_value("/m/x,y.mkv"), "/m/x\\,y.mkv");
    }
}

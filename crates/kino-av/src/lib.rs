//! # kino-av
//!
//! Media probing and ffmpeg planning for kino's live HLS sessions.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolPaths`], [`check_tools`]) -- locate ffmpeg and
//!   ffprobe and report their versions.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running external processes.
//! - **Probing** ([`Prober`], [`FfprobeProber`]) -- structured stream
//!   information and keyframe scans.
//! - **Seek resolution** ([`keyframe::resolve_start`]) -- keyframe-aligned
//!   start times for stream copies.
//! - **Encode planning** ([`EncodePlan`]) -- copy/encode decisions and the
//!   ffmpeg argument list for each hardware backend.

pub mod command;
pub mod error;
pub mod keyframe;
pub mod plan;
pub mod probe;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use plan::{AudioPlan, EncodePlan, PlanRequest, SubtitleDelivery, VideoPlan};
pub use probe::{
    AudioTrack, FfprobeProber, MediaInfo, Prober, SubtitleTrack, VideoTrack,
};
pub use tools::{check_tool, check_tools, require_tool, ToolInfo, ToolPaths};

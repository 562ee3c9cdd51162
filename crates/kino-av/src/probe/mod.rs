//! Media file probing module.
//!
//! The [`Prober`] trait is the seam between the session manager and whatever
//! introspects media files. The only production backend is
//! [`FfprobeProber`], which shells out to ffprobe.

mod ffprobe;
mod types;

pub use ffprobe::{parse_ffprobe_json, parse_keyframe_packets, FfprobeProber};
pub use types::*;

use crate::Result;
use async_trait::async_trait;
use std::path::Path;

/// Structured introspection of media files.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe the file's container and streams.
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Timestamps (seconds) of keyframes of the first video stream within
    /// `[from, to]`, in file order.
    async fn keyframes(&self, path: &Path, from: f64, to: f64) -> Result<Vec<f64>>;
}

//! Keyframe-aligned seek resolution for pass-through playback.
//!
//! Copied streams can only start on a keyframe, so ffmpeg's input seek lands
//! on the latest keyframe at or before the requested time. The player needs
//! that time too, otherwise its clock runs ahead of the delivered media.

use crate::probe::Prober;
use std::path::Path;

/// How far back from the requested time to look for a keyframe.
pub const KEYFRAME_WINDOW_SECS: f64 = 30.0;

/// Resolve the start time actually delivered for a copy-mode seek.
///
/// Returns the latest keyframe timestamp `<= requested` found in the
/// preceding [`KEYFRAME_WINDOW_SECS`]. When the scan fails or finds nothing,
/// the requested time is returned unchanged. The result is never greater
/// than `requested`.
pub async fn resolve_start(prober: &dyn Prober, source: &Path, requested: f64) -> f64 {
    if requested <= 0.0 {
        return requested;
    }

    let from = (requested - KEYFRAME_WINDOW_SECS).max(0.0);
    match prober.keyframes(source, from, requested).await {
        Ok(times) => match latest_keyframe(&times, requested) {
            Some(keyframe) => {
                tracing::debug!(requested, keyframe, "Resolved seek to keyframe");
                keyframe
            }
            None => {
                tracing::debug!(requested, "No keyframe in window, keeping requested start");
                requested
            }
        },
        Err(e) => {
            tracing::warn!(requested, error = %e, "Keyframe scan failed, keeping requested start");
            requested
        }
    }
}

/// Latest timestamp in `times` that is not after `requested`.
pub fn latest_keyframe(times: &[f64], requested: f64) -> Option<f64> {
    times
        .iter()
        .copied()
        .filter(|t| t.is_finite() && *t <= requested)
        .fold(None, |best: Option<f64>, t| match best {
            Some(b) if b >= t => Some(b),
            _ => Some(t),
        })
}

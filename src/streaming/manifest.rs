//! HLS manifest helpers.

use kino_av::plan::MANIFEST_NAME;

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

/// A valid media playlist with no segments yet.
///
/// Returned while the transcoder warms up; players reload it until segments
/// appear.
pub fn stub_manifest(target_duration: u32) -> String {
    format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:0\n",
        target_duration.max(1)
    )
}

/// URL path of a session's manifest.
pub fn playlist_url(session_id: &str) -> String {
    format!("/api/stream/{}/{}", session_id, MANIFEST_NAME)
}

/// Whether `name` may be served from a session directory.
///
/// Only plain file names are accepted; anything that could address another
/// directory is refused.
pub fn is_servable_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.contains('\0')
}

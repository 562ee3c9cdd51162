//! Path utilities: media-root confinement.
//!
//! Every client-supplied path goes through [`resolve_under_root`] before it
//! touches the filesystem. Paths are interpreted relative to the configured
//! media root; a leading `/` is ignored.

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Resolve a client path against the media root.
///
/// Returns the canonical absolute path. `..` components that climb above the
/// root and symlinks that point outside of it both yield [`Error::Forbidden`];
/// a path that does not exist yields [`Error::NotFound`].
///
/// # Examples
///
/// ```
/// use kino_common::paths::resolve_under_root;
/// use kino_common::Error;
///
/// let root = std::env::temp_dir();
/// let err = resolve_under_root(&root, "../../etc/passwd").unwrap_err();
/// assert!(matches!(err, Error::Forbidden(_)));
/// ```
pub fn resolve_under_root(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut joined = PathBuf::new();
    for component in Path::new(relative.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !joined.pop() {
                    return Err(Error::forbidden(relative));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::forbidden(relative));
            }
        }
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|_| Error::not_found(format!("media root {}", root.display())))?;

    let candidate = canonical_root.join(&joined);
    let canonical = match candidate.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found(relative));
        }
        Err(e) => return Err(Error::Io(e)),
    };

    if !canonical.starts_with(&canonical_root) {
        return Err(Error::forbidden(relative));
    }

    Ok(canonical)
}

/// Resolve a client path that must name a regular file.
pub fn resolve_media_file(root: &Path, relative: &str) -> Result<PathBuf> {
    let path = resolve_under_root(root, relative)?;
    if !path.is_file() {
        return Err(Error::not_found(relative));
    }
    Ok(path)
}

//! Sample path validation
//!
//! Checks a submitted path before any side effect happens: it must resolve,
//! exist, be a regular file (symlinks followed) and fit under the size
//! ceiling. Validation is read-only.

use crate::error::ScanError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A path that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    /// Canonical absolute path of the regular file
    pub path: PathBuf,
    /// Size of the (symlink-resolved) regular file
    pub size: u64,
}

/// Validate a submitted sample path
///
/// Total over all inputs: every path either yields a [`ValidatedPath`] or one
/// of the validation variants of [`ScanError`]. `..` components are resolved
/// by the filesystem, never lexically, so a symlinked directory before a `..`
/// is honoured.
pub fn validate(input: &str, max_size: u64) -> Result<ValidatedPath, ScanError> {
    if input.is_empty() {
        return Err(ScanError::PathResolution {
            path: input.to_string(),
            reason: "empty path".to_string(),
        });
    }

    let resolution_error = |path: &Path, e: std::io::Error| ScanError::PathResolution {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let path = std::path::absolute(Path::new(input))
        .map_err(|e| resolution_error(Path::new(input), e))?;

    // Follows symlinks: the target must be a regular file
    let metadata = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ScanError::NotFound {
                path: path.display().to_string(),
            });
        }
        Err(e) => return Err(resolution_error(&path, e)),
    };

    if !metadata.is_file() {
        return Err(ScanError::NotRegularFile {
            path: path.display().to_string(),
        });
    }

    let size = metadata.len();
    if size > max_size {
        return Err(ScanError::SizeLimitExceeded {
            path: path.display().to_string(),
            size,
            max: max_size,
        });
    }

    let canonical = std::fs::canonicalize(&path).map_err(|e| resolution_error(&path, e))?;

    debug!(path = %canonical.display(), size, "Validated sample path");
    Ok(ValidatedPath {
        path: canonical,
        size,
    })
}

//! Local tree scanning.
//!
//! Walks the upload root in sorted order and produces transfer candidates
//! with remote paths normalized to forward slashes.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;

use crate::error::UploadError;
use crate::types::Candidate;

/// Basename filters.
///
/// A file or directory whose name is excluded is skipped (directories are
/// not descended into). When `includes` is non-empty, only files whose name
/// is listed are kept; directories are always descended.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub excludes: BTreeSet<String>,
    pub includes: BTreeSet<String>,
}

impl ScanFilter {
    pub fn new<E, I>(excludes: E, includes: I) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            excludes: excludes.into_iter().map(Into::into).collect(),
            includes: includes.into_iter().map(Into::into).collect(),
        }
    }

    fn excluded(&self, name: &str) -> bool {
        self.excludes.contains(name)
    }

    fn included(&self, name: &str) -> bool {
        self.includes.is_empty() || self.includes.contains(name)
    }
}

/// Scans `root` and returns the files to upload.
///
/// A file given as root becomes a single candidate named after its
/// basename.
pub fn scan(root: &Path, filter: &ScanFilter) -> Result<Vec<Candidate>, UploadError> {
    let metadata = std::fs::metadata(root).map_err(|e| UploadError::Scan {
        path: root.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut candidates = Vec::new();
    if metadata.is_file() {
        let name = file_name(root);
        if filter.included(&name) && !filter.excluded(&name) {
            candidates.push(Candidate {
                local: root.to_path_buf(),
                remote: name,
            });
        }
    } else {
        walk_dir(root, root, filter, &mut candidates)?;
    }

    debug!(root = %root.display(), files = candidates.len(), "scan complete");
    Ok(candidates)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    filter: &ScanFilter,
    candidates: &mut Vec<Candidate>,
) -> Result<(), UploadError> {
    let mut entries = std::fs::read_dir(current)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if filter.excluded(&name) {
            debug!(path = %path.display(), "excluded");
            continue;
        }

        let file_type = entry.file_type()?;
        let is_file = if file_type.is_symlink() {
            // Linked directories are not descended; they can loop back
            // into the tree.
            match std::fs::metadata(&path) {
                Ok(target) if target.is_file() => true,
                Ok(_) => {
                    debug!(path = %path.display(), "skipping linked directory");
                    false
                }
                Err(err) => {
                    debug!(path = %path.display(), %err, "skipping broken link");
                    false
                }
            }
        } else if file_type.is_dir() {
            walk_dir(root, &path, filter, candidates)?;
            false
        } else {
            file_type.is_file()
        };

        if is_file && filter.included(&name) {
            let rel_path = path.strip_prefix(root).map_err(std::io::Error::other)?;

            // Normalize to forward slashes.
            let remote = rel_path.to_string_lossy().replace('\\', "/");
            candidates.push(Candidate {
                local: path,
                remote,
            });
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

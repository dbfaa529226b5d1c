//! Single-pass walk of the managed tree.
//!
//! Every component that needs to look at the tree (size accounting, victim
//! selection, expiration reconciliation) goes through [`scan_tree`], so they
//! all agree on three policies:
//!
//! - symbolic links are never followed and contribute nothing;
//! - directories contribute zero bytes;
//! - entries that vanish or become unreadable mid-walk are skipped.
//!
//! Directory entries are visited sorted by file name, which makes the walk
//! order (and therefore eviction tie-breaks) reproducible.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::{Result, RetentionError};

/// A regular file found in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Snapshot of the tree at the time of the walk.
#[derive(Debug, Clone, Default)]
pub struct TreeScan {
    /// Regular files in walk order.
    pub files: Vec<TrackedFile>,
    /// Sum of `files[..].size_bytes`.
    pub total_bytes: u64,
    /// Entries skipped because they vanished or could not be read.
    pub skipped: usize,
}

/// Walk `root` and collect every regular file.
///
/// Fails only when `root` itself cannot be read; anything below it that
/// cannot be read is counted in [`TreeScan::skipped`].
pub fn scan_tree(root: &Path) -> Result<TreeScan> {
    let mut scan = TreeScan::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop at root"));
                return Err(RetentionError::Scan {
                    path: root.to_path_buf(),
                    source,
                });
            }
            Err(err) => {
                tracing::debug!(error = %err, "Skipping unreadable entry");
                scan.skipped += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::debug!(
                    path = %entry.path().display(),
                    error = %err,
                    "File vanished during scan"
                );
                scan.skipped += 1;
                continue;
            }
        };

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                tracing::debug!(
                    path = %entry.path().display(),
                    error = %err,
                    "No modification time available"
                );
                scan.skipped += 1;
                continue;
            }
        };

        scan.total_bytes = scan.total_bytes.saturating_add(metadata.len());
        scan.files.push(TrackedFile {
            path: entry.into_path(),
            size_bytes: metadata.len(),
            modified,
        });
    }

    Ok(scan)
}

/// Stat a single path without following symlinks.
///
/// Returns `None` for anything that is not a regular file, including paths
/// that no longer exist.
pub fn stat_file(path: &Path) -> Option<TrackedFile> {
    let metadata = std::fs::symlink_metadata(path).ok()?;
    if !metadata.file_type().is_file() {
        return None;
    }
    Some(TrackedFile {
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        modified: metadata.modified().ok()?,
    })
}

/// Run [`scan_tree`] on the blocking pool.
pub async fn scan_tree_blocking(root: PathBuf) -> Result<TreeScan> {
    tokio::task::spawn_blocking(move || scan_tree(&root)).await?
}

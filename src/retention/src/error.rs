use std::path::PathBuf;

use thiserror::Error;

use crate::event_source::WatcherError;

/// Errors surfaced by the retention engine.
///
/// A target vanishing mid-operation is not an error: the walk skips it and the
/// deletion authority reports [`crate::DeleteOutcome::AlreadyAbsent`].
#[derive(Error, Debug)]
pub enum RetentionError {
    /// The root of the tree itself could not be read.
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Permission denied deleting {0}")]
    PermissionDenied(PathBuf),

    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directories, symlinks and special files are never deleted.
    #[error("Refusing to delete {0}: not a regular file")]
    NotAFile(PathBuf),

    #[error("Background filesystem task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Watcher(#[from] WatcherError),
}

impl RetentionError {
    /// Classify a failed removal.
    pub(crate) fn from_delete(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            RetentionError::PermissionDenied(path)
        } else {
            RetentionError::Delete { path, source }
        }
    }
}

pub type Result<T, E = RetentionError> = std::result::Result<T, E>;

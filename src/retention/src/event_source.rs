//! Filesystem change notifications for the managed tree.
//!
//! Native watcher events are reduced to three facts the engine cares about:
//! a path appeared, its contents changed, or it went away. Renames count as
//! a removal plus a creation. Metadata and read access are dropped here.

use std::path::{Path, PathBuf};

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[from] notify::Error),

    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    /// Contents written after creation; the size may have changed.
    Modified(PathBuf),
    Removed(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Created(path) | FsEvent::Modified(path) | FsEvent::Removed(path) => path,
        }
    }
}

/// Map one native event to zero or more [`FsEvent`]s.
pub fn translate(event: Event) -> Vec<FsEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(FsEvent::Created).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(FsEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => translate_rename(mode, event.paths),
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            event.paths.into_iter().map(FsEvent::Modified).collect()
        }
        _ => Vec::new(),
    }
}

fn translate_rename(mode: RenameMode, paths: Vec<PathBuf>) -> Vec<FsEvent> {
    match mode {
        RenameMode::To => paths.into_iter().map(FsEvent::Created).collect(),
        RenameMode::From => paths.into_iter().map(FsEvent::Removed).collect(),
        RenameMode::Both => {
            let mut paths = paths.into_iter();
            let mut events = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                events.push(FsEvent::Removed(from));
            }
            if let Some(to) = paths.next() {
                events.push(FsEvent::Created(to));
            }
            events
        }
        // Backends that cannot tell the two sides apart: look at the disk.
        _ => paths
            .into_iter()
            .map(|path| {
                if path.symlink_metadata().is_ok() {
                    FsEvent::Created(path)
                } else {
                    FsEvent::Removed(path)
                }
            })
            .collect(),
    }
}

/// Stream of [`FsEvent`]s for a directory tree.
///
/// The native watcher calls back on its own thread; events are forwarded
/// over an unbounded channel so that callback never blocks. Dropping the
/// source (or calling [`EventSource::close`]) stops the watcher.
pub struct EventSource {
    receiver: mpsc::UnboundedReceiver<FsEvent>,
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl EventSource {
    /// Watch `root` recursively.
    pub fn watch(root: &Path) -> Result<Self, WatcherError> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for fs_event in translate(event) {
                        // receiver gone means we are shutting down
                        let _ = sender.send(fs_event);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "Filesystem watcher error"),
            },
            Config::default(),
        )?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatcherError::WatchPath {
                path: root.to_path_buf(),
                source,
            })?;

        tracing::info!(root = %root.display(), "Watching for filesystem changes");

        Ok(Self {
            receiver,
            watcher: Some(watcher),
        })
    }

    /// Events fed from an existing channel instead of a native watcher.
    pub fn from_channel(receiver: mpsc::UnboundedReceiver<FsEvent>) -> Self {
        Self {
            receiver,
            watcher: None,
        }
    }

    /// Next event, or `None` once the source is closed and drained.
    pub async fn recv(&mut self) -> Option<FsEvent> {
        self.receiver.recv().await
    }

    /// Stop the native watcher and refuse further events.
    pub fn close(&mut self) {
        self.watcher = None;
        self.receiver.close();
    }
}

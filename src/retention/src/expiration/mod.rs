//! Time-based expiration of files, independent of size pressure.
//!
//! The scheduler owns every [`ExpirationEntry`] and keeps at most one per
//! path. Deadlines are delivered by a pluggable [`ExpirationBackend`]:
//!
//! - [`InProcessBackend`] (default): the daemon's timer drains
//!   [`ExpirationScheduler::take_due`] and hands each path to the engine's
//!   deletion authority. Entries live in memory and do not survive restarts.
//! - [`AtJobBackend`]: deadlines are queued with the host `at` facility and
//!   fire outside this process. Cancelling or replacing an entry withdraws
//!   its host job.
//!
//! Either way, [`ExpirationScheduler::find_unscheduled`] lets the engine
//! backfill files that exist without an entry (pre-existing files, or
//! entries lost in a restart).

pub mod at_job;
pub mod queue;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use common::config::ExpirationBackendKind;

use crate::error::Result;
use crate::exclusion::ExclusionRules;
use crate::scan::{TreeScan, scan_tree};

pub use at_job::AtJobBackend;
pub use queue::DeadlineQueue;

/// A pending deletion deadline for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationEntry {
    pub path: PathBuf,
    pub deadline: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum ExpirationError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scheduling expiration of {path} failed ({status}): {stderr}")]
    Submit {
        path: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("Withdrawing job {job} failed ({status}): {stderr}")]
    Withdraw {
        job: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error talking to scheduler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Expiration of {days} days is out of range")]
    TtlOutOfRange { days: u32 },
}

/// Where deadlines are delivered.
#[async_trait]
pub trait ExpirationBackend: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this process is responsible for firing deadlines.
    fn fires_in_process(&self) -> bool;

    /// Hand an entry to the backend. Called before the entry is indexed.
    ///
    /// Returns the backend's id for the queued job, if it keeps one.
    async fn submit(&self, entry: &ExpirationEntry) -> Result<Option<String>, ExpirationError>;

    /// Withdraw a job id previously returned by [`Self::submit`].
    async fn withdraw(&self, _job: &str) -> Result<(), ExpirationError> {
        Ok(())
    }
}

/// Deadlines fired by the daemon's own timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessBackend;

#[async_trait]
impl ExpirationBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "in_process"
    }

    fn fires_in_process(&self) -> bool {
        true
    }

    async fn submit(&self, _entry: &ExpirationEntry) -> Result<Option<String>, ExpirationError> {
        Ok(None)
    }
}

pub fn backend_for(kind: ExpirationBackendKind) -> Box<dyn ExpirationBackend> {
    match kind {
        ExpirationBackendKind::InProcess => Box::new(InProcessBackend),
        ExpirationBackendKind::At => Box::new(AtJobBackend::new()),
    }
}

#[derive(Debug)]
pub struct ExpirationScheduler {
    entries: DeadlineQueue,
    /// Backend job ids of live entries.
    jobs: HashMap<PathBuf, String>,
    backend: Box<dyn ExpirationBackend>,
}

impl ExpirationScheduler {
    pub fn new(backend: Box<dyn ExpirationBackend>) -> Self {
        Self {
            entries: DeadlineQueue::new(),
            jobs: HashMap::new(),
            backend,
        }
    }

    pub fn in_process() -> Self {
        Self::new(Box::new(InProcessBackend))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn fires_in_process(&self) -> bool {
        self.backend.fires_in_process()
    }

    /// Register deletion of `path` at `now + ttl_days`.
    pub async fn schedule(
        &mut self,
        path: &Path,
        ttl_days: u32,
    ) -> Result<ExpirationEntry, ExpirationError> {
        self.schedule_from(path, Utc::now(), ttl_days).await
    }

    /// Register deletion of `path` at `from + ttl_days`.
    ///
    /// An existing entry for the same path is replaced and its backend job
    /// withdrawn, so a path never has more than one active deadline. When
    /// the backend rejects the entry nothing is indexed and a later
    /// reconciliation retries it.
    pub async fn schedule_from(
        &mut self,
        path: &Path,
        from: DateTime<Utc>,
        ttl_days: u32,
    ) -> Result<ExpirationEntry, ExpirationError> {
        let deadline = chrono::Duration::try_days(i64::from(ttl_days))
            .and_then(|ttl| from.checked_add_signed(ttl))
            .ok_or(ExpirationError::TtlOutOfRange { days: ttl_days })?;
        let entry = ExpirationEntry {
            path: path.to_path_buf(),
            deadline,
        };

        let job = self.backend.submit(&entry).await?;
        let replaced_job = match job {
            Some(job) => self.jobs.insert(entry.path.clone(), job),
            None => self.jobs.remove(&entry.path),
        };
        if let Some(replaced_job) = replaced_job {
            self.withdraw(&entry.path, &replaced_job).await;
        }

        if let Some(previous) = self.entries.insert(entry.path.clone(), deadline) {
            tracing::debug!(
                path = %entry.path.display(),
                previous = %previous,
                deadline = %deadline,
                "Replaced expiration deadline"
            );
        }
        Ok(entry)
    }

    /// Drop the entry for `path`, if any, and withdraw its backend job.
    pub async fn cancel(&mut self, path: &Path) -> Option<DateTime<Utc>> {
        if let Some(job) = self.jobs.remove(path) {
            self.withdraw(path, &job).await;
        }
        self.entries.remove(path)
    }

    async fn withdraw(&self, path: &Path, job: &str) {
        match self.backend.withdraw(job).await {
            Ok(()) => tracing::debug!(path = %path.display(), job, "Withdrew expiration job"),
            // the job may already have run
            Err(err) => tracing::debug!(
                path = %path.display(),
                job,
                error = %err,
                "Could not withdraw expiration job"
            ),
        }
    }

    pub fn is_scheduled(&self, path: &Path) -> bool {
        self.entries.contains(path)
    }

    pub fn deadline_for(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.entries.deadline(path)
    }

    /// When the daemon's timer must next wake, if this process fires deadlines.
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        if !self.fires_in_process() {
            return None;
        }
        self.entries.next_deadline()
    }

    /// Remove and return entries due at `now`.
    ///
    /// With an external backend the host has already acted on elapsed
    /// deadlines; their entries are dropped and nothing is returned.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<ExpirationEntry> {
        let due = self.entries.pop_due(now);
        for entry in &due {
            self.jobs.remove(&entry.path);
        }
        if self.fires_in_process() { due } else { Vec::new() }
    }

    /// Eligible files under `root` that have no active entry.
    pub fn find_unscheduled(&self, root: &Path, rules: &ExclusionRules) -> Result<Vec<PathBuf>> {
        let scan = scan_tree(root)?;
        Ok(self.unscheduled_in(&scan, rules))
    }

    /// [`Self::find_unscheduled`] over an existing scan.
    pub fn unscheduled_in(&self, scan: &TreeScan, rules: &ExclusionRules) -> Vec<PathBuf> {
        scan.files
            .iter()
            .filter(|f| !rules.is_excluded(&f.path) && !self.is_scheduled(&f.path))
            .map(|f| f.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

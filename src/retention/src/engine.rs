//! Retention Engine
//!
//! Owns everything that changes the managed tree: the size-check cycle, the
//! reaction to new files, deadline firings and expiration reconciliation.
//! [`RetentionEngine::delete`] is the only code path that removes a file.
//!
//! ## Guarantees
//!
//! - Excluded paths are never deleted and never scheduled
//! - Eviction always takes the oldest eligible file first
//! - A target that is already gone counts as success and is subtracted once
//! - Dry-run mode logs every deletion it would make and touches nothing

use std::collections::HashSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use common::config::{AccountingMode, Configuration};

use crate::accounting::SizeAccountant;
use crate::error::{Result, RetentionError};
use crate::exclusion::ExclusionRules;
use crate::expiration::{ExpirationScheduler, backend_for};
use crate::metrics::RetentionMetrics;
use crate::scan::{TrackedFile, TreeScan, scan_tree_blocking, stat_file};
use crate::selector::{eviction_order, oldest_eligible};

/// Why a file is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionCause {
    /// The tree exceeded its storage ceiling.
    Eviction,
    /// The file's time-to-live elapsed.
    Expiration,
}

impl fmt::Display for DeletionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionCause::Eviction => write!(f, "eviction"),
            DeletionCause::Expiration => write!(f, "expiration"),
        }
    }
}

/// Result of a single call to [`RetentionEngine::delete`].
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted { size_bytes: u64 },
    /// Nothing to delete; treated as success.
    AlreadyAbsent,
    /// Refused because the path is protected.
    Excluded,
    DryRun { size_bytes: u64 },
    Failed(RetentionError),
}

impl DeleteOutcome {
    /// Whether the path is (or, in dry-run, would be) gone afterwards.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DeleteOutcome::Deleted { .. } | DeleteOutcome::AlreadyAbsent | DeleteOutcome::DryRun { .. }
        )
    }
}

/// Result of one size-check cycle
#[derive(Debug, Clone, Default)]
pub struct SizeCheckReport {
    /// Size when the cycle started
    pub initial_bytes: u64,
    /// Size when the cycle ended
    pub final_bytes: u64,
    pub ceiling_bytes: u64,
    /// Files evicted (or that would be, in dry-run), in eviction order
    pub evicted: Vec<(PathBuf, u64)>,
    /// Victims whose deletion failed; retried on the next trigger
    pub failed: Vec<PathBuf>,
    /// Over the ceiling with only excluded files left
    pub policy_exhausted: bool,
    /// Tree walks performed
    pub scans: usize,
}

impl SizeCheckReport {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.evicted.iter().map(|(_, size)| size).sum()
    }
}

/// What happened in response to a creation event.
#[derive(Debug, Clone)]
pub struct CreationOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub excluded: bool,
    /// Expiration deadline, when one was registered.
    pub deadline: Option<DateTime<Utc>>,
    pub size_check: SizeCheckReport,
}

/// One-shot view of the tree, for reporting.
#[derive(Debug, Clone)]
pub struct TreeSurvey {
    pub total_bytes: u64,
    pub ceiling_bytes: u64,
    pub files: usize,
    pub eligible: usize,
    pub excluded: usize,
    pub skipped: usize,
    pub oldest_victim: Option<TrackedFile>,
    pub unscheduled: usize,
}

impl TreeSurvey {
    pub fn over_ceiling(&self) -> bool {
        self.total_bytes > self.ceiling_bytes
    }
}

#[derive(Debug)]
pub struct RetentionEngine {
    root: PathBuf,
    rules: ExclusionRules,
    ceiling_bytes: u64,
    /// `Some` only when the operating mode expires files.
    expiration_days: Option<u32>,
    dry_run: bool,
    accountant: SizeAccountant,
    expiration: ExpirationScheduler,
    metrics: RetentionMetrics,
    /// Paths this engine removed since the last walk, so their removal
    /// events and repeated deletes are not mistaken for drift.
    recently_deleted: HashSet<PathBuf>,
}

impl RetentionEngine {
    pub fn new(config: &Configuration, metrics: RetentionMetrics) -> Self {
        let scheduler = if config.retention.dry_run {
            // host jobs would delete for real
            ExpirationScheduler::in_process()
        } else {
            ExpirationScheduler::new(backend_for(config.expiration.backend))
        };
        Self::with_scheduler(config, scheduler, metrics)
    }

    pub fn with_scheduler(
        config: &Configuration,
        expiration: ExpirationScheduler,
        metrics: RetentionMetrics,
    ) -> Self {
        let expiration_days = config
            .mode
            .expires_files()
            .then_some(config.expiration.expiration_days);

        // without creation events a running total never sees new data
        let mut accounting = config.retention.accounting;
        if accounting == AccountingMode::Incremental && !config.mode.watches_events() {
            warn!(mode = %config.mode, "Incremental accounting needs events, using full walks");
            accounting = AccountingMode::FullWalk;
        }

        info!(
            root = %config.root_path.display(),
            mode = %config.mode,
            ceiling_bytes = config.retention.max_storage_bytes,
            exclusions = config.retention.exclusion_suffixes.len(),
            expiration_days = ?expiration_days,
            expiration_backend = expiration.backend_name(),
            dry_run = config.retention.dry_run,
            "Retention engine configured"
        );

        Self {
            root: config.root_path.clone(),
            rules: ExclusionRules::new(config.retention.exclusion_suffixes.iter().cloned()),
            ceiling_bytes: config.retention.max_storage_bytes,
            expiration_days,
            dry_run: config.retention.dry_run,
            accountant: SizeAccountant::new(accounting, config.retention.resync_interval),
            expiration,
            metrics,
            recently_deleted: HashSet::new(),
        }
    }

    /// Delete `path`.
    ///
    /// Excluded paths are refused. A path that no longer exists yields
    /// [`DeleteOutcome::AlreadyAbsent`] and leaves the tracked size alone.
    /// Any other failure is logged, counted and returned; it never panics.
    pub async fn delete(&mut self, path: &Path, cause: DeletionCause) -> DeleteOutcome {
        if self.rules.is_excluded(path) {
            debug!(path = %path.display(), cause = %cause, "Refusing to delete excluded file");
            return DeleteOutcome::Excluded;
        }

        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return self.already_absent(path, cause).await;
            }
            Err(err) => return self.delete_failed(path, cause, err),
        };
        if !metadata.file_type().is_file() {
            return self.record_failure(RetentionError::NotAFile(path.to_path_buf()), cause);
        }
        let size_bytes = metadata.len();

        if self.dry_run {
            info!(
                path = %path.display(),
                size_bytes,
                cause = %cause,
                "[DRY RUN] Would delete file"
            );
            return DeleteOutcome::DryRun { size_bytes };
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                self.accountant.record_deleted(size_bytes);
                self.recently_deleted.insert(path.to_path_buf());
                self.expiration.cancel(path).await;
                self.metrics.record_deleted(cause, size_bytes);
                info!(
                    path = %path.display(),
                    size_bytes,
                    cause = %cause,
                    "Deleted file"
                );
                DeleteOutcome::Deleted { size_bytes }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => self.already_absent(path, cause).await,
            Err(err) => self.delete_failed(path, cause, err),
        }
    }

    async fn already_absent(&mut self, path: &Path, cause: DeletionCause) -> DeleteOutcome {
        self.expiration.cancel(path).await;
        self.metrics.record_already_absent();
        if !self.recently_deleted.contains(path) {
            // someone else removed it; the running total still counts it
            self.accountant.mark_drift();
        }
        debug!(path = %path.display(), cause = %cause, "File already absent");
        DeleteOutcome::AlreadyAbsent
    }

    fn delete_failed(
        &mut self,
        path: &Path,
        cause: DeletionCause,
        source: std::io::Error,
    ) -> DeleteOutcome {
        self.record_failure(RetentionError::from_delete(path.to_path_buf(), source), cause)
    }

    fn record_failure(&mut self, err: RetentionError, cause: DeletionCause) -> DeleteOutcome {
        self.metrics.record_delete_failure();
        error!(cause = %cause, error = %err, "Failed to delete file");
        DeleteOutcome::Failed(err)
    }

    async fn scan(&mut self) -> Result<TreeScan> {
        let scan = scan_tree_blocking(self.root.clone()).await?;
        self.recently_deleted.clear();
        if scan.skipped > 0 {
            debug!(skipped = scan.skipped, "Entries skipped during scan");
        }
        Ok(scan)
    }

    /// Evict oldest-first until the tree fits under the ceiling.
    ///
    /// Stops early when nothing eligible is left (reported as
    /// `policy_exhausted`, not an error), when a whole pass made no progress,
    /// or after one simulated pass in dry-run mode. Only a failure to read
    /// the root itself is returned as an error.
    pub async fn run_size_check(&mut self) -> Result<SizeCheckReport> {
        let mut report = SizeCheckReport {
            ceiling_bytes: self.ceiling_bytes,
            ..SizeCheckReport::default()
        };
        let mut first_pass = true;

        loop {
            if let Some(size) = self.accountant.cached_size() {
                if first_pass {
                    report.initial_bytes = size;
                }
                report.final_bytes = size;
                if size <= self.ceiling_bytes {
                    break;
                }
            }

            let scan = self.scan().await?;
            report.scans += 1;
            let size = self.accountant.observe_scan(&scan);
            if first_pass {
                report.initial_bytes = size;
                first_pass = false;
            }
            report.final_bytes = size;
            if size <= self.ceiling_bytes {
                break;
            }

            let victims = eviction_order(&scan, &self.rules);
            if victims.is_empty() {
                warn!(
                    root = %self.root.display(),
                    size_bytes = size,
                    ceiling_bytes = self.ceiling_bytes,
                    "Storage ceiling unachievable, only excluded files left"
                );
                self.metrics.record_policy_exhausted();
                report.policy_exhausted = true;
                break;
            }

            let mut remaining = size;
            let mut progressed = false;
            for victim in victims {
                if remaining <= self.ceiling_bytes {
                    break;
                }
                match self.delete(&victim.path, DeletionCause::Eviction).await {
                    DeleteOutcome::Deleted { size_bytes } | DeleteOutcome::DryRun { size_bytes } => {
                        remaining = remaining.saturating_sub(size_bytes);
                        report.evicted.push((victim.path, size_bytes));
                        progressed = true;
                    }
                    DeleteOutcome::AlreadyAbsent => {
                        remaining = remaining.saturating_sub(victim.size_bytes);
                        progressed = true;
                    }
                    DeleteOutcome::Excluded => {}
                    DeleteOutcome::Failed(_) => report.failed.push(victim.path),
                }
            }
            report.final_bytes = remaining;

            if self.dry_run {
                break;
            }
            if !progressed {
                warn!(
                    failed = report.failed.len(),
                    size_bytes = remaining,
                    ceiling_bytes = self.ceiling_bytes,
                    "No victim could be deleted, retrying on next trigger"
                );
                break;
            }
        }

        self.metrics.record_size_check(report.final_bytes);
        if !report.evicted.is_empty() {
            info!(
                evicted = report.evicted.len(),
                bytes_reclaimed = report.bytes_reclaimed(),
                initial_bytes = report.initial_bytes,
                final_bytes = report.final_bytes,
                ceiling_bytes = report.ceiling_bytes,
                dry_run = self.dry_run,
                "Size check completed"
            );
        }
        Ok(report)
    }

    /// React to a path appearing under the root.
    ///
    /// Returns `None` when the path is not a regular file (directories,
    /// symlinks, or something already gone again).
    pub async fn handle_created(&mut self, path: &Path) -> Result<Option<CreationOutcome>> {
        let Some(file) = stat_file(path) else {
            debug!(path = %path.display(), "Ignoring creation of non-file");
            return Ok(None);
        };

        self.accountant.record_created(file.size_bytes);

        let excluded = self.rules.is_excluded(path);
        let mut deadline = None;
        if !excluded && let Some(days) = self.expiration_days {
            deadline = self.register_expiration(path, days).await;
        }

        let size_check = self.run_size_check().await?;

        Ok(Some(CreationOutcome {
            path: file.path,
            size_bytes: file.size_bytes,
            excluded,
            deadline,
            size_check,
        }))
    }

    /// React to a path disappearing from under the root.
    pub async fn handle_removed(&mut self, path: &Path) {
        if self.recently_deleted.remove(path) {
            return;
        }
        debug!(path = %path.display(), "External removal");
        self.accountant.mark_drift();
        if self.expiration.cancel(path).await.is_some() {
            debug!(path = %path.display(), "Dropped expiration of removed file");
        }
    }

    /// React to the contents of a file changing.
    ///
    /// Files usually grow after their creation event, so the running total
    /// is re-seeded from a walk on the next size check.
    pub fn handle_modified(&mut self, path: &Path) {
        if self.recently_deleted.contains(path) {
            return;
        }
        self.accountant.mark_drift();
    }

    /// Creation events stopped arriving; size checks walk the tree from now on.
    pub fn event_source_lost(&mut self) {
        self.accountant.fall_back_to_full_walk();
    }

    /// A deadline for `path` elapsed.
    pub async fn on_deadline(&mut self, path: &Path) -> DeleteOutcome {
        self.expiration.cancel(path).await;
        self.delete(path, DeletionCause::Expiration).await
    }

    /// Fire every in-process deadline due at `now`.
    pub async fn fire_due_expirations(&mut self, now: DateTime<Utc>) -> Vec<(PathBuf, DeleteOutcome)> {
        let due = self.expiration.take_due(now);
        let mut outcomes = Vec::with_capacity(due.len());
        for entry in due {
            let outcome = self.on_deadline(&entry.path).await;
            outcomes.push((entry.path, outcome));
        }
        outcomes
    }

    /// Register an expiration for every eligible file that has none.
    ///
    /// Returns how many were registered. Does nothing when the operating
    /// mode does not expire files.
    pub async fn reconcile_expirations(&mut self) -> Result<usize> {
        let Some(days) = self.expiration_days else {
            return Ok(0);
        };

        let scan = self.scan().await?;
        self.accountant.observe_scan(&scan);

        let mut registered = 0;
        for path in self.expiration.unscheduled_in(&scan, &self.rules) {
            if self.register_expiration(&path, days).await.is_some() {
                registered += 1;
            }
        }

        if registered > 0 {
            info!(
                registered,
                scheduled = self.expiration.len(),
                "Registered expirations for unscheduled files"
            );
        }
        Ok(registered)
    }

    async fn register_expiration(&mut self, path: &Path, days: u32) -> Option<DateTime<Utc>> {
        match self.expiration.schedule(path, days).await {
            Ok(entry) => {
                self.metrics.record_expiration_scheduled();
                debug!(
                    path = %path.display(),
                    deadline = %entry.deadline,
                    backend = self.expiration.backend_name(),
                    "Scheduled expiration"
                );
                Some(entry.deadline)
            }
            Err(err) => {
                self.metrics.record_schedule_failure();
                warn!(path = %path.display(), error = %err, "Failed to schedule expiration");
                None
            }
        }
    }

    /// Walk the tree and summarise it without changing anything.
    pub async fn survey(&mut self) -> Result<TreeSurvey> {
        let scan = self.scan().await?;
        let eligible = scan
            .files
            .iter()
            .filter(|f| !self.rules.is_excluded(&f.path))
            .count();

        Ok(TreeSurvey {
            total_bytes: scan.total_bytes,
            ceiling_bytes: self.ceiling_bytes,
            files: scan.files.len(),
            eligible,
            excluded: scan.files.len() - eligible,
            skipped: scan.skipped,
            oldest_victim: oldest_eligible(&scan, &self.rules).cloned(),
            unscheduled: self.expiration.unscheduled_in(&scan, &self.rules).len(),
        })
    }

    /// Earliest deadline this process must fire itself.
    pub fn next_expiration(&mut self) -> Option<DateTime<Utc>> {
        self.expiration.next_deadline()
    }

    pub fn expires_files(&self) -> bool {
        self.expiration_days.is_some()
    }

    pub fn fires_expirations_in_process(&self) -> bool {
        self.expiration.fires_in_process()
    }

    pub fn is_scheduled(&self, path: &Path) -> bool {
        self.expiration.is_scheduled(path)
    }

    pub fn deadline_for(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.expiration.deadline_for(path)
    }

    /// Incremental running total, if that accounting mode is active.
    pub fn tracked_size(&self) -> Option<u64> {
        self.accountant.running_total()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    pub fn rules(&self) -> &ExclusionRules {
        &self.rules
    }

    pub fn metrics(&self) -> &RetentionMetrics {
        &self.metrics
    }
}

//! Aggregate size of the managed tree.
//!
//! Two strategies share one interface:
//!
//! - **Full walk**: every size check walks the tree. Always exact, O(files).
//! - **Incremental**: a running total seeded from a walk and adjusted by
//!   `+size` on creation and `-size` on successful deletion. It is re-seeded
//!   whenever a walk happens anyway, when drift is detected, and at least
//!   every `resync_interval`, so both strategies converge to the same value
//!   once activity settles.

use std::path::Path;
use std::time::{Duration, Instant};

use common::config::AccountingMode;

use crate::error::Result;
use crate::scan::{TreeScan, scan_tree};

/// Sum of regular file sizes under `root`, symlinks excluded.
pub fn compute_size(root: &Path) -> Result<u64> {
    Ok(scan_tree(root)?.total_bytes)
}

#[derive(Debug)]
pub struct SizeAccountant {
    mode: AccountingMode,
    resync_interval: Duration,
    running_total: Option<u64>,
    seeded_at: Option<Instant>,
    drifted: bool,
}

impl SizeAccountant {
    pub fn new(mode: AccountingMode, resync_interval: Duration) -> Self {
        Self {
            mode,
            resync_interval,
            running_total: None,
            seeded_at: None,
            drifted: false,
        }
    }

    pub fn mode(&self) -> AccountingMode {
        self.mode
    }

    /// Size known without walking the tree, if the strategy allows it.
    ///
    /// Always `None` for full walks. For the incremental strategy, `None`
    /// until seeded, after drift, and once the resync interval has elapsed.
    pub fn cached_size(&self) -> Option<u64> {
        if self.mode != AccountingMode::Incremental || self.drifted {
            return None;
        }
        let seeded_at = self.seeded_at?;
        if seeded_at.elapsed() >= self.resync_interval {
            return None;
        }
        self.running_total
    }

    /// Take a fresh walk as ground truth and return the size to act on.
    pub fn observe_scan(&mut self, scan: &TreeScan) -> u64 {
        if self.mode == AccountingMode::Incremental {
            if let Some(previous) = self.running_total
                && previous != scan.total_bytes
            {
                tracing::debug!(
                    previous,
                    observed = scan.total_bytes,
                    "Running total re-seeded from scan"
                );
            }
            self.running_total = Some(scan.total_bytes);
            self.seeded_at = Some(Instant::now());
            self.drifted = false;
        }
        scan.total_bytes
    }

    pub fn record_created(&mut self, size_bytes: u64) {
        if let Some(total) = self.running_total.as_mut() {
            *total = total.saturating_add(size_bytes);
        }
    }

    /// Subtract a file this process removed. Never goes below zero.
    pub fn record_deleted(&mut self, size_bytes: u64) {
        if let Some(total) = self.running_total.as_mut() {
            *total = total.saturating_sub(size_bytes);
        }
    }

    /// The running total no longer reflects disk; re-seed on next check.
    pub fn mark_drift(&mut self) {
        if self.mode == AccountingMode::Incremental && !self.drifted {
            tracing::debug!("Running total marked for resync");
            self.drifted = true;
        }
    }

    /// Stop trusting the running total and walk on every check from now on.
    ///
    /// Used when creation events stop arriving, since the total can then no
    /// longer see new data.
    pub fn fall_back_to_full_walk(&mut self) {
        if self.mode == AccountingMode::Incremental {
            tracing::warn!("Switching size accounting to full walks");
            self.mode = AccountingMode::FullWalk;
            self.running_total = None;
            self.seeded_at = None;
            self.drifted = false;
        }
    }

    pub fn running_total(&self) -> Option<u64> {
        self.running_total
    }
}

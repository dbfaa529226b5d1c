//! Test configuration builder for creating test setups quickly.

use std::path::Path;
use std::time::Duration;

use crate::config::{AccountingMode, Configuration, OperatingMode};

/// Builder for creating test configurations.
///
/// Starts from [`Configuration::default`] rooted at the given directory, with
/// a short poll interval so daemon tests do not wait on the one-second default.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl TestConfigBuilder {
    pub fn new(root: &Path) -> Self {
        let mut config = Configuration {
            root_path: root.to_path_buf(),
            ..Configuration::default()
        };
        config.retention.poll_interval = Duration::from_millis(20);
        Self { config }
    }

    /// Set the storage ceiling in bytes.
    pub fn with_ceiling(mut self, bytes: u64) -> Self {
        self.config.retention.max_storage_bytes = bytes;
        self
    }

    /// Protect paths ending in any of `suffixes`.
    pub fn with_exclusions(mut self, suffixes: &[&str]) -> Self {
        self.config.retention.exclusion_suffixes =
            suffixes.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Switch to watching mode with the given time-to-live.
    pub fn watching(mut self, expiration_days: u32) -> Self {
        self.config.mode = OperatingMode::Watching;
        self.config.expiration.expiration_days = expiration_days;
        self
    }

    /// Use the running-total accountant.
    pub fn incremental(mut self) -> Self {
        self.config.retention.accounting = AccountingMode::Incremental;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.retention.poll_interval = interval;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.config.retention.dry_run = true;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

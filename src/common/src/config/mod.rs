use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "warden.toml";

/// Prefix for environment overrides, e.g. `WARDEN__RETENTION__DRY_RUN=true`.
pub const ENV_PREFIX: &str = "WARDEN__";

/// Which trigger sources drive the retention engine.
///
/// Both modes run the periodic size check. `Watching` additionally consumes
/// creation events from the filesystem and schedules expirations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Polling,
    Watching,
}

impl OperatingMode {
    /// Whether creation events are consumed from an event source.
    pub fn watches_events(&self) -> bool {
        matches!(self, OperatingMode::Watching)
    }

    /// Whether newly created files receive an expiration deadline.
    pub fn expires_files(&self) -> bool {
        matches!(self, OperatingMode::Watching)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Polling => write!(f, "polling"),
            OperatingMode::Watching => write!(f, "watching"),
        }
    }
}

/// How the engine learns the aggregate size of the tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountingMode {
    /// Walk the whole tree on every size check.
    #[default]
    FullWalk,
    /// Keep a running total, re-seeded from a full walk periodically.
    Incremental,
}

/// Where expiration deadlines are kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationBackendKind {
    /// In-process deadline queue. Lost on restart; rebuilt by reconciliation.
    #[default]
    InProcess,
    /// Host `at` job facility.
    At,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Path suffixes protected from eviction and expiration.
    ///
    /// Env: WARDEN__RETENTION__EXCLUSION_SUFFIXES
    #[serde(default)]
    pub exclusion_suffixes: Vec<String>,

    /// Storage ceiling in bytes.
    ///
    /// Env: WARDEN__RETENTION__MAX_STORAGE_BYTES
    #[serde(default = "default_max_storage_bytes")]
    pub max_storage_bytes: u64,

    /// Interval between periodic size checks.
    ///
    /// Env: WARDEN__RETENTION__POLL_INTERVAL
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Env: WARDEN__RETENTION__ACCOUNTING
    #[serde(default)]
    pub accounting: AccountingMode,

    /// How often the incremental running total is re-seeded from a full walk.
    ///
    /// Env: WARDEN__RETENTION__RESYNC_INTERVAL
    #[serde(with = "humantime_serde", default = "default_resync_interval")]
    pub resync_interval: Duration,

    /// Log deletions without touching the filesystem.
    ///
    /// Env: WARDEN__RETENTION__DRY_RUN
    #[serde(default)]
    pub dry_run: bool,
}

fn default_max_storage_bytes() -> u64 {
    800 * 1024 * 1024 * 1024
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_resync_interval() -> Duration {
    Duration::from_secs(300)
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            exclusion_suffixes: Vec::new(),
            max_storage_bytes: default_max_storage_bytes(),
            poll_interval: default_poll_interval(),
            accounting: AccountingMode::default(),
            resync_interval: default_resync_interval(),
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// Time-to-live of newly created files, in days. Watching mode only.
    ///
    /// Env: WARDEN__EXPIRATION__EXPIRATION_DAYS
    #[serde(default = "default_expiration_days")]
    pub expiration_days: u32,

    /// Env: WARDEN__EXPIRATION__BACKEND
    #[serde(default)]
    pub backend: ExpirationBackendKind,

    /// Interval between sweeps that backfill files missing a deadline.
    ///
    /// Env: WARDEN__EXPIRATION__RECONCILE_INTERVAL
    #[serde(with = "humantime_serde", default = "default_reconcile_interval")]
    pub reconcile_interval: Duration,
}

fn default_expiration_days() -> u32 {
    7
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(3600)
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            expiration_days: default_expiration_days(),
            backend: ExpirationBackendKind::default(),
            reconcile_interval: default_reconcile_interval(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Directory tree kept under the ceiling.
    #[serde(default)]
    pub root_path: PathBuf,
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub expiration: ExpirationConfig,
}

/// Errors that make a configuration unusable. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("root_path is required")]
    MissingRootPath,

    #[error("root_path {0} does not exist")]
    RootPathNotFound(PathBuf),

    #[error("root_path {0} is not a directory")]
    RootPathNotDirectory(PathBuf),

    #[error("Invalid poll interval: {0:?} must be positive")]
    InvalidPollInterval(Duration),

    #[error("Invalid resync interval: {0:?} must be positive")]
    InvalidResyncInterval(Duration),

    #[error("Invalid reconcile interval: {0:?} must be positive")]
    InvalidReconcileInterval(Duration),

    #[error("Incremental accounting needs creation events; use watching mode or full_walk")]
    IncrementalWithoutEvents,

    #[error("expiration_days must be at least 1 in watching mode")]
    InvalidExpirationDays,

    #[error("Exclusion suffixes must not be empty strings")]
    EmptyExclusionSuffix,
}

impl Configuration {
    /// Layered providers: defaults, then the TOML file, then environment.
    pub fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::figment(path).extract().map_err(Box::new)?;
        Ok(config)
    }

    /// Check everything that would otherwise surface as a runtime failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRootPath);
        }
        let metadata = std::fs::metadata(&self.root_path)
            .map_err(|_| ConfigError::RootPathNotFound(self.root_path.clone()))?;
        if !metadata.is_dir() {
            return Err(ConfigError::RootPathNotDirectory(self.root_path.clone()));
        }

        let zero = Duration::ZERO;
        if self.retention.poll_interval <= zero {
            return Err(ConfigError::InvalidPollInterval(
                self.retention.poll_interval,
            ));
        }
        if self.retention.resync_interval <= zero {
            return Err(ConfigError::InvalidResyncInterval(
                self.retention.resync_interval,
            ));
        }
        if self.retention.accounting == AccountingMode::Incremental && !self.mode.watches_events() {
            return Err(ConfigError::IncrementalWithoutEvents);
        }
        if self
            .retention
            .exclusion_suffixes
            .iter()
            .any(|suffix| suffix.is_empty())
        {
            return Err(ConfigError::EmptyExclusionSuffix);
        }

        if self.expiration.reconcile_interval <= zero {
            return Err(ConfigError::InvalidReconcileInterval(
                self.expiration.reconcile_interval,
            ));
        }
        if self.mode.expires_files() && self.expiration.expiration_days == 0 {
            return Err(ConfigError::InvalidExpirationDays);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();

        assert_eq!(config.mode, OperatingMode::Polling);
        assert!(config.retention.exclusion_suffixes.is_empty());
        assert_eq!(config.retention.max_storage_bytes, 858_993_459_200);
        assert_eq!(config.retention.poll_interval, Duration::from_secs(1));
        assert_eq!(config.retention.accounting, AccountingMode::FullWalk);
        assert!(!config.retention.dry_run);
        assert_eq!(config.expiration.expiration_days, 7);
        assert_eq!(config.expiration.backend, ExpirationBackendKind::InProcess);
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.retention.poll_interval, Duration::from_secs(1));
        assert_eq!(config.expiration.reconcile_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_toml_file_and_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                root_path = "/srv/captures"
                mode = "watching"

                [retention]
                exclusion_suffixes = [".keep", ".lock"]
                max_storage_bytes = 4096
                poll_interval = "250ms"
                accounting = "incremental"

                [expiration]
                expiration_days = 3
                backend = "at"
                "#,
            )?;
            jail.set_env("WARDEN__RETENTION__MAX_STORAGE_BYTES", "2048");
            jail.set_env("WARDEN__RETENTION__DRY_RUN", "true");

            let config = Configuration::load().map_err(|e| match e {
                ConfigError::Load(inner) => *inner,
                other => figment::Error::from(other.to_string()),
            })?;

            assert_eq!(config.root_path, PathBuf::from("/srv/captures"));
            assert_eq!(config.mode, OperatingMode::Watching);
            assert_eq!(config.retention.exclusion_suffixes, vec![".keep", ".lock"]);
            assert_eq!(config.retention.max_storage_bytes, 2048);
            assert_eq!(config.retention.poll_interval, Duration::from_millis(250));
            assert_eq!(config.retention.accounting, AccountingMode::Incremental);
            assert!(config.retention.dry_run);
            assert_eq!(config.expiration.expiration_days, 3);
            assert_eq!(config.expiration.backend, ExpirationBackendKind::At);
            Ok(())
        });
    }

    #[test]
    fn test_negative_ceiling_is_a_load_error() {
        Jail::expect_with(|jail| {
            jail.set_env("WARDEN__RETENTION__MAX_STORAGE_BYTES", "-1");
            let result = Configuration::load();
            assert!(matches!(result, Err(ConfigError::Load(_))));
            Ok(())
        });
    }

    #[test]
    fn test_validate_requires_existing_directory() {
        let config = Configuration::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRootPath)
        ));

        let config = Configuration {
            root_path: PathBuf::from("/definitely/not/here/warden"),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RootPathNotFound(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        let config = Configuration {
            root_path: file,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RootPathNotDirectory(_))
        ));

        let config = Configuration {
            root_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Configuration {
            root_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.retention.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval(_))
        ));

        let mut config = Configuration {
            root_path: dir.path().to_path_buf(),
            mode: OperatingMode::Watching,
            ..Default::default()
        };
        config.expiration.expiration_days = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidExpirationDays)
        ));

        // expiration_days is irrelevant when polling
        config.mode = OperatingMode::Polling;
        assert!(config.validate().is_ok());

        config.retention.exclusion_suffixes = vec![String::new()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyExclusionSuffix)
        ));
    }

    #[test]
    fn test_validate_incremental_requires_watching() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration {
            root_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.retention.accounting = AccountingMode::Incremental;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncrementalWithoutEvents)
        ));

        config.mode = OperatingMode::Watching;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_capabilities() {
        assert!(!OperatingMode::Polling.watches_events());
        assert!(!OperatingMode::Polling.expires_files());
        assert!(OperatingMode::Watching.watches_events());
        assert!(OperatingMode::Watching.expires_files());
        assert_eq!(OperatingMode::Watching.to_string(), "watching");
    }
}

//! Warden Retention Library
//!
//! Keeps a directory tree under a storage ceiling by evicting the oldest
//! files first, and optionally expires files a fixed number of days after
//! they appear.
//!
//! Suffix-based exclusion rules protect paths from both. All deletions go
//! through [`RetentionEngine::delete`], and the [`RetentionDaemon`] runs
//! every trigger on a single task.

pub mod accounting;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod event_source;
pub mod exclusion;
pub mod expiration;
pub mod metrics;
pub mod scan;
pub mod selector;

// Re-export commonly used types
pub use accounting::{SizeAccountant, compute_size};
pub use daemon::RetentionDaemon;
pub use engine::{
    CreationOutcome, DeleteOutcome, DeletionCause, RetentionEngine, SizeCheckReport, TreeSurvey,
};
pub use error::{Result, RetentionError};
pub use event_source::{EventSource, FsEvent, WatcherError};
pub use exclusion::{ExclusionRules, is_excluded};
pub use expiration::{
    AtJobBackend, ExpirationBackend, ExpirationEntry, ExpirationError, ExpirationScheduler,
    InProcessBackend,
};
pub use metrics::{MetricsSummary, RetentionMetrics};
pub use scan::{TrackedFile, TreeScan, scan_tree};
pub use selector::{eviction_order, oldest_eligible, select_victim};

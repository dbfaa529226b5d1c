//! Test utilities for warden.
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::TestConfigBuilder;
//!
//! let dir = tempfile::tempdir()?;
//! let config = TestConfigBuilder::new(dir.path())
//!     .with_ceiling(150)
//!     .with_exclusions(&[".keep"])
//!     .build();
//! ```

mod config_builder;

pub use config_builder::TestConfigBuilder;

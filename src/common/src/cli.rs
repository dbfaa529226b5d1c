use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across warden binaries
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Command-line overrides layered on top of file and environment configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Directory tree to keep under the ceiling
    #[arg(value_name = "ROOT_PATH")]
    pub root_path: Option<PathBuf>,

    /// Path suffixes protected from deletion (repeatable)
    #[arg(long = "exclude", value_name = "SUFFIX")]
    pub exclude: Vec<String>,

    /// Storage ceiling in bytes
    #[arg(long, value_name = "BYTES")]
    pub max_storage: Option<u64>,

    /// Expiration time for new files, in days
    #[arg(long, value_name = "DAYS")]
    pub expiration_days: Option<u32>,

    /// Consume filesystem creation events and expire new files
    #[arg(long)]
    pub watch: bool,

    /// Log deletions without performing them
    #[arg(long)]
    pub dry_run: bool,
}

/// Common subcommands available for all binaries
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Start the daemon (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::{Configuration, DEFAULT_CONFIG_FILE, OperatingMode};
    use anyhow::{Context, Result};
    use std::path::Path;
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments.
    ///
    /// `-q`/`-v` take precedence over `RUST_LOG`.
    pub fn init_logging(args: &CommonArgs) {
        let filter = if args.quiet {
            EnvFilter::new("warn")
        } else if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        };

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load_from_path(Path::new(DEFAULT_CONFIG_FILE))
                .context("Failed to load configuration"),
        }
    }

    /// Apply command-line overrides; flags only ever widen the file settings.
    pub fn apply_overrides(config: &mut Configuration, overrides: &OverrideArgs) {
        if let Some(root_path) = &overrides.root_path {
            config.root_path = root_path.clone();
        }
        for suffix in &overrides.exclude {
            if !config.retention.exclusion_suffixes.contains(suffix) {
                config.retention.exclusion_suffixes.push(suffix.clone());
            }
        }
        if let Some(max_storage) = overrides.max_storage {
            config.retention.max_storage_bytes = max_storage;
        }
        if let Some(days) = overrides.expiration_days {
            config.expiration.expiration_days = days;
        }
        if overrides.watch {
            config.mode = OperatingMode::Watching;
        }
        if overrides.dry_run {
            config.retention.dry_run = true;
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Warden Configuration:");
            println!("=====================");
            println!("Root path: {}", config.root_path.display());
            println!("Mode: {}", config.mode);
            println!(
                "Exclusion suffixes: {:?}",
                config.retention.exclusion_suffixes
            );
            println!("Max storage bytes: {}", config.retention.max_storage_bytes);
            println!("Poll interval: {:?}", config.retention.poll_interval);
            println!("Accounting: {:?}", config.retention.accounting);
            println!("Dry run: {}", config.retention.dry_run);

            if config.mode.expires_files() {
                println!("Expiration days: {}", config.expiration.expiration_days);
                println!("Expiration backend: {:?}", config.expiration.backend);
                println!(
                    "Reconcile interval: {:?}",
                    config.expiration.reconcile_interval
                );
            } else {
                println!("Expiration: disabled");
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate().context("Invalid configuration")?;
        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle common CLI commands that don't require starting the daemon
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

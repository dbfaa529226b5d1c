use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::Configuration;
use common::cli::{CommonArgs, CommonCommands, OverrideArgs, utils};
use retention::{RetentionDaemon, RetentionEngine, RetentionMetrics, TreeSurvey};
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - keeps a directory tree under a storage ceiling")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<WardenCommands>,
}

#[derive(Subcommand)]
enum WardenCommands {
    #[command(flatten)]
    Common(CommonCommands),
    /// Report size, eviction candidate and expiration backlog, then exit
    Scan {
        #[arg(long, help = "Show the report in JSON format")]
        json: bool,
    },
}

impl Default for WardenCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

fn print_survey(survey: &TreeSurvey, json: bool) -> Result<()> {
    if json {
        let report = serde_json::json!({
            "total_bytes": survey.total_bytes,
            "ceiling_bytes": survey.ceiling_bytes,
            "over_ceiling": survey.over_ceiling(),
            "files": survey.files,
            "eligible": survey.eligible,
            "excluded": survey.excluded,
            "skipped": survey.skipped,
            "unscheduled": survey.unscheduled,
            "oldest_victim": survey.oldest_victim.as_ref().map(|f| serde_json::json!({
                "path": f.path.display().to_string(),
                "size_bytes": f.size_bytes,
            })),
        });
        let report =
            serde_json::to_string_pretty(&report).context("Failed to serialize scan report")?;
        println!("{report}");
        return Ok(());
    }

    println!("Warden Scan:");
    println!("============");
    println!(
        "Total size: {} bytes (ceiling {} bytes{})",
        survey.total_bytes,
        survey.ceiling_bytes,
        if survey.over_ceiling() { ", OVER" } else { "" }
    );
    println!(
        "Files: {} ({} eligible, {} excluded, {} skipped)",
        survey.files, survey.eligible, survey.excluded, survey.skipped
    );
    match &survey.oldest_victim {
        Some(victim) => println!(
            "Next victim: {} ({} bytes)",
            victim.path.display(),
            victim.size_bytes
        ),
        None => println!("Next victim: none"),
    }
    println!("Unscheduled for expiration: {}", survey.unscheduled);
    Ok(())
}

async fn run_scan(config: &Configuration, json: bool) -> Result<()> {
    let mut engine = RetentionEngine::new(config, RetentionMetrics::new());
    let survey = engine.survey().await.context("Failed to scan root path")?;
    print_survey(&survey, json)
}

async fn run_daemon(config: &Configuration) -> Result<()> {
    let metrics = RetentionMetrics::new();
    let daemon =
        RetentionDaemon::new(config, metrics).context("Failed to start retention daemon")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let daemon_handle = tokio::spawn(daemon.run(shutdown_rx));

    log::info!("Warden running, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    log::info!("Received shutdown signal, stopping warden");
    let _ = shutdown_tx.send(());
    daemon_handle
        .await
        .context("Retention daemon task failed")?;

    log::info!("Warden stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    // File and environment first, then command-line overrides
    let mut config = utils::load_config(cli.common.config.as_ref())?;
    utils::apply_overrides(&mut config, &cli.overrides);

    let command = cli.command.unwrap_or_default();
    if let WardenCommands::Common(ref common_cmd) = command
        && utils::handle_common_command(common_cmd, &config)?
    {
        return Ok(()); // Command handled, exit early
    }

    utils::validate_config(&config)?;

    log::info!("Loaded configuration:");
    log::info!("  Root path: {}", config.root_path.display());
    log::info!("  Mode: {}", config.mode);
    log::info!(
        "  Max storage: {} bytes",
        config.retention.max_storage_bytes
    );

    match command {
        WardenCommands::Scan { json } => run_scan(&config, json).await,
        WardenCommands::Common(_) => run_daemon(&config).await,
    }
}

//! signald - Four-lane traffic signal coordination
//!
//! CLI entry point for running an intersection and inspecting its configuration.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use signald::cli::{Cli, Command, OutputFormat, get_log_path};
use signald::config::Config;
use signald::runtime::{Intersection, IntersectionReport};

fn parse_level(s: &str) -> tracing::Level {
    match s.to_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "INFO" => tracing::Level::INFO,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" => tracing::Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, to_stderr: bool) -> Result<()> {
    // Priority: CLI --log-level > config file > INFO
    let level = cli_log_level
        .or(config_log_level)
        .map(parse_level)
        .unwrap_or(tracing::Level::INFO);
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if to_stderr {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        let log_path = get_log_path();
        if let Some(log_dir) = log_path.parent() {
            fs::create_dir_all(log_dir).context("Failed to create log directory")?;
        }
        let log_file = fs::File::create(&log_path).context("Failed to create log file")?;
        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref(), cli.log_stderr)
        .context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run {
            duration_secs,
            no_authority,
            format,
        }) => cmd_run(config, duration_secs, no_authority, format).await,
        Some(Command::Config) => cmd_config(&config),
        Some(Command::CheckConfig) => cmd_check_config(&config, cli.config.as_ref()),
        None => cmd_run(config, None, false, OutputFormat::Text).await,
    }
}

/// Run the intersection until Ctrl+C or the deadline
async fn cmd_run(
    mut config: Config,
    duration_secs: Option<u64>,
    no_authority: bool,
    format: OutputFormat,
) -> Result<()> {
    debug!(?duration_secs, no_authority, %format, "cmd_run: called");
    if no_authority {
        config.authority.enabled = false;
    }
    config.validate().context("Invalid configuration")?;

    match duration_secs {
        Some(secs) => println!("Running intersection for {}s", secs),
        None => println!("Running intersection (Ctrl+C to stop)"),
    }
    println!("Logs: {}", get_log_path().display());

    let shutdown = async move {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        }
    };

    let report = Intersection::new(config).run(shutdown).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &IntersectionReport) {
    println!();
    println!("{}", "Intersection Summary".bold());
    println!("--------------------");
    let active = report
        .active_lane
        .map(|lane| lane.to_string())
        .unwrap_or_else(|| "none".to_string());
    println!("Active lane:     {}", active.green());
    println!("Handoffs:        {}", report.handoffs.total());
    println!("  Cycle complete: {}", report.handoffs.cycle_complete);
    println!("  Authority red:  {}", report.handoffs.authority_red);
    println!("  Next lane:      {}", report.handoffs.next_lane_ready);
    println!("  Command:        {}", report.handoffs.command);
    let timeouts = report.handoffs.timeout.to_string();
    if report.handoffs.timeout > 0 {
        println!("  Timeout:        {}", timeouts.yellow());
    } else {
        println!("  Timeout:        {}", timeouts);
    }
    println!("Sync offset:     {}ms", report.sync_offset_ms);
    println!(
        "Bus:             {} published, {} delivered, {} dropped",
        report.bus.published, report.bus.delivered, report.bus.dropped
    );
    println!();
    for (lane, counters) in &report.lanes {
        println!(
            "Lane {}: {} frames, {} processed, {} dropped, {} messages ({} rejected)",
            lane,
            counters.frames_captured,
            counters.frames_processed,
            counters.frames_dropped,
            counters.messages_handled,
            counters.messages_rejected
        );
    }
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}

/// Validate the configuration and report the result
fn cmd_check_config(config: &Config, path: Option<&PathBuf>) -> Result<()> {
    debug!(?path, "cmd_check_config: called");
    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults / search path".to_string());
    match config.validate() {
        Ok(()) => {
            println!("{} {}", "ok".green(), source);
            Ok(())
        }
        Err(e) => {
            println!("{} {}: {}", "invalid".red(), source, e);
            Err(e)
        }
    }
}

//! always-active - keeps a Slack session online during working hours
//!
//! This is the main entry point for the always-active binary.
//! The daemon opens the Slack real-time gateway connection while the
//! configured work window is open, keeps it alive, and closes it outside.

mod auth;
mod cache;
mod cli;
mod config;
mod connection;
mod error;
mod logging;
mod protocol;
mod schedule;
mod supervisor;
mod version;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::EndpointCache;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::connection::{ConnectionConfig, ConnectionManager, Credentials};
use crate::error::{Error, Result};
use crate::schedule::{Clock, ScheduleGate, SystemClock};
use crate::supervisor::{Supervisor, SupervisorConfig};

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        version::print_version();
        return Ok(());
    }

    // SLACK_TOKEN and friends usually live in a .env next to the binary
    let dotenv = config::load_dotenv();

    if let Commands::Config { subcommand } = &cli.command {
        logging::init_simple(tracing::Level::WARN)?;
        return handle_config_command(subcommand.clone());
    }

    let config_path = match &cli.command {
        Commands::Run { config, .. } | Commands::Check { config } | Commands::Schedule { config, .. } => {
            config.clone()
        }
        Commands::Version | Commands::Config { .. } => None,
    };

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => exit_with(&e),
    };

    let result = match cli.command {
        Commands::Run { skip_auth, .. } => {
            // The guards must be kept alive for the lifetime of the program
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

            let build = version::build_info();
            info!(
                version = %build.full_version(),
                target = %build.target,
                "Starting always-active"
            );
            if let Some(path) = dotenv {
                info!(path = %path.display(), "Loaded environment file");
            }

            run_daemon(config, skip_auth)
        }
        Commands::Check { .. } => {
            logging::init_simple(cli_level(cli.verbose, cli.quiet))?;
            run_check(&config)
        }
        Commands::Schedule { at, .. } => {
            logging::init_simple(cli_level(cli.verbose, cli.quiet))?;
            print_schedule(&config, at.as_deref())
        }
        // Handled above
        Commands::Version | Commands::Config { .. } => Ok(()),
    };

    if let Err(e) = result {
        error!(error = %e.format_for_log(), "Exiting");
        exit_with(&e);
    }

    Ok(())
}

fn exit_with(e: &Error) -> ! {
    eprint!("{}", e.format_for_terminal());
    std::process::exit(e.exit_code());
}

fn cli_level(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::WARN,
        (false, 1) => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    }
}

// ─────────────────────────────────────────────────────────────────
// Daemon
// ─────────────────────────────────────────────────────────────────

/// Run the supervisor until Ctrl+C or SIGTERM
fn run_daemon(config: AppConfig, skip_auth: bool) -> Result<()> {
    config.require_credentials()?;
    let gate = ScheduleGate::new(config.schedule_window()?);

    info!(
        window = %gate.window(),
        endpoint = %config.connection.endpoint_base,
        cache = %config.cache.path,
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("always-active")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async_main(config, gate, skip_auth))
}

async fn async_main(config: AppConfig, gate: ScheduleGate, skip_auth: bool) -> Result<()> {
    let credentials = credentials(&config);

    if config.auth.enabled && !skip_auth {
        auth::check_session(&config.auth, &credentials).await?;
    }

    let cache = Arc::new(open_cache(config.cache_path()));
    let manager = Arc::new(ConnectionManager::new(
        connection_config(&config),
        credentials,
        cache,
    ));

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let supervisor = Supervisor::new(
        gate,
        manager,
        Arc::new(SystemClock),
        supervisor_config(&config),
        shutdown,
    );

    supervisor.run().await?;
    info!("Shutdown complete");
    Ok(())
}

fn credentials(config: &AppConfig) -> Credentials {
    Credentials {
        token: config.credentials.token.clone(),
        cookie: config.credentials.cookie.clone(),
    }
}

fn connection_config(config: &AppConfig) -> ConnectionConfig {
    let c = &config.connection;
    ConnectionConfig {
        endpoint_base: c.endpoint_base.clone(),
        gateway_server: c.gateway_server.clone(),
        origin: c.origin.clone(),
        use_reconnect_hint: c.use_reconnect_hint,
        handshake_timeout: Duration::from_secs(c.handshake_timeout_secs),
        keepalive_interval: Duration::from_secs(c.keepalive_interval_secs),
        refresh_interval: Duration::from_secs(c.refresh_interval_secs),
        read_timeout: Duration::from_secs(c.read_timeout_secs),
    }
}

fn supervisor_config(config: &AppConfig) -> SupervisorConfig {
    SupervisorConfig {
        retry_backoff: Duration::from_secs(config.connection.retry_backoff_secs),
        idle_poll: Duration::from_secs(config.connection.idle_poll_secs),
    }
}

/// An unreadable cache costs one reconnect hint, not the session
fn open_cache(path: &Path) -> EndpointCache {
    match EndpointCache::open(path) {
        Ok(cache) => cache,
        Err(e) => {
            warn!(error = %e, "Endpoint cache unreadable, starting without it");
            EndpointCache::empty(path)
        }
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl+C stops the daemon");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ─────────────────────────────────────────────────────────────────
// One-shot Commands
// ─────────────────────────────────────────────────────────────────

/// Run the session check and report who the credentials belong to
fn run_check(config: &AppConfig) -> Result<()> {
    config.require_credentials()?;
    if config.auth.url.is_empty() {
        return Err(Error::config_field_invalid(
            "auth.url",
            "set auth.url or ALWAYS_ACTIVE_AUTH_URL to the workspace's client.userBoot endpoint",
        ));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;

    let boot = runtime.block_on(auth::check_session(&config.auth, &credentials(config)))?;

    let team = boot.team.as_ref().map(|t| t.name.as_str()).unwrap_or("unknown team");
    println!("Session OK: signed in as {} ({})", boot.display_name(), team);
    Ok(())
}

/// Print the window, its state at `at` (default now) and the next change
fn print_schedule(config: &AppConfig, at: Option<&str>) -> Result<()> {
    let gate = ScheduleGate::new(config.schedule_window()?);

    let now: DateTime<Utc> = match at {
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Config(format!("Invalid --at value '{}': {}", value, e)))?,
        None => SystemClock.now(),
    };

    let active = gate.is_active(now);
    let next = gate.next_transition(now);

    println!("Window:      {}", gate.window());
    println!("At:          {}", gate.format_local(now));
    println!("Status:      {}", if active { "active" } else { "inactive" });
    println!(
        "{}  {} [{}]",
        if active { "Goes offline:" } else { "Goes online: " },
        gate.format_local(next),
        next.to_rfc3339()
    );
    Ok(())
}

/// Handle config subcommands
fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = AppConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg.redacted())?);
        }
        ConfigSubcommand::Init { path, force } => {
            config::init_config(path.as_deref(), force)?;
        }
        ConfigSubcommand::Validate { config } => match AppConfig::load(config.as_deref()) {
            Ok(cfg) => {
                println!("Configuration is valid.");
                if let Ok(window) = cfg.schedule_window() {
                    println!("Schedule: {}", window);
                }
                if cfg.require_credentials().is_err() {
                    println!("Note: SLACK_TOKEN / SLACK_COOKIE are not set; 'run' will refuse to start.");
                }
            }
            Err(e) => exit_with(&e),
        },
    }

    Ok(())
}

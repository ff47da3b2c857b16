//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for always-active.

use clap::{Parser, Subcommand};

/// always-active - keeps a Slack session online during working hours
///
/// Holds the real-time gateway connection open inside the configured
/// weekly window and drops it outside, reconnecting on failure.
#[derive(Parser, Debug)]
#[command(name = "always-active")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon (stays online during working hours)
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "ALWAYS_ACTIVE_CONFIG")]
        config: Option<String>,

        /// Skip the startup session check even if enabled
        #[arg(long)]
        skip_auth: bool,
    },

    /// Check that the token and cookie are still accepted
    Check {
        /// Path to configuration file
        #[arg(short, long, env = "ALWAYS_ACTIVE_CONFIG")]
        config: Option<String>,
    },

    /// Show whether the schedule is active and when it next changes
    Schedule {
        /// Path to configuration file
        #[arg(short, long, env = "ALWAYS_ACTIVE_CONFIG")]
        config: Option<String>,

        /// Evaluate at this instant instead of now (RFC 3339)
        #[arg(long)]
        at: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration (credentials masked)
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

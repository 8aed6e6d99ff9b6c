//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::Snowflake;

/// Guild Backup - Export Discord guilds into browsable archives.
///
/// Quick start: guild-backup init | backup | daemon
#[derive(Parser, Debug)]
#[command(name = "guild-backup")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Config file (default: ~/.guild-backup/config.toml).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up guilds now.
    Backup {
        /// Guild ID to back up (repeatable; default: configured guilds).
        #[arg(short, long = "guild")]
        guilds: Vec<Snowflake>,
    },

    /// Run scheduled backups until interrupted.
    Daemon,

    /// Show or change the output formats.
    Formats {
        /// Comma-separated formats to persist, e.g. json,html.
        #[arg(long)]
        set: Option<String>,
    },

    /// Show the configured schedule and its next firing.
    Schedule,

    /// List backup archives.
    List,

    /// Delete archives older than the retention window.
    Prune {
        /// Retention in days (default: backup.retention_days).
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Create the default config file.
    Init,
}

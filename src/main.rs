//! Guild Backup - Export Discord guilds into portable, browsable archives.
//!
//! Each run captures a guild's structure, members, emoji and full message
//! history into JSON/TXT/HTML files, downloads attachments next to them and
//! packs the run directory into a zip archive.
//!
//! QUICK START:
//!   guild-backup init                    # Write ~/.guild-backup/config.toml
//!   guild-backup backup                  # Back up configured guilds now
//!   guild-backup backup -g <guild_id>    # Back up one guild
//!   guild-backup daemon                  # Run scheduled backups
//!   guild-backup formats --set json,html # Change output formats
//!   guild-backup list                    # Show archives

mod application;
mod cli;
mod domain;
mod infrastructure;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use application::{run_worker, ArchiveStore, BackupTrigger, Orchestrator, RunOptions, Scheduler};
use cli::{Cli, Commands};
use domain::{AppConfig, AppError, FormatSet, Schedule, Snowflake};
use infrastructure::{
    config_file_path, ensure_config_exists, load_config, save_config, DiscordHttp, GuildApi,
};

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Main application logic.
fn run(cli: Cli) -> domain::Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init => cmd_init(config_path)?,
        Commands::Formats { set } => cmd_formats(config_path, set.as_deref())?,
        Commands::Schedule => cmd_schedule(&load_config(config_path)?),
        Commands::List => cmd_list(&load_config(config_path)?)?,
        Commands::Prune { days } => cmd_prune(&load_config(config_path)?, days)?,
        Commands::Backup { guilds } => {
            let config = load_config(config_path)?;
            runtime()?.block_on(cmd_backup(&config, guilds))?;
        }
        Commands::Daemon => {
            let config = load_config(config_path)?;
            runtime()?.block_on(cmd_daemon(config))?;
        }
    }

    Ok(())
}

fn runtime() -> domain::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::io("Failed to start async runtime", e))
}

/// Build the Discord client from config.
fn connect(config: &AppConfig) -> domain::Result<Arc<dyn GuildApi>> {
    let token = config
        .discord
        .resolve_token()
        .ok_or_else(|| AppError::Config {
            message: format!(
                "No bot token: set {} or discord.token in the config file",
                config.discord.token_env
            ),
        })?;

    Ok(Arc::new(DiscordHttp::new(token, &config.discord.api_base)?))
}

/// Explicit guilds, else configured guilds, else every guild the bot is in.
async fn resolve_guilds(
    api: &dyn GuildApi,
    config: &AppConfig,
    explicit: Vec<Snowflake>,
) -> domain::Result<Vec<Snowflake>> {
    if !explicit.is_empty() {
        return Ok(explicit);
    }
    if !config.discord.guild_ids.is_empty() {
        return Ok(config.discord.guild_ids.clone());
    }
    api.current_guild_ids().await
}

/// Manual backup command; runs go through the same worker queue as the daemon.
async fn cmd_backup(config: &AppConfig, explicit: Vec<Snowflake>) -> domain::Result<()> {
    let api = connect(config)?;
    let guilds = resolve_guilds(api.as_ref(), config, explicit).await?;
    if guilds.is_empty() {
        return Err(AppError::Config {
            message: "No guilds to back up".into(),
        });
    }

    let orchestrator = Orchestrator::new(api, RunOptions::from(&config.backup));
    let (tx, rx) = mpsc::channel(guilds.len());
    let worker = tokio::spawn(run_worker(orchestrator, rx, config.backup.retention_days));

    let mut replies = Vec::with_capacity(guilds.len());
    for guild_id in guilds {
        let (trigger, reply) = BackupTrigger::manual(guild_id);
        tx.send(trigger).await.map_err(|_| AppError::Remote {
            message: "Backup worker stopped".into(),
        })?;
        replies.push((guild_id, reply));
    }
    drop(tx);

    let mut failures = 0;
    for (guild_id, reply) in replies {
        let result = reply.await.unwrap_or_else(|_| {
            Err(AppError::Remote {
                message: "Backup worker stopped before replying".into(),
            })
        });
        match result {
            Ok(report) => println!(
                "{} {} → {}",
                "✓".green().bold(),
                report.guild_name.cyan(),
                report.archive_path.display()
            ),
            Err(e) => {
                failures += 1;
                eprintln!("{} guild {}: {}", "✗".red().bold(), guild_id, e);
            }
        }
    }

    if let Err(e) = worker.await {
        tracing::warn!(error = %e, "Backup worker ended abnormally");
    }

    if failures > 0 {
        return Err(AppError::Remote {
            message: format!("{failures} backup(s) failed"),
        });
    }

    Ok(())
}

/// Scheduler + worker until Ctrl-C.
async fn cmd_daemon(config: AppConfig) -> domain::Result<()> {
    let schedule = Schedule::from_setting(config.schedule.mode.as_ref());
    if !schedule.is_enabled() {
        println!("{} Scheduled backups are disabled in the config", "!".yellow().bold());
        return Ok(());
    }

    let api = connect(&config)?;
    let guilds = resolve_guilds(api.as_ref(), &config, Vec::new()).await?;
    let orchestrator = Orchestrator::new(api, RunOptions::from(&config.backup));

    let (tx, rx) = mpsc::channel(guilds.len().max(1) * 2);
    let worker = tokio::spawn(run_worker(orchestrator, rx, config.backup.retention_days));
    let scheduler = tokio::spawn(Scheduler::new(schedule, guilds.clone(), tx).run());

    println!(
        "{} schedule {} for {} guild(s); Ctrl-C to stop",
        "▶".green().bold(),
        schedule.to_string().cyan(),
        guilds.len()
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::io("Failed to listen for Ctrl-C", e))?;

    tracing::info!("Shutting down");
    scheduler.abort();
    worker.abort();

    Ok(())
}

/// Show or persist the selected format set.
fn cmd_formats(explicit: Option<&Path>, set: Option<&str>) -> domain::Result<()> {
    let mut config = load_config(explicit)?;

    if let Some(list) = set {
        let formats =
            FormatSet::parse_list(list).map_err(|message| AppError::Config { message })?;
        if formats.is_empty() {
            return Err(AppError::Config {
                message: "At least one format is required".into(),
            });
        }

        config.backup.formats = formats;
        let path = config_file_path(explicit);
        save_config(&config, &path)?;
        println!("{} formats set to {}", "✓".green().bold(), config.backup.formats);
    } else {
        println!("{}", config.backup.formats);
    }

    Ok(())
}

/// Show the parsed schedule and its next firing.
fn cmd_schedule(config: &AppConfig) {
    let schedule = Schedule::from_setting(config.schedule.mode.as_ref());
    println!("{} {}", "Schedule:".bold(), schedule);

    match schedule.next_after(chrono::Local::now().naive_local()) {
        Some(next) => println!("{} {}", "Next run:".bold(), next.format("%Y-%m-%d %H:%M")),
        None => println!("{} -", "Next run:".bold()),
    }
}

/// List archives as a table.
fn cmd_list(config: &AppConfig) -> domain::Result<()> {
    let archives = ArchiveStore::new(&config.backup.root).list()?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Archive", "Created", "Size"]);

    for archive in &archives {
        table.add_row(vec![
            archive.name.clone(),
            archive
                .modified_utc()
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            archive.size_human(),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "Total: {} archive(s) in {}",
        archives.len(),
        config.backup.root.display()
    );

    Ok(())
}

/// Prune old archives.
fn cmd_prune(config: &AppConfig, days: Option<u32>) -> domain::Result<()> {
    let days = days.unwrap_or(config.backup.retention_days);
    if days == 0 {
        println!("Retention is 0 days; nothing pruned");
        return Ok(());
    }

    let result = ArchiveStore::new(&config.backup.root).prune(days)?;
    println!(
        "{} deleted {} archive(s), freed {}",
        "✓".green().bold(),
        result.deleted_count,
        result.freed_human()
    );

    Ok(())
}

/// Write the default config file.
fn cmd_init(explicit: Option<&Path>) -> domain::Result<()> {
    let path = config_file_path(explicit);

    if ensure_config_exists(&path)? {
        println!("{} created {}", "✓".green().bold(), path.display());
    } else {
        println!("Config already exists: {}", path.display());
    }

    Ok(())
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

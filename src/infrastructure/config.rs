//! Configuration file management.
//!
//! Handles loading and saving TOML configuration files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# Guild Backup Configuration
# Auto-generated - edit as needed

[backup]
# Directory receiving run directories and zip archives
root = "backups"

# Output formats per channel/thread: json, txt, html
formats = ["json", "txt", "html"]

# Download message attachments next to the rendered files
download_attachments = true

# Download custom emoji images
download_emojis = false

# Maximum concurrent downloads per channel or thread
max_concurrent_downloads = 8

# Delete archives older than this many days (0 = keep everything)
retention_days = 0

[schedule]
# false, "hourly", "daily@HH:MM" or "weekly@<day>@HH:MM"
mode = "daily@03:00"

[discord]
# Environment variable holding the bot token
token_env = "DISCORD_TOKEN"

# Guilds to back up (empty = every guild the bot is in)
guild_ids = []
"#;

/// Resolve the config path: explicit override or the default location.
#[must_use]
pub fn config_file_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(AppConfig::default_config_path, Path::to_path_buf)
}

/// Load configuration from file or fall back to defaults.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let config_path = config_file_path(explicit);

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else if explicit.is_some() {
        Err(AppError::Config {
            message: format!("Config file not found: {}", config_path.display()),
        })
    } else {
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Save configuration to file.
///
/// # Errors
/// Returns error if file cannot be written.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })?;

    super::write_atomic_blocking(path, content.as_bytes())?;

    tracing::info!(path = %path.display(), "Configuration saved");

    Ok(())
}

/// Create default configuration file if it doesn't exist.
///
/// Returns whether a new file was written.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| AppError::io("Failed to create default config", e))?;

    tracing::info!(path = %path.display(), "Created default configuration");

    Ok(true)
}

//! Configuration consumed by the backup pipeline.
//!
//! Loaded from TOML by the infrastructure layer; the pipeline only ever sees
//! the resolved values passed down per run.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Output formats the renderer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Indented JSON record list.
    Json,
    /// One line per message.
    Txt,
    /// Styled HTML page.
    Html,
}

impl OutputFormat {
    /// File extension for this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Txt => "txt",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "txt" | "text" => Ok(Self::Txt),
            "html" => Ok(Self::Html),
            _ => Err(format!("Unknown format: {s}. Use: json, txt, html")),
        }
    }
}

/// The selected subset of output formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatSet(BTreeSet<OutputFormat>);

impl FormatSet {
    /// Build from any iterator of formats.
    pub fn new(formats: impl IntoIterator<Item = OutputFormat>) -> Self {
        Self(formats.into_iter().collect())
    }

    /// Parse a comma-separated list such as `json,html`.
    ///
    /// # Errors
    /// Returns the first unknown format name.
    pub fn parse_list(list: &str) -> Result<Self, String> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn iter(&self) -> impl Iterator<Item = OutputFormat> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for FormatSet {
    fn default() -> Self {
        Self::new([OutputFormat::Json, OutputFormat::Txt, OutputFormat::Html])
    }
}

impl fmt::Display for FormatSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(OutputFormat::extension).collect();
        f.write_str(&names.join(","))
    }
}

/// Backup output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory that receives run directories and archives.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Formats written for each channel and thread.
    #[serde(default)]
    pub formats: FormatSet,

    /// Whether message attachments are downloaded.
    #[serde(default = "default_true")]
    pub download_attachments: bool,

    /// Whether custom emoji images are downloaded.
    #[serde(default)]
    pub download_emojis: bool,

    /// Cap on in-flight downloads per materialize call.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Archives older than this many days are pruned; 0 keeps everything.
    #[serde(default)]
    pub retention_days: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            formats: FormatSet::default(),
            download_attachments: true,
            download_emojis: false,
            max_concurrent_downloads: default_max_concurrent_downloads(),
            retention_days: 0,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("backups")
}

const fn default_true() -> bool {
    true
}

const fn default_max_concurrent_downloads() -> usize {
    8
}

/// Raw schedule value: `false` or a schedule string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSetting {
    Flag(bool),
    Text(String),
}

/// Recurring backup configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Absent or `false` disables the scheduler.
    #[serde(default)]
    pub mode: Option<ScheduleSetting>,
}

/// Remote platform access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Environment variable holding the bot token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Inline token; the environment variable wins when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Guilds to back up; empty means every guild the bot is in.
    #[serde(default)]
    pub guild_ids: Vec<crate::domain::Snowflake>,

    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            token: None,
            guild_ids: Vec::new(),
            api_base: default_api_base(),
        }
    }
}

fn default_token_env() -> String {
    "DISCORD_TOKEN".to_string()
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

impl DiscordConfig {
    /// Resolve the bot token from the environment or the config file.
    #[must_use]
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.token.clone())
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub discord: DiscordConfig,
}

impl AppConfig {
    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".guild-backup")
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.backup.root, PathBuf::from("backups"));
        assert!(config.backup.download_attachments);
        assert!(!config.backup.download_emojis);
        assert_eq!(config.backup.max_concurrent_downloads, 8);
        assert!(config.schedule.mode.is_none());
        assert_eq!(config.backup.formats.to_string(), "json,txt,html");
    }

    #[test]
    fn test_format_set_parse_list() {
        let set = FormatSet::parse_list("html, json").unwrap();
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![OutputFormat::Json, OutputFormat::Html]
        );
        assert!(FormatSet::parse_list("json,pdf").is_err());
        assert!(FormatSet::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_schedule_setting_accepts_bool_or_string() {
        let off: ScheduleConfig = toml::from_str("mode = false").unwrap();
        assert_eq!(off.mode, Some(ScheduleSetting::Flag(false)));

        let daily: ScheduleConfig = toml::from_str("mode = \"daily@04:15\"").unwrap();
        assert_eq!(daily.mode, Some(ScheduleSetting::Text("daily@04:15".into())));

        let absent: ScheduleConfig = toml::from_str("").unwrap();
        assert!(absent.mode.is_none());
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Txt)));
        assert!("markdown".parse::<OutputFormat>().is_err());
    }
}

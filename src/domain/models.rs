//! Canonical records produced by a backup run.
//!
//! Every exporter works on these shapes, never on the remote platform's
//! payloads. Serialized field names are the on-disk archive format.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Author tag used when the remote account no longer exists.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Platform snowflake identifier.
///
/// The REST API sends ids as strings; archives store them as numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(transparent)]
pub struct Snowflake(pub u64);

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => s
                .parse()
                .map(Self)
                .map_err(|_| serde::de::Error::custom(format!("invalid snowflake: {s}"))),
        }
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// A file referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub url: String,
    pub filename: String,
}

impl AttachmentRef {
    /// Collision-safe on-disk name: `{message_id}_{index}_{basename}`.
    ///
    /// The basename comes from the URL path, not the display filename, so it
    /// is stable regardless of what the uploader called the file.
    #[must_use]
    pub fn local_name(&self, message_id: Snowflake, index: usize) -> String {
        format!("{message_id}_{index}_{}", url_basename(&self.url))
    }
}

/// Last path segment of a URL, ignoring query and fragment.
#[must_use]
pub fn url_basename(url: &str) -> String {
    let path = reqwest::Url::parse(url).map_or_else(
        |_| {
            url.split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string()
        },
        |parsed| parsed.path().to_string(),
    );

    let name = path.rsplit('/').next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        "file".to_string()
    } else {
        name.to_string()
    }
}

/// A user who added a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionUser {
    pub id: Snowflake,
    pub name: String,
}

/// One emoji's reactions on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    /// Unicode emoji, or `name:id` for custom emoji.
    pub emoji: String,
    pub users: Vec<ReactionUser>,
}

/// The canonical message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Snowflake,
    pub author: String,
    pub content: String,
    /// Platform-generated notice text for non-user messages.
    pub system_content: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub webhook: bool,
    pub reply_to: Option<Snowflake>,
    pub attachments: Vec<AttachmentRef>,
    /// Passed through verbatim.
    pub embeds: Vec<serde_json::Value>,
    pub stickers: Vec<String>,
    pub reactions: Vec<ReactionRecord>,
    pub pinned: bool,
}

impl MessageRecord {
    /// Text shown for the message: user content, or the system notice.
    #[must_use]
    pub fn display_text(&self) -> &str {
        if self.content.is_empty() {
            self.system_content.as_deref().unwrap_or_default()
        } else {
            &self.content
        }
    }
}

/// Channel kinds kept in the structure snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Voice => write!(f, "voice"),
        }
    }
}

/// What a permission overwrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Role,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteRecord {
    pub target_id: Snowflake,
    pub target_name: String,
    pub target_type: TargetKind,
    pub allow: u64,
    pub deny: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: Snowflake,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: Snowflake,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub parent_id: Option<Snowflake>,
    pub parent_name: Option<String>,
    pub sync_with_category: bool,
    pub overwrites: Vec<OverwriteRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: Snowflake,
    pub name: String,
    pub permissions: Vec<String>,
}

/// The structural half of a workspace snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDoc {
    pub guild_id: Snowflake,
    pub guild_name: String,
    pub categories: Vec<CategoryRecord>,
    pub channels: Vec<ChannelRecord>,
    pub roles: Vec<RoleRecord>,
}

/// Presence status; a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    Offline,
    #[default]
    Unknown,
}

impl PresenceStatus {
    /// Map a platform status string, falling back to `Unknown`.
    #[must_use]
    pub fn from_platform(value: Option<&str>) -> Self {
        match value.map(str::to_ascii_lowercase).as_deref() {
            Some("online") => Self::Online,
            Some("idle") => Self::Idle,
            Some("dnd") => Self::Dnd,
            Some("offline" | "invisible") => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: Snowflake,
    pub name: String,
    pub discriminator: String,
    pub nickname: Option<String>,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiRecord {
    pub id: Snowflake,
    pub name: String,
    pub url: String,
    pub animated: bool,
}

impl EmojiRecord {
    /// Image extension chosen by the URL suffix.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        if self.animated {
            "gif"
        } else {
            "png"
        }
    }
}

/// Summary of one finished run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub guild_name: String,
    pub output_root: PathBuf,
    pub archive_path: PathBuf,
    pub channels: usize,
    pub threads: usize,
    pub messages: usize,
    pub attachments_saved: usize,
    pub attachments_failed: usize,
}

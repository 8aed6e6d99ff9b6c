//! Discord REST payloads.
//!
//! Only the fields the backup reads are modeled; everything else in the
//! response is ignored by serde.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::domain::Snowflake;

pub const GUILD_TEXT: u8 = 0;
pub const GUILD_VOICE: u8 = 2;
pub const GUILD_CATEGORY: u8 = 4;
pub const GUILD_ANNOUNCEMENT: u8 = 5;
pub const GUILD_STAGE_VOICE: u8 = 13;

/// Overwrite target tags as sent by the API.
pub const OVERWRITE_ROLE: u8 = 0;
pub const OVERWRITE_MEMBER: u8 = 1;

/// Permission bitsets arrive as decimal strings.
fn bitset<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid permission bitset: {s}"))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiGuild {
    pub id: Snowflake,
    pub name: String,
}

/// Entry of `/users/@me/guilds`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPartialGuild {
    pub id: Snowflake,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiAttachment {
    pub filename: String,
    pub url: String,
}

/// Emoji as embedded in a reaction.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiReactionEmoji {
    #[serde(default)]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiReaction {
    pub emoji: ApiReactionEmoji,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessageReference {
    #[serde(default)]
    pub message_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiStickerItem {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub author: Option<ApiUser>,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub webhook_id: Option<Snowflake>,
    #[serde(default)]
    pub message_reference: Option<ApiMessageReference>,
    #[serde(default)]
    pub attachments: Vec<ApiAttachment>,
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
    #[serde(default)]
    pub sticker_items: Vec<ApiStickerItem>,
    #[serde(default)]
    pub reactions: Vec<ApiReaction>,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ApiOverwrite {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(deserialize_with = "bitset")]
    pub allow: u64,
    #[serde(deserialize_with = "bitset")]
    pub deny: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiThreadMetadata {
    #[serde(default)]
    pub archive_timestamp: Option<DateTime<Utc>>,
}

/// Guild channel, category or thread.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiChannel {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub permission_overwrites: Vec<ApiOverwrite>,
    #[serde(default)]
    pub thread_metadata: Option<ApiThreadMetadata>,
}

impl ApiChannel {
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRole {
    pub id: Snowflake,
    pub name: String,
    #[serde(deserialize_with = "bitset")]
    pub permissions: u64,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMember {
    #[serde(default)]
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub nick: Option<String>,
    /// Only present when the roster comes from a presence-aware source.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEmoji {
    #[serde(default)]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

/// Response of the thread list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiThreadList {
    #[serde(default)]
    pub threads: Vec<ApiChannel>,
    #[serde(default)]
    pub has_more: bool,
}

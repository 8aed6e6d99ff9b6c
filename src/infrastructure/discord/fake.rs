//! In-memory guild for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use super::models::{
    ApiAttachment, ApiChannel, ApiEmoji, ApiGuild, ApiMember, ApiMessage, ApiOverwrite,
    ApiReaction, ApiReactionEmoji, ApiRole, ApiUser, GUILD_CATEGORY, GUILD_TEXT,
};
use super::{ArchivedScope, GuildApi};
use crate::domain::{AppError, Result, Snowflake};

/// Scriptable [`GuildApi`] backed by plain collections.
pub struct FakeGuild {
    pub guild: ApiGuild,
    pub channels: Vec<ApiChannel>,
    pub roles: Vec<ApiRole>,
    pub members: Vec<ApiMember>,
    pub emojis: Vec<ApiEmoji>,
    pub active_threads: Vec<ApiChannel>,
    pub archived: HashMap<(Snowflake, ArchivedScope), Vec<ApiChannel>>,
    pub histories: HashMap<Snowflake, Vec<ApiMessage>>,
    /// History reads past this many items fail for the given source.
    pub fail_after: HashMap<Snowflake, usize>,
    pub reaction_users: HashMap<(Snowflake, String), Vec<ApiUser>>,
    pub failing_reactions: Vec<(Snowflake, String)>,
    pub blobs: HashMap<String, Vec<u8>>,
    pub page_size: usize,
    pub fail_structure: bool,
    /// Each blob fetch takes this long.
    pub fetch_delay: Option<std::time::Duration>,
    pub fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeGuild {
    pub fn new(name: &str) -> Self {
        Self {
            guild: ApiGuild {
                id: Snowflake(1),
                name: name.to_string(),
            },
            channels: Vec::new(),
            roles: Vec::new(),
            members: Vec::new(),
            emojis: Vec::new(),
            active_threads: Vec::new(),
            archived: HashMap::new(),
            histories: HashMap::new(),
            fail_after: HashMap::new(),
            reaction_users: HashMap::new(),
            failing_reactions: Vec::new(),
            blobs: HashMap::new(),
            page_size: 100,
            fail_structure: false,
            fetch_delay: None,
            fetched: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    /// Most blob fetches that were ever running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

pub fn user(id: u64, name: &str) -> ApiUser {
    ApiUser {
        id: Snowflake(id),
        username: name.to_string(),
        discriminator: Some("0".to_string()),
    }
}

/// Plain user message; `id` doubles as minutes after [`base_time`].
pub fn message(id: u64, author: &str, content: &str) -> ApiMessage {
    ApiMessage {
        id: Snowflake(id),
        kind: 0,
        author: Some(user(500, author)),
        content: content.to_string(),
        timestamp: base_time() + Duration::minutes(i64::try_from(id).unwrap()),
        webhook_id: None,
        message_reference: None,
        attachments: Vec::new(),
        embeds: Vec::new(),
        sticker_items: Vec::new(),
        reactions: Vec::new(),
        pinned: false,
    }
}

pub fn with_attachment(mut msg: ApiMessage, url: &str, filename: &str) -> ApiMessage {
    msg.attachments.push(ApiAttachment {
        filename: filename.to_string(),
        url: url.to_string(),
    });
    msg
}

pub fn with_reaction(mut msg: ApiMessage, emoji: &str, count: u64) -> ApiMessage {
    msg.reactions.push(ApiReaction {
        emoji: ApiReactionEmoji {
            id: None,
            name: Some(emoji.to_string()),
        },
        count,
    });
    msg
}

pub fn channel(id: u64, name: &str, kind: u8, parent: Option<u64>) -> ApiChannel {
    ApiChannel {
        id: Snowflake(id),
        kind,
        name: Some(name.to_string()),
        parent_id: parent.map(Snowflake),
        position: i64::try_from(id).unwrap(),
        permission_overwrites: Vec::new(),
        thread_metadata: None,
    }
}

pub fn text_channel(id: u64, name: &str, parent: Option<u64>) -> ApiChannel {
    channel(id, name, GUILD_TEXT, parent)
}

pub fn category(id: u64, name: &str) -> ApiChannel {
    channel(id, name, GUILD_CATEGORY, None)
}

pub fn thread(id: u64, name: &str, parent: u64) -> ApiChannel {
    channel(id, name, 11, Some(parent))
}

pub fn overwrite(id: u64, kind: u8, allow: u64, deny: u64) -> ApiOverwrite {
    ApiOverwrite {
        id: Snowflake(id),
        kind,
        allow,
        deny,
    }
}

pub fn role(id: u64, name: &str, permissions: u64) -> ApiRole {
    ApiRole {
        id: Snowflake(id),
        name: name.to_string(),
        permissions,
        position: 0,
    }
}

pub fn member(id: u64, name: &str, nick: Option<&str>) -> ApiMember {
    ApiMember {
        user: Some(user(id, name)),
        nick: nick.map(str::to_string),
        status: None,
    }
}

fn structure_error() -> AppError {
    AppError::http_status("structure unavailable", 503)
}

#[async_trait]
impl GuildApi for FakeGuild {
    async fn current_guild_ids(&self) -> Result<Vec<Snowflake>> {
        Ok(vec![self.guild.id])
    }

    async fn guild(&self, guild_id: Snowflake) -> Result<ApiGuild> {
        if guild_id == self.guild.id {
            Ok(self.guild.clone())
        } else {
            Err(AppError::http_status(format!("unknown guild {guild_id}"), 404))
        }
    }

    async fn channels(&self, _guild_id: Snowflake) -> Result<Vec<ApiChannel>> {
        if self.fail_structure {
            return Err(structure_error());
        }
        Ok(self.channels.clone())
    }

    async fn roles(&self, _guild_id: Snowflake) -> Result<Vec<ApiRole>> {
        Ok(self.roles.clone())
    }

    async fn members(&self, _guild_id: Snowflake) -> Result<Vec<ApiMember>> {
        Ok(self.members.clone())
    }

    async fn emojis(&self, _guild_id: Snowflake) -> Result<Vec<ApiEmoji>> {
        Ok(self.emojis.clone())
    }

    async fn active_threads(&self, _guild_id: Snowflake) -> Result<Vec<ApiChannel>> {
        Ok(self.active_threads.clone())
    }

    async fn archived_threads(
        &self,
        channel_id: Snowflake,
        scope: ArchivedScope,
    ) -> Result<Vec<ApiChannel>> {
        if scope == ArchivedScope::Private && !self.archived.contains_key(&(channel_id, scope)) {
            return Err(AppError::http_status("Missing Access", 403));
        }
        Ok(self
            .archived
            .get(&(channel_id, scope))
            .cloned()
            .unwrap_or_default())
    }

    async fn history_page(
        &self,
        source_id: Snowflake,
        after: Option<Snowflake>,
    ) -> Result<Vec<ApiMessage>> {
        let all = self.histories.get(&source_id).cloned().unwrap_or_default();
        let start = after.map_or(0, |after| all.iter().take_while(|m| m.id <= after).count());

        let mut end = (start + self.page_size).min(all.len());
        if let Some(&limit) = self.fail_after.get(&source_id) {
            if start >= limit {
                return Err(AppError::http_status("history unavailable", 403));
            }
            end = end.min(limit);
        }

        Ok(all[start..end].to_vec())
    }

    async fn reaction_users(
        &self,
        _channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &str,
        after: Option<Snowflake>,
    ) -> Result<Vec<ApiUser>> {
        let key = (message_id, emoji.to_string());
        if self.failing_reactions.contains(&key) {
            return Err(AppError::http_status("Unknown Emoji", 404));
        }
        let users = self.reaction_users.get(&key).cloned().unwrap_or_default();
        Ok(users
            .into_iter()
            .filter(|u| after.map_or(true, |after| u.id > after))
            .take(2)
            .collect())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.fetched.lock().unwrap().push(url.to_string());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.blobs
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::http_status(format!("GET {url} returned 404"), 404))
    }
}

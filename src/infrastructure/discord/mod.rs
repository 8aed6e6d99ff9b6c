//! Remote chat-platform access.
//!
//! [`GuildApi`] is everything the backup pipeline needs from the platform.
//! [`DiscordHttp`] implements it over the Discord REST API.

mod http;
pub mod models;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::domain::{Result, Snowflake};

pub use http::DiscordHttp;
pub use models::{ApiChannel, ApiGuild, ApiMember, ApiRole};
use models::{ApiEmoji, ApiMessage, ApiUser};

/// Which archived threads to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchivedScope {
    Public,
    Private,
}

/// Capability set the backup pipeline requires from the platform client.
#[async_trait]
pub trait GuildApi: Send + Sync {
    /// Every guild the bot account belongs to.
    async fn current_guild_ids(&self) -> Result<Vec<Snowflake>>;

    async fn guild(&self, guild_id: Snowflake) -> Result<ApiGuild>;

    /// All guild channels, categories included.
    async fn channels(&self, guild_id: Snowflake) -> Result<Vec<ApiChannel>>;

    async fn roles(&self, guild_id: Snowflake) -> Result<Vec<ApiRole>>;

    /// Full member roster, all pages.
    async fn members(&self, guild_id: Snowflake) -> Result<Vec<ApiMember>>;

    async fn emojis(&self, guild_id: Snowflake) -> Result<Vec<ApiEmoji>>;

    /// Active threads across the whole guild.
    async fn active_threads(&self, guild_id: Snowflake) -> Result<Vec<ApiChannel>>;

    /// Archived threads of one channel, all pages.
    async fn archived_threads(
        &self,
        channel_id: Snowflake,
        scope: ArchivedScope,
    ) -> Result<Vec<ApiChannel>>;

    /// One page of history strictly after `after`, oldest first.
    ///
    /// An empty page means the history is exhausted.
    async fn history_page(
        &self,
        source_id: Snowflake,
        after: Option<Snowflake>,
    ) -> Result<Vec<ApiMessage>>;

    /// One page of users who reacted with `emoji`, strictly after `after`.
    async fn reaction_users(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &str,
        after: Option<Snowflake>,
    ) -> Result<Vec<ApiUser>>;

    /// Download binary content; non-success statuses are errors.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

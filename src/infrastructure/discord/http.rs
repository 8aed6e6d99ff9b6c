//! Discord REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::models::{
    ApiChannel, ApiEmoji, ApiGuild, ApiMember, ApiMessage, ApiPartialGuild, ApiRole,
    ApiThreadList, ApiUser,
};
use super::{ArchivedScope, GuildApi};
use crate::domain::{AppError, Result, Snowflake};

const USER_AGENT: &str = concat!("guild-backup/", env!("CARGO_PKG_VERSION"));
const HISTORY_PAGE: u32 = 100;
const MEMBER_PAGE: usize = 1000;
const REACTION_PAGE: u32 = 100;
const THREAD_PAGE: u32 = 100;
const MAX_ATTEMPTS: u32 = 3;

/// Authenticated Discord REST client.
#[derive(Clone)]
pub struct DiscordHttp {
    client: Client,
    token: String,
    api_base: Url,
}

impl DiscordHttp {
    /// Create a client for the given API base URL.
    ///
    /// # Errors
    /// Returns error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(token: impl Into<String>, api_base: &str) -> Result<Self> {
        let api_base = Url::parse(api_base).map_err(|e| AppError::Config {
            message: format!("Invalid API base URL {api_base}: {e}"),
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::http("Failed to build HTTP client", e))?;

        Ok(Self {
            client,
            token: token.into(),
            api_base,
        })
    }

    /// Build an endpoint URL from path segments and query pairs.
    fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| AppError::Config {
                message: format!("API base URL cannot have a path: {}", self.api_base),
            })?
            .pop_if_empty()
            .extend(segments);

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Authenticated GET with a bounded retry on rate limiting.
    #[instrument(skip(self, url), fields(url = %url))]
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("Discord API GET");

            let response = self
                .client
                .get(url.clone())
                .header("Authorization", format!("Bot {}", self.token))
                .send()
                .await
                .map_err(|e| AppError::http(format!("GET {} failed", url.path()), e))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_ATTEMPTS {
                let wait = retry_after(&response);
                warn!(wait_ms = wait.as_millis(), attempt, "Rate limited, backing off");
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::http_status(
                    format!("GET {} returned {status}: {body}", url.path()),
                    status.as_u16(),
                ));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| AppError::http(format!("Reading {} failed", url.path()), e))?;

            return serde_json::from_slice(&bytes).map_err(AppError::json);
        }
    }
}

fn retry_after(response: &reqwest::Response) -> Duration {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map_or(Duration::from_secs(1), Duration::from_secs_f64)
}

#[async_trait]
impl GuildApi for DiscordHttp {
    async fn current_guild_ids(&self) -> Result<Vec<Snowflake>> {
        let url = self.endpoint(&["users", "@me", "guilds"], &[])?;
        let guilds: Vec<ApiPartialGuild> = self.get_json(url).await?;
        Ok(guilds.into_iter().map(|g| g.id).collect())
    }

    async fn guild(&self, guild_id: Snowflake) -> Result<ApiGuild> {
        let url = self.endpoint(&["guilds", &guild_id.to_string()], &[])?;
        self.get_json(url).await
    }

    async fn channels(&self, guild_id: Snowflake) -> Result<Vec<ApiChannel>> {
        let url = self.endpoint(&["guilds", &guild_id.to_string(), "channels"], &[])?;
        self.get_json(url).await
    }

    async fn roles(&self, guild_id: Snowflake) -> Result<Vec<ApiRole>> {
        let url = self.endpoint(&["guilds", &guild_id.to_string(), "roles"], &[])?;
        self.get_json(url).await
    }

    async fn members(&self, guild_id: Snowflake) -> Result<Vec<ApiMember>> {
        let mut members = Vec::new();
        let mut after = Snowflake(0);

        loop {
            let url = self.endpoint(
                &["guilds", &guild_id.to_string(), "members"],
                &[
                    ("limit", MEMBER_PAGE.to_string()),
                    ("after", after.to_string()),
                ],
            )?;
            let page: Vec<ApiMember> = self.get_json(url).await?;
            let page_len = page.len();

            let last = page.iter().filter_map(|m| m.user.as_ref()).map(|u| u.id).max();
            members.extend(page);

            match last {
                Some(id) if page_len == MEMBER_PAGE && id > after => after = id,
                _ => break,
            }
        }

        Ok(members)
    }

    async fn emojis(&self, guild_id: Snowflake) -> Result<Vec<ApiEmoji>> {
        let url = self.endpoint(&["guilds", &guild_id.to_string(), "emojis"], &[])?;
        self.get_json(url).await
    }

    async fn active_threads(&self, guild_id: Snowflake) -> Result<Vec<ApiChannel>> {
        let url = self.endpoint(
            &["guilds", &guild_id.to_string(), "threads", "active"],
            &[],
        )?;
        let list: ApiThreadList = self.get_json(url).await?;
        Ok(list.threads)
    }

    async fn archived_threads(
        &self,
        channel_id: Snowflake,
        scope: ArchivedScope,
    ) -> Result<Vec<ApiChannel>> {
        let visibility = match scope {
            ArchivedScope::Public => "public",
            ArchivedScope::Private => "private",
        };
        let channel = channel_id.to_string();
        let mut threads: Vec<ApiChannel> = Vec::new();
        let mut before: Option<String> = None;

        loop {
            let mut query = vec![("limit", THREAD_PAGE.to_string())];
            if let Some(ref ts) = before {
                query.push(("before", ts.clone()));
            }
            let url = self.endpoint(
                &["channels", &channel, "threads", "archived", visibility],
                &query,
            )?;
            let list: ApiThreadList = self.get_json(url).await?;

            let oldest = list
                .threads
                .iter()
                .filter_map(|t| t.thread_metadata.as_ref()?.archive_timestamp)
                .min();
            let page_empty = list.threads.is_empty();
            threads.extend(list.threads);

            match oldest {
                Some(ts) if list.has_more && !page_empty => before = Some(ts.to_rfc3339()),
                _ => break,
            }
        }

        Ok(threads)
    }

    async fn history_page(
        &self,
        source_id: Snowflake,
        after: Option<Snowflake>,
    ) -> Result<Vec<ApiMessage>> {
        let url = self.endpoint(
            &["channels", &source_id.to_string(), "messages"],
            &[
                ("after", after.unwrap_or_default().to_string()),
                ("limit", HISTORY_PAGE.to_string()),
            ],
        )?;
        let mut page: Vec<ApiMessage> = self.get_json(url).await?;
        // The API returns newest first within a page.
        page.sort_by_key(|m| m.id);
        Ok(page)
    }

    async fn reaction_users(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: &str,
        after: Option<Snowflake>,
    ) -> Result<Vec<ApiUser>> {
        let mut query = vec![("limit", REACTION_PAGE.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let url = self.endpoint(
            &[
                "channels",
                &channel_id.to_string(),
                "messages",
                &message_id.to_string(),
                "reactions",
                emoji,
            ],
            &query,
        )?;
        self.get_json(url).await
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::http(format!("GET {url} failed"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::http_status(
                format!("GET {url} returned {status}"),
                status.as_u16(),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::http(format!("Reading {url} failed"), e))?;
        Ok(bytes.to_vec())
    }
}

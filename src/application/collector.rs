//! Paginated history collection for channels and threads.
//!
//! A source that fails mid-traversal yields whatever prefix was already
//! read; the error stops at this boundary and only shows up in the log.

use crate::domain::{MessageRecord, ReactionRecord, Snowflake};
use crate::infrastructure::discord::models::ApiMessage;
use crate::infrastructure::GuildApi;

use super::normalizer::{normalize_message, reaction_user};

/// Whether a history source is a top-level channel or a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Channel,
    Thread,
}

/// A channel or thread whose history can be read.
#[derive(Debug, Clone)]
pub struct HistorySource {
    pub id: Snowflake,
    pub name: String,
    pub kind: SourceKind,
}

impl HistorySource {
    #[must_use]
    pub fn new(id: Snowflake, name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }
}

/// Reads a source's full history oldest-first.
pub struct HistoryCollector<'a> {
    api: &'a dyn GuildApi,
}

impl<'a> HistoryCollector<'a> {
    #[must_use]
    pub fn new(api: &'a dyn GuildApi) -> Self {
        Self { api }
    }

    /// Collect every message of `source` in ascending id (creation) order.
    ///
    /// Never fails: a remote error ends the traversal and the prefix read so
    /// far is returned.
    pub async fn collect(&self, source: &HistorySource) -> Vec<MessageRecord> {
        let mut records = Vec::new();
        let mut cursor: Option<Snowflake> = None;
        let mut pages = 0usize;

        loop {
            let page = match self.api.history_page(source.id, cursor).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(
                        source = %source.name,
                        id = %source.id,
                        collected = records.len(),
                        error = %e,
                        "History read failed; keeping partial history"
                    );
                    break;
                }
            };

            if page.is_empty() {
                break;
            }
            pages += 1;

            let before = records.len();
            for raw in page {
                // Overlapping pages must not reorder or duplicate.
                if cursor.is_some_and(|c| raw.id <= c) {
                    continue;
                }
                cursor = Some(raw.id);
                let record = self.with_reaction_users(source, &raw).await;
                records.push(record);
            }

            tracing::debug!(
                source = %source.name,
                page = pages,
                total = records.len(),
                "History page read"
            );

            if records.len() == before {
                break;
            }
        }

        tracing::info!(
            source = %source.name,
            kind = ?source.kind,
            messages = records.len(),
            "History collected"
        );

        records
    }

    async fn with_reaction_users(&self, source: &HistorySource, raw: &ApiMessage) -> MessageRecord {
        let mut record = normalize_message(raw);

        for (reaction, raw_reaction) in record.reactions.iter_mut().zip(&raw.reactions) {
            if raw_reaction.count == 0 {
                continue;
            }
            self.fill_reaction(source, record.id, reaction, raw_reaction.count)
                .await;
        }

        record
    }

    /// Page through one reaction's users; a failure keeps the users read so far.
    async fn fill_reaction(
        &self,
        source: &HistorySource,
        message_id: Snowflake,
        reaction: &mut ReactionRecord,
        expected: u64,
    ) {
        let mut after: Option<Snowflake> = None;

        loop {
            let page = match self
                .api
                .reaction_users(source.id, message_id, &reaction.emoji, after)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(
                        source = %source.name,
                        message = %message_id,
                        emoji = %reaction.emoji,
                        collected = reaction.users.len(),
                        error = %e,
                        "Reaction users unavailable"
                    );
                    return;
                }
            };

            let fresh: Vec<_> = page
                .iter()
                .filter(|u| after.map_or(true, |a| u.id > a))
                .collect();
            if fresh.is_empty() {
                return;
            }

            for user in fresh {
                after = Some(user.id);
                reaction.users.push(reaction_user(user));
            }

            if u64::try_from(reaction.users.len()).unwrap_or(u64::MAX) >= expected {
                return;
            }
        }
    }
}

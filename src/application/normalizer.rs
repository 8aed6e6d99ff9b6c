//! Conversion from platform payloads to canonical records.
//!
//! Pure functions only; nothing here talks to the network.

use std::collections::HashMap;

use crate::domain::{
    AttachmentRef, ChannelKind, EmojiRecord, MemberRecord, MessageRecord, OverwriteRecord,
    PresenceStatus, ReactionRecord, ReactionUser, RoleRecord, Snowflake, TargetKind,
    UNKNOWN_AUTHOR,
};
use crate::infrastructure::discord::models::{
    ApiEmoji, ApiMember, ApiMessage, ApiOverwrite, ApiReactionEmoji, ApiRole,
    ApiUser, GUILD_ANNOUNCEMENT, GUILD_STAGE_VOICE, GUILD_TEXT, GUILD_VOICE, OVERWRITE_MEMBER,
    OVERWRITE_ROLE,
};

const EMOJI_CDN: &str = "https://cdn.discordapp.com/emojis";

/// Permission flag names by bit position.
const PERMISSION_FLAGS: &[(u32, &str)] = &[
    (0, "create_instant_invite"),
    (1, "kick_members"),
    (2, "ban_members"),
    (3, "administrator"),
    (4, "manage_channels"),
    (5, "manage_guild"),
    (6, "add_reactions"),
    (7, "view_audit_log"),
    (8, "priority_speaker"),
    (9, "stream"),
    (10, "view_channel"),
    (11, "send_messages"),
    (12, "send_tts_messages"),
    (13, "manage_messages"),
    (14, "embed_links"),
    (15, "attach_files"),
    (16, "read_message_history"),
    (17, "mention_everyone"),
    (18, "use_external_emojis"),
    (19, "view_guild_insights"),
    (20, "connect"),
    (21, "speak"),
    (22, "mute_members"),
    (23, "deafen_members"),
    (24, "move_members"),
    (25, "use_vad"),
    (26, "change_nickname"),
    (27, "manage_nicknames"),
    (28, "manage_roles"),
    (29, "manage_webhooks"),
    (30, "manage_guild_expressions"),
    (31, "use_application_commands"),
    (32, "request_to_speak"),
    (33, "manage_events"),
    (34, "manage_threads"),
    (35, "create_public_threads"),
    (36, "create_private_threads"),
    (37, "use_external_stickers"),
    (38, "send_messages_in_threads"),
    (39, "use_embedded_activities"),
    (40, "moderate_members"),
    (41, "view_creator_monetization_analytics"),
    (42, "use_soundboard"),
    (43, "create_guild_expressions"),
    (44, "create_events"),
    (45, "use_external_sounds"),
    (46, "send_voice_messages"),
    (49, "send_polls"),
    (50, "use_external_apps"),
];

/// Display tag for an author; deleted accounts become [`UNKNOWN_AUTHOR`].
#[must_use]
pub fn author_tag(user: Option<&ApiUser>) -> String {
    let Some(user) = user else {
        return UNKNOWN_AUTHOR.to_string();
    };

    match user.discriminator.as_deref() {
        None | Some("" | "0") => user.username.clone(),
        Some(tag) => format!("{}#{tag}", user.username),
    }
}

/// Stable tag for a numeric message type.
#[must_use]
pub fn message_kind(kind: u8) -> String {
    let name = match kind {
        0 => "default",
        1 => "recipient_add",
        2 => "recipient_remove",
        3 => "call",
        4 => "channel_name_change",
        5 => "channel_icon_change",
        6 => "channel_pinned_message",
        7 => "member_join",
        8 => "premium_guild_subscription",
        9 => "premium_guild_tier_1",
        10 => "premium_guild_tier_2",
        11 => "premium_guild_tier_3",
        12 => "channel_follow_add",
        14 => "guild_discovery_disqualified",
        15 => "guild_discovery_requalified",
        18 => "thread_created",
        19 => "reply",
        20 => "chat_input_command",
        21 => "thread_starter_message",
        22 => "guild_invite_reminder",
        23 => "context_menu_command",
        24 => "auto_moderation_action",
        46 => "poll_result",
        other => return format!("type_{other}"),
    };
    name.to_string()
}

/// Platform-generated notice text, `None` for user-authored kinds.
#[must_use]
pub fn system_notice(kind: u8, author: &str, content: &str) -> Option<String> {
    let text = match kind {
        0 | 19 | 20 | 21 | 23 => return None,
        1 => format!("{author} added someone to the group."),
        2 => format!("{author} removed someone from the group."),
        3 => format!("{author} started a call."),
        4 => format!("{author} changed the channel name: {content}"),
        5 => format!("{author} changed the channel icon."),
        6 => format!("{author} pinned a message to this channel."),
        7 => format!("{author} joined the server."),
        8 => format!("{author} boosted the server!"),
        9..=11 => format!(
            "{author} boosted the server! The server has reached level {}!",
            kind - 8
        ),
        12 => format!("{author} added {content} to this channel."),
        18 => format!("{author} started a thread: {content}"),
        24 => format!("AutoMod acted on a message by {author}."),
        other => format!("{author}: {} notice", message_kind(other)),
    };
    Some(text)
}

/// Reaction emoji identifier: unicode verbatim, custom as `name:id`.
#[must_use]
pub fn reaction_emoji(emoji: &ApiReactionEmoji) -> String {
    match (emoji.id, emoji.name.as_deref()) {
        (Some(id), Some(name)) => format!("{name}:{id}"),
        (Some(id), None) => format!("_:{id}"),
        (None, Some(name)) => name.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

#[must_use]
pub fn reaction_user(user: &ApiUser) -> ReactionUser {
    ReactionUser {
        id: user.id,
        name: author_tag(Some(user)),
    }
}

/// Normalize one message. Reaction user lists start empty; the collector
/// fills them in.
#[must_use]
pub fn normalize_message(raw: &ApiMessage) -> MessageRecord {
    let author = author_tag(raw.author.as_ref());
    let system_content = system_notice(raw.kind, &author, &raw.content);

    MessageRecord {
        id: raw.id,
        system_content,
        content: raw.content.clone(),
        author,
        timestamp: raw.timestamp,
        kind: message_kind(raw.kind),
        webhook: raw.webhook_id.is_some(),
        reply_to: raw.message_reference.as_ref().and_then(|r| r.message_id),
        attachments: raw
            .attachments
            .iter()
            .map(|a| AttachmentRef {
                url: a.url.clone(),
                filename: a.filename.clone(),
            })
            .collect(),
        embeds: raw.embeds.clone(),
        stickers: raw.sticker_items.iter().map(|s| s.name.clone()).collect(),
        reactions: raw
            .reactions
            .iter()
            .map(|r| ReactionRecord {
                emoji: reaction_emoji(&r.emoji),
                users: Vec::new(),
            })
            .collect(),
        pinned: raw.pinned,
    }
}

/// Channel kinds kept in the snapshot; categories and threads are not channels here.
#[must_use]
pub const fn channel_kind(kind: u8) -> Option<ChannelKind> {
    match kind {
        GUILD_TEXT | GUILD_ANNOUNCEMENT => Some(ChannelKind::Text),
        GUILD_VOICE | GUILD_STAGE_VOICE => Some(ChannelKind::Voice),
        _ => None,
    }
}

/// Names of every set permission bit, in bit order.
#[must_use]
pub fn permission_names(bits: u64) -> Vec<String> {
    (0..64)
        .filter(|bit| bits & (1u64 << bit) != 0)
        .map(|bit| {
            PERMISSION_FLAGS
                .iter()
                .find(|(b, _)| *b == bit)
                .map_or_else(|| format!("bit_{bit}"), |(_, name)| (*name).to_string())
        })
        .collect()
}

#[must_use]
pub fn normalize_role(raw: &ApiRole) -> RoleRecord {
    RoleRecord {
        id: raw.id,
        name: raw.name.clone(),
        permissions: permission_names(raw.permissions),
    }
}

/// `None` when the member payload carries no user.
#[must_use]
pub fn normalize_member(raw: &ApiMember) -> Option<MemberRecord> {
    let user = raw.user.as_ref()?;
    Some(MemberRecord {
        id: user.id,
        name: user.username.clone(),
        discriminator: user
            .discriminator
            .clone()
            .unwrap_or_else(|| "0".to_string()),
        nickname: raw.nick.clone().filter(|n| !n.is_empty()),
        status: PresenceStatus::from_platform(raw.status.as_deref()),
    })
}

/// Name lookups used to resolve overwrite targets.
#[derive(Debug, Default)]
pub struct TargetNames {
    pub roles: HashMap<Snowflake, String>,
    pub members: HashMap<Snowflake, String>,
}

impl TargetNames {
    #[must_use]
    pub fn new(roles: &[ApiRole], members: &[ApiMember]) -> Self {
        Self {
            roles: roles.iter().map(|r| (r.id, r.name.clone())).collect(),
            members: members
                .iter()
                .filter_map(|m| m.user.as_ref())
                .map(|u| (u.id, u.username.clone()))
                .collect(),
        }
    }
}

/// Resolve one overwrite. The target kind comes from the API's own tag.
#[must_use]
pub fn normalize_overwrite(raw: &ApiOverwrite, names: &TargetNames) -> OverwriteRecord {
    let (kind, lookup) = match raw.kind {
        OVERWRITE_MEMBER => (TargetKind::Member, &names.members),
        OVERWRITE_ROLE => (TargetKind::Role, &names.roles),
        other => {
            tracing::warn!(id = %raw.id, tag = other, "Unknown overwrite target type; treating as role");
            (TargetKind::Role, &names.roles)
        }
    };

    OverwriteRecord {
        target_id: raw.id,
        target_name: lookup
            .get(&raw.id)
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()),
        target_type: kind,
        allow: raw.allow,
        deny: raw.deny,
    }
}

/// `None` for emoji without an id (unicode emoji never appear in guild lists).
#[must_use]
pub fn normalize_emoji(raw: &ApiEmoji) -> Option<EmojiRecord> {
    let id = raw.id?;
    let ext = if raw.animated { "gif" } else { "png" };
    let url = format!("{EMOJI_CDN}/{id}.{ext}");

    Some(EmojiRecord {
        id,
        name: raw.name.clone().unwrap_or_else(|| id.to_string()),
        animated: url.ends_with(".gif"),
        url,
    })
}

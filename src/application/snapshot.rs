//! Structure snapshot: categories, channels, roles, overwrites and members.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;

use crate::domain::{
    AppError, CategoryRecord, ChannelKind, ChannelRecord, MemberRecord, Result, Snowflake,
    StructureDoc,
};
use crate::infrastructure::discord::models::GUILD_CATEGORY;
use crate::infrastructure::discord::{ApiChannel, ApiGuild, ApiMember, ApiRole};
use crate::infrastructure::{write_atomic, GuildApi};

use super::normalizer::{
    channel_kind, normalize_member, normalize_overwrite, normalize_role, TargetNames,
};
use super::renderer::escape_html;

/// Heading for channels without a resolvable category.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// One consistent capture of a guild's non-message data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildSnapshot {
    pub structure: StructureDoc,
    pub members: Vec<MemberRecord>,
}

/// Fetch roles and members and build the snapshot.
///
/// `channels` is the guild's channel list as already fetched by the caller.
///
/// # Errors
/// Returns error if roles or members cannot be fetched.
pub async fn capture(
    api: &dyn GuildApi,
    guild: &ApiGuild,
    channels: &[ApiChannel],
) -> Result<GuildSnapshot> {
    let roles = api.roles(guild.id).await?;
    let members = api.members(guild.id).await?;

    tracing::debug!(
        guild = %guild.name,
        channels = channels.len(),
        roles = roles.len(),
        members = members.len(),
        "Structure fetched"
    );

    Ok(build_snapshot(guild, channels, &roles, &members))
}

fn by_position(a: &&ApiChannel, b: &&ApiChannel) -> std::cmp::Ordering {
    (a.position, a.id).cmp(&(b.position, b.id))
}

/// Build the snapshot from already-fetched payloads.
///
/// Category names are looked up before channels are visited, so every
/// channel's `parent_name` is resolved regardless of fetch order.
#[must_use]
pub fn build_snapshot(
    guild: &ApiGuild,
    channels: &[ApiChannel],
    roles: &[ApiRole],
    members: &[ApiMember],
) -> GuildSnapshot {
    let mut categories: Vec<&ApiChannel> =
        channels.iter().filter(|c| c.kind == GUILD_CATEGORY).collect();
    categories.sort_by(by_position);

    let category_map: HashMap<Snowflake, &ApiChannel> =
        categories.iter().map(|c| (c.id, *c)).collect();
    let names = TargetNames::new(roles, members);

    let mut kept: Vec<(&ApiChannel, ChannelKind)> = channels
        .iter()
        .filter_map(|c| channel_kind(c.kind).map(|kind| (c, kind)))
        .collect();
    kept.sort_by(|(a, ka), (b, kb)| {
        let rank = |k: &ChannelKind| matches!(k, ChannelKind::Voice);
        rank(ka).cmp(&rank(kb)).then_with(|| by_position(a, b))
    });

    let channel_records = kept
        .into_iter()
        .map(|(channel, kind)| {
            let parent = channel.parent_id.and_then(|id| category_map.get(&id));
            ChannelRecord {
                id: channel.id,
                name: channel.display_name(),
                kind,
                parent_id: channel.parent_id,
                parent_name: parent.map(|p| p.display_name()),
                sync_with_category: parent.is_some_and(|p| overwrites_match(channel, p)),
                overwrites: channel
                    .permission_overwrites
                    .iter()
                    .map(|ow| normalize_overwrite(ow, &names))
                    .collect(),
            }
        })
        .collect();

    let mut sorted_roles: Vec<&ApiRole> = roles.iter().collect();
    sorted_roles.sort_by_key(|r| (r.position, r.id));

    GuildSnapshot {
        structure: StructureDoc {
            guild_id: guild.id,
            guild_name: guild.name.clone(),
            categories: categories
                .iter()
                .map(|c| CategoryRecord {
                    id: c.id,
                    name: c.display_name(),
                })
                .collect(),
            channels: channel_records,
            roles: sorted_roles.into_iter().map(normalize_role).collect(),
        },
        members: members.iter().filter_map(normalize_member).collect(),
    }
}

/// A channel is synced when its overwrites equal its category's, ignoring order.
fn overwrites_match(channel: &ApiChannel, category: &ApiChannel) -> bool {
    let own: HashSet<_> = channel.permission_overwrites.iter().collect();
    let inherited: HashSet<_> = category.permission_overwrites.iter().collect();
    own.len() == channel.permission_overwrites.len() && own == inherited
}

/// HTML tree of channels grouped under their category.
#[must_use]
pub fn render_structure_html(structure: &StructureDoc) -> String {
    let mut grouped: HashMap<Snowflake, Vec<&ChannelRecord>> = HashMap::new();
    let mut uncategorized = Vec::new();

    for channel in &structure.channels {
        match (channel.parent_id, &channel.parent_name) {
            (Some(parent), Some(_)) => grouped.entry(parent).or_default().push(channel),
            _ => uncategorized.push(channel),
        }
    }

    let title = escape_html(&structure.guild_name);
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>\nbody {{ font-family: sans-serif; }}\n.category {{ font-weight: bold; margin-top: 1em; }}\n.channel {{ margin-left: 20px; }}\n.voice {{ color: gray; font-style: italic; }}\n.synced {{ color: #3ba55c; font-size: 11px; margin-left: 6px; }}\n</style>\n</head>\n<body>\n<h1>{title}</h1>\n"
    );

    for category in &structure.categories {
        let _ = writeln!(
            out,
            "<div class=\"category\">{}</div>",
            escape_html(&category.name)
        );
        for channel in grouped.get(&category.id).into_iter().flatten() {
            write_channel(&mut out, channel);
        }
    }

    if !uncategorized.is_empty() {
        let _ = writeln!(out, "<div class=\"category\">{UNCATEGORIZED}</div>");
        for channel in uncategorized {
            write_channel(&mut out, channel);
        }
    }

    if !structure.roles.is_empty() {
        out.push_str("<h2>Roles</h2>\n<ul>\n");
        for role in &structure.roles {
            let _ = writeln!(
                out,
                "<li>{} <small>{}</small></li>",
                escape_html(&role.name),
                role.permissions.len()
            );
        }
        out.push_str("</ul>\n");
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn write_channel(out: &mut String, channel: &ChannelRecord) {
    let class = match channel.kind {
        ChannelKind::Text => "channel",
        ChannelKind::Voice => "channel voice",
    };
    let synced = if channel.sync_with_category {
        "<span class=\"synced\">synced</span>"
    } else {
        ""
    };
    let _ = writeln!(
        out,
        "<div class=\"{class}\">#{}{synced}</div>",
        escape_html(&channel.name)
    );
}

/// Write `structure.json`, `members.json` and `structure.html` under `root`.
///
/// # Errors
/// Returns error if serialization or any write fails.
pub async fn write_snapshot(snapshot: &GuildSnapshot, root: &Path) -> Result<()> {
    let structure = serde_json::to_string_pretty(&snapshot.structure).map_err(AppError::json)?;
    let members = serde_json::to_string_pretty(&snapshot.members).map_err(AppError::json)?;

    write_atomic(&root.join("structure.json"), structure.as_bytes()).await?;
    write_atomic(&root.join("members.json"), members.as_bytes()).await?;
    write_atomic(
        &root.join("structure.html"),
        render_structure_html(&snapshot.structure).as_bytes(),
    )
    .await?;

    tracing::info!(
        guild = %snapshot.structure.guild_name,
        channels = snapshot.structure.channels.len(),
        members = snapshot.members.len(),
        "Structure snapshot written"
    );

    Ok(())
}

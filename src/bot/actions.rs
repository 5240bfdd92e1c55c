//! What each command does to a guild's session, independent of how the command
//! arrived. Every function returns the text of the interaction reply.

use anyhow::Result;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    audio::{
        dispatcher::{Dispatched, LoadResultHandler},
        track::format_duration,
    },
    session::{registry::SessionRegistry, Connection, DisconnectReason, SessionError},
    sources::{identifier_for, TrackResolver},
    transport::MessageChannel,
};

/// Discord rejects longer messages.
const MESSAGE_LIMIT: usize = 2000;

/// Reply to an interaction, plus the resolution it started, if any.
pub struct Reply {
    pub content: String,
    pub loading: Option<JoinHandle<Result<Dispatched, SessionError>>>,
}

impl Reply {
    fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            loading: None,
        }
    }
}

/// Everything `/play` needs besides the session.
pub struct PlayRequest<'a> {
    pub guild_id: GuildId,
    /// The caller's current voice channel.
    pub voice_channel: Option<ChannelId>,
    pub text_channel: Arc<dyn MessageChannel>,
    pub query: &'a str,
}

pub async fn play(
    registry: &SessionRegistry,
    resolver: Arc<dyn TrackResolver>,
    search_prefix: &str,
    request: PlayRequest<'_>,
) -> Result<Reply> {
    let Some(voice_channel) = request.voice_channel else {
        return Ok(Reply::text("You need to be in a voice channel to use this command!"));
    };

    let session = registry.get_or_create(request.guild_id)?;
    session.mark_active()?;

    match session
        .connect(voice_channel, request.text_channel.clone())
        .await?
    {
        Connection::Activated => info!("Session in guild {} was inactive. Activating...", request.guild_id),
        Connection::Switched => info!("Following the caller to {}", voice_channel),
        Connection::Unchanged => {}
    }

    let identifier = identifier_for(request.query, search_prefix);
    debug!("Loading {:?} for guild {}", identifier, request.guild_id);
    let loading = LoadResultHandler::new(session, request.text_channel).spawn_load(resolver, identifier);

    Ok(Reply {
        content: "Queueing...".to_string(),
        loading: Some(loading),
    })
}

pub async fn skip(registry: &SessionRegistry, guild_id: GuildId) -> Result<Reply> {
    let session = registry.get_or_create(guild_id)?;
    session.mark_active()?;

    if session.status().await?.now_playing.is_none() {
        return Ok(Reply::text("There is no track currently playing."));
    }
    session.skip().await?;
    Ok(Reply::text("Skipped the current track."))
}

pub async fn clear(registry: &SessionRegistry, guild_id: GuildId) -> Result<Reply> {
    let session = registry.get_or_create(guild_id)?;
    session.mark_active()?;

    match session.clear().await? {
        0 => Ok(Reply::text("The queue is already empty.")),
        cleared => Ok(Reply::text(format!("Cleared **{}** tracks from the queue.", cleared))),
    }
}

/// Lists the queue. Does not count as activity.
pub async fn queue(registry: &SessionRegistry, guild_id: GuildId) -> Result<Reply> {
    let session = registry.get_or_create(guild_id)?;
    let snapshot = session.peek_all().await?;

    if snapshot.is_empty() {
        return Ok(Reply::text("Music queue empty."));
    }

    let total = format!(
        "Total: {}",
        format_duration(snapshot.total_duration().as_millis() as u64)
    );
    let mut content = String::new();
    for (index, line) in snapshot.render().lines().enumerate() {
        let remaining = snapshot.len() - index;
        let more = format!("...and {} more\n", remaining);
        if content.len() + line.len() + 1 + more.len() + total.len() > MESSAGE_LIMIT {
            content.push_str(&more);
            break;
        }
        content.push_str(line);
        content.push('\n');
    }
    content.push_str(&total);
    Ok(Reply::text(content))
}

pub async fn disconnect(registry: &SessionRegistry, guild_id: GuildId) -> Result<Reply> {
    let session = registry.get_or_create(guild_id)?;
    session.mark_active()?;
    session.deactivate(DisconnectReason::Command).await?;
    Ok(Reply::text("Disconnected from the voice channel."))
}

pub async fn set_paused(registry: &SessionRegistry, guild_id: GuildId, paused: bool) -> Result<Reply> {
    let session = registry.get_or_create(guild_id)?;
    session.mark_active()?;

    if !session.set_paused(paused).await? {
        return Ok(Reply::text("There is no track currently playing."));
    }
    Ok(Reply::text(if paused { "Paused playback." } else { "Resumed playback." }))
}

/// Shows the current track. Does not count as activity.
pub async fn now_playing(registry: &SessionRegistry, guild_id: GuildId) -> Result<Reply> {
    let status = registry.get_or_create(guild_id)?.status().await?;

    let Some(track) = status.now_playing else {
        return Ok(Reply::text("There is no track currently playing."));
    };
    let state = if status.paused { "Paused" } else { "Now playing" };
    let position = status.position.unwrap_or_default().as_millis() as u64;
    Ok(Reply::text(format!(
        "{}: **{}** at {} ({} in queue)",
        state,
        track.describe(),
        format_duration(position),
        status.queued
    )))
}

/// The bot was removed from `channel` by someone else.
pub async fn voice_left(registry: &SessionRegistry, guild_id: GuildId, channel: ChannelId) -> Result<()> {
    if let Some(session) = registry.get(guild_id) {
        if session.voice_left(channel).await? {
            info!("🔌 Removed from voice in guild {}, session deactivated", guild_id);
        }
    }
    Ok(())
}

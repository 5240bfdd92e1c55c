use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::actions::{self, PlayRequest, Reply};
use crate::{bot::GuildPlayerBot, transport::DiscordTextChannel};

/// Handles slash commands.
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &GuildPlayerBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(ctx, &command, "This command can only be used in a server.", true).await;
    };

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    let registry = bot.registry();
    let reply = match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, guild_id, bot).await?,
        "skip" => actions::skip(registry, guild_id).await?,
        "clear" => actions::clear(registry, guild_id).await?,
        "queue" => actions::queue(registry, guild_id).await?,
        "nowplaying" => actions::now_playing(registry, guild_id).await?,
        "pause" => actions::set_paused(registry, guild_id, true).await?,
        "resume" => actions::set_paused(registry, guild_id, false).await?,
        "disconnect" => actions::disconnect(registry, guild_id).await?,
        _ => {
            return respond(ctx, &command, "❌ Unknown command", true).await;
        }
    };

    respond(ctx, &command, reply.content, false).await?;

    // resolution keeps running after the reply; only its failure is interesting here
    if let Some(loading) = reply.loading {
        match loading.await {
            Ok(Ok(dispatched)) => info!("🎶 Load for guild {} finished: {:?}", guild_id, dispatched),
            Ok(Err(e)) => warn!("Load for guild {} was not applied: {}", guild_id, e),
            Err(e) => warn!("Load task for guild {} panicked: {}", guild_id, e),
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &GuildPlayerBot,
) -> Result<Reply> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing query"))?;

    let text_channel = Arc::new(DiscordTextChannel::new(ctx.http.clone(), command.channel_id));
    actions::play(
        bot.registry(),
        bot.resolver(),
        &bot.config().search_prefix,
        PlayRequest {
            guild_id,
            voice_channel: get_user_voice_channel(ctx, guild_id, command.user.id),
            text_channel,
            query,
        },
    )
    .await
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    content: impl Into<String>,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

//! # Bot Module
//!
//! Discord front end for the guild sessions.
//!
//! [`GuildPlayerBot`] implements serenity's [`EventHandler`]:
//!
//! - `ready` registers the slash commands and starts the [`InactivityReaper`]
//! - `interaction_create` routes slash commands through [`handlers`]
//! - `voice_state_update` deactivates a session when the bot is removed from voice
//!
//! The command logic itself lives in [`actions`] and only talks to the
//! [`SessionRegistry`], so it can be exercised without a gateway.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info, warn};

pub mod actions;
pub mod commands;
pub mod handlers;

use crate::{
    config::Config,
    session::{reaper::InactivityReaper, registry::SessionRegistry},
    sources::TrackResolver,
};

/// Main Discord event handler.
///
/// Owns the shared [`SessionRegistry`] and the resolver used by `/play`. The
/// reaper is started on the first `ready` only; reconnects fire `ready` again.
pub struct GuildPlayerBot {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn TrackResolver>,
    reaper_started: AtomicBool,
}

impl GuildPlayerBot {
    pub fn new(
        config: Config,
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn TrackResolver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            resolver,
            reaper_started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> Arc<dyn TrackResolver> {
        self.resolver.clone()
    }

    /// Registers slash commands, per guild when `GUILD_ID` is set (instant) or
    /// globally (up to an hour to propagate).
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ The bot is not in the configured guild {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registering guild commands: {:?}", e);
                        anyhow::anyhow!("Could not register guild commands. Check the 'applications.commands' permission.")
                    })?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registering global commands: {:?}", e);
                    anyhow::anyhow!("Could not register global commands. Check the 'applications.commands' permission.")
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    fn start_reaper(&self) {
        if self.reaper_started.swap(true, Ordering::SeqCst) {
            return;
        }

        InactivityReaper::new(
            self.registry.clone(),
            self.config.idle_timeout,
            self.config.reaper_interval,
        )
        .spawn();
    }
}

#[async_trait]
impl EventHandler for GuildPlayerBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error registering commands: {:?}", e);
        }

        self.start_reaper();
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error handling command: {:?}", e);
            }
        }
    }

    /// Deactivates the session when someone else disconnects the bot.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }
        let Some(left) = old.and_then(|old| old.channel_id) else {
            return;
        };

        if let Some(guild_id) = new.guild_id {
            if let Err(e) = actions::voice_left(&self.registry, guild_id, left).await {
                error!("Error deactivating session in guild {}: {:?}", guild_id, e);
            }
        }
    }
}

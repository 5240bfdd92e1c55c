use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{registry::SessionRegistry, SessionHandle};

/// Disconnects sessions that have been idle for too long.
///
/// One task sweeps every session once per `interval`, so a session is dropped
/// between `idle_timeout` and `idle_timeout + interval` after its last activity.
pub struct InactivityReaper {
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    interval: Duration,
}

impl InactivityReaper {
    pub fn new(registry: Arc<SessionRegistry>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            registry,
            idle_timeout,
            interval,
        }
    }

    /// Runs the sweep every `interval` until the process exits.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "⏰ Inactivity reaper started (timeout {}, every {})",
                humantime::format_duration(self.idle_timeout),
                humantime::format_duration(self.interval)
            );

            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Checks every session once. Returns the guilds that were disconnected and
    /// the voice channels they left.
    pub async fn sweep(&self) -> Vec<(GuildId, ChannelId)> {
        self.expire(&self.registry.sessions()).await
    }

    async fn expire(&self, sessions: &[SessionHandle]) -> Vec<(GuildId, ChannelId)> {
        let checks = sessions.iter().map(|session| async move {
            match session.expire_if_idle(self.idle_timeout).await {
                Ok(left) => left.map(|channel| (session.guild_id(), channel)),
                Err(e) => {
                    warn!("Skipping guild {} during sweep: {}", session.guild_id(), e);
                    None
                }
            }
        });

        let expired: Vec<_> = join_all(checks).await.into_iter().flatten().collect();
        for (guild_id, voice_channel) in &expired {
            info!(
                guild_id = %guild_id,
                voice_channel = %voice_channel,
                "💤 Disconnected idle session"
            );
        }
        debug!(
            "Sweep checked {} sessions, {} expired",
            sessions.len(),
            expired.len()
        );
        expired
    }
}

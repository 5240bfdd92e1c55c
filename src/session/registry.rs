use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::debug;

use super::{SessionError, SessionHandle};
use crate::{
    audio::player::{PlaybackEngine, PlayerError, TrackEventListener},
    transport::VoiceConnection,
};

/// Builds the per-guild pieces a new session needs.
pub trait SessionBackend: Send + Sync {
    /// Creates the guild's playback engine, wired to `listener`.
    fn create_player(
        &self,
        guild_id: GuildId,
        listener: Arc<dyn TrackEventListener>,
    ) -> Result<Arc<dyn PlaybackEngine>, PlayerError>;

    /// Creates the guild's voice link. Frames are pulled from `player`.
    fn voice_connection(
        &self,
        guild_id: GuildId,
        player: Arc<dyn PlaybackEngine>,
    ) -> Arc<dyn VoiceConnection>;
}

/// Every guild's session, created on first use and kept for the life of the
/// process.
///
/// Created once at startup and handed to the command handlers and the reaper.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    backend: Arc<dyn SessionBackend>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            sessions: DashMap::new(),
            backend,
        }
    }

    /// The session for `guild_id`, creating it if needed.
    ///
    /// Creation happens under the map's entry lock, so concurrent callers for one
    /// guild all get the same session and only one player is ever built. If the
    /// backend fails nothing is registered and the next call tries again.
    pub fn get_or_create(&self, guild_id: GuildId) -> Result<SessionHandle, SessionError> {
        if let Some(session) = self.sessions.get(&guild_id) {
            return Ok(session.clone());
        }

        let session = self
            .sessions
            .entry(guild_id)
            .or_try_insert_with(|| SessionHandle::spawn(guild_id, self.backend.as_ref()))?;
        Ok(session.clone())
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild_id).map(|session| session.clone())
    }

    /// Handles to every session at this moment.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        debug!("Registry holds {} sessions", sessions.len());
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

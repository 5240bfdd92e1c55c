//! # Session Module
//!
//! One playback session per guild, each running as its own task.
//!
//! Every mutation of a session (user commands, end-of-track notifications from
//! the player, resolution results, reaper sweeps, transport failures) is a
//! message in that session's inbox. The task applies them one at a time, so the
//! scheduler and the activation state need no lock, and two guilds never wait
//! on each other.
//!
//! ## Components
//!
//! - [`SessionHandle`]: cheap, cloneable front door to one session
//! - [`registry::SessionRegistry`]: guild → session map, sessions are never removed
//! - [`reaper::InactivityReaper`]: periodic sweep that disconnects idle sessions
//!
//! The transport's frame thread does not go through the inbox. It reads the
//! player directly through an [`AudioFrameBridge`].

pub mod reaper;
pub mod registry;

use futures::future::BoxFuture;
use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        bridge::AudioFrameBridge,
        player::{PlaybackEngine, PlayerError, TrackEndReason, TrackEventListener},
        queue::QueueSnapshot,
        scheduler::{Advance, Enqueued, PlaylistQueued, Skipped, TrackScheduler},
        track::Track,
    },
    transport::{announce, MessageChannel, TransportError, VoiceConnection},
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is already active")]
    AlreadyActive,
    #[error("session is not active")]
    NotActive,
    #[error("already connected to that voice channel")]
    SameVoiceChannel,
    #[error("session task has stopped")]
    Closed,
    #[error(transparent)]
    Player(#[from] PlayerError),
}

/// Why a session was deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Command,
    IdleTimeout(Duration),
    ConnectionFailed,
    /// The bot was removed from the voice channel by someone else.
    External,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => f.write_str("disconnect command"),
            Self::IdleTimeout(timeout) => {
                write!(f, "idle timeout ({})", humantime::format_duration(*timeout))
            }
            Self::ConnectionFailed => f.write_str("voice connection failed"),
            Self::External => f.write_str("removed from voice channel"),
        }
    }
}

/// What [`SessionHandle::connect`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Activated,
    Switched,
    Unchanged,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub guild_id: GuildId,
    pub active: bool,
    pub voice_channel: Option<ChannelId>,
    pub text_channel: Option<ChannelId>,
    pub idle_for: Duration,
    pub now_playing: Option<Track>,
    /// Playback position inside `now_playing`.
    pub position: Option<Duration>,
    pub paused: bool,
    pub queued: usize,
}

enum SessionCommand {
    MarkActive,
    Activate {
        voice: ChannelId,
        text: Arc<dyn MessageChannel>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SwitchVoice {
        voice: ChannelId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Connect {
        voice: ChannelId,
        text: Arc<dyn MessageChannel>,
        reply: oneshot::Sender<Connection>,
    },
    Deactivate {
        reason: DisconnectReason,
        reply: oneshot::Sender<bool>,
    },
    VoiceLeft {
        channel: ChannelId,
        reply: oneshot::Sender<bool>,
    },
    EnqueueOrPlay {
        track: Track,
        reply: oneshot::Sender<Result<Enqueued, SessionError>>,
    },
    EnqueueAll {
        tracks: Vec<Track>,
        reply: oneshot::Sender<Result<PlaylistQueued, SessionError>>,
    },
    Skip {
        reply: oneshot::Sender<Skipped>,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    PeekAll {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    SetPaused {
        paused: bool,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    ExpireIfIdle {
        timeout: Duration,
        reply: oneshot::Sender<Option<ChannelId>>,
    },
    TrackEnded {
        track: Track,
        reason: TrackEndReason,
    },
    ConnectionFailed {
        channel: ChannelId,
        error: TransportError,
    },
}

/// Forwards player notifications into the session inbox.
///
/// Holds a weak sender so the player (owned by the session task) does not keep
/// its own inbox open.
struct InboxListener {
    inbox: mpsc::WeakUnboundedSender<SessionCommand>,
}

impl TrackEventListener for InboxListener {
    fn on_track_end(&self, track: Track, reason: TrackEndReason) {
        if let Some(inbox) = self.inbox.upgrade() {
            let _ = inbox.send(SessionCommand::TrackEnded { track, reason });
        }
    }
}

/// A voice transition, awaited in the order the session issued it.
enum VoiceOp {
    Open {
        channel: ChannelId,
        op: BoxFuture<'static, Result<(), TransportError>>,
    },
    Close(BoxFuture<'static, Result<(), TransportError>>),
}

/// Drives one guild's voice transitions one after another, so a close is always
/// finished before the open issued after it starts.
async fn run_voice_ops(
    guild_id: GuildId,
    mut ops: mpsc::UnboundedReceiver<VoiceOp>,
    inbox: mpsc::WeakUnboundedSender<SessionCommand>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            VoiceOp::Open { channel, op } => {
                if let Err(error) = op.await {
                    if let Some(inbox) = inbox.upgrade() {
                        let _ = inbox.send(SessionCommand::ConnectionFailed { channel, error });
                    }
                }
            }
            VoiceOp::Close(op) => {
                if let Err(e) = op.await {
                    warn!("Error closing voice connection in guild {}: {}", guild_id, e);
                }
            }
        }
    }
}

/// Cloneable handle to one guild's session task.
#[derive(Clone)]
pub struct SessionHandle {
    guild_id: GuildId,
    inbox: mpsc::UnboundedSender<SessionCommand>,
    player: Arc<dyn PlaybackEngine>,
}

impl SessionHandle {
    /// Builds the session's player and voice link and starts its task.
    pub(crate) fn spawn(
        guild_id: GuildId,
        backend: &dyn registry::SessionBackend,
    ) -> Result<Self, SessionError> {
        let (inbox, commands) = mpsc::unbounded_channel();
        let listener = Arc::new(InboxListener {
            inbox: inbox.downgrade(),
        });

        let player = backend.create_player(guild_id, listener)?;
        let voice = backend.voice_connection(guild_id, player.clone());
        let (voice_ops, pending_ops) = mpsc::unbounded_channel();
        tokio::spawn(run_voice_ops(guild_id, pending_ops, inbox.downgrade()));

        let session = Session {
            guild_id,
            scheduler: TrackScheduler::new(player.clone()),
            voice,
            voice_ops,
            voice_channel: None,
            text_channel: None,
            active: false,
            last_active_at: Instant::now(),
        };
        tokio::spawn(session.run(commands));

        info!("🆕 Created playback session for guild {}", guild_id);
        Ok(Self {
            guild_id,
            inbox,
            player,
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// A fresh frame bridge over this session's player.
    pub fn frame_bridge(&self) -> AudioFrameBridge {
        AudioFrameBridge::new(self.player.clone())
    }

    /// Records user activity, pushing back the idle deadline.
    pub fn mark_active(&self) -> Result<(), SessionError> {
        self.inbox
            .send(SessionCommand::MarkActive)
            .map_err(|_| SessionError::Closed)
    }

    /// Opens the voice connection and binds both channels. Fails with
    /// [`SessionError::AlreadyActive`] if the session is already connected; use
    /// [`switch_voice_channel`](Self::switch_voice_channel) for that case.
    pub async fn activate(
        &self,
        voice: ChannelId,
        text: Arc<dyn MessageChannel>,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Activate { voice, text, reply })
            .await?
    }

    /// Moves an active session to another voice channel, leaving playback alone.
    pub async fn switch_voice_channel(&self, voice: ChannelId) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SwitchVoice { voice, reply })
            .await?
    }

    /// Activates, switches channel, or does nothing, whichever brings the session
    /// to `voice`. Always rebinds the text channel.
    pub async fn connect(
        &self,
        voice: ChannelId,
        text: Arc<dyn MessageChannel>,
    ) -> Result<Connection, SessionError> {
        self.request(|reply| SessionCommand::Connect { voice, text, reply })
            .await
    }

    /// Clears the queue, stops playback and closes the voice connection. Safe in
    /// any state; returns whether the session was active.
    pub async fn deactivate(&self, reason: DisconnectReason) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::Deactivate { reason, reply })
            .await
    }

    /// The bot was disconnected from `channel` by someone else. Deactivates only if
    /// the session is still bound to that channel; returns whether it did.
    pub async fn voice_left(&self, channel: ChannelId) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::VoiceLeft { channel, reply })
            .await
    }

    /// Fails with [`SessionError::NotActive`] once the session has been deactivated.
    pub async fn enqueue_or_play(&self, track: Track) -> Result<Enqueued, SessionError> {
        self.request(|reply| SessionCommand::EnqueueOrPlay { track, reply })
            .await?
    }

    pub async fn enqueue_all(&self, tracks: Vec<Track>) -> Result<PlaylistQueued, SessionError> {
        self.request(|reply| SessionCommand::EnqueueAll { tracks, reply })
            .await?
    }

    pub async fn skip(&self) -> Result<Skipped, SessionError> {
        self.request(|reply| SessionCommand::Skip { reply }).await
    }

    pub async fn clear(&self) -> Result<usize, SessionError> {
        self.request(|reply| SessionCommand::Clear { reply }).await
    }

    pub async fn peek_all(&self) -> Result<QueueSnapshot, SessionError> {
        self.request(|reply| SessionCommand::PeekAll { reply }).await
    }

    /// Pauses or resumes the current track. Returns `false` if nothing is playing.
    pub async fn set_paused(&self, paused: bool) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::SetPaused { paused, reply })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        self.request(|reply| SessionCommand::Status { reply }).await
    }

    /// Deactivates the session if it is active and has been idle for longer than
    /// `timeout`. Returns the voice channel it left.
    pub async fn expire_if_idle(&self, timeout: Duration) -> Result<Option<ChannelId>, SessionError> {
        self.request(|reply| SessionCommand::ExpireIfIdle { timeout, reply })
            .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(command(reply))
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("guild_id", &self.guild_id)
            .finish_non_exhaustive()
    }
}

/// State owned by a session task.
struct Session {
    guild_id: GuildId,
    scheduler: TrackScheduler,
    voice: Arc<dyn VoiceConnection>,
    voice_ops: mpsc::UnboundedSender<VoiceOp>,
    voice_channel: Option<ChannelId>,
    text_channel: Option<Arc<dyn MessageChannel>>,
    active: bool,
    last_active_at: Instant,
}

impl Session {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        debug!("Session task for guild {} finished", self.guild_id);
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::MarkActive => self.mark_active(),
            SessionCommand::Activate { voice, text, reply } => {
                let _ = reply.send(self.activate(voice, text));
            }
            SessionCommand::SwitchVoice { voice, reply } => {
                let _ = reply.send(self.switch_voice_channel(voice));
            }
            SessionCommand::Connect { voice, text, reply } => {
                let _ = reply.send(self.connect(voice, text));
            }
            SessionCommand::Deactivate { reason, reply } => {
                let _ = reply.send(self.deactivate(reason));
            }
            SessionCommand::VoiceLeft { channel, reply } => {
                let _ = reply.send(self.voice_left(channel));
            }
            SessionCommand::EnqueueOrPlay { track, reply } => {
                let _ = reply.send(self.enqueue_or_play(track));
            }
            SessionCommand::EnqueueAll { tracks, reply } => {
                let _ = reply.send(self.enqueue_all(tracks));
            }
            SessionCommand::Skip { reply } => {
                let outcome = self.scheduler.skip(self.text_channel.as_deref());
                if matches!(outcome, Skipped::Started(_)) {
                    self.mark_active();
                }
                let _ = reply.send(outcome);
            }
            SessionCommand::Clear { reply } => {
                let cleared = self.scheduler.clear();
                info!("🗑️ Cleared {} queued tracks in guild {}", cleared, self.guild_id);
                let _ = reply.send(cleared);
            }
            SessionCommand::PeekAll { reply } => {
                let _ = reply.send(self.scheduler.peek_all());
            }
            SessionCommand::SetPaused { paused, reply } => {
                let _ = reply.send(self.set_paused(paused));
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            SessionCommand::ExpireIfIdle { timeout, reply } => {
                let _ = reply.send(self.expire_if_idle(timeout));
            }
            SessionCommand::TrackEnded { track, reason } => {
                let outcome = self.scheduler.on_track_end(&track, reason, self.text_channel.as_deref());
                if matches!(outcome, Advance::Started(_)) {
                    self.mark_active();
                }
            }
            SessionCommand::ConnectionFailed { channel, error } => {
                self.connection_failed(channel, error);
            }
        }
    }

    fn text(&self) -> Option<&dyn MessageChannel> {
        self.text_channel.as_deref()
    }

    fn mark_active(&mut self) {
        self.last_active_at = Instant::now();
    }

    fn activate(&mut self, voice: ChannelId, text: Arc<dyn MessageChannel>) -> Result<(), SessionError> {
        if self.active {
            return Err(SessionError::AlreadyActive);
        }

        info!("🔊 Activating session in guild {} on channel {}", self.guild_id, voice);
        self.voice_channel = Some(voice);
        self.text_channel = Some(text);
        self.active = true;
        self.mark_active();
        self.open_voice(voice);
        Ok(())
    }

    fn switch_voice_channel(&mut self, voice: ChannelId) -> Result<(), SessionError> {
        if !self.active {
            return Err(SessionError::NotActive);
        }
        if self.voice_channel == Some(voice) {
            return Err(SessionError::SameVoiceChannel);
        }

        info!("🔀 Moving session in guild {} to channel {}", self.guild_id, voice);
        self.voice_channel = Some(voice);
        self.open_voice(voice);
        Ok(())
    }

    fn connect(&mut self, voice: ChannelId, text: Arc<dyn MessageChannel>) -> Connection {
        if !self.active {
            // cannot fail: the session is inactive
            let _ = self.activate(voice, text);
            return Connection::Activated;
        }

        self.text_channel = Some(text);
        match self.switch_voice_channel(voice) {
            Ok(()) => Connection::Switched,
            Err(_) => Connection::Unchanged,
        }
    }

    fn deactivate(&mut self, reason: DisconnectReason) -> bool {
        let was_active = self.active;

        self.scheduler.clear();
        self.scheduler.stop();
        self.scheduler.player().set_paused(false);
        if self.voice_channel.take().is_some() {
            let _ = self.voice_ops.send(VoiceOp::Close(self.voice.close()));
        }
        self.text_channel = None;
        self.active = false;

        if was_active {
            info!("👋 Deactivated session in guild {} ({})", self.guild_id, reason);
        }
        was_active
    }

    fn voice_left(&mut self, channel: ChannelId) -> bool {
        if !self.active || self.voice_channel != Some(channel) {
            debug!("Ignoring stale leave of {} in guild {}", channel, self.guild_id);
            return false;
        }
        self.deactivate(DisconnectReason::External)
    }

    fn enqueue_or_play(&mut self, track: Track) -> Result<Enqueued, SessionError> {
        if !self.active {
            return Err(SessionError::NotActive);
        }
        let outcome = self.scheduler.enqueue_or_play(track, self.text_channel.as_deref());
        if matches!(outcome, Enqueued::Started) {
            self.mark_active();
        }
        Ok(outcome)
    }

    fn enqueue_all(&mut self, tracks: Vec<Track>) -> Result<PlaylistQueued, SessionError> {
        if !self.active {
            return Err(SessionError::NotActive);
        }
        let outcome = self.scheduler.enqueue_all(tracks, self.text_channel.as_deref());
        if outcome.started.is_some() {
            self.mark_active();
        }
        Ok(outcome)
    }

    fn set_paused(&mut self, paused: bool) -> bool {
        if self.scheduler.player().playing_track().is_none() {
            return false;
        }
        self.scheduler.player().set_paused(paused);
        self.mark_active();
        true
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            guild_id: self.guild_id,
            active: self.active,
            voice_channel: self.voice_channel,
            text_channel: self.text_channel.as_ref().map(|channel| channel.id()),
            idle_for: self.last_active_at.elapsed(),
            now_playing: self.scheduler.now_playing().cloned(),
            position: self.scheduler.player().position(),
            paused: self.scheduler.player().is_paused(),
            queued: self.scheduler.queue_len(),
        }
    }

    fn expire_if_idle(&mut self, timeout: Duration) -> Option<ChannelId> {
        if !self.active || self.last_active_at.elapsed() <= timeout {
            return None;
        }

        let channel = self.voice_channel;
        announce(
            self.text(),
            format!(
                "Disconnecting from voice channel due to {} of inactivity.",
                describe_timeout(timeout)
            ),
        );
        self.deactivate(DisconnectReason::IdleTimeout(timeout));
        channel
    }

    fn open_voice(&self, channel: ChannelId) {
        let op = self.voice.open(channel);
        let _ = self.voice_ops.send(VoiceOp::Open { channel, op });
    }

    fn connection_failed(&mut self, channel: ChannelId, error: TransportError) {
        if !self.active || self.voice_channel != Some(channel) {
            debug!("Ignoring failure for stale connection to {}: {}", channel, error);
            return;
        }

        error!("❌ Voice connection failed in guild {}: {}", self.guild_id, error);
        announce(self.text(), format!("Could not connect to <#{}>: {}", channel, error));
        self.deactivate(DisconnectReason::ConnectionFailed);
    }
}

/// `10 minutes` for whole minutes, humantime notation otherwise.
fn describe_timeout(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    match secs / 60 {
        1 if secs % 60 == 0 => "1 minute".to_string(),
        minutes if minutes > 0 && secs % 60 == 0 => format!("{} minutes", minutes),
        _ => humantime::format_duration(timeout).to_string(),
    }
}

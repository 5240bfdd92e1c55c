//! # Transport Module
//!
//! Seams between playback sessions and the chat platform:
//!
//! - [`MessageChannel`]: a text channel that notifications are posted to
//! - [`VoiceConnection`]: the per-guild voice link that frames are sent over
//!
//! Both are fire-and-forget from a session's point of view. Sending a message
//! never blocks, and opening or closing a voice connection hands back a future
//! that the session queues on its voice worker, which runs them in order.
//!
//! The Discord implementations live in [`discord`] (serenity HTTP) and
//! [`songbird`] (voice).

pub mod discord;
pub mod songbird;

use futures::future::BoxFuture;
use serenity::model::id::ChannelId;
use thiserror::Error;

use crate::audio::player::PlayerError;

pub use self::discord::DiscordTextChannel;
pub use self::songbird::{DiscordBackend, SongbirdConnection};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not join voice channel: {0}")]
    Join(String),
    #[error("could not leave voice channel: {0}")]
    Leave(String),
    #[error("could not attach audio: {0}")]
    Audio(#[from] PlayerError),
}

/// A text channel notifications can be posted to.
pub trait MessageChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Queues `content` for delivery. Failures are logged, never returned.
    fn send_message(&self, content: String);
}

/// The voice link of one guild.
pub trait VoiceConnection: Send + Sync {
    /// Connects (or moves) to `channel`. The returned future completes once the
    /// connection is established or has failed.
    fn open(&self, channel: ChannelId) -> BoxFuture<'static, Result<(), TransportError>>;

    fn close(&self) -> BoxFuture<'static, Result<(), TransportError>>;
}

/// Posts `content` if a channel is bound.
pub(crate) fn announce(channel: Option<&dyn MessageChannel>, content: impl Into<String>) {
    if let Some(channel) = channel {
        channel.send_message(content.into());
    }
}

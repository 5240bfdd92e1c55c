use std::{fmt, sync::Arc};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    scheduler::{Enqueued, PlaylistQueued},
    track::Track,
};
use crate::{
    session::{SessionError, SessionHandle},
    sources::TrackResolver,
    transport::MessageChannel,
};

/// How bad a resolution failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected failures: private or removed videos, region locks.
    Common,
    /// The backend returned something it should not have.
    Suspicious,
    /// The backend itself is broken or missing.
    Fault,
}

/// A resolution failure with a message fit for users.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadError {
    pub message: String,
    pub severity: Severity,
}

impl LoadError {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }

    pub fn common(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Common)
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Fault)
    }
}

#[derive(Debug, Clone)]
pub struct Playlist {
    pub name: String,
    pub tracks: Vec<Track>,
    /// Set when a search was wrapped as a playlist of candidates.
    pub is_search_result: bool,
}

impl Playlist {
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            name: name.into(),
            tracks,
            is_search_result: false,
        }
    }

    pub fn search(query: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            name: format!("Search results for: {}", query.into()),
            tracks,
            is_search_result: true,
        }
    }
}

/// Outcome of one resolution request.
#[derive(Debug, Clone)]
pub enum LoadResult {
    TrackLoaded(Track),
    PlaylistLoaded(Playlist),
    NoMatches,
    LoadFailed(LoadError),
}

impl fmt::Display for LoadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrackLoaded(track) => write!(f, "track {}", track.title()),
            Self::PlaylistLoaded(playlist) => {
                write!(f, "playlist {} ({} tracks)", playlist.name, playlist.tracks.len())
            }
            Self::NoMatches => f.write_str("no matches"),
            Self::LoadFailed(e) => write!(f, "failure: {}", e),
        }
    }
}

/// What a [`LoadResultHandler`] did with a result.
#[derive(Debug)]
pub enum Dispatched {
    Track(Enqueued),
    Playlist(PlaylistQueued),
    NoMatches,
    Failed,
    /// The session was deactivated while the request was in flight.
    Dropped,
}

/// Applies one resolution result to a session.
///
/// Built fresh for every request and consumed by [`handle`](Self::handle).
pub struct LoadResultHandler {
    session: SessionHandle,
    channel: Arc<dyn MessageChannel>,
}

impl LoadResultHandler {
    pub fn new(session: SessionHandle, channel: Arc<dyn MessageChannel>) -> Self {
        Self { session, channel }
    }

    /// Resolves `query` in the background and dispatches the outcome.
    pub fn spawn_load(
        self,
        resolver: Arc<dyn TrackResolver>,
        query: String,
    ) -> JoinHandle<Result<Dispatched, SessionError>> {
        tokio::spawn(async move {
            let result = resolver.load(&query).await;
            debug!("Resolved {:?} to {}", query, result);
            self.handle(result).await
        })
    }

    pub async fn handle(self, result: LoadResult) -> Result<Dispatched, SessionError> {
        match result {
            LoadResult::TrackLoaded(track) => self.track_loaded(track).await,
            LoadResult::PlaylistLoaded(playlist) => self.playlist_loaded(playlist).await,
            LoadResult::NoMatches => Ok(self.no_matches()),
            LoadResult::LoadFailed(e) => {
                match e.severity {
                    Severity::Common => info!("Track failed to load: {}", e),
                    Severity::Suspicious | Severity::Fault => warn!("❌ Track failed to load: {}", e),
                }
                self.channel
                    .send_message(format!("Failed to load track: {}", e.message));
                Ok(Dispatched::Failed)
            }
        }
    }

    async fn track_loaded(self, track: Track) -> Result<Dispatched, SessionError> {
        info!("Loading track: {}", track.title());
        let title = track.title().to_string();
        match self.session.enqueue_or_play(track).await {
            Ok(outcome) => {
                // confirmed only once the session has accepted the track
                self.channel
                    .send_message(format!("Added to queue: **{}**", title));
                Ok(Dispatched::Track(outcome))
            }
            Err(SessionError::NotActive) => Ok(self.dropped(&title)),
            Err(e) => Err(e),
        }
    }

    async fn playlist_loaded(self, playlist: Playlist) -> Result<Dispatched, SessionError> {
        info!("Loading playlist: {}", playlist.name);
        if playlist.is_search_result {
            return match playlist.tracks.into_iter().next() {
                Some(first) => self.track_loaded(first).await,
                None => Ok(self.no_matches()),
            };
        }
        if playlist.tracks.is_empty() {
            return Ok(self.no_matches());
        }

        let count = playlist.tracks.len();
        match self.session.enqueue_all(playlist.tracks).await {
            Ok(outcome) => {
                self.channel
                    .send_message(format!("Added **{}** tracks to the queue.", count));
                Ok(Dispatched::Playlist(outcome))
            }
            Err(SessionError::NotActive) => Ok(self.dropped(&playlist.name)),
            Err(e) => Err(e),
        }
    }

    fn no_matches(&self) -> Dispatched {
        self.channel.send_message("No matches found!".to_string());
        Dispatched::NoMatches
    }

    fn dropped(&self, what: &str) -> Dispatched {
        info!(
            "Dropping {} for guild {}: session was deactivated",
            what,
            self.session.guild_id()
        );
        self.channel.send_message(format!(
            "Playback stopped before **{}** finished loading. Use `/play` to start again.",
            what
        ));
        Dispatched::Dropped
    }
}

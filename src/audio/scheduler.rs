use std::sync::Arc;
use tracing::{debug, info};

use super::{
    player::{PlaybackEngine, TrackEndReason},
    queue::{QueueSnapshot, TrackQueue},
    track::Track,
};
use crate::transport::{announce, MessageChannel};

/// Outcome of [`TrackScheduler::enqueue_or_play`].
#[derive(Debug)]
pub enum Enqueued {
    Started,
    Queued { position: usize },
}

/// Outcome of [`TrackScheduler::enqueue_all`].
#[derive(Debug)]
pub struct PlaylistQueued {
    pub started: Option<Track>,
    pub queued: usize,
}

/// Outcome of [`TrackScheduler::on_track_end`].
#[derive(Debug)]
pub enum Advance {
    Started(Track),
    QueueEmpty,
    Ignored,
}

/// Outcome of [`TrackScheduler::skip`].
#[derive(Debug)]
pub enum Skipped {
    Started(Track),
    Stopped,
}

/// Decides what plays next for one session.
///
/// Owns the session's [`TrackQueue`] and remembers which track it last started.
/// End notifications for any other track are stale (the player already moved on)
/// and are ignored, so a natural end racing a skip can never advance twice.
pub struct TrackScheduler {
    player: Arc<dyn PlaybackEngine>,
    queue: TrackQueue,
    now_playing: Option<Track>,
}

impl TrackScheduler {
    pub fn new(player: Arc<dyn PlaybackEngine>) -> Self {
        Self {
            player,
            queue: TrackQueue::new(),
            now_playing: None,
        }
    }

    pub fn player(&self) -> &Arc<dyn PlaybackEngine> {
        &self.player
    }

    pub fn now_playing(&self) -> Option<&Track> {
        self.now_playing.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Plays `track` right away if nothing is playing, otherwise queues it.
    pub fn enqueue_or_play(&mut self, track: Track, channel: Option<&dyn MessageChannel>) -> Enqueued {
        match self.start_if_idle(track, channel) {
            None => Enqueued::Started,
            Some(track) => {
                info!("Queued track: {}", track.title());
                announce(channel, format!("Queued track: **{}**", track.describe()));
                let position = self.queue.push(track);
                Enqueued::Queued { position }
            }
        }
    }

    /// Queues a whole playlist as one step. On an idle player the first track
    /// starts and the rest are appended behind it, in listed order.
    pub fn enqueue_all(&mut self, tracks: Vec<Track>, channel: Option<&dyn MessageChannel>) -> PlaylistQueued {
        let mut tracks = tracks.into_iter();
        let mut started = None;
        let mut queued = 0;

        if let Some(first) = tracks.next() {
            match self.start_if_idle(first.clone(), channel) {
                None => started = Some(first),
                Some(first) => {
                    self.queue.push(first);
                    queued += 1;
                }
            }
        }

        queued += self.queue.extend(tracks);
        debug!("Playlist queued: {} tracks behind the player", queued);
        PlaylistQueued { started, queued }
    }

    /// Reacts to the player finishing `ended`.
    pub fn on_track_end(
        &mut self,
        ended: &Track,
        reason: TrackEndReason,
        channel: Option<&dyn MessageChannel>,
    ) -> Advance {
        if !reason.may_start_next() {
            return Advance::Ignored;
        }
        match &self.now_playing {
            Some(current) if current.is_same(ended) => {}
            _ => {
                debug!("Ignoring stale end of {} ({})", ended.title(), reason);
                return Advance::Ignored;
            }
        }
        self.now_playing = None;

        match self.queue.pop() {
            Some(next) => {
                info!("Current song ended. Beginning next song...");
                self.start_now(next.clone(), channel);
                Advance::Started(next)
            }
            None => {
                info!("Song queue empty.");
                announce(channel, "Queue is empty. Use `/play` to queue new songs.");
                Advance::QueueEmpty
            }
        }
    }

    /// Starts the next queued track over the current one, or stops the player when
    /// the queue is empty.
    pub fn skip(&mut self, channel: Option<&dyn MessageChannel>) -> Skipped {
        match self.queue.pop() {
            Some(next) => {
                info!("Skipping to next track...");
                self.start_now(next.clone(), channel);
                Skipped::Started(next)
            }
            None => {
                info!("No more tracks to skip.");
                self.stop();
                Skipped::Stopped
            }
        }
    }

    /// Stops the player without advancing.
    pub fn stop(&mut self) {
        // forget the track first so its Stopped notification arrives stale
        self.now_playing = None;
        self.player.stop_track();
    }

    /// Drops every queued track, leaving the current one playing.
    pub fn clear(&mut self) -> usize {
        self.queue.clear()
    }

    pub fn peek_all(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    fn start_if_idle(&mut self, track: Track, channel: Option<&dyn MessageChannel>) -> Option<Track> {
        if self.now_playing.is_some() || !self.player.start_track(track.clone(), true) {
            return Some(track);
        }
        self.started(track, channel);
        None
    }

    fn start_now(&mut self, track: Track, channel: Option<&dyn MessageChannel>) {
        self.player.start_track(track.clone(), false);
        self.started(track, channel);
    }

    fn started(&mut self, track: Track, channel: Option<&dyn MessageChannel>) {
        info!("Now playing: {}", track.title());
        announce(channel, format!("Now playing: **{}**", track.describe()));
        self.now_playing = Some(track);
    }
}

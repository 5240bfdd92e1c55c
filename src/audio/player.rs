use bytes::Bytes;
use parking_lot::Mutex;
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::track::Track;

/// Duration of one audio frame handed to the transport.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);
pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// Samples per channel in one frame (20 ms @ 48 kHz).
pub const FRAME_SAMPLES: usize = 960;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("opus codec error: {0}")]
    Opus(#[from] audiopus::Error),
    #[error("decoding failed: {0}")]
    Decode(String),
}

/// One encoded frame of audio.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    data: Bytes,
    timecode_ms: u64,
}

impl AudioFrame {
    pub fn new(data: Bytes, timecode_ms: u64) -> Self {
        Self { data, timecode_ms }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Position of this frame inside its track.
    pub fn timecode_ms(&self) -> u64 {
        self.timecode_ms
    }
}

/// Why a track stopped being the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    /// Played to the end.
    Finished,
    /// Could not be opened or decoding broke mid-way.
    LoadFailed,
    /// Stopped explicitly.
    Stopped,
    /// Another track was started over it.
    Replaced,
    /// The player was torn down.
    Cleanup,
}

impl TrackEndReason {
    /// Whether the scheduler may start the next queued track.
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed | Self::Stopped)
    }
}

impl fmt::Display for TrackEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Finished => "finished",
            Self::LoadFailed => "load failed",
            Self::Stopped => "stopped",
            Self::Replaced => "replaced",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Receives end-of-track notifications from a player.
///
/// Called from whichever thread ended the track (the transport's frame thread for
/// natural completion), so implementations must only hand the event off.
pub trait TrackEventListener: Send + Sync {
    fn on_track_end(&self, track: Track, reason: TrackEndReason);
}

/// Result of asking a source for its next frame.
pub enum FramePoll {
    Ready(AudioFrame),
    /// Nothing buffered yet; try again next cycle.
    Pending,
    Finished,
    Failed(PlayerError),
}

/// Produces the encoded frames of one track.
pub trait FrameSource: Send {
    fn poll_frame(&mut self) -> FramePoll;
}

/// Opens tracks for playback.
pub trait TrackDecoder: Send + Sync {
    fn open(&self, track: &Track) -> Result<Box<dyn FrameSource>, PlayerError>;
}

/// A single audio player: at most one active track, pulled one frame at a time.
pub trait PlaybackEngine: Send + Sync {
    /// Starts `track`. With `no_interrupt`, refuses (returns `false`) if a track is
    /// already active; otherwise replaces the active track.
    fn start_track(&self, track: Track, no_interrupt: bool) -> bool;

    /// Stops the active track, if any.
    fn stop_track(&self);

    fn set_paused(&self, paused: bool);

    fn is_paused(&self) -> bool;

    fn playing_track(&self) -> Option<Track>;

    /// How far into the active track playback has got. `None` while idle.
    fn position(&self) -> Option<Duration>;

    /// Pulls the next frame of the active track. `None` while idle, paused or
    /// buffering.
    fn provide(&self) -> Option<AudioFrame>;
}

struct ActiveTrack {
    track: Track,
    source: Box<dyn FrameSource>,
    /// End of the last frame handed out.
    position: Duration,
}

#[derive(Default)]
struct PlayerState {
    active: Option<ActiveTrack>,
    paused: bool,
}

/// [`PlaybackEngine`] over pluggable [`FrameSource`]s.
///
/// The state lock is held only long enough to swap the active track or poll one
/// frame; decoders are opened and listeners notified outside it.
pub struct FramePlayer {
    decoder: Arc<dyn TrackDecoder>,
    listener: Arc<dyn TrackEventListener>,
    state: Mutex<PlayerState>,
}

impl FramePlayer {
    pub fn new(decoder: Arc<dyn TrackDecoder>, listener: Arc<dyn TrackEventListener>) -> Self {
        Self {
            decoder,
            listener,
            state: Mutex::new(PlayerState::default()),
        }
    }
}

impl PlaybackEngine for FramePlayer {
    fn start_track(&self, track: Track, no_interrupt: bool) -> bool {
        if no_interrupt && self.state.lock().active.is_some() {
            return false;
        }

        let source = match self.decoder.open(&track) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("Failed to open {}: {}", track.title(), e);
                None
            }
        };

        let opened = source.is_some();
        let previous = {
            let mut state = self.state.lock();
            let next = source.map(|source| ActiveTrack {
                track: track.clone(),
                source,
                position: Duration::ZERO,
            });
            std::mem::replace(&mut state.active, next)
        };

        if let Some(previous) = previous {
            self.listener
                .on_track_end(previous.track, TrackEndReason::Replaced);
        }
        if opened {
            debug!("▶️ Player started {}", track.title());
        } else {
            self.listener.on_track_end(track, TrackEndReason::LoadFailed);
        }

        true
    }

    fn stop_track(&self) {
        let stopped = self.state.lock().active.take();
        if let Some(stopped) = stopped {
            debug!("⏹️ Player stopped {}", stopped.track.title());
            self.listener
                .on_track_end(stopped.track, TrackEndReason::Stopped);
        }
    }

    fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn playing_track(&self) -> Option<Track> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|active| active.track.clone())
    }

    fn position(&self) -> Option<Duration> {
        self.state.lock().active.as_ref().map(|active| active.position)
    }

    fn provide(&self) -> Option<AudioFrame> {
        let mut state = self.state.lock();
        if state.paused {
            return None;
        }

        let active = state.active.as_mut()?;
        let reason = match active.source.poll_frame() {
            FramePoll::Ready(frame) => {
                active.position = Duration::from_millis(frame.timecode_ms()) + FRAME_DURATION;
                return Some(frame);
            }
            FramePoll::Pending => return None,
            FramePoll::Finished => TrackEndReason::Finished,
            FramePoll::Failed(e) => {
                warn!("Playback failed: {}", e);
                TrackEndReason::LoadFailed
            }
        };

        let ended = state.active.take();
        drop(state);

        if let Some(ended) = ended {
            info!("🏁 {} ended ({})", ended.track.title(), reason);
            self.listener.on_track_end(ended.track, reason);
        }
        None
    }
}

impl Drop for FramePlayer {
    fn drop(&mut self) {
        if let Some(active) = self.state.get_mut().active.take() {
            self.listener
                .on_track_end(active.track, TrackEndReason::Cleanup);
        }
    }
}

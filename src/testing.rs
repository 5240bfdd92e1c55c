//! Test doubles shared by the unit tests.

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    audio::{
        player::{
            AudioFrame, FramePlayer, FramePoll, FrameSource, PlaybackEngine, PlayerError,
            TrackDecoder, TrackEndReason, TrackEventListener,
        },
        track::{Track, TrackInfo},
    },
    session::registry::SessionBackend,
    transport::{MessageChannel, TransportError, VoiceConnection},
};

pub fn track(title: &str, length_ms: u64) -> Track {
    Track::new(TrackInfo::new(title, title, length_ms))
}

/// Lets spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<(String, TrackEndReason)>>,
}

impl EventLog {
    pub fn take(&self) -> Vec<(String, TrackEndReason)> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TrackEventListener for EventLog {
    fn on_track_end(&self, track: Track, reason: TrackEndReason) {
        self.events.lock().push((track.title().to_owned(), reason));
    }
}

/// Every track yields `frames` one-byte frames (`[0]`, `[1]`, ...) and then ends.
pub struct ScriptedDecoder {
    frames: usize,
    fail_next: AtomicBool,
}

impl ScriptedDecoder {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl TrackDecoder for ScriptedDecoder {
    fn open(&self, _track: &Track) -> Result<Box<dyn FrameSource>, PlayerError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::Decode("scripted open failure".into()));
        }
        let frames = (0..self.frames)
            .map(|i| AudioFrame::new(Bytes::from(vec![i as u8]), i as u64 * 20))
            .collect();
        Ok(Box::new(ScriptedSource { frames }))
    }
}

struct ScriptedSource {
    frames: VecDeque<AudioFrame>,
}

impl FrameSource for ScriptedSource {
    fn poll_frame(&mut self) -> FramePoll {
        match self.frames.pop_front() {
            Some(frame) => FramePoll::Ready(frame),
            None => FramePoll::Finished,
        }
    }
}

/// Engine that records calls and never emits events.
#[derive(Default)]
pub struct ScriptedPlayer {
    active: Mutex<Option<Track>>,
    started: Mutex<Vec<String>>,
    stops: AtomicUsize,
    paused: AtomicBool,
}

impl ScriptedPlayer {
    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Drops the active track as if it had played out.
    pub fn finish(&self) {
        self.active.lock().take();
    }
}

impl PlaybackEngine for ScriptedPlayer {
    fn start_track(&self, track: Track, no_interrupt: bool) -> bool {
        let mut active = self.active.lock();
        if no_interrupt && active.is_some() {
            return false;
        }
        self.started.lock().push(track.title().to_owned());
        *active = Some(track);
        true
    }

    fn stop_track(&self) {
        self.active.lock().take();
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn playing_track(&self) -> Option<Track> {
        self.active.lock().clone()
    }

    fn position(&self) -> Option<Duration> {
        self.active.lock().as_ref().map(|_| Duration::ZERO)
    }

    fn provide(&self) -> Option<AudioFrame> {
        None
    }
}

pub struct RecordingChannel {
    id: ChannelId,
    messages: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub fn new(id: u64) -> Self {
        Self {
            id: ChannelId::new(id),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl MessageChannel for RecordingChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send_message(&self, content: String) {
        self.messages.lock().push(content);
    }
}

#[derive(Default)]
pub struct RecordingVoice {
    opened: Mutex<Vec<ChannelId>>,
    closed: AtomicUsize,
    fail_opens: AtomicBool,
    close_delay: Mutex<Option<Duration>>,
    finished: Arc<Mutex<Vec<String>>>,
}

impl RecordingVoice {
    pub fn opened(&self) -> Vec<ChannelId> {
        self.opened.lock().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_opens(&self) {
        self.fail_opens.store(true, Ordering::SeqCst);
    }

    /// Makes every close take `delay` to complete.
    pub fn delay_closes(&self, delay: Duration) {
        *self.close_delay.lock() = Some(delay);
    }

    /// Completed operations in completion order: `open <id>` or `close`.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().clone()
    }
}

impl VoiceConnection for RecordingVoice {
    fn open(&self, channel: ChannelId) -> BoxFuture<'static, Result<(), TransportError>> {
        self.opened.lock().push(channel);
        if self.fail_opens.load(Ordering::SeqCst) {
            return future::ready(Err(TransportError::Join("scripted join failure".into()))).boxed();
        }
        let finished = self.finished.clone();
        async move {
            finished.lock().push(format!("open {}", channel));
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        let delay = *self.close_delay.lock();
        let finished = self.finished.clone();
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            finished.lock().push("close".to_string());
            Ok(())
        }
        .boxed()
    }
}

/// Builds [`FramePlayer`]s over a [`ScriptedDecoder`] and shares one
/// [`RecordingVoice`] between every guild.
pub struct TestBackend {
    frames: usize,
    voice: Arc<RecordingVoice>,
    players_created: AtomicUsize,
    fail_next_player: AtomicBool,
}

impl TestBackend {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            voice: Arc::new(RecordingVoice::default()),
            players_created: AtomicUsize::new(0),
            fail_next_player: AtomicBool::new(false),
        }
    }

    pub fn voice(&self) -> Arc<RecordingVoice> {
        self.voice.clone()
    }

    pub fn players_created(&self) -> usize {
        self.players_created.load(Ordering::SeqCst)
    }

    pub fn fail_player_creation(&self) {
        self.fail_next_player.store(true, Ordering::SeqCst);
    }
}

impl SessionBackend for TestBackend {
    fn create_player(
        &self,
        _guild_id: GuildId,
        listener: Arc<dyn TrackEventListener>,
    ) -> Result<Arc<dyn PlaybackEngine>, PlayerError> {
        if self.fail_next_player.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::Decode("scripted player failure".into()));
        }
        self.players_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FramePlayer::new(
            Arc::new(ScriptedDecoder::new(self.frames)),
            listener,
        )))
    }

    fn voice_connection(
        &self,
        _guild_id: GuildId,
        _player: Arc<dyn PlaybackEngine>,
    ) -> Arc<dyn VoiceConnection> {
        self.voice.clone()
    }
}

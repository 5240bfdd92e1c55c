use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    input::{Input, RawAdapter},
    tracks::TrackHandle,
    Songbird,
};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};
use symphonia::core::io::MediaSource;
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::{TransportError, VoiceConnection};
use crate::{
    audio::{
        bridge::AudioFrameBridge,
        opus::OpusDecoder,
        player::{FramePlayer, PlaybackEngine, PlayerError, TrackEventListener, CHANNELS, FRAME_SAMPLES, SAMPLE_RATE},
    },
    session::registry::SessionBackend,
    sources::{ffmpeg::DecoderSettings, FfmpegDecoder},
};

/// A guild's voice link through songbird.
///
/// The first successful [`open`](VoiceConnection::open) attaches one endless
/// input to the call that pulls from the session's player; later opens only move
/// the call.
pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    player: Arc<dyn PlaybackEngine>,
    attached: Arc<tokio::sync::Mutex<Option<TrackHandle>>>,
}

impl SongbirdConnection {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId, player: Arc<dyn PlaybackEngine>) -> Self {
        Self {
            manager,
            guild_id,
            player,
            attached: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }
}

impl VoiceConnection for SongbirdConnection {
    fn open(&self, channel: ChannelId) -> BoxFuture<'static, Result<(), TransportError>> {
        let manager = self.manager.clone();
        let guild_id = self.guild_id;
        let player = self.player.clone();
        let attached = self.attached.clone();

        async move {
            let call = manager
                .join(guild_id, channel)
                .await
                .map_err(|e| TransportError::Join(e.to_string()))?;
            info!("🔊 Connected to voice channel {} in guild {}", channel, guild_id);

            let mut attached = attached.lock().await;
            let playing = match attached.as_ref() {
                Some(handle) => handle.get_info().await.is_ok(),
                None => false,
            };
            if !playing {
                let input = bridge_input(player)?;
                *attached = Some(call.lock().await.play_input(input));
                debug!("Attached player output to the call in guild {}", guild_id);
            }
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        let manager = self.manager.clone();
        let guild_id = self.guild_id;
        let attached = self.attached.clone();

        async move {
            attached.lock().await.take();
            match manager.remove(guild_id).await {
                Ok(()) => {
                    info!("👋 Left voice channel in guild {}", guild_id);
                    Ok(())
                }
                Err(JoinError::NoCall) => Ok(()),
                Err(e) => Err(TransportError::Leave(e.to_string())),
            }
        }
        .boxed()
    }
}

/// Endless raw input over `player`, tagged as interleaved f32 PCM.
fn bridge_input(player: Arc<dyn PlaybackEngine>) -> Result<Input, PlayerError> {
    let source = BridgeSource::new(AudioFrameBridge::new(player))?;
    Ok(RawAdapter::new(source, SAMPLE_RATE, CHANNELS as u32).into())
}

/// Raw f32 PCM for songbird, one decoded frame per refill. Gaps (idle, paused,
/// buffering) are filled with silence so the call never starves.
struct BridgeSource {
    bridge: AudioFrameBridge,
    decoder: Mutex<OpusDecoder>,
    pcm: Vec<f32>,
    pending: Vec<u8>,
    offset: usize,
}

impl BridgeSource {
    fn new(bridge: AudioFrameBridge) -> Result<Self, PlayerError> {
        Ok(Self {
            bridge,
            decoder: Mutex::new(OpusDecoder::new()?),
            pcm: vec![0.0; FRAME_SAMPLES * CHANNELS],
            pending: Vec::with_capacity(FRAME_SAMPLES * CHANNELS * 4),
            offset: 0,
        })
    }

    fn refill(&mut self) {
        let samples = if self.bridge.can_provide() {
            let packet = self.bridge.provide_20ms_audio();
            match self.decoder.get_mut().decode(&packet, &mut self.pcm) {
                Ok(samples) => samples,
                Err(e) => {
                    debug!("Dropping undecodable frame: {}", e);
                    self.pcm.fill(0.0);
                    self.pcm.len()
                }
            }
        } else {
            self.pcm.fill(0.0);
            self.pcm.len()
        };

        self.pending.clear();
        self.offset = 0;
        for sample in &self.pcm[..samples] {
            self.pending.extend_from_slice(&sample.to_le_bytes());
        }
    }
}

impl Read for BridgeSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset == self.pending.len() {
            self.refill();
        }
        let len = buf.len().min(self.pending.len() - self.offset);
        buf[..len].copy_from_slice(&self.pending[self.offset..self.offset + len]);
        self.offset += len;
        Ok(len)
    }
}

impl Seek for BridgeSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "live audio cannot seek"))
    }
}

impl MediaSource for BridgeSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// The [`SessionBackend`] used by the bot: ffmpeg-backed players and songbird
/// voice links.
pub struct DiscordBackend {
    manager: Arc<Songbird>,
    decoder: Arc<FfmpegDecoder>,
}

impl DiscordBackend {
    /// Must be called from within the tokio runtime; decoding workers are spawned
    /// on it.
    pub fn new(manager: Arc<Songbird>, settings: DecoderSettings) -> Self {
        Self {
            manager,
            decoder: Arc::new(FfmpegDecoder::new(settings, Handle::current())),
        }
    }
}

impl SessionBackend for DiscordBackend {
    fn create_player(
        &self,
        guild_id: GuildId,
        listener: Arc<dyn TrackEventListener>,
    ) -> Result<Arc<dyn PlaybackEngine>, PlayerError> {
        debug!("Creating player for guild {}", guild_id);
        Ok(Arc::new(FramePlayer::new(self.decoder.clone(), listener)))
    }

    fn voice_connection(
        &self,
        guild_id: GuildId,
        player: Arc<dyn PlaybackEngine>,
    ) -> Arc<dyn VoiceConnection> {
        Arc::new(SongbirdConnection::new(self.manager.clone(), guild_id, player))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            opus::{OpusEncoder, MAX_PACKET_SIZE},
            player::{AudioFrame, FramePoll, FrameSource, TrackDecoder},
            track::Track,
        },
        testing::{track, EventLog},
    };
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use songbird::input::{
        codecs::{get_codec_registry, get_probe},
        LiveInput,
    };

    const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 4;

    /// One frame of a loud square wave, then the end.
    struct SquareWave;

    impl TrackDecoder for SquareWave {
        fn open(&self, _track: &Track) -> Result<Box<dyn FrameSource>, PlayerError> {
            let pcm: Vec<i16> = (0..FRAME_SAMPLES * CHANNELS)
                .map(|i| if (i / 48) % 2 == 0 { 12_000 } else { -12_000 })
                .collect();
            let mut packet = [0u8; MAX_PACKET_SIZE];
            let len = OpusEncoder::new(96_000)?.encode(&pcm, &mut packet)?;
            let frame = AudioFrame::new(Bytes::copy_from_slice(&packet[..len]), 0);
            Ok(Box::new(Once(Some(frame))))
        }
    }

    struct Once(Option<AudioFrame>);

    impl FrameSource for Once {
        fn poll_frame(&mut self) -> FramePoll {
            match self.0.take() {
                Some(frame) => FramePoll::Ready(frame),
                None => FramePoll::Finished,
            }
        }
    }

    fn source() -> (BridgeSource, Arc<FramePlayer>) {
        let player = Arc::new(FramePlayer::new(
            Arc::new(SquareWave),
            Arc::new(EventLog::default()),
        ));
        let source = BridgeSource::new(AudioFrameBridge::new(player.clone())).unwrap();
        (source, player)
    }

    fn read_frame(source: &mut BridgeSource) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_BYTES];
        let mut filled = 0;
        while filled < FRAME_BYTES {
            filled += source.read(&mut frame[filled..]).unwrap();
        }
        frame
    }

    #[test]
    fn test_idle_player_reads_as_silence() {
        let (mut source, _) = source();
        let frame = read_frame(&mut source);
        assert_eq!(frame.len(), FRAME_BYTES);
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_frames_are_decoded_to_pcm() {
        let (mut source, player) = source();
        player.start_track(track("square", 20), false);

        let frame = read_frame(&mut source);
        assert!(frame.iter().any(|&b| b != 0));

        // the track ended; back to silence
        let frame = read_frame(&mut source);
        assert!(frame.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_small_reads_drain_one_frame() {
        let (mut source, _) = source();
        let mut buf = [0u8; 1000];
        let mut total = 0;
        loop {
            let n = source.read(&mut buf).unwrap();
            total += n;
            if total % FRAME_BYTES == 0 {
                break;
            }
        }
        assert_eq!(total, FRAME_BYTES);
        assert!(source.seek(SeekFrom::Start(0)).is_err());
        assert!(!source.is_seekable());
    }

    #[test]
    fn test_bridge_input_is_playable_by_songbird() {
        let (_, player) = source();
        let Input::Live(live, _) = bridge_input(player).unwrap() else {
            panic!("expected a live input");
        };

        let live = live.promote(get_codec_registry(), get_probe()).unwrap();
        assert!(matches!(live, LiveInput::Parsed(_)));
    }
}

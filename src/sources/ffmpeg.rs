use async_process::{Child, Command, Stdio};
use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use futures::{io, AsyncReadExt};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::audio::{
    opus::{OpusEncoder, MAX_PACKET_SIZE},
    player::{
        AudioFrame, FramePoll, FrameSource, PlayerError, TrackDecoder, CHANNELS, FRAME_DURATION,
        FRAME_SAMPLES, SAMPLE_RATE,
    },
    track::Track,
};

/// Bytes of s16le PCM in one frame.
const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * 2;

/// How long ffmpeg gets to exit on its own once its output is no longer read.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Settings for [`FfmpegDecoder`].
#[derive(Debug, Clone)]
pub struct DecoderSettings {
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub bitrate: u32,
    /// Frames encoded ahead of playback.
    pub buffer_frames: usize,
}

/// Decodes tracks by piping `yt-dlp -o -` through ffmpeg and encoding the PCM to
/// Opus.
///
/// Each opened track gets a worker task on `runtime` that fills a bounded frame
/// buffer; the player drains it without blocking. Dropping the [`FrameSource`]
/// stops the worker and kills both processes.
pub struct FfmpegDecoder {
    settings: DecoderSettings,
    runtime: Handle,
}

impl FfmpegDecoder {
    pub fn new(settings: DecoderSettings, runtime: Handle) -> Self {
        Self { settings, runtime }
    }

    fn spawn_pipeline(&self, uri: &str) -> Result<(Child, Child), PlayerError> {
        let mut download = Command::new(&self.settings.ytdlp_path)
            .args(["-f", "bestaudio/best", "-o", "-", "--quiet", "--no-warnings", uri])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PlayerError::Spawn {
                program: self.settings.ytdlp_path.clone(),
                source,
            })?;

        let sample_rate = SAMPLE_RATE.to_string();
        let channels = CHANNELS.to_string();
        let transcode = Command::new(&self.settings.ffmpeg_path)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-f",
                "s16le",
                "-ar",
                sample_rate.as_str(),
                "-ac",
                channels.as_str(),
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match transcode {
            Ok(transcode) => Ok((download, transcode)),
            Err(source) => {
                let _ = download.kill();
                Err(PlayerError::Spawn {
                    program: self.settings.ffmpeg_path.clone(),
                    source,
                })
            }
        }
    }
}

impl TrackDecoder for FfmpegDecoder {
    fn open(&self, track: &Track) -> Result<Box<dyn FrameSource>, PlayerError> {
        let uri = track
            .info()
            .uri
            .clone()
            .ok_or_else(|| PlayerError::Decode(format!("{} has no playable address", track.title())))?;

        let encoder = OpusEncoder::new(self.settings.bitrate as i32)?;
        let (download, transcode) = self.spawn_pipeline(&uri)?;
        let (frames, buffer) = bounded(self.settings.buffer_frames);

        debug!("🎛️ Decoding {} from {}", track.title(), uri);
        self.runtime
            .spawn(run_pipeline(download, transcode, encoder, frames));

        Ok(Box::new(BufferedFrames { buffer }))
    }
}

/// Drains the worker's frame buffer.
struct BufferedFrames {
    buffer: Receiver<Result<AudioFrame, PlayerError>>,
}

impl FrameSource for BufferedFrames {
    fn poll_frame(&mut self) -> FramePoll {
        match self.buffer.try_recv() {
            Ok(Ok(frame)) => FramePoll::Ready(frame),
            Ok(Err(e)) => FramePoll::Failed(e),
            Err(TryRecvError::Empty) => FramePoll::Pending,
            Err(TryRecvError::Disconnected) => FramePoll::Finished,
        }
    }
}

async fn run_pipeline(
    mut download: Child,
    mut transcode: Child,
    mut encoder: OpusEncoder,
    frames: Sender<Result<AudioFrame, PlayerError>>,
) {
    let (Some(mut source), Some(mut sink), Some(mut pcm)) = (
        download.stdout.take(),
        transcode.stdin.take(),
        transcode.stdout.take(),
    ) else {
        let _ = frames.try_send(Err(PlayerError::Decode("decoder pipes were not opened".into())));
        return;
    };

    let pump = tokio::spawn(async move {
        if let Err(e) = io::copy(&mut source, &mut sink).await {
            debug!("Download pipe closed: {}", e);
        }
    });

    let sent = encode_frames(&mut pcm, &mut encoder, &frames).await;
    pump.abort();
    // ffmpeg may still be flushing; nobody reads it from here on
    drop(pcm);

    match sent {
        Ok(0) => {
            // also reached when the track is dropped before its first frame
            match tokio::time::timeout(EXIT_GRACE, transcode.status()).await {
                Ok(status) => debug!("Decoder produced no audio ({:?})", status),
                Err(_) => {
                    debug!("Decoder produced no audio and did not exit, killing it");
                    let _ = transcode.kill();
                }
            }
            let _ = frames.try_send(Err(PlayerError::Decode("the track produced no audio".into())));
        }
        Ok(count) => debug!("Decoder finished after {} frames", count),
        Err(e) => {
            warn!("Decoder failed: {}", e);
            let _ = frames.try_send(Err(e));
        }
    }
}

/// Reads PCM frames until the stream ends or the receiver goes away. Returns the
/// number of frames handed over.
async fn encode_frames(
    pcm: &mut (impl io::AsyncRead + Unpin),
    encoder: &mut OpusEncoder,
    frames: &Sender<Result<AudioFrame, PlayerError>>,
) -> Result<u64, PlayerError> {
    let mut raw = [0u8; FRAME_BYTES];
    let mut samples = [0i16; FRAME_SAMPLES * CHANNELS];
    let mut packet = [0u8; MAX_PACKET_SIZE];
    let mut sent = 0u64;

    loop {
        match pcm.read_exact(&mut raw).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(sent),
            Err(e) => return Err(PlayerError::Decode(e.to_string())),
        }

        for (sample, bytes) in samples.iter_mut().zip(raw.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        let len = encoder.encode(&samples, &mut packet)?;
        let timecode_ms = sent * FRAME_DURATION.as_millis() as u64;
        let mut frame = Ok(AudioFrame::new(Bytes::copy_from_slice(&packet[..len]), timecode_ms));

        loop {
            match frames.try_send(frame) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    tokio::time::sleep(FRAME_DURATION).await;
                }
                Err(TrySendError::Disconnected(_)) => return Ok(sent),
            }
        }
        sent += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::opus::OpusDecoder, testing::track};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_pcm_is_cut_into_opus_frames() {
        let (frames, buffer) = bounded(8);
        let mut encoder = OpusEncoder::new(96_000).unwrap();
        // two full frames and a trailing partial one
        let pcm = vec![0u8; FRAME_BYTES * 2 + 100];

        let sent = encode_frames(&mut pcm.as_slice(), &mut encoder, &frames)
            .await
            .unwrap();
        assert_eq!(sent, 2);

        let mut source = BufferedFrames { buffer };
        let mut decoder = OpusDecoder::new().unwrap();
        let mut decoded = vec![0f32; FRAME_SAMPLES * CHANNELS];
        for expected_timecode in [0, 20] {
            match source.poll_frame() {
                FramePoll::Ready(frame) => {
                    assert_eq!(frame.timecode_ms(), expected_timecode);
                    assert_eq!(
                        decoder.decode(frame.data(), &mut decoded).unwrap(),
                        FRAME_SAMPLES * CHANNELS
                    );
                }
                _ => panic!("expected a frame"),
            }
        }
        assert!(matches!(source.poll_frame(), FramePoll::Pending));

        drop(frames);
        assert!(matches!(source.poll_frame(), FramePoll::Finished));
    }

    #[tokio::test]
    async fn test_closed_buffer_stops_encoding() {
        let (frames, buffer) = bounded(1);
        drop(buffer);
        let mut encoder = OpusEncoder::new(96_000).unwrap();
        let pcm = vec![0u8; FRAME_BYTES * 4];

        let sent = encode_frames(&mut pcm.as_slice(), &mut encoder, &frames)
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_track_dropped_before_first_frame_releases_decoder() {
        let download = Command::new("sh")
            .args(["-c", "exit 0"])
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        // far more than a pipe buffer holds, all of it written after the track is gone
        let transcode = Command::new("sh")
            .args(["-c", "head -c 4194304 /dev/zero"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let (frames, buffer) = bounded(1);
        drop(buffer);

        let worker = run_pipeline(download, transcode, OpusEncoder::new(96_000).unwrap(), frames);
        tokio::time::timeout(Duration::from_secs(10), worker)
            .await
            .expect("decoder worker should finish");
    }

    #[test]
    fn test_track_without_address_is_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let decoder = FfmpegDecoder::new(
            DecoderSettings {
                ytdlp_path: "yt-dlp".into(),
                ffmpeg_path: "ffmpeg".into(),
                bitrate: 96_000,
                buffer_frames: 4,
            },
            runtime.handle().clone(),
        );

        let err = decoder.open(&track("nowhere", 1_000)).err().unwrap();
        assert!(matches!(err, PlayerError::Decode(_)));
    }

    #[test]
    fn test_failed_source_reports_error() {
        let (frames, buffer) = bounded(1);
        frames.send(Err(PlayerError::Decode("boom".into()))).unwrap();
        let mut source = BufferedFrames { buffer };
        assert!(matches!(source.poll_frame(), FramePoll::Failed(_)));
    }
}

use bytes::Bytes;
use std::sync::Arc;

use super::player::{AudioFrame, PlaybackEngine};

/// Pull-side adapter between a [`PlaybackEngine`] and a voice transport.
///
/// The transport polls once per 20 ms frame: [`can_provide`](Self::can_provide)
/// pulls and caches a frame, then [`provide_20ms_audio`](Self::provide_20ms_audio)
/// hands it over. Payloads are already Opus-encoded. The bridge never touches
/// the session's queue, only the player's frame path.
pub struct AudioFrameBridge {
    player: Arc<dyn PlaybackEngine>,
    last_frame: Option<AudioFrame>,
}

impl AudioFrameBridge {
    pub fn new(player: Arc<dyn PlaybackEngine>) -> Self {
        Self {
            player,
            last_frame: None,
        }
    }

    /// Pulls the next frame from the player. Returns `false` when there is nothing
    /// to send this cycle.
    pub fn can_provide(&mut self) -> bool {
        self.last_frame = self.player.provide();
        self.last_frame.is_some()
    }

    /// Returns the frame cached by the preceding [`can_provide`](Self::can_provide).
    ///
    /// # Panics
    ///
    /// If the previous `can_provide` did not return `true`, or the cached frame was
    /// already taken.
    pub fn provide_20ms_audio(&mut self) -> Bytes {
        self.last_frame
            .take()
            .map(AudioFrame::into_data)
            .expect("provide_20ms_audio called without a frame from can_provide")
    }

    /// Frames are Opus packets; the transport must not transcode them.
    pub fn is_opus(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::player::FramePlayer,
        testing::{track, EventLog, ScriptedDecoder},
    };
    use pretty_assertions::assert_eq;

    fn bridge(frames: usize) -> (AudioFrameBridge, Arc<FramePlayer>) {
        let player = Arc::new(FramePlayer::new(
            Arc::new(ScriptedDecoder::new(frames)),
            Arc::new(EventLog::default()),
        ));
        (AudioFrameBridge::new(player.clone()), player)
    }

    #[test]
    fn test_idle_player_provides_nothing() {
        let (mut bridge, _) = bridge(2);
        assert!(!bridge.can_provide());
        assert!(bridge.is_opus());
    }

    #[test]
    fn test_pulls_frames_in_order() {
        let (mut bridge, player) = bridge(2);
        player.start_track(track("a", 1_000), false);

        assert!(bridge.can_provide());
        assert_eq!(bridge.provide_20ms_audio(), Bytes::from_static(&[0]));
        assert!(bridge.can_provide());
        assert_eq!(bridge.provide_20ms_audio(), Bytes::from_static(&[1]));
        assert!(!bridge.can_provide());
    }

    #[test]
    #[should_panic(expected = "without a frame")]
    fn test_provide_without_frame_panics() {
        let (mut bridge, _) = bridge(2);
        assert!(!bridge.can_provide());
        bridge.provide_20ms_audio();
    }

    #[test]
    #[should_panic(expected = "without a frame")]
    fn test_frame_is_handed_out_once() {
        let (mut bridge, player) = bridge(2);
        player.start_track(track("a", 1_000), false);

        assert!(bridge.can_provide());
        bridge.provide_20ms_audio();
        bridge.provide_20ms_audio();
    }
}

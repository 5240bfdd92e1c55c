use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};

use super::player::{PlayerError, CHANNELS, FRAME_SAMPLES};

/// Largest packet libopus will emit for one frame.
pub const MAX_PACKET_SIZE: usize = 4000;

/// Stereo 48 kHz Opus encoder producing one packet per 20 ms frame.
pub struct OpusEncoder {
    inner: Encoder,
}

impl OpusEncoder {
    pub fn new(bitrate: i32) -> Result<Self, PlayerError> {
        let mut inner = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
        inner.set_bitrate(Bitrate::BitsPerSecond(bitrate))?;
        Ok(Self { inner })
    }

    /// Encodes one frame of interleaved samples into `packet`, returning its length.
    pub fn encode(&mut self, pcm: &[i16], packet: &mut [u8]) -> Result<usize, PlayerError> {
        debug_assert_eq!(pcm.len(), FRAME_SAMPLES * CHANNELS);
        Ok(self.inner.encode(pcm, packet)?)
    }
}

/// Inverse of [`OpusEncoder`], for transports that want PCM.
pub struct OpusDecoder {
    inner: Decoder,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, PlayerError> {
        Ok(Self {
            inner: Decoder::new(SampleRate::Hz48000, Channels::Stereo)?,
        })
    }

    /// Decodes one packet into interleaved float samples and returns the number of
    /// samples written (across both channels).
    pub fn decode(&mut self, packet: &[u8], pcm: &mut [f32]) -> Result<usize, PlayerError> {
        let per_channel = self.inner.decode_float(Some(packet.try_into()?), pcm.try_into()?, false)?;
        Ok(per_channel * CHANNELS)
    }
}

//! # Audio Module
//!
//! Everything between a resolved track and the 20 ms Opus frames a voice
//! connection sends.
//!
//! ## Components
//!
//! ### [`player`] - Playback Engine
//! - [`player::PlaybackEngine`]: start, stop, pause, and frame provision for one guild
//! - [`player::FramePlayer`]: the engine used by the bot, fed by a [`player::TrackDecoder`]
//!
//! ### [`scheduler`] - Track Queue Scheduler
//! - Decides what plays next: starts a track when idle, queues it otherwise
//! - Advances on natural ends and failures, never after a stop or replacement
//!
//! ### [`dispatcher`] - Load Results
//! - Applies the outcome of a query (track, playlist, search, nothing, failure)
//!   to a session and tells the channel about it
//!
//! ### [`bridge`] - Audio Frame Bridge
//! - The one-frame hand-off the transport polls every 20 ms
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz
//! - **Channels**: Stereo
//! - **Frame**: 20ms, 960 samples per channel
//! - **Encoding**: Opus (bitrate configurable)

pub mod bridge;
pub mod dispatcher;
pub mod opus;
pub mod player;
pub mod queue;
pub mod scheduler;
pub mod track;

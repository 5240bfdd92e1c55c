//! Guild Player: per-guild music playback sessions for Discord.
//!
//! Each guild gets one [`session::SessionHandle`] holding a track queue, a
//! playback engine, and the voice and text channels it is bound to. Sessions
//! are created on demand by the [`session::registry::SessionRegistry`] and
//! disconnected by the [`session::reaper::InactivityReaper`] once idle.

pub mod audio;
pub mod bot;
pub mod config;
pub mod session;
pub mod sources;
pub mod transport;

#[cfg(test)]
mod testing;

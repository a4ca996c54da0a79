//! Playback core of the tunebox daemon.
//!
//! A single decode thread pulls songs off the [`playlist::Playlist`], decodes them with
//! Symphonia and pushes interleaved stereo `f32` into a lock-free [`ring::SampleRing`].
//! The cpal output callback drains the ring. [`player::Player`] is the control plane that
//! command handlers call into; every state change it makes lands in the [`events::EventLog`].

pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod events;
pub mod output;
pub mod player;
pub mod playlist;
pub mod resample;
pub mod ring;
pub mod song;
pub mod stream;

mod http_stream;
mod transport;

pub use error::PlayerError;
pub use player::{Player, PlayerParts};
pub use song::{Schema, Song};
pub use transport::TransportAction;

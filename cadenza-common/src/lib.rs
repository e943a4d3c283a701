//! # Cadenza Common Types
//!
//! Plain data types shared between the playback engine and the
//! surrounding daemon: the audio format model, engine configuration
//! parameters, replay-gain math, idle-event flags, and time helpers.
//!
//! This crate spawns no threads and performs no I/O.

pub mod events;
pub mod format;
pub mod params;
pub mod replay_gain;
pub mod time;

pub use events::IdleFlags;
pub use format::{AudioFormat, SampleFormat};
pub use params::{CrossfadeParams, EngineParams, MixerType, OutputParams, ReplayGainMode};
pub use replay_gain::ReplayGainInfo;

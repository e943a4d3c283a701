//! # Cadenza Playback Engine
//!
//! The audio playback pipeline of the cadenza music player daemon:
//! decoded PCM flows from a decoder thread through a bounded chunk
//! buffer into the player thread, which drives transport state and
//! gapless cross-fading, and on to one worker thread per configured
//! output device, each applying its own filter chain and PCM export
//! before handing bytes to the driver.
//!
//! The surrounding daemon supplies songs, configuration, and a
//! [`listener::PlayerListener`]; clients drive the engine through
//! [`player::PlayerControl`].

pub mod buffer;
pub mod decoder;
pub mod error;
pub mod event;
pub mod filter;
pub mod input;
pub mod listener;
pub mod output;
pub mod pcm;
pub mod player;
pub mod song;
pub mod tag;

pub use error::{Error, ErrorKind, Result};
pub use player::PlayerControl;

//! Player subsystem
//!
//! The transport state machine. The worker thread pulls chunks from
//! the decoder pipe into the output group, handles seek, pause,
//! cross-fade and end-of-song transitions; clients drive it through
//! the serialized [`PlayerControl`] facade.

pub mod control;
pub mod crossfade;
mod worker;

pub use control::{PlayerControl, PlayerState, PlayerStatus};
pub use crossfade::FadePlan;

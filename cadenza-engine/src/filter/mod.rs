//! Per-output filter chain
//!
//! A [`PreparedFilter`] is a factory: opening it against the input
//! format yields a concrete [`Filter`] bound to that format and
//! declaring its output format. Each output assembles its own chain
//! (replay gain, software volume, format conversion) and threads every
//! chunk through it left to right before PCM export.

mod chain;
mod convert;
mod replay_gain;
mod volume;

pub use chain::FilterChain;
pub use convert::{ConvertFilter, PreparedConvertFilter};
pub use replay_gain::{PreparedReplayGainFilter, ReplayGainFilter, ReplayGainHandle};
pub use volume::{PreparedVolumeFilter, VolumeFilter, VolumeHandle};

use cadenza_common::AudioFormat;

use crate::error::Result;

/// Factory for filters; one per output, reused across opens.
pub trait PreparedFilter: Send {
    /// Bind to an input format, producing a runnable filter.
    fn open(&mut self, in_format: AudioFormat) -> Result<Box<dyn Filter>>;
}

/// A concrete filter bound to a fixed input format.
///
/// `filter` may return more or fewer bytes than it consumed; the
/// returned slice stays valid until the next call on the same filter.
pub trait Filter: Send {
    /// The format of the data this filter emits.
    fn out_format(&self) -> AudioFormat;

    /// Transform one block of PCM.
    fn filter<'a>(&'a mut self, src: &'a [u8]) -> Result<&'a [u8]>;

    /// Discard internal state (resampler history and the like);
    /// required after a seek or cancel so stale audio cannot leak into
    /// the new position.
    fn reset(&mut self) {}
}

//! Replay-gain filter
//!
//! Applies the loudness-normalization scale selected by the configured
//! mode. The output worker feeds it the per-song gain snapshot carried
//! on each chunk through a shared [`ReplayGainHandle`]; silence chunks
//! carry no snapshot and leave the scale untouched.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cadenza_common::params::ReplayGainParams;
use cadenza_common::{AudioFormat, ReplayGainInfo};
use tracing::debug;

use crate::error::Result;
use crate::pcm::volume::{apply_volume, VOLUME_1};

use super::{Filter, PreparedFilter};

/// Shared knob through which the output worker publishes the current
/// song's gain to the filter instance inside the chain.
#[derive(Clone)]
pub struct ReplayGainHandle {
    params: ReplayGainParams,
    /// current linear scale, stored as f32 bits
    scale_bits: Arc<AtomicU32>,
}

impl ReplayGainHandle {
    pub fn new(params: ReplayGainParams) -> Self {
        Self { params, scale_bits: Arc::new(AtomicU32::new(1.0f32.to_bits())) }
    }

    /// Recompute the scale from a chunk's gain snapshot.
    pub fn set_info(&self, info: Option<&ReplayGainInfo>) {
        let scale = match info {
            Some(info) => info.scale_for(&self.params),
            None => 10.0f32.powf(self.params.missing_preamp_db / 20.0),
        };
        let old = f32::from_bits(self.scale_bits.swap(scale.to_bits(), Ordering::Relaxed));
        if (old - scale).abs() > 1e-6 {
            debug!(scale, "replay gain scale changed");
        }
    }

    fn scale(&self) -> f32 {
        f32::from_bits(self.scale_bits.load(Ordering::Relaxed))
    }
}

/// Factory producing [`ReplayGainFilter`] instances bound to a handle.
pub struct PreparedReplayGainFilter {
    handle: ReplayGainHandle,
}

impl PreparedReplayGainFilter {
    pub fn new(handle: ReplayGainHandle) -> Self {
        Self { handle }
    }
}

impl PreparedFilter for PreparedReplayGainFilter {
    fn open(&mut self, in_format: AudioFormat) -> Result<Box<dyn Filter>> {
        Ok(Box::new(ReplayGainFilter {
            handle: self.handle.clone(),
            format: in_format,
            buffer: Vec::new(),
        }))
    }
}

/// Scales PCM by the current replay-gain factor.
pub struct ReplayGainFilter {
    handle: ReplayGainHandle,
    format: AudioFormat,
    buffer: Vec<u8>,
}

impl Filter for ReplayGainFilter {
    fn out_format(&self) -> AudioFormat {
        self.format
    }

    fn filter<'a>(&'a mut self, src: &'a [u8]) -> Result<&'a [u8]> {
        let scale = self.handle.scale();
        if (scale - 1.0).abs() < 1e-6 {
            return Ok(src);
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(src);
        let fixed = (scale * VOLUME_1 as f32) as i32;
        if !apply_volume(&mut self.buffer, self.format, fixed) {
            // DSD cannot be scaled; leave it untouched
            return Ok(src);
        }
        Ok(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_common::params::ReplayGainMode;
    use cadenza_common::replay_gain::ReplayGainTuple;
    use cadenza_common::SampleFormat;

    fn handle(mode: ReplayGainMode) -> ReplayGainHandle {
        ReplayGainHandle::new(ReplayGainParams { mode, ..ReplayGainParams::default() })
    }

    #[test]
    fn test_unity_without_info() {
        let h = handle(ReplayGainMode::Track);
        h.set_info(None);
        let mut f = PreparedReplayGainFilter::new(h)
            .open(AudioFormat::new(44100, SampleFormat::S16, 2))
            .unwrap();

        let src: Vec<u8> = 1000i16.to_ne_bytes().to_vec();
        assert_eq!(f.filter(&src).unwrap(), src);
    }

    #[test]
    fn test_applies_track_gain() {
        let h = handle(ReplayGainMode::Track);
        let info = ReplayGainInfo {
            track: ReplayGainTuple { gain_db: -6.0, peak: 1.0 },
            album: ReplayGainTuple::default(),
        };
        h.set_info(Some(&info));

        let mut f = PreparedReplayGainFilter::new(h)
            .open(AudioFormat::new(44100, SampleFormat::S16, 1))
            .unwrap();

        let src: Vec<u8> = 10000i16.to_ne_bytes().to_vec();
        let out = f.filter(&src).unwrap();
        let v = i16::from_ne_bytes([out[0], out[1]]);
        // -6 dB is very close to halving
        assert!((v as f32 - 5012.0).abs() < 32.0, "got {v}");
    }

    #[test]
    fn test_off_mode_is_identity() {
        let h = handle(ReplayGainMode::Off);
        let info = ReplayGainInfo {
            track: ReplayGainTuple { gain_db: -12.0, peak: 1.0 },
            album: ReplayGainTuple::default(),
        };
        h.set_info(Some(&info));

        let mut f = PreparedReplayGainFilter::new(h)
            .open(AudioFormat::new(44100, SampleFormat::S16, 1))
            .unwrap();

        let src: Vec<u8> = 10000i16.to_ne_bytes().to_vec();
        assert_eq!(f.filter(&src).unwrap(), src);
    }
}

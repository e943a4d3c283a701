//! Replay-gain data carried in song tags
//!
//! A song may carry per-track and per-album loudness measurements. The
//! player snapshots this data onto each chunk so the replay-gain filter
//! sees the values that belong to the audio it is scaling, even across
//! a song boundary.

use serde::{Deserialize, Serialize};

use crate::params::{ReplayGainMode, ReplayGainParams};

/// One loudness measurement: a gain adjustment and the peak amplitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainTuple {
    /// Gain adjustment in dB.
    pub gain_db: f32,

    /// Peak sample amplitude, 1.0 = full scale.
    pub peak: f32,
}

impl ReplayGainTuple {
    pub fn is_defined(&self) -> bool {
        self.gain_db > -100.0
    }

    /// Convert to a linear scale factor.
    ///
    /// When `limit` is set, the scale is clamped so that `peak` does not
    /// exceed full scale after scaling.
    pub fn scale(&self, preamp_db: f32, limit: bool) -> f32 {
        let mut scale = 10.0_f32.powf((self.gain_db + preamp_db) / 20.0);
        if limit && self.peak > 0.0 && scale * self.peak > 1.0 {
            scale = 1.0 / self.peak;
        }
        scale
    }
}

impl Default for ReplayGainTuple {
    fn default() -> Self {
        Self { gain_db: -200.0, peak: 0.0 }
    }
}

/// Replay-gain info for one song: track and album measurements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayGainInfo {
    pub track: ReplayGainTuple,
    pub album: ReplayGainTuple,
}

impl ReplayGainInfo {
    pub fn is_defined(&self) -> bool {
        self.track.is_defined() || self.album.is_defined()
    }

    /// The measurement selected by `mode`, falling back to the other
    /// one when the preferred measurement is missing.
    pub fn tuple_for(&self, mode: ReplayGainMode) -> Option<&ReplayGainTuple> {
        let (preferred, fallback) = match mode {
            ReplayGainMode::Off => return None,
            ReplayGainMode::Track => (&self.track, &self.album),
            ReplayGainMode::Album => (&self.album, &self.track),
        };
        if preferred.is_defined() {
            Some(preferred)
        } else if fallback.is_defined() {
            Some(fallback)
        } else {
            None
        }
    }

    /// The linear scale for this song under the given policy.
    ///
    /// Songs without any measurement get `missing_preamp_db` applied.
    pub fn scale_for(&self, params: &ReplayGainParams) -> f32 {
        match self.tuple_for(params.mode) {
            Some(t) => t.scale(params.preamp_db, params.limit),
            None => 10.0_f32.powf(params.missing_preamp_db / 20.0),
        }
    }
}

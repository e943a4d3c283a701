//! Cross-fade window calculation
//!
//! Decides how many trailing chunks of the outgoing song overlap the
//! incoming one. With MixRamp data the window is derived from the
//! loudness profiles of both songs; otherwise it is the configured
//! duration. A window of zero falls back to the configured collapse
//! behavior.

use std::time::Duration;

use cadenza_common::params::{CrossfadeParams, FadeShape};
use cadenza_common::AudioFormat;
use tracing::debug;

use crate::buffer::CHUNK_SIZE;
use crate::tag::{MixRampInfo, RampPoint};

/// The plan for one song transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadePlan {
    /// Plain gapless transition; no mixing.
    None,
    /// Mix the last `chunks` chunks of the outgoing song with the
    /// first chunks of the incoming one.
    Fade { chunks: usize },
    /// Abrupt transition: drop the outgoing tail at the fade point.
    Cut,
}

/// Compute the fade window for a transition from the song playing in
/// `prev_format` to one decoding in `next_format`.
#[allow(clippy::too_many_arguments)]
pub fn plan(
    params: &CrossfadeParams,
    total_time: Option<Duration>,
    next_format: AudioFormat,
    prev_format: AudioFormat,
    next_mixramp_start: &[RampPoint],
    prev_mixramp_end: &[RampPoint],
    next_replay_gain_db: f32,
    prev_replay_gain_db: f32,
    max_chunks: usize,
) -> FadePlan {
    if params.duration_seconds <= 0.0 {
        return FadePlan::None;
    }

    // mixing across a lossy conversion is skipped outright
    if next_format != prev_format {
        debug!(%next_format, %prev_format, "cross-fade skipped: format change");
        return FadePlan::None;
    }

    if let Some(total) = total_time {
        if params.duration_seconds >= total.as_secs_f32() {
            return FadePlan::None;
        }
    }

    let chunks_per_second = next_format.bytes_per_second() as f32 / CHUNK_SIZE as f32;

    let use_mixramp = params.mixramp_enabled()
        && params.mixramp_delay_seconds > 0.0
        && !next_mixramp_start.is_empty()
        && !prev_mixramp_end.is_empty();

    let chunks = if use_mixramp {
        let overlap = mixramp_overlap(
            params.mixramp_db,
            next_mixramp_start,
            prev_mixramp_end,
            next_replay_gain_db,
            prev_replay_gain_db,
        );
        match overlap {
            Some(overlap) if overlap >= params.mixramp_delay_seconds => {
                (chunks_per_second * (overlap - params.mixramp_delay_seconds)) as usize
            }
            _ => 0,
        }
    } else {
        (chunks_per_second * params.duration_seconds + 0.5) as usize
    };

    let chunks = chunks.min(max_chunks);
    if chunks == 0 {
        return match params.on_collapse {
            FadeShape::Skip => FadePlan::None,
            FadeShape::Cut => FadePlan::Cut,
        };
    }

    debug!(chunks, "cross-fade planned");
    FadePlan::Fade { chunks }
}

/// Seconds of overlap suggested by the two MixRamp profiles: the time
/// the outgoing song spends below the threshold plus the time the
/// incoming one takes to reach it. Replay gain shifts each threshold
/// so the comparison happens at playback loudness.
fn mixramp_overlap(
    mixramp_db: f32,
    next_start: &[RampPoint],
    prev_end: &[RampPoint],
    next_replay_gain_db: f32,
    prev_replay_gain_db: f32,
) -> Option<f32> {
    let lead_in = MixRampInfo::interpolate(next_start, mixramp_db - next_replay_gain_db)?;
    let tail = MixRampInfo::interpolate(prev_end, mixramp_db - prev_replay_gain_db)?;
    Some(lead_in + tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_common::SampleFormat;

    const FMT: AudioFormat = AudioFormat::new(44100, SampleFormat::S16, 2);

    fn params(duration: f32) -> CrossfadeParams {
        CrossfadeParams { duration_seconds: duration, ..CrossfadeParams::default() }
    }

    #[test]
    fn test_disabled_when_duration_zero() {
        let p = plan(&params(0.0), None, FMT, FMT, &[], &[], 0.0, 0.0, 1000);
        assert_eq!(p, FadePlan::None);
    }

    #[test]
    fn test_skipped_on_format_change() {
        let other = AudioFormat::new(48000, SampleFormat::S16, 2);
        let p = plan(&params(2.0), None, FMT, other, &[], &[], 0.0, 0.0, 1000);
        assert_eq!(p, FadePlan::None);
    }

    #[test]
    fn test_duration_window() {
        // CD audio: 176400 B/s over 4096-byte chunks = ~43 chunks/s
        let p = plan(&params(2.0), Some(Duration::from_secs(180)), FMT, FMT, &[], &[], 0.0, 0.0, 1000);
        match p {
            FadePlan::Fade { chunks } => assert!((85..=87).contains(&chunks), "{chunks}"),
            other => panic!("expected fade, got {other:?}"),
        }
    }

    #[test]
    fn test_clamped_to_max_chunks() {
        let p = plan(&params(10.0), None, FMT, FMT, &[], &[], 0.0, 0.0, 50);
        assert_eq!(p, FadePlan::Fade { chunks: 50 });
    }

    #[test]
    fn test_shorter_song_disables_fade() {
        let p = plan(&params(5.0), Some(Duration::from_secs(4)), FMT, FMT, &[], &[], 0.0, 0.0, 1000);
        assert_eq!(p, FadePlan::None);
    }

    #[test]
    fn test_mixramp_overlap_window() {
        let mut p = params(2.0);
        p.mixramp_db = -20.0;
        p.mixramp_delay_seconds = 1.0;

        // incoming reaches -20 dB after 1.0 s, outgoing tail spends
        // 2.0 s below it: overlap 3.0 s minus 1.0 s delay = 2.0 s
        let start = MixRampInfo::parse_ramp("-40.00 0.00;-20.00 1.00");
        let end = MixRampInfo::parse_ramp("-40.00 0.00;-20.00 2.00");

        match plan(&p, None, FMT, FMT, &start, &end, 0.0, 0.0, 1000) {
            FadePlan::Fade { chunks } => assert!((85..=87).contains(&chunks), "{chunks}"),
            other => panic!("expected fade, got {other:?}"),
        }
    }

    #[test]
    fn test_mixramp_collapse_skip_and_cut() {
        let mut p = params(2.0);
        p.mixramp_db = -20.0;
        p.mixramp_delay_seconds = 10.0; // longer than any overlap

        let start = MixRampInfo::parse_ramp("-40.00 0.00;-20.00 1.00");
        let end = MixRampInfo::parse_ramp("-40.00 0.00;-20.00 2.00");

        assert_eq!(plan(&p, None, FMT, FMT, &start, &end, 0.0, 0.0, 1000), FadePlan::None);

        p.on_collapse = FadeShape::Cut;
        assert_eq!(plan(&p, None, FMT, FMT, &start, &end, 0.0, 0.0, 1000), FadePlan::Cut);
    }
}

//! Time conversion helpers
//!
//! The playback timeline is carried as `std::time::Duration`; these
//! helpers cover the millisecond conversions used at API boundaries.

use std::time::Duration;

pub fn duration_to_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

pub fn ms_to_duration(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Seconds as f32, for status display.
pub fn duration_to_seconds(d: Duration) -> f32 {
    d.as_secs_f32()
}

//! Null output
//!
//! Discards PCM while keeping a synthetic playback clock. Useful for
//! tests and as a sink of last resort. With `sync` enabled, `play`
//! paces itself to real time like a sound device would.

use std::time::{Duration, Instant};

use cadenza_common::AudioFormat;

use crate::error::Result;

use super::super::plugin::OutputPlugin;

pub struct NullOutput {
    sync: bool,
    format: Option<AudioFormat>,
    /// Wall-clock moment the synthetic device "started playing".
    started: Option<Instant>,
    /// Bytes accepted since `started`.
    played_bytes: u64,
}

impl NullOutput {
    pub fn new(sync: bool) -> Self {
        Self { sync, format: None, started: None, played_bytes: 0 }
    }
}

impl OutputPlugin for NullOutput {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&mut self, format: &mut AudioFormat) -> Result<()> {
        self.format = Some(*format);
        self.started = Some(Instant::now());
        self.played_bytes = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.format = None;
        self.started = None;
    }

    fn delay(&self) -> Duration {
        if !self.sync {
            return Duration::ZERO;
        }
        let (Some(format), Some(started)) = (self.format, self.started) else {
            return Duration::ZERO;
        };
        let played = format.bytes_to_duration(self.played_bytes as usize);
        played.saturating_sub(started.elapsed())
    }

    fn play(&mut self, data: &[u8]) -> Result<usize> {
        if self.sync {
            let ahead = self.delay();
            if ahead > Duration::from_millis(20) {
                std::thread::sleep(ahead - Duration::from_millis(20));
            }
        }
        self.played_bytes += data.len() as u64;
        Ok(data.len())
    }

    fn cancel(&mut self) {
        // the synthetic buffer is always empty
        self.started = Some(Instant::now());
        self.played_bytes = 0;
    }

    fn pause(&mut self) -> bool {
        std::thread::sleep(Duration::from_millis(10));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_common::SampleFormat;

    #[test]
    fn test_consumes_everything() {
        let mut out = NullOutput::new(false);
        let mut af = AudioFormat::new(44100, SampleFormat::S16, 2);
        out.open(&mut af).unwrap();
        assert_eq!(out.play(&[0u8; 4096]).unwrap(), 4096);
        assert_eq!(out.delay(), Duration::ZERO);
        out.close();
    }

    #[test]
    fn test_sync_tracks_clock() {
        let mut out = NullOutput::new(true);
        let mut af = AudioFormat::new(44100, SampleFormat::S16, 2);
        out.open(&mut af).unwrap();

        // one second of audio accepted nearly instantly leaves the
        // synthetic device ahead of the wall clock
        out.play(&vec![0u8; af.bytes_per_second()]).unwrap();
        assert!(out.delay() > Duration::from_millis(500));
    }
}

//! Audio format model
//!
//! An [`AudioFormat`] is the (sample rate, sample format, channel count)
//! triple negotiated between the decoder, the filter chain, and each
//! output device. Formats parse from and render to the configuration
//! convention `"rate:bits:channels"` (e.g. `"44100:16:2"`), with `"f"`
//! for 32-bit float and `"dsd"` for 1-bit DSD.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Maximum supported channel count.
pub const MAX_CHANNELS: u8 = 8;

/// How PCM samples are encoded in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit, native endian.
    S16,
    /// Signed 24-bit padded to 32 bits (high byte unused, sign-extended).
    S24P32,
    /// Signed 32-bit, native endian.
    S32,
    /// 32-bit float in the range -1.0..1.0.
    F32,
    /// 1-bit DSD, 8 sequential bits per byte per channel.
    Dsd,
}

impl SampleFormat {
    /// Size of one sample of this format, in bytes.
    pub const fn sample_size(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::Dsd => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S24P32 | SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SampleFormat::U8 => "8",
            SampleFormat::S16 => "16",
            SampleFormat::S24P32 => "24",
            SampleFormat::S32 => "32",
            SampleFormat::F32 => "f",
            SampleFormat::Dsd => "dsd",
        };
        f.write_str(s)
    }
}

/// Error returned when an audio format string does not parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatParseError {
    #[error("audio format must have the form rate:bits:channels")]
    Syntax,
    #[error("invalid sample rate: {0}")]
    Rate(String),
    #[error("invalid sample format: {0}")]
    Bits(String),
    #[error("invalid channel count: {0}")]
    Channels(String),
}

/// The format of a PCM stream: rate, sample encoding, channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AudioFormat {
    /// Sample rate in Hz. For DSD this counts bytes (8 bits) per second
    /// per channel.
    pub sample_rate: u32,

    /// Sample encoding.
    pub sample_format: SampleFormat,

    /// Number of interleaved channels, 1..=8.
    pub channels: u8,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, sample_format: SampleFormat, channels: u8) -> Self {
        Self { sample_rate, sample_format, channels }
    }

    /// True if rate and channel count are within supported bounds.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0
            && self.sample_rate <= 768_000
            && self.channels >= 1
            && self.channels <= MAX_CHANNELS
    }

    /// Size of one frame (one sample per channel), in bytes.
    pub fn frame_size(&self) -> usize {
        self.sample_format.sample_size() * self.channels as usize
    }

    /// Bytes of PCM per second of audio.
    pub fn bytes_per_second(&self) -> usize {
        self.frame_size() * self.sample_rate as usize
    }

    /// The playback duration of `bytes` bytes of PCM in this format.
    pub fn bytes_to_duration(&self, bytes: usize) -> Duration {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((bytes as u64).saturating_mul(1_000_000_000) / bps as u64)
    }

    /// The number of whole frames covering `d`, rounded down.
    pub fn duration_to_frames(&self, d: Duration) -> u64 {
        d.as_nanos() as u64 * self.sample_rate as u64 / 1_000_000_000
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sample_rate, self.sample_format, self.channels)
    }
}

impl From<AudioFormat> for String {
    fn from(af: AudioFormat) -> String {
        af.to_string()
    }
}

impl FromStr for AudioFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (rate, bits, channels) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(r), Some(b), Some(c), None) => (r, b, c),
            _ => return Err(FormatParseError::Syntax),
        };

        let sample_rate: u32 = rate
            .parse()
            .map_err(|_| FormatParseError::Rate(rate.to_string()))?;

        let sample_format = match bits {
            "8" => SampleFormat::U8,
            "16" => SampleFormat::S16,
            "24" => SampleFormat::S24P32,
            "32" => SampleFormat::S32,
            "f" => SampleFormat::F32,
            "dsd" => SampleFormat::Dsd,
            other => return Err(FormatParseError::Bits(other.to_string())),
        };

        let channels: u8 = channels
            .parse()
            .map_err(|_| FormatParseError::Channels(channels.to_string()))?;

        let af = AudioFormat::new(sample_rate, sample_format, channels);
        if !af.is_valid() {
            return Err(FormatParseError::Channels(channels.to_string()));
        }
        Ok(af)
    }
}

impl TryFrom<String> for AudioFormat {
    type Error = FormatParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for s in ["44100:16:2", "48000:24:6", "192000:f:2", "352800:dsd:2", "8000:8:1"] {
            let af: AudioFormat = s.parse().unwrap();
            assert_eq!(af.to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("44100:16".parse::<AudioFormat>().is_err());
        assert!("44100:17:2".parse::<AudioFormat>().is_err());
        assert!("0:16:2".parse::<AudioFormat>().is_err());
        assert!("44100:16:0".parse::<AudioFormat>().is_err());
        assert!("44100:16:9".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn test_frame_size() {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        assert_eq!(af.frame_size(), 4);
        assert_eq!(af.bytes_per_second(), 176_400);

        let af = AudioFormat::new(44100, SampleFormat::S24P32, 6);
        assert_eq!(af.frame_size(), 24);
    }

    #[test]
    fn test_bytes_to_duration() {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        // one second of CD audio
        assert_eq!(af.bytes_to_duration(176_400), Duration::from_secs(1));
        assert_eq!(af.bytes_to_duration(0), Duration::ZERO);
    }

    #[test]
    fn test_serde_as_string() {
        let af: AudioFormat = serde_json::from_str("\"44100:16:2\"").unwrap();
        assert_eq!(af, AudioFormat::new(44100, SampleFormat::S16, 2));
        assert_eq!(serde_json::to_string(&af).unwrap(), "\"44100:16:2\"");
    }
}

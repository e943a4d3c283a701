//! Symphonia-backed decoder plugin
//!
//! Wraps the symphonia probe/decode API behind [`DecoderPlugin`]:
//! container probing with an extension/MIME hint, packet decode to
//! interleaved f32, seek through the format reader, and tag extraction
//! including replay-gain and MixRamp data.

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use cadenza_common::replay_gain::{ReplayGainInfo, ReplayGainTuple};
use cadenza_common::{AudioFormat, SampleFormat};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, Value};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};

use crate::decoder::plugin::{DecoderClient, DecoderCommand, DecoderPlugin};
use crate::error::{Error, Result};
use crate::input::InputStream;
use crate::tag::{MixRampInfo, Tag, TagKind};

/// Consecutive corrupt packets tolerated before the decode fails.
const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 8;

const EXTENSIONS: &[&str] = &["flac", "mp3", "ogg", "oga", "opus", "wav", "m4a", "mp4", "aac"];

/// [`DecoderPlugin`] over the symphonia codec collection.
pub struct SymphoniaDecoderPlugin;

impl DecoderPlugin for SymphoniaDecoderPlugin {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn supports(&self, uri: &str, mime: Option<&str>) -> bool {
        if let Some(mime) = mime {
            if mime.starts_with("audio/") {
                return true;
            }
        }
        uri.rsplit('.')
            .next()
            .map(str::to_ascii_lowercase)
            .map_or(false, |ext| EXTENSIONS.contains(&ext.as_str()))
    }

    fn decode(&self, client: &mut dyn DecoderClient, input: Box<dyn InputStream>) -> Result<()> {
        let uri = input.uri().to_string();

        let mut hint = Hint::new();
        if let Some(mime) = input.mime() {
            hint.mime_type(mime);
        }
        if let Some(ext) = uri.rsplit('.').next() {
            hint.with_extension(ext);
        }

        let seekable = input.is_seekable();
        let mss = MediaSourceStream::new(Box::new(InputSource::new(input)), Default::default());

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode { uri: uri.clone(), message: format!("probe: {e}") })?;

        let mut reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode { uri: uri.clone(), message: "no audio track".into() })?
            .clone();

        let params = &track.codec_params;
        let sample_rate = params.sample_rate.ok_or_else(|| Error::Decode {
            uri: uri.clone(),
            message: "unknown sample rate".into(),
        })?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(2) as u8;

        let total_time = params.n_frames.zip(params.time_base).map(|(frames, tb)| {
            let t = tb.calc_time(frames);
            Duration::from_secs_f64(t.seconds as f64 + t.frac)
        });

        let format = AudioFormat::new(sample_rate, SampleFormat::F32, channels);
        client.ready(format, seekable, total_time);

        if let Some(rev) = reader.metadata().current() {
            client.submit_tag(tag_from_metadata(rev, total_time));
        }

        let mut decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::Decode { uri: uri.clone(), message: format!("codec: {e}") })?;

        let mut samples: Option<SampleBuffer<f32>> = None;
        let mut consecutive_errors = 0u32;

        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!(uri, "end of stream");
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => {
                    return Err(Error::Decode { uri, message: format!("read packet: {e}") });
                }
            };

            if packet.track_id() != track.id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => {
                    consecutive_errors = 0;
                    decoded
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    consecutive_errors += 1;
                    if consecutive_errors > MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(Error::Decode {
                            uri,
                            message: format!("persistent decode errors: {e}"),
                        });
                    }
                    warn!(uri, error = %e, "skipping corrupt packet");
                    continue;
                }
                Err(e) => {
                    return Err(Error::Decode { uri, message: e.to_string() });
                }
            };

            let buf = samples.get_or_insert_with(|| {
                SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
            });
            if decoded.frames() > 0 {
                buf.copy_interleaved_ref(decoded);
            } else {
                continue;
            }

            let bytes: &[u8] = f32_bytes(buf.samples());
            let bit_rate = packet_bit_rate(packet.data.len(), packet.dur, sample_rate);
            let command = client.submit_data(bytes, bit_rate);

            match command {
                DecoderCommand::None => {}
                DecoderCommand::Stop => return Ok(()),
                DecoderCommand::Seek(target) => {
                    if !seekable {
                        client.seek_error();
                        continue;
                    }
                    let time = Time::from(target.as_secs_f64());
                    match reader.seek(SeekMode::Accurate, SeekTo::Time { time, track_id: Some(track.id) })
                    {
                        Ok(_) => {
                            decoder.reset();
                            client.command_finished();
                        }
                        Err(e) => {
                            warn!(uri, error = %e, "seek failed");
                            client.seek_error();
                        }
                    }
                }
            }
        }
    }
}

/// View an f32 slice as bytes. The samples are plain data; the decoder
/// bridge copies them into chunks immediately.
fn f32_bytes(samples: &[f32]) -> &[u8] {
    // SAFETY: f32 has no invalid bit patterns and the length is exact.
    unsafe {
        std::slice::from_raw_parts(samples.as_ptr() as *const u8, std::mem::size_of_val(samples))
    }
}

/// Instantaneous source bit rate in kbit/s, estimated from one packet.
/// `dur` is in track timestamp units, which is frames for the codecs
/// in the bundled registry.
fn packet_bit_rate(packet_bytes: usize, dur: u64, sample_rate: u32) -> u16 {
    if dur == 0 {
        return 0;
    }
    let bits = packet_bytes as u64 * 8;
    (bits * sample_rate as u64 / dur / 1000).min(u16::MAX as u64) as u16
}

fn tag_from_metadata(rev: &MetadataRevision, duration: Option<Duration>) -> Tag {
    let mut tag = Tag::new();
    tag.duration = duration;

    let mut track_gain = None;
    let mut track_peak = None;
    let mut album_gain = None;
    let mut album_peak = None;

    for item in rev.tags() {
        let value = match &item.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        match item.std_key {
            Some(StandardTagKey::Artist) => tag.add_item(TagKind::Artist, value),
            Some(StandardTagKey::AlbumArtist) => tag.add_item(TagKind::AlbumArtist, value),
            Some(StandardTagKey::Album) => tag.add_item(TagKind::Album, value),
            Some(StandardTagKey::TrackTitle) => tag.add_item(TagKind::Title, value),
            Some(StandardTagKey::TrackNumber) => tag.add_item(TagKind::Track, value),
            Some(StandardTagKey::Genre) => tag.add_item(TagKind::Genre, value),
            Some(StandardTagKey::Date) => tag.add_item(TagKind::Date, value),
            Some(StandardTagKey::Comment) => tag.add_item(TagKind::Comment, value),
            Some(StandardTagKey::ReplayGainTrackGain) => track_gain = parse_db(&value),
            Some(StandardTagKey::ReplayGainTrackPeak) => track_peak = value.parse().ok(),
            Some(StandardTagKey::ReplayGainAlbumGain) => album_gain = parse_db(&value),
            Some(StandardTagKey::ReplayGainAlbumPeak) => album_peak = value.parse().ok(),
            _ => match item.key.to_ascii_uppercase().as_str() {
                "MIXRAMP_START" => tag.mixramp.start = MixRampInfo::parse_ramp(&value),
                "MIXRAMP_END" => tag.mixramp.end = MixRampInfo::parse_ramp(&value),
                _ => {}
            },
        }
    }

    if track_gain.is_some() || album_gain.is_some() {
        let mut info = ReplayGainInfo::default();
        if let Some(gain_db) = track_gain {
            info.track = ReplayGainTuple { gain_db, peak: track_peak.unwrap_or(0.0) };
        }
        if let Some(gain_db) = album_gain {
            info.album = ReplayGainTuple { gain_db, peak: album_peak.unwrap_or(0.0) };
        }
        tag.replay_gain = Some(info);
    }

    tag
}

/// Parse `"-6.34 dB"` style values.
fn parse_db(s: &str) -> Option<f32> {
    s.trim().trim_end_matches("dB").trim().parse().ok()
}

/// Adapter presenting an [`InputStream`] as a symphonia media source.
struct InputSource {
    inner: Box<dyn InputStream>,
    position: u64,
}

impl InputSource {
    fn new(inner: Box<dyn InputStream>) -> Self {
        Self { inner, position: 0 }
    }
}

impl Read for InputSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .inner
            .read(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for InputSource {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self.position.saturating_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = self.inner.size().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Unsupported, "size unknown")
                })?;
                size.saturating_add_signed(delta)
            }
        };
        self.inner
            .seek(target)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.position = target;
        Ok(target)
    }
}

impl MediaSource for InputSource {
    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    fn byte_len(&self) -> Option<u64> {
        self.inner.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_by_extension_and_mime() {
        let p = SymphoniaDecoderPlugin;
        assert!(p.supports("music/song.FLAC", None));
        assert!(p.supports("music/song.mp3", None));
        assert!(p.supports("stream", Some("audio/mpeg")));
        assert!(!p.supports("notes.txt", None));
        assert!(!p.supports("stream", Some("video/mp4")));
    }

    #[test]
    fn test_parse_db() {
        assert_eq!(parse_db("-6.34 dB"), Some(-6.34));
        assert_eq!(parse_db("+2.0dB"), Some(2.0));
        assert_eq!(parse_db("0"), Some(0.0));
        assert_eq!(parse_db("loud"), None);
    }
}

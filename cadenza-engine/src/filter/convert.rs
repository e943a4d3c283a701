//! Format conversion filter
//!
//! Converts rate, sample format, and channel count between the
//! decoder's format and the device's negotiated format. Pass-through
//! when the two agree. Rate conversion runs a stateful rubato
//! resampler fed in fixed blocks; `reset` discards its history, which
//! is required after seek and cancel.

use cadenza_common::{AudioFormat, SampleFormat};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::{Error, Result};

use super::{Filter, PreparedFilter};

/// Frames fed to the resampler per process call.
const RESAMPLE_BLOCK_FRAMES: usize = 1024;

/// Factory for [`ConvertFilter`] bound to a target format.
pub struct PreparedConvertFilter {
    out_format: AudioFormat,
}

impl PreparedConvertFilter {
    pub fn new(out_format: AudioFormat) -> Self {
        Self { out_format }
    }
}

impl PreparedFilter for PreparedConvertFilter {
    fn open(&mut self, in_format: AudioFormat) -> Result<Box<dyn Filter>> {
        Ok(Box::new(ConvertFilter::open(in_format, self.out_format)?))
    }
}

/// Concrete conversion filter.
pub struct ConvertFilter {
    in_format: AudioFormat,
    out_format: AudioFormat,

    /// None when formats agree and data passes through untouched.
    resampler: Option<BlockResampler>,

    /// f32 interleaved working set at the output channel count.
    work: Vec<f32>,

    out_buffer: Vec<u8>,
}

impl ConvertFilter {
    pub fn open(in_format: AudioFormat, out_format: AudioFormat) -> Result<Self> {
        if in_format != out_format
            && (in_format.sample_format == SampleFormat::Dsd
                || out_format.sample_format == SampleFormat::Dsd)
        {
            return Err(Error::Config(format!(
                "cannot convert {in_format} to {out_format}: DSD must be passed through"
            )));
        }

        if !channel_mix_supported(in_format.channels, out_format.channels) {
            return Err(Error::Config(format!(
                "unsupported channel conversion {} -> {}",
                in_format.channels, out_format.channels
            )));
        }

        let resampler = if in_format.sample_rate != out_format.sample_rate {
            debug!(
                from = in_format.sample_rate,
                to = out_format.sample_rate,
                "convert filter resampling"
            );
            Some(BlockResampler::new(
                in_format.sample_rate,
                out_format.sample_rate,
                out_format.channels,
            )?)
        } else {
            None
        };

        Ok(Self {
            in_format,
            out_format,
            resampler,
            work: Vec::new(),
            out_buffer: Vec::new(),
        })
    }

    fn is_passthrough(&self) -> bool {
        self.in_format == self.out_format
    }
}

impl Filter for ConvertFilter {
    fn out_format(&self) -> AudioFormat {
        self.out_format
    }

    fn filter<'a>(&'a mut self, src: &'a [u8]) -> Result<&'a [u8]> {
        if self.is_passthrough() {
            return Ok(src);
        }

        decode_to_f32(&mut self.work, src, self.in_format.sample_format);
        mix_channels(&mut self.work, self.in_format.channels, self.out_format.channels);

        if let Some(resampler) = &mut self.resampler {
            resampler.push(&self.work);
            resampler.drain(&mut self.work)?;
        }

        encode_from_f32(&mut self.out_buffer, &self.work, self.out_format.sample_format);
        Ok(&self.out_buffer)
    }

    fn reset(&mut self) {
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }
}

fn channel_mix_supported(from: u8, to: u8) -> bool {
    from == to || from == 1 || to == 1
}

/// Fixed-block streaming wrapper around rubato. Input frames queue in
/// `pending` until a full block is available.
struct BlockResampler {
    inner: FastFixedIn<f32>,
    channels: usize,
    /// interleaved frames waiting for a full block
    pending: Vec<f32>,
    planar_in: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,
}

impl BlockResampler {
    fn new(from_rate: u32, to_rate: u32, channels: u8) -> Result<Self> {
        let channels = channels as usize;
        let inner = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            RESAMPLE_BLOCK_FRAMES,
            channels,
        )
        .map_err(|e| Error::Config(format!("failed to create resampler: {e}")))?;

        Ok(Self {
            inner,
            channels,
            pending: Vec::new(),
            planar_in: vec![vec![0.0; RESAMPLE_BLOCK_FRAMES]; channels],
            planar_out: Vec::new(),
        })
    }

    fn push(&mut self, interleaved: &[f32]) {
        self.pending.extend_from_slice(interleaved);
    }

    /// Process every complete block in `pending`, leaving the output
    /// interleaved in `out`.
    fn drain(&mut self, out: &mut Vec<f32>) -> Result<()> {
        out.clear();
        let block = RESAMPLE_BLOCK_FRAMES * self.channels;

        let mut offset = 0;
        while self.pending.len() - offset >= block {
            let input = &self.pending[offset..offset + block];
            for (ch, plane) in self.planar_in.iter_mut().enumerate() {
                for (frame, slot) in plane.iter_mut().enumerate() {
                    *slot = input[frame * self.channels + ch];
                }
            }

            self.planar_out = self
                .inner
                .process(&self.planar_in, None)
                .map_err(|e| Error::Config(format!("resampler failure: {e}")))?;

            let frames = self.planar_out.first().map_or(0, Vec::len);
            out.reserve(frames * self.channels);
            for frame in 0..frames {
                for plane in &self.planar_out {
                    out.push(plane[frame]);
                }
            }

            offset += block;
        }

        self.pending.drain(..offset);
        Ok(())
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.inner.reset();
    }
}

fn decode_to_f32(dest: &mut Vec<f32>, src: &[u8], format: SampleFormat) {
    dest.clear();
    match format {
        SampleFormat::U8 => {
            dest.extend(src.iter().map(|&b| (b as f32 - 128.0) / 128.0));
        }
        SampleFormat::S16 => {
            dest.extend(
                src.chunks_exact(2)
                    .map(|c| i16::from_ne_bytes([c[0], c[1]]) as f32 / 32768.0),
            );
        }
        SampleFormat::S24P32 => {
            dest.extend(src.chunks_exact(4).map(|c| {
                i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f32 / 8_388_608.0
            }));
        }
        SampleFormat::S32 => {
            dest.extend(src.chunks_exact(4).map(|c| {
                i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0
            }));
        }
        SampleFormat::F32 => {
            dest.extend(
                src.chunks_exact(4).map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]])),
            );
        }
        SampleFormat::Dsd => unreachable!("DSD conversion rejected at open"),
    }
}

fn encode_from_f32(dest: &mut Vec<u8>, src: &[f32], format: SampleFormat) {
    dest.clear();
    match format {
        SampleFormat::U8 => {
            dest.extend(src.iter().map(|&s| {
                ((s * 128.0).clamp(-128.0, 127.0) + 128.0) as u8
            }));
        }
        SampleFormat::S16 => {
            for &s in src {
                let v = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
                dest.extend_from_slice(&v.to_ne_bytes());
            }
        }
        SampleFormat::S24P32 => {
            for &s in src {
                let v = (s * 8_388_608.0).clamp(-8_388_608.0, 8_388_607.0) as i32;
                dest.extend_from_slice(&v.to_ne_bytes());
            }
        }
        SampleFormat::S32 => {
            for &s in src {
                let v = (s as f64 * 2_147_483_648.0)
                    .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
                dest.extend_from_slice(&v.to_ne_bytes());
            }
        }
        SampleFormat::F32 => {
            for &s in src {
                dest.extend_from_slice(&s.to_ne_bytes());
            }
        }
        SampleFormat::Dsd => unreachable!("DSD conversion rejected at open"),
    }
}

/// In-place channel remix: mono duplicates, downmix averages.
fn mix_channels(samples: &mut Vec<f32>, from: u8, to: u8) {
    if from == to {
        return;
    }

    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);

    if from == 1 {
        for &s in samples.iter() {
            for _ in 0..to {
                out.push(s);
            }
        }
    } else {
        // to == 1, checked at open
        for frame in samples.chunks_exact(from) {
            out.push(frame.iter().sum::<f32>() / from as f32);
        }
    }

    *samples = out;
}

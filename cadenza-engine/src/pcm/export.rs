//! PCM export
//!
//! The last shaping step inside each output, applied after the filter
//! chain: channel reorder, DSD repacking, 24-bit packing, and byte
//! swapping, in that order. Which steps are active is decided once per
//! open from the negotiated format and the device's parameters.

use cadenza_common::{AudioFormat, SampleFormat};

use super::{byteswap, channel_order, dsd, pack};

/// Requested export effects. Any combination may be set; effects that
/// do not apply to the opened format are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportParams {
    /// Reorder surround channels to the ALSA layout.
    pub alsa_channel_order: bool,

    /// Pack DSD bytes into u16 words.
    pub dsd_u16: bool,

    /// Pack DSD bytes into u32 words.
    pub dsd_u32: bool,

    /// Encode DSD as DSD-over-PCM (24-bit samples with marker bytes).
    pub dop: bool,

    /// Shift S24-in-32 samples into the high bits.
    pub shift8: bool,

    /// Pack S24-in-32 samples to 3 bytes.
    pub pack24: bool,

    /// Byte-swap samples for the device's endianness.
    pub reverse_endian: bool,
}

impl ExportParams {
    /// The sample rate the device sees for a stream of `rate`.
    /// DSD repacking divides the rate; everything else preserves it.
    pub fn calc_output_sample_rate(&self, rate: u32) -> u32 {
        let mut rate = rate;
        if self.dsd_u16 || self.dop {
            rate /= 2;
        }
        if self.dsd_u32 {
            rate /= 4;
        }
        rate
    }

    /// Inverse of [`calc_output_sample_rate`]: the stream rate that
    /// produces `rate` at the device.
    ///
    /// [`calc_output_sample_rate`]: ExportParams::calc_output_sample_rate
    pub fn calc_input_sample_rate(&self, rate: u32) -> u32 {
        let mut rate = rate;
        if self.dsd_u32 {
            rate *= 4;
        }
        if self.dsd_u16 || self.dop {
            rate *= 2;
        }
        rate
    }
}

/// Stateful (per-open) PCM export stage. Owns the scratch buffers the
/// transformed PCM is written to; the slice returned by
/// [`PcmExport::export`] stays valid until the next call.
pub struct PcmExport {
    channels: u8,

    alsa_channel_order: Option<usize>,
    dsd_u16: bool,
    dsd_u32: bool,
    dop: bool,
    shift8: bool,
    pack24: bool,
    reverse_endian: Option<usize>,

    buffer: Vec<u8>,
    swap_buffer: Vec<u8>,
}

impl PcmExport {
    /// Configure the export for one device open. Effects in `params`
    /// that do not apply to `format` are disabled.
    pub fn open(format: AudioFormat, params: ExportParams) -> Self {
        let sf = format.sample_format;
        let is_dsd = sf == SampleFormat::Dsd;

        let alsa_channel_order = (params.alsa_channel_order
            && matches!(sf, SampleFormat::S16 | SampleFormat::S32)
            && matches!(format.channels, 6 | 8))
        .then(|| sf.sample_size());

        let dop = params.dop && is_dsd;
        let dsd_u16 = params.dsd_u16 && is_dsd && !dop;
        let dsd_u32 = params.dsd_u32 && is_dsd && !dop && !dsd_u16;

        let shift8 = params.shift8 && sf == SampleFormat::S24P32;
        let pack24 = params.pack24 && sf == SampleFormat::S24P32 && !shift8;

        // sample width as seen after the earlier stages
        let swap_size = if dop || dsd_u32 || shift8 {
            4
        } else if dsd_u16 {
            2
        } else if pack24 {
            3
        } else {
            sf.sample_size()
        };
        let reverse_endian = (params.reverse_endian && swap_size > 1).then_some(swap_size);

        Self {
            channels: format.channels,
            alsa_channel_order,
            dsd_u16,
            dsd_u32,
            dop,
            shift8,
            pack24,
            reverse_endian,
            buffer: Vec::new(),
            swap_buffer: Vec::new(),
        }
    }

    /// Bytes per frame leaving the export stage.
    pub fn frame_size(&self, format: AudioFormat) -> usize {
        let sample = if self.dop || self.dsd_u32 || self.shift8 {
            4
        } else if self.dsd_u16 {
            2
        } else if self.pack24 {
            3
        } else {
            format.sample_format.sample_size()
        };
        sample * self.channels as usize
    }

    /// Apply the configured effects. Returns either `src` unchanged or
    /// a slice of an internal buffer valid until the next call.
    pub fn export<'a>(&'a mut self, src: &'a [u8]) -> &'a [u8] {
        let mut used_buffer = false;

        {
            let mut cur: &[u8] = src;

            if let Some(sample_size) = self.alsa_channel_order {
                channel_order::to_alsa_channel_order(
                    &mut self.buffer,
                    cur,
                    sample_size,
                    self.channels,
                );
                cur = &self.buffer;
                used_buffer = true;
            }

            if self.dop {
                dsd::dsd_to_dop(&mut self.swap_buffer, cur, self.channels);
                std::mem::swap(&mut self.buffer, &mut self.swap_buffer);
                cur = &self.buffer;
                used_buffer = true;
            } else if self.dsd_u16 {
                dsd::dsd_to_u16(&mut self.swap_buffer, cur, self.channels);
                std::mem::swap(&mut self.buffer, &mut self.swap_buffer);
                cur = &self.buffer;
                used_buffer = true;
            } else if self.dsd_u32 {
                dsd::dsd_to_u32(&mut self.swap_buffer, cur, self.channels);
                std::mem::swap(&mut self.buffer, &mut self.swap_buffer);
                cur = &self.buffer;
                used_buffer = true;
            }

            if self.shift8 {
                pack::shift8(&mut self.swap_buffer, cur);
                std::mem::swap(&mut self.buffer, &mut self.swap_buffer);
                cur = &self.buffer;
                used_buffer = true;
            } else if self.pack24 {
                pack::pack24(&mut self.swap_buffer, cur);
                std::mem::swap(&mut self.buffer, &mut self.swap_buffer);
                cur = &self.buffer;
                used_buffer = true;
            }

            if let Some(sample_size) = self.reverse_endian {
                byteswap::reverse_endian(&mut self.swap_buffer, cur, sample_size);
                std::mem::swap(&mut self.buffer, &mut self.swap_buffer);
                used_buffer = true;
            }
        }

        if used_buffer {
            &self.buffer
        } else {
            src
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_bytes_i32(v: &[i32]) -> Vec<u8> {
        v.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn words32(dest: &[u8]) -> Vec<u32> {
        dest.chunks_exact(4).map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect()
    }

    #[test]
    fn test_shift8_end_to_end() {
        let params = ExportParams { shift8: true, ..Default::default() };
        assert_eq!(params.calc_output_sample_rate(42), 42);
        assert_eq!(params.calc_input_sample_rate(42), 42);

        let mut e = PcmExport::open(AudioFormat::new(44100, SampleFormat::S24P32, 2), params);
        let src = as_bytes_i32(&[0x0, 0x1, 0x100, 0x10000, 0x00ff_ffff]);
        let dest = e.export(&src);
        assert_eq!(words32(dest), [0x0, 0x100, 0x10000, 0x0100_0000, 0xffff_ff00]);
    }

    #[test]
    fn test_pack24_end_to_end() {
        let params = ExportParams { pack24: true, ..Default::default() };
        let af = AudioFormat::new(44100, SampleFormat::S24P32, 2);
        let mut e = PcmExport::open(af, params);
        assert_eq!(e.frame_size(af), 6);

        let src = as_bytes_i32(&[0x0, 0x1, 0x100, 0x10000, 0x00ff_ffff]);
        let dest = e.export(&src).to_vec();
        assert_eq!(dest.len(), 15);

        #[cfg(target_endian = "little")]
        assert_eq!(
            dest,
            [
                0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, //
                0x00, 0x00, 0x01, 0xff, 0xff, 0xff,
            ]
        );
    }

    #[test]
    fn test_dop_rate_and_frames() {
        let params = ExportParams { dop: true, ..Default::default() };
        assert_eq!(params.calc_output_sample_rate(705_600), 352_800);
        assert_eq!(params.calc_input_sample_rate(352_800), 705_600);

        let af = AudioFormat::new(352_800, SampleFormat::Dsd, 2);
        let mut e = PcmExport::open(af, params);
        let src = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
        let dest = e.export(&src);
        assert_eq!(words32(dest), [0xff05_0145, 0xff05_2367, 0xfffa_89cd, 0xfffa_abef]);
    }

    #[test]
    fn test_dsd_rates() {
        let u16p = ExportParams { dsd_u16: true, ..Default::default() };
        assert_eq!(u16p.calc_output_sample_rate(705_600), 352_800);
        assert_eq!(u16p.calc_input_sample_rate(352_800), 705_600);

        let u32p = ExportParams { dsd_u32: true, ..Default::default() };
        assert_eq!(u32p.calc_output_sample_rate(705_600), 176_400);
        assert_eq!(u32p.calc_input_sample_rate(176_400), 705_600);
    }

    #[test]
    fn test_rate_inverse_over_all_params() {
        // calc_input(calc_output(x)) == x for every flag combination
        for bits in 0u8..128 {
            let params = ExportParams {
                alsa_channel_order: bits & 1 != 0,
                dsd_u16: bits & 2 != 0,
                dsd_u32: bits & 4 != 0,
                dop: bits & 8 != 0,
                shift8: bits & 16 != 0,
                pack24: bits & 32 != 0,
                reverse_endian: bits & 64 != 0,
            };
            for rate in [705_600u32, 352_800, 2_822_400] {
                let out = params.calc_output_sample_rate(rate);
                assert_eq!(
                    params.calc_input_sample_rate(out),
                    rate,
                    "params {params:?} rate {rate}"
                );
            }
        }
    }

    #[test]
    fn test_effects_gated_by_format() {
        // DSD flags are ignored for PCM input
        let params = ExportParams { dop: true, dsd_u16: true, ..Default::default() };
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        let mut e = PcmExport::open(af, params);
        let src = [1u8, 2, 3, 4];
        assert_eq!(e.export(&src), src);
        assert_eq!(e.frame_size(af), 4);
    }

    #[test]
    fn test_reverse_endian_identity_for_u8() {
        let params = ExportParams { reverse_endian: true, ..Default::default() };
        let mut e = PcmExport::open(AudioFormat::new(44100, SampleFormat::U8, 2), params);
        let src = [1u8, 2, 3, 4];
        assert_eq!(e.export(&src), src);
    }

    #[test]
    fn test_reorder_then_swap_compose() {
        let params = ExportParams {
            alsa_channel_order: true,
            reverse_endian: true,
            ..Default::default()
        };
        let af = AudioFormat::new(48000, SampleFormat::S16, 6);
        let mut e = PcmExport::open(af, params);

        let src: Vec<u8> = (0i16..6).flat_map(|s| s.to_ne_bytes()).collect();
        let dest = e.export(&src);
        let out: Vec<i16> = dest
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]).swap_bytes())
            .collect();
        assert_eq!(out, [0, 1, 4, 5, 2, 3]);
    }
}

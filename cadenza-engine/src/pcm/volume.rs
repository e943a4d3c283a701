//! Fixed-point software volume
//!
//! Integer volume 0..=100 maps to a fixed-point scale with
//! [`VOLUME_1`] as unity. The hot loop is a single multiply-shift per
//! sample with no branches.

use cadenza_common::{AudioFormat, SampleFormat};

/// Fixed-point unity scale (10 fractional bits).
pub const VOLUME_1: i32 = 1024;

/// Map an integer volume 0..=100 to the fixed-point scale.
pub fn volume_to_scale(volume: u32) -> i32 {
    (volume.min(100) as i32 * VOLUME_1) / 100
}

#[inline]
fn scale_i<const SHIFT: u32>(sample: i32, scale: i32) -> i32 {
    let scaled = (sample as i64 * scale as i64) >> 10;
    let limit = (1i64 << (31 - SHIFT)) - 1;
    scaled.clamp(-limit - 1, limit) as i32
}

/// Scale PCM in place. Returns false for formats software volume
/// cannot process (DSD); the caller must fall back to a hardware
/// mixer or reject the configuration.
pub fn apply_volume(data: &mut [u8], format: AudioFormat, scale: i32) -> bool {
    if scale == VOLUME_1 {
        return true;
    }

    match format.sample_format {
        SampleFormat::U8 => {
            for d in data.iter_mut() {
                let centered = *d as i32 - 128;
                let scaled = (centered * scale) >> 10;
                *d = (scaled.clamp(-128, 127) + 128) as u8;
            }
            true
        }
        SampleFormat::S16 => {
            for d in data.chunks_exact_mut(2) {
                let s = i16::from_ne_bytes([d[0], d[1]]) as i32;
                let v = scale_i::<16>(s, scale) as i16;
                d.copy_from_slice(&v.to_ne_bytes());
            }
            true
        }
        SampleFormat::S24P32 => {
            for d in data.chunks_exact_mut(4) {
                let s = i32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
                let v = scale_i::<8>(s, scale);
                d.copy_from_slice(&v.to_ne_bytes());
            }
            true
        }
        SampleFormat::S32 => {
            for d in data.chunks_exact_mut(4) {
                let s = i32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
                let v = scale_i::<0>(s, scale);
                d.copy_from_slice(&v.to_ne_bytes());
            }
            true
        }
        SampleFormat::F32 => {
            let fscale = scale as f32 / VOLUME_1 as f32;
            for d in data.chunks_exact_mut(4) {
                let s = f32::from_ne_bytes([d[0], d[1], d[2], d[3]]) * fscale;
                d.copy_from_slice(&s.to_ne_bytes());
            }
            true
        }
        SampleFormat::Dsd => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_mapping() {
        assert_eq!(volume_to_scale(0), 0);
        assert_eq!(volume_to_scale(100), VOLUME_1);
        assert_eq!(volume_to_scale(50), VOLUME_1 / 2);
        assert_eq!(volume_to_scale(200), VOLUME_1);
    }

    #[test]
    fn test_s16_half_volume() {
        let fmt = AudioFormat::new(44100, SampleFormat::S16, 2);
        let mut data: Vec<u8> =
            [1000i16, -1000, 0, i16::MAX].iter().flat_map(|s| s.to_ne_bytes()).collect();
        assert!(apply_volume(&mut data, fmt, VOLUME_1 / 2));

        let out: Vec<i16> =
            data.chunks_exact(2).map(|c| i16::from_ne_bytes([c[0], c[1]])).collect();
        assert_eq!(out, [500, -500, 0, i16::MAX / 2]);
    }

    #[test]
    fn test_zero_volume_silences() {
        let fmt = AudioFormat::new(44100, SampleFormat::S16, 1);
        let mut data: Vec<u8> = [12345i16, -32768].iter().flat_map(|s| s.to_ne_bytes()).collect();
        assert!(apply_volume(&mut data, fmt, 0));
        let out: Vec<i16> =
            data.chunks_exact(2).map(|c| i16::from_ne_bytes([c[0], c[1]])).collect();
        assert_eq!(out, [0, 0]);
    }

    #[test]
    fn test_unity_is_identity() {
        let fmt = AudioFormat::new(44100, SampleFormat::F32, 1);
        let orig: Vec<u8> = 0.7f32.to_ne_bytes().to_vec();
        let mut data = orig.clone();
        assert!(apply_volume(&mut data, fmt, VOLUME_1));
        assert_eq!(data, orig);
    }

    #[test]
    fn test_dsd_rejected() {
        let fmt = AudioFormat::new(352800, SampleFormat::Dsd, 2);
        let mut data = vec![0u8; 4];
        assert!(!apply_volume(&mut data, fmt, VOLUME_1 / 2));
    }
}

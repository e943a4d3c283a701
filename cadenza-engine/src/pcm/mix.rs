//! Cross-fade mixing
//!
//! Mixes two equally-formatted PCM buffers in place with a linear
//! ratio. Used by the player to blend the tail of the outgoing song
//! with the head of the incoming one.

use cadenza_common::{AudioFormat, SampleFormat};

#[inline]
fn mix_sample_i<const SHIFT: u32>(a: i32, b: i32, portion1: f32) -> i32 {
    let mixed = a as f32 * portion1 + b as f32 * (1.0 - portion1);
    let limit = (1i64 << (31 - SHIFT)) - 1;
    (mixed as i64).clamp(-limit - 1, limit) as i32
}

/// Mix `other` into `dest`: `dest = dest * portion1 + other * (1 -
/// portion1)`, clamped to the sample range.
///
/// Returns false (leaving `dest` untouched) for formats that cannot be
/// mixed (U8, DSD) or when the buffers disagree in length; the caller
/// then skips the fade.
pub fn mix(dest: &mut [u8], other: &[u8], format: AudioFormat, portion1: f32) -> bool {
    if dest.len() != other.len() {
        return false;
    }
    let portion1 = portion1.clamp(0.0, 1.0);

    match format.sample_format {
        SampleFormat::S16 => {
            for (d, s) in dest.chunks_exact_mut(2).zip(other.chunks_exact(2)) {
                let a = i16::from_ne_bytes([d[0], d[1]]) as i32;
                let b = i16::from_ne_bytes([s[0], s[1]]) as i32;
                let m = mix_sample_i::<16>(a, b, portion1) as i16;
                d.copy_from_slice(&m.to_ne_bytes());
            }
            true
        }
        SampleFormat::S24P32 => {
            for (d, s) in dest.chunks_exact_mut(4).zip(other.chunks_exact(4)) {
                let a = i32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
                let b = i32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
                let m = mix_sample_i::<8>(a, b, portion1);
                d.copy_from_slice(&m.to_ne_bytes());
            }
            true
        }
        SampleFormat::S32 => {
            for (d, s) in dest.chunks_exact_mut(4).zip(other.chunks_exact(4)) {
                let a = i32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
                let b = i32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
                let m = mix_sample_i::<0>(a, b, portion1);
                d.copy_from_slice(&m.to_ne_bytes());
            }
            true
        }
        SampleFormat::F32 => {
            for (d, s) in dest.chunks_exact_mut(4).zip(other.chunks_exact(4)) {
                let a = f32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
                let b = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
                let m = a * portion1 + b * (1.0 - portion1);
                d.copy_from_slice(&m.to_ne_bytes());
            }
            true
        }
        SampleFormat::U8 | SampleFormat::Dsd => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16(v: &[i16]) -> Vec<u8> {
        v.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn as_s16(v: &[u8]) -> Vec<i16> {
        v.chunks_exact(2).map(|c| i16::from_ne_bytes([c[0], c[1]])).collect()
    }

    const FMT: AudioFormat = AudioFormat::new(44100, SampleFormat::S16, 2);

    #[test]
    fn test_full_portions_select_one_side() {
        let a = s16(&[1000, -1000]);
        let b = s16(&[400, 600]);

        let mut d = a.clone();
        assert!(mix(&mut d, &b, FMT, 1.0));
        assert_eq!(d, a);

        let mut d = a.clone();
        assert!(mix(&mut d, &b, FMT, 0.0));
        assert_eq!(d, b);
    }

    #[test]
    fn test_halfway_mix() {
        let mut d = s16(&[1000, 0]);
        let b = s16(&[0, 2000]);
        assert!(mix(&mut d, &b, FMT, 0.5));
        assert_eq!(as_s16(&d), [500, 1000]);
    }

    #[test]
    fn test_stays_within_sample_range() {
        let mut d = s16(&[i16::MAX, i16::MIN]);
        let b = s16(&[i16::MAX, i16::MIN]);
        assert!(mix(&mut d, &b, FMT, 0.5));
        assert_eq!(as_s16(&d), [i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_length_mismatch_refused() {
        let mut d = s16(&[0, 0]);
        let b = s16(&[0]);
        assert!(!mix(&mut d, &b, FMT, 0.5));
    }

    #[test]
    fn test_dsd_refused() {
        let mut d = vec![0u8; 8];
        let b = vec![0u8; 8];
        assert!(!mix(&mut d, &b, AudioFormat::new(352800, SampleFormat::Dsd, 2), 0.5));
    }

    #[test]
    fn test_f32_mix() {
        let f = AudioFormat::new(44100, SampleFormat::F32, 1);
        let mut d: Vec<u8> = 0.8f32.to_ne_bytes().to_vec();
        let b: Vec<u8> = 0.2f32.to_ne_bytes().to_vec();
        assert!(mix(&mut d, &b, f, 0.25));
        let out = f32::from_ne_bytes([d[0], d[1], d[2], d[3]]);
        assert!((out - 0.35).abs() < 1e-6);
    }
}

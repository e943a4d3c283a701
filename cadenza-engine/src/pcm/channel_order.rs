//! Channel reordering for ALSA-style surround layouts
//!
//! The pipeline carries channels in FLAC/WAV order; ALSA expects the
//! side and center pairs swapped. For 5.1 (C, LFE) <-> (Ls, Rs); for
//! 7.1 the same swap with the rear pair left in place.

/// Reorder surround channels to the ALSA layout. Only 6- and
/// 8-channel streams are affected; everything else passes through
/// unchanged.
pub fn to_alsa_channel_order(
    dest: &mut Vec<u8>,
    src: &[u8],
    sample_size: usize,
    channels: u8,
) {
    dest.clear();
    if channels != 6 && channels != 8 {
        dest.extend_from_slice(src);
        return;
    }

    let frame_size = sample_size * channels as usize;
    dest.reserve(src.len());

    // positions 2,3 (C, LFE) trade places with 4,5 (Ls, Rs)
    const ORDER: [usize; 8] = [0, 1, 4, 5, 2, 3, 6, 7];

    for frame in src.chunks_exact(frame_size) {
        for ch in 0..channels as usize {
            let s = ORDER[ch] * sample_size;
            dest.extend_from_slice(&frame[s..s + sample_size]);
        }
    }
}

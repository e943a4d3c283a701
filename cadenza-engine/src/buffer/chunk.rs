//! A chunk of decoded audio
//!
//! The unit of exchange between pipeline stages: a fixed-capacity byte
//! region plus the metadata the player and outputs need to interpret
//! it. The decoder fills a chunk incrementally with [`Chunk::write`] /
//! [`Chunk::expand`] and pushes it once full.

use std::time::Duration;

use cadenza_common::{AudioFormat, ReplayGainInfo};

use crate::tag::Tag;

/// Payload capacity of one chunk, in bytes.
pub const CHUNK_SIZE: usize = 4096;

/// A chunk of PCM data and its metadata.
///
/// The format of the payload is defined by whoever pushes the chunk
/// into a pipe; all chunks in one pipe share one format.
pub struct Chunk {
    /// Number of payload bytes in `data`.
    length: usize,

    /// Time stamp within the song at the first byte of the payload.
    pub time: Option<Duration>,

    /// Current bit rate of the source, in kbit/s.
    pub bit_rate: u16,

    /// Set when the bit rate differs from the previous chunk's;
    /// the player notifies listeners at this boundary.
    pub bit_rate_changed: bool,

    /// Tag that takes effect at this chunk; appears at song boundaries
    /// and on stream metadata updates.
    pub tag: Option<Tag>,

    /// Replay-gain snapshot of the song this payload came from, or
    /// `None` for synthesized silence (the replay-gain filter keeps its
    /// previous state).
    pub replay_gain: Option<ReplayGainInfo>,

    /// True if this chunk was synthesized as silence rather than
    /// decoded from the source.
    pub is_silence: bool,

    /// Format of the payload. Set by the first write, cleared on reset.
    audio_format: Option<AudioFormat>,

    /// Identifies the pool this chunk belongs to.
    pub(super) pool_serial: u32,

    data: [u8; CHUNK_SIZE],
}

impl Chunk {
    pub(super) fn new(pool_serial: u32) -> Self {
        Self {
            length: 0,
            time: None,
            bit_rate: 0,
            bit_rate_changed: false,
            tag: None,
            replay_gain: None,
            is_silence: false,
            audio_format: None,
            pool_serial,
            data: [0u8; CHUNK_SIZE],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0 && self.tag.is_none()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    /// The payload written so far.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Mutable payload access, used by the player for in-place
    /// cross-fade mixing.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.length]
    }

    /// The format of the payload, if any data has been written.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.audio_format
    }

    /// Checks that the payload matches `af`; vacuously true while the
    /// chunk is unwritten.
    pub fn check_format(&self, af: AudioFormat) -> bool {
        self.audio_format.map_or(true, |f| f == af)
    }

    /// Prepare appending to the chunk. Returns the writable tail, or
    /// `None` if less than one frame of space remains.
    ///
    /// The time stamp and bit rate stick only for the first write of a
    /// chunk; the format must stay the same for the chunk's lifetime.
    pub fn write(
        &mut self,
        af: AudioFormat,
        time: Duration,
        bit_rate: u16,
    ) -> Option<&mut [u8]> {
        debug_assert!(self.check_format(af));

        if self.length == 0 {
            // the first write on this chunk determines the metadata
            self.time = Some(time);
            self.bit_rate = bit_rate;
            self.audio_format = Some(af);
        }

        let frame_size = af.frame_size();
        let remaining = CHUNK_SIZE - self.length;
        if remaining < frame_size {
            return None;
        }

        Some(&mut self.data[self.length..])
    }

    /// Account for `n` bytes appended to the buffer returned by
    /// [`Chunk::write`]. Returns true when the chunk cannot take
    /// another frame and should be pushed.
    pub fn expand(&mut self, af: AudioFormat, n: usize) -> bool {
        debug_assert!(self.length + n <= CHUNK_SIZE);
        debug_assert!(self.check_format(af));

        self.length += n;
        self.length + af.frame_size() > CHUNK_SIZE
    }

    /// Fill the whole chunk with silence in the given format.
    pub fn fill_silence(&mut self, af: AudioFormat) {
        let frames = CHUNK_SIZE / af.frame_size();
        self.length = frames * af.frame_size();
        self.audio_format = Some(af);
        self.is_silence = true;
        self.replay_gain = None;
        self.data[..self.length].fill(0);
    }

    /// Reset all metadata and drop the payload; called by the pool on
    /// release.
    pub(super) fn reset(&mut self) {
        self.length = 0;
        self.time = None;
        self.bit_rate = 0;
        self.bit_rate_changed = false;
        self.tag = None;
        self.replay_gain = None;
        self.is_silence = false;
        self.audio_format = None;
    }
}

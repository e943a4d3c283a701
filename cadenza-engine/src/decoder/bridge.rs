//! Decoder bridge
//!
//! The [`DecoderClient`] implementation handed to the plugin. It moves
//! decoded PCM into pool chunks, stamps timestamps and metadata, pushes
//! full chunks into the producer pipe, and translates the shared
//! command slot into plugin-visible commands. Backpressure lives here:
//! when the pipe is full or the pool is empty the bridge suspends on
//! the decoder condition variable until the player signals progress.

use std::sync::Arc;
use std::time::Duration;

use cadenza_common::{AudioFormat, ReplayGainInfo};
use tracing::{debug, trace, warn};

use crate::buffer::{Chunk, ChunkPipe, ChunkPool};
use crate::filter::{ConvertFilter, Filter};
use crate::tag::Tag;

use super::control::{Command, Shared};
use super::plugin::{DecoderClient, DecoderCommand};
use super::DecoderState;

pub(super) struct DecoderBridge {
    shared: Arc<Shared>,
    pool: Arc<ChunkPool>,
    pipe: Arc<ChunkPipe>,
    max_pipe_chunks: usize,

    /// Apply the `audio_output_format` override before chunking.
    configured_format: Option<AudioFormat>,

    /// Present when the configured format differs from the stream's.
    convert: Option<ConvertFilter>,

    /// Format of the chunks this bridge produces.
    format: Option<AudioFormat>,

    /// Chunk currently being filled.
    chunk: Option<Box<Chunk>>,

    /// Tag waiting to ride on the next pushed chunk.
    pending_tag: Option<Tag>,

    /// Replay-gain snapshot stamped onto every chunk.
    replay_gain: Option<ReplayGainInfo>,

    /// Playback-timeline position of the next PCM byte.
    timestamp: Duration,

    /// Discard decoded PCM before this position (seek emulation for
    /// plugins that cannot seek, and ranged song starts).
    skip_until: Option<Duration>,

    /// Seek target of the command currently being executed.
    pending_seek: Option<Duration>,

    last_bit_rate: u16,

    /// Reusable buffer for converted PCM.
    scratch: Vec<u8>,
}

impl DecoderBridge {
    pub(super) fn new(
        shared: Arc<Shared>,
        pool: Arc<ChunkPool>,
        pipe: Arc<ChunkPipe>,
        max_pipe_chunks: usize,
        configured_format: Option<AudioFormat>,
        initial_tag: Option<Tag>,
        start_at: Duration,
    ) -> Self {
        let replay_gain = initial_tag.as_ref().and_then(|t| t.replay_gain);
        Self {
            shared,
            pool,
            pipe,
            max_pipe_chunks,
            configured_format,
            convert: None,
            format: None,
            chunk: None,
            pending_tag: initial_tag,
            replay_gain,
            timestamp: start_at,
            skip_until: (!start_at.is_zero()).then_some(start_at),
            pending_seek: None,
            last_bit_rate: 0,
            scratch: Vec::new(),
        }
    }

    /// Push the partially filled chunk, if any.
    pub(super) fn flush(&mut self) {
        if let Some(chunk) = self.chunk.take() {
            if chunk.is_empty() {
                self.pool.release(chunk);
            } else {
                self.pipe.push(chunk);
                self.shared.client_cond.notify_one();
            }
        }
    }

    /// Translate the shared command slot. Does not consume it; the
    /// plugin acts and then calls `command_finished`.
    fn poll_command(&mut self) -> DecoderCommand {
        let inner = self.shared.lock();
        match inner.command {
            None => DecoderCommand::None,
            Some(Command::Stop) => DecoderCommand::Stop,
            Some(Command::Seek(t)) => {
                self.pending_seek = Some(t);
                DecoderCommand::Seek(t)
            }
        }
    }

    /// Get a chunk to write into, suspending while the pipe is full or
    /// the pool is exhausted. Returns `None` when a command arrives so
    /// the caller can surface it.
    fn obtain_chunk(&mut self) -> Option<Box<Chunk>> {
        if let Some(chunk) = self.chunk.take() {
            return Some(chunk);
        }

        let mut inner = self.shared.lock();
        loop {
            if inner.command.is_some() {
                return None;
            }

            if inner.seek_gate {
                // the player is still flushing pre-seek audio
                inner = self.shared.cond.wait(inner).unwrap_or_else(|e| e.into_inner());
                continue;
            }

            if self.pipe.len() < self.max_pipe_chunks {
                if let Some(mut chunk) = self.pool.allocate() {
                    chunk.tag = self.pending_tag.take();
                    chunk.replay_gain = self.replay_gain;
                    return Some(chunk);
                }
            }

            trace!("decoder suspended (pipe full or pool empty)");
            inner = self.shared.cond.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Apply `skip_until`: returns the part of `data` at or after the
    /// target, updating the timestamp for the skipped prefix.
    fn skip_prefix<'a>(&mut self, data: &'a [u8], af: AudioFormat) -> &'a [u8] {
        let Some(target) = self.skip_until else {
            return data;
        };

        let dur = af.bytes_to_duration(data.len());
        if self.timestamp + dur <= target {
            self.timestamp += dur;
            return &[];
        }

        let skip_frames = af.duration_to_frames(target - self.timestamp) as usize;
        let skip_bytes = (skip_frames * af.frame_size()).min(data.len());
        self.timestamp = target;
        self.skip_until = None;
        debug!(?target, "seek skip complete");
        &data[skip_bytes..]
    }
}

impl DecoderClient for DecoderBridge {
    fn ready(&mut self, format: AudioFormat, seekable: bool, total_time: Option<Duration>) {
        debug!(%format, seekable, ?total_time, "decoder ready");

        let mut out_format = format;
        if let Some(configured) = self.configured_format {
            if configured != format {
                match ConvertFilter::open(format, configured) {
                    Ok(filter) => {
                        self.convert = Some(filter);
                        out_format = configured;
                    }
                    Err(e) => {
                        // fall back to the native format; the outputs
                        // convert individually
                        warn!(%e, "cannot force configured format");
                    }
                }
            }
        }
        self.format = Some(out_format);

        let mut inner = self.shared.lock();
        inner.audio_format = Some(format);
        inner.out_format = Some(out_format);
        inner.seekable = seekable;
        inner.total_time = total_time;
        inner.state = DecoderState::Decode;
        self.shared.client_cond.notify_one();
    }

    fn submit_data(&mut self, data: &[u8], bit_rate_kbps: u16) -> DecoderCommand {
        let Some(af) = self.format else {
            debug_assert!(false, "submit_data before ready");
            return DecoderCommand::Stop;
        };

        // move the scratch buffer out so the converted slice does not
        // hold a borrow on self across the chunk-filling loop
        let mut scratch = std::mem::take(&mut self.scratch);
        let command = if self.convert.is_some() {
            let converted = self
                .convert
                .as_mut()
                .and_then(|convert| match convert.filter(data) {
                    Ok(out) => {
                        scratch.clear();
                        scratch.extend_from_slice(out);
                        Some(())
                    }
                    Err(e) => {
                        warn!(%e, "format conversion failed, dropping block");
                        None
                    }
                });
            match converted {
                Some(()) => self.write_blocks(&scratch, af, bit_rate_kbps),
                None => self.poll_command(),
            }
        } else {
            self.write_blocks(data, af, bit_rate_kbps)
        };
        self.scratch = scratch;
        command
    }

    fn submit_tag(&mut self, tag: Tag) -> DecoderCommand {
        // tags take effect at a chunk boundary
        self.flush();
        if let Some(rg) = tag.replay_gain {
            self.replay_gain = Some(rg);
        }
        self.pending_tag = Some(tag);
        self.poll_command()
    }

    fn command_finished(&mut self) {
        let mut inner = self.shared.lock();
        debug_assert!(inner.command.is_some());

        if let Some(target) = self.pending_seek.take() {
            // drop the partial pre-seek chunk; the player clears the pipe
            if let Some(chunk) = self.chunk.take() {
                self.pool.release(chunk);
            }
            if let Some(convert) = &mut self.convert {
                convert.reset();
            }
            self.timestamp = target;
            self.skip_until = None;
            // hold production until the player has flushed downstream
            inner.seek_gate = true;
        }

        inner.command = None;
        self.shared.client_cond.notify_one();
    }

    fn seek_error(&mut self) {
        let mut inner = self.shared.lock();
        debug_assert!(matches!(inner.command, Some(Command::Seek(_))));
        self.pending_seek = None;
        inner.seek_error = true;
        inner.command = None;
        self.shared.client_cond.notify_one();
    }
}

impl DecoderBridge {
    /// Copy a block of pipe-format PCM into chunks.
    fn write_blocks(&mut self, data: &[u8], af: AudioFormat, bit_rate_kbps: u16) -> DecoderCommand {
        let mut data = self.skip_prefix(data, af);

        while !data.is_empty() {
            let Some(mut chunk) = self.obtain_chunk() else {
                return self.poll_command();
            };

            let bit_rate_changed =
                self.last_bit_rate != 0 && bit_rate_kbps != 0 && bit_rate_kbps != self.last_bit_rate;

            let Some(buf) = chunk.write(af, self.timestamp, bit_rate_kbps) else {
                // full chunk that was never pushed; push and retry
                self.pipe.push(chunk);
                self.shared.client_cond.notify_one();
                continue;
            };

            let n = buf.len().min(data.len());
            let n = n - n % af.frame_size();
            buf[..n].copy_from_slice(&data[..n]);
            let full = chunk.expand(af, n);
            chunk.bit_rate_changed |= bit_rate_changed;
            if bit_rate_kbps != 0 {
                self.last_bit_rate = bit_rate_kbps;
            }

            self.timestamp += af.bytes_to_duration(n);
            data = &data[n..];

            if full {
                self.pipe.push(chunk);
                self.shared.client_cond.notify_one();
            } else {
                self.chunk = Some(chunk);
            }
        }

        self.poll_command()
    }
}

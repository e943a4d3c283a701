//! Output group
//!
//! Broadcasts chunks from the player's output pipe to every enabled,
//! non-failed output and reclaims them once the slowest consumer has
//! released its reference. Reclamation order follows enqueue order, so
//! the head chunk gates the pool return of everything behind it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadenza_common::params::{OutputParams, ReplayGainParams};
use cadenza_common::AudioFormat;
use tracing::{debug, warn};

use crate::buffer::{Chunk, ChunkPool};
use crate::error::{Error, Result};

use super::control::{OutputControl, Wakeup};
use super::plugin::{MixerPlugin, OutputPlugin};

/// All configured outputs, acting as one sink.
pub struct OutputGroup {
    outputs: Vec<Arc<OutputControl>>,
    pool: Arc<ChunkPool>,
    wakeup: Arc<Wakeup>,

    /// Chunks handed to outputs and not yet returned to the pool; this
    /// is the player's output pipe.
    in_flight: Mutex<VecDeque<Arc<Chunk>>>,

    /// Backpressure depth for the player.
    max_in_flight: usize,
}

impl OutputGroup {
    pub fn new(pool: Arc<ChunkPool>, max_in_flight: usize) -> Self {
        Self {
            outputs: Vec::new(),
            pool,
            wakeup: Arc::new(Wakeup::new()),
            in_flight: Mutex::new(VecDeque::new()),
            max_in_flight: max_in_flight.max(2),
        }
    }

    /// Add one output before the group is put to work.
    pub fn add(
        &mut self,
        params: OutputParams,
        plugin: Box<dyn OutputPlugin>,
        mixer: Option<Box<dyn MixerPlugin>>,
        replay_gain: ReplayGainParams,
        reopen_after: Duration,
    ) {
        self.outputs.push(Arc::new(OutputControl::with_wakeup(
            params,
            plugin,
            mixer,
            replay_gain,
            reopen_after,
            Arc::clone(&self.wakeup),
        )));
    }

    pub fn outputs(&self) -> &[Arc<OutputControl>] {
        &self.outputs
    }

    pub fn find(&self, name: &str) -> Option<&Arc<OutputControl>> {
        self.outputs.iter().find(|o| o.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Open every enabled output for `format`. Succeeds if at least
    /// one device opened.
    pub fn open_all(&self, format: AudioFormat) -> Result<()> {
        let mut any = false;
        for output in &self.outputs {
            if output.open(format) {
                any = true;
            } else if output.is_enabled() {
                warn!(output = output.name(), "output unavailable");
            }
        }
        if any {
            Ok(())
        } else {
            Err(Error::AllOutputsFailed)
        }
    }

    /// Apply changed enable flags: enable newly wanted outputs, close
    /// and disable unwanted ones. Newly enabled outputs join on the
    /// next `open_all`.
    pub fn update_enabled(&self) {
        for output in &self.outputs {
            if output.is_enabled() {
                output.enable_wait();
            } else {
                output.close_wait();
                output.disable_wait();
            }
        }
    }

    /// Broadcast one chunk. Returns false when no output accepted it
    /// (all closed or failed); the chunk is returned to the pool.
    pub fn play(&self, chunk: Box<Chunk>) -> bool {
        let chunk: Arc<Chunk> = Arc::from(chunk);

        let mut any = false;
        for output in &self.outputs {
            if output.put_chunk(Arc::clone(&chunk)) {
                any = true;
            }
        }

        if !any {
            match Arc::try_unwrap(chunk) {
                Ok(chunk) => self.pool.release(Box::new(chunk)),
                Err(_) => debug!("chunk still referenced after rejected play"),
            }
            return false;
        }

        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).push_back(chunk);
        true
    }

    /// Return fully released chunks (in order) to the pool.
    pub fn reclaim(&self) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let mut released = 0;
        while let Some(chunk) = in_flight.pop_front() {
            match Arc::try_unwrap(chunk) {
                Ok(chunk) => {
                    self.pool.release(Box::new(chunk));
                    released += 1;
                }
                Err(chunk) => {
                    // an output still holds this one; everything behind
                    // it waits
                    in_flight.push_front(chunk);
                    break;
                }
            }
        }
        released
    }

    /// True while the player may push another chunk.
    pub fn has_room(&self) -> bool {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len() < self.max_in_flight
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Block briefly until an output consumes something or `timeout`
    /// passes.
    pub fn wait_for_consumption(&self, timeout: Duration) {
        self.wakeup.wait_timeout(timeout);
    }

    /// Wait until every in-flight chunk has been played and reclaimed.
    pub fn wait_all_consumed(&self) {
        loop {
            self.reclaim();
            if self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).is_empty() {
                return;
            }
            self.wakeup.wait_timeout(Duration::from_millis(50));
        }
    }

    /// Pause every open output (transport pause). Always-on outputs
    /// stay open; the player keeps them fed with silence chunks.
    pub fn pause_all(&self) {
        for output in &self.outputs {
            if output.params().always_on {
                continue;
            }
            output.pause_wait();
        }
    }

    pub fn resume_all(&self) {
        for output in &self.outputs {
            output.resume_wait();
        }
    }

    /// Drain device buffers on natural end-of-stream.
    pub fn drain_all(&self) {
        self.wait_all_consumed();
        for output in &self.outputs {
            output.drain_wait();
        }
    }

    /// Cancel pending audio everywhere and drop the in-flight queue.
    /// Playback stays suspended until [`OutputGroup::allow_play`].
    pub fn cancel_all(&self) {
        for output in &self.outputs {
            if output.is_open() {
                output.cancel_async();
            }
        }

        // the workers drop their references; collect them
        self.wait_all_consumed();
    }

    pub fn allow_play(&self) {
        for output in &self.outputs {
            output.allow_play();
        }
    }

    /// Transport stop: always-on outputs pause, the rest close.
    pub fn release_all(&self) {
        for output in &self.outputs {
            if output.params().always_on {
                output.pause_wait();
            } else {
                output.close_wait();
            }
        }
        self.wait_all_consumed();
    }

    pub fn close_all(&self) {
        for output in &self.outputs {
            output.close_wait();
        }
        self.wait_all_consumed();
    }

    /// Aggregate volume: the average over outputs that have a mixer.
    pub fn get_volume(&self) -> Option<u32> {
        let mut sum = 0u32;
        let mut count = 0u32;
        for output in &self.outputs {
            if let Some(v) = output.get_volume() {
                sum += v;
                count += 1;
            }
        }
        (count > 0).then(|| sum / count)
    }

    /// Fan a volume write out to every output with a mixer.
    pub fn set_volume(&self, volume: u32) -> bool {
        let mut any = false;
        for output in &self.outputs {
            if output.set_volume(volume.min(100)) {
                any = true;
            }
        }
        any
    }
}

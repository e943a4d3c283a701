//! Chunk pipe
//!
//! A FIFO of chunks between exactly one producer and one consumer,
//! guarded by a single mutex. The pipe itself carries no condition
//! variables; the decoder and player coordinate through their own.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[cfg(debug_assertions)]
use cadenza_common::AudioFormat;

use super::chunk::Chunk;
use super::pool::ChunkPool;

/// A queue of chunks. The producer pushes at the tail, the consumer
/// shifts from the head.
pub struct ChunkPipe {
    inner: Mutex<Inner>,
}

struct Inner {
    queue: VecDeque<Box<Chunk>>,

    /// Format of the chunks currently queued; all must agree.
    #[cfg(debug_assertions)]
    audio_format: Option<AudioFormat>,
}

impl ChunkPipe {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                #[cfg(debug_assertions)]
                audio_format: None,
            }),
        }
    }

    /// Append a chunk at the tail.
    pub fn push(&self, chunk: Box<Chunk>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        #[cfg(debug_assertions)]
        {
            if let Some(af) = chunk.audio_format() {
                debug_assert!(
                    inner.audio_format.map_or(true, |f| f == af),
                    "pipe carries mixed audio formats"
                );
                inner.audio_format = Some(af);
            }
        }

        inner.queue.push_back(chunk);
    }

    /// The time stamp of the head chunk, without removing it.
    pub fn peek_time(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.queue.front().and_then(|c| c.time)
    }

    /// True if the head chunk exists and carries a tag.
    pub fn peek_has_tag(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.queue.front().map_or(false, |c| c.tag.is_some())
    }

    /// Detach and return the head chunk.
    pub fn shift(&self) -> Option<Box<Chunk>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let chunk = inner.queue.pop_front();

        #[cfg(debug_assertions)]
        if inner.queue.is_empty() {
            inner.audio_format = None;
        }

        chunk
    }

    /// Return every queued chunk to the pool.
    pub fn clear(&self, pool: &ChunkPool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for chunk in inner.queue.drain(..) {
            pool.release(chunk);
        }

        #[cfg(debug_assertions)]
        {
            inner.audio_format = None;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChunkPipe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_common::{AudioFormat, SampleFormat};

    fn filled(pool: &ChunkPool, tag_ms: u64) -> Box<Chunk> {
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        let mut c = pool.allocate().unwrap();
        let buf = c.write(af, Duration::from_millis(tag_ms), 0).unwrap();
        buf[..4].fill(tag_ms as u8);
        c.expand(af, 4);
        c
    }

    #[test]
    fn test_fifo_order() {
        let pool = ChunkPool::new(16);
        let pipe = ChunkPipe::new();

        for i in 0..10u64 {
            pipe.push(filled(&pool, i));
        }
        assert_eq!(pipe.len(), 10);
        assert_eq!(pipe.peek_time(), Some(Duration::from_millis(0)));

        for i in 0..10u64 {
            let c = pipe.shift().unwrap();
            assert_eq!(c.time, Some(Duration::from_millis(i)));
            pool.release(c);
        }
        assert!(pipe.is_empty());
        assert!(pipe.shift().is_none());
    }

    #[test]
    fn test_clear_returns_chunks_to_pool() {
        let pool = ChunkPool::new(4);
        let pipe = ChunkPipe::new();
        for i in 0..4 {
            pipe.push(filled(&pool, i));
        }
        assert_eq!(pool.stats().free, 0);

        pipe.clear(&pool);
        assert!(pipe.is_empty());
        assert_eq!(pool.stats().free, 4);
    }
}

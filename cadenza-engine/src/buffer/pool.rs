//! Fixed-capacity chunk pool
//!
//! Preallocates every chunk the pipeline will ever use. Allocation
//! never blocks; when the pool is empty the caller gets `None` and must
//! back off (the decoder suspends until the player signals progress).
//!
//! Invariant: `free + in_flight == capacity` after any sequence of
//! operations.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use tracing::debug;

use super::chunk::Chunk;

static POOL_SERIAL: AtomicU32 = AtomicU32::new(1);

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub in_flight: usize,
}

/// Allocator of fixed-size PCM chunks.
///
/// Thread-safe; shared by the decoder, player, and output group.
pub struct ChunkPool {
    serial: u32,
    capacity: usize,
    free: Mutex<Vec<Box<Chunk>>>,
}

impl ChunkPool {
    /// Preallocate `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "chunk pool must hold at least one chunk");
        let serial = POOL_SERIAL.fetch_add(1, Ordering::Relaxed);

        let free: Vec<Box<Chunk>> = (0..capacity).map(|_| Box::new(Chunk::new(serial))).collect();
        debug!(capacity, "chunk pool allocated");

        Self { serial, capacity, free: Mutex::new(free) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a chunk from the free list. Returns `None` when the pool is
    /// exhausted; never blocks.
    pub fn allocate(&self) -> Option<Box<Chunk>> {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    /// Return a chunk to the free list, dropping its metadata.
    pub fn release(&self, mut chunk: Box<Chunk>) {
        debug_assert_eq!(chunk.pool_serial, self.serial, "chunk returned to foreign pool");

        chunk.reset();
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(free.len() < self.capacity, "pool over-released");
        free.push(chunk);
    }

    pub fn stats(&self) -> PoolStats {
        let free = self.free.lock().unwrap_or_else(|e| e.into_inner()).len();
        PoolStats { capacity: self.capacity, free, in_flight: self.capacity - free }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conservation() {
        let pool = ChunkPool::new(8);
        let mut held = Vec::new();

        for expected_free in (0..8).rev() {
            held.push(pool.allocate().unwrap());
            let s = pool.stats();
            assert_eq!(s.free, expected_free);
            assert_eq!(s.free + s.in_flight, s.capacity);
        }

        assert!(pool.allocate().is_none(), "exhausted pool must not block or panic");

        for chunk in held.drain(..) {
            pool.release(chunk);
        }
        assert_eq!(pool.stats().free, 8);
    }

    #[test]
    fn test_release_resets_chunk() {
        use cadenza_common::{AudioFormat, SampleFormat};
        use std::time::Duration;

        let pool = ChunkPool::new(1);
        let mut chunk = pool.allocate().unwrap();
        let af = AudioFormat::new(44100, SampleFormat::S16, 2);
        let _ = chunk.write(af, Duration::from_secs(3), 192).unwrap();
        chunk.expand(af, 16);
        pool.release(chunk);

        let chunk = pool.allocate().unwrap();
        assert!(chunk.is_empty());
        assert_eq!(chunk.time, None);
        assert_eq!(chunk.audio_format(), None);
    }

    #[test]
    #[should_panic(expected = "foreign pool")]
    #[cfg(debug_assertions)]
    fn test_foreign_release_detected() {
        let a = ChunkPool::new(1);
        let b = ChunkPool::new(1);
        let chunk = a.allocate().unwrap();
        b.release(chunk);
    }
}

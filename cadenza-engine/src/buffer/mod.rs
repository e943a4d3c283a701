//! Chunk buffer subsystem
//!
//! PCM travels through the pipeline in fixed-size chunks drawn from a
//! preallocated pool and queued through single-producer single-consumer
//! pipes:
//!
//! ```text
//! pool -> decoder -> decoder pipe -> player -> output pipe -> outputs -> pool
//! ```
//!
//! A chunk is owned by exactly one component at a time; the output
//! group temporarily shares read access during fan-out and returns the
//! chunk to the pool once the slowest output has released it.

mod chunk;
mod pipe;
mod pool;

pub use chunk::{Chunk, CHUNK_SIZE};
pub use pipe::ChunkPipe;
pub use pool::{ChunkPool, PoolStats};

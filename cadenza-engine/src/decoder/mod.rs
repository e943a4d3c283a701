//! Decoder subsystem
//!
//! One decoder thread per song pulls the input stream through a
//! decoder plugin and pushes PCM chunks into the producer pipe. The
//! player drives it through [`DecoderControl`]; the plugin drives the
//! engine back through [`DecoderClient`].

mod bridge;
mod control;
pub mod plugin;
pub mod plugins;
mod worker;

pub use control::{DecoderControl, DecoderState, InputOpener};
pub use plugin::{DecoderClient, DecoderCommand, DecoderPlugin};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cadenza_common::{AudioFormat, SampleFormat};

    use crate::buffer::{ChunkPipe, ChunkPool};
    use crate::error::{Error, Result};
    use crate::input::{InputStream, MemoryInputStream};
    use crate::song::Song;

    use super::*;

    const FMT: AudioFormat = AudioFormat::new(44100, SampleFormat::S16, 2);

    /// Emits `blocks` blocks of constant samples, polling commands
    /// like a real plugin.
    struct TonePlugin {
        blocks: usize,
        block_frames: usize,
        seekable: bool,
    }

    impl DecoderPlugin for TonePlugin {
        fn name(&self) -> &'static str {
            "tone"
        }

        fn supports(&self, uri: &str, _mime: Option<&str>) -> bool {
            uri.starts_with("tone:")
        }

        fn decode(
            &self,
            client: &mut dyn DecoderClient,
            _input: Box<dyn InputStream>,
        ) -> Result<()> {
            let total =
                FMT.bytes_to_duration(self.blocks * self.block_frames * FMT.frame_size());
            client.ready(FMT, self.seekable, Some(total));

            let block = vec![0x11u8; self.block_frames * FMT.frame_size()];
            let mut i = 0;
            while i < self.blocks {
                match client.submit_data(&block, 320) {
                    DecoderCommand::None => i += 1,
                    DecoderCommand::Stop => return Ok(()),
                    DecoderCommand::Seek(target) => {
                        if self.seekable {
                            i = (target.as_secs_f64() * FMT.sample_rate as f64
                                / self.block_frames as f64) as usize;
                            client.command_finished();
                        } else {
                            client.seek_error();
                        }
                    }
                }
            }
            Ok(())
        }
    }

    /// Fails every decode attempt.
    struct BrokenPlugin;

    impl DecoderPlugin for BrokenPlugin {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn supports(&self, uri: &str, _mime: Option<&str>) -> bool {
            uri.starts_with("broken:")
        }

        fn decode(
            &self,
            client: &mut dyn DecoderClient,
            input: Box<dyn InputStream>,
        ) -> Result<()> {
            client.ready(FMT, false, None);
            Err(Error::Decode { uri: input.uri().to_string(), message: "bad data".into() })
        }
    }

    fn control(plugins: Vec<Arc<dyn DecoderPlugin>>, pool: &Arc<ChunkPool>) -> DecoderControl {
        let opener =
            Arc::new(|uri: &str| -> Result<Box<dyn InputStream>> {
                Ok(Box::new(MemoryInputStream::new(uri, vec![0u8; 16])))
            });
        DecoderControl::new(Arc::clone(pool), plugins, opener, 64, None)
    }

    fn drain(pipe: &ChunkPipe, pool: &ChunkPool, dc: &DecoderControl) -> usize {
        let mut n = 0;
        loop {
            match pipe.shift() {
                Some(chunk) => {
                    n += 1;
                    pool.release(chunk);
                    dc.signal_progress();
                }
                None if dc.is_finished() && pipe.is_empty() => return n,
                None => dc.wait_for_progress(),
            }
        }
    }

    #[test]
    fn test_decode_to_completion() {
        let pool = Arc::new(ChunkPool::new(128));
        let pipe = Arc::new(ChunkPipe::new());
        let mut dc =
            control(vec![Arc::new(TonePlugin { blocks: 20, block_frames: 512, seekable: true })], &pool);

        dc.start(Song::new("tone:a"), Arc::clone(&pipe), Duration::ZERO);
        dc.wait_for_startup();
        assert_eq!(dc.audio_format(), Some(FMT));
        assert!(dc.seekable());

        let chunks = drain(&pipe, &pool, &dc);
        assert!(chunks > 0);
        dc.stop();

        assert!(dc.take_error().is_none());
        assert_eq!(pool.stats().in_flight, 0, "all chunks returned");
    }

    #[test]
    fn test_decoder_suspends_on_full_pipe() {
        let pool = Arc::new(ChunkPool::new(128));
        let pipe = Arc::new(ChunkPipe::new());
        // enough data to exceed the pipe limit many times over
        let mut dc = control(
            vec![Arc::new(TonePlugin { blocks: 2000, block_frames: 512, seekable: true })],
            &pool,
        );

        dc.start(Song::new("tone:a"), Arc::clone(&pipe), Duration::ZERO);
        dc.wait_for_startup();

        // let it run; it must stop at the pipe limit instead of
        // swallowing the whole pool
        std::thread::sleep(Duration::from_millis(50));
        assert!(pipe.len() <= 64);
        assert!(pool.stats().free > 0);

        dc.stop();
        pipe.clear(&pool);
        assert_eq!(pool.stats().in_flight, 0);
    }

    #[test]
    fn test_seek_clears_and_repositions() {
        let pool = Arc::new(ChunkPool::new(256));
        let pipe = Arc::new(ChunkPipe::new());
        let mut dc = control(
            vec![Arc::new(TonePlugin { blocks: 2000, block_frames: 512, seekable: true })],
            &pool,
        );

        dc.start(Song::new("tone:a"), Arc::clone(&pipe), Duration::ZERO);
        dc.wait_for_startup();

        let target = Duration::from_secs(5);
        dc.seek(target).unwrap();
        pipe.clear(&pool);
        dc.finish_seek();

        // the first post-seek chunk is stamped at or after the target
        let t = loop {
            if let Some(chunk) = pipe.shift() {
                let t = chunk.time.unwrap();
                pool.release(chunk);
                break t;
            }
            dc.wait_for_progress();
        };
        assert!(t >= target, "post-seek chunk at {t:?}");
        assert!(t < target + Duration::from_secs(1));

        dc.stop();
        pipe.clear(&pool);
    }

    #[test]
    fn test_unseekable_seek_fails() {
        let pool = Arc::new(ChunkPool::new(128));
        let pipe = Arc::new(ChunkPipe::new());
        let mut dc = control(
            vec![Arc::new(TonePlugin { blocks: 2000, block_frames: 512, seekable: false })],
            &pool,
        );

        dc.start(Song::new("tone:a"), Arc::clone(&pipe), Duration::ZERO);
        dc.wait_for_startup();

        assert!(dc.seek(Duration::from_secs(1)).is_err());

        dc.stop();
        pipe.clear(&pool);
    }

    #[test]
    fn test_error_is_latched() {
        let pool = Arc::new(ChunkPool::new(16));
        let pipe = Arc::new(ChunkPipe::new());
        let mut dc = control(vec![Arc::new(BrokenPlugin)], &pool);

        dc.start(Song::new("broken:x"), Arc::clone(&pipe), Duration::ZERO);
        dc.wait_for_startup();

        while !dc.is_finished() {
            dc.wait_for_progress();
        }
        assert!(dc.has_failed());
        let err = dc.take_error().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decoder);
        assert!(dc.take_error().is_none(), "error slot is one-shot");

        dc.stop();
        pipe.clear(&pool);
        assert_eq!(pool.stats().in_flight, 0);
    }

    #[test]
    fn test_start_at_skips_prefix() {
        let pool = Arc::new(ChunkPool::new(256));
        let pipe = Arc::new(ChunkPipe::new());
        let mut dc = control(
            vec![Arc::new(TonePlugin { blocks: 200, block_frames: 512, seekable: true })],
            &pool,
        );

        let start = Duration::from_secs(1);
        dc.start(Song::new("tone:a"), Arc::clone(&pipe), start);
        dc.wait_for_startup();

        let t = loop {
            if let Some(chunk) = pipe.shift() {
                let t = chunk.time.unwrap();
                pool.release(chunk);
                dc.signal_progress();
                break t;
            }
            dc.wait_for_progress();
        };
        assert!(t >= start);

        dc.stop();
        pipe.clear(&pool);
    }
}

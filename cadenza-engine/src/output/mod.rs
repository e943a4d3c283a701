//! Output subsystem
//!
//! One [`OutputControl`] per configured sink owns a driver plugin, an
//! optional hardware mixer, a filter chain, and a dedicated worker
//! thread. The [`OutputGroup`] broadcasts each chunk from the player to
//! every enabled, non-failed output and returns it to the pool after
//! the slowest holder releases it.

mod control;
mod group;
pub mod plugin;
pub mod plugins;
mod worker;

pub use control::{OutputControl, OutputState};
pub use group::OutputGroup;
pub use plugin::{MixerPlugin, OutputPlugin};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use cadenza_common::params::{OutputParams, ReplayGainParams};
    use cadenza_common::{AudioFormat, SampleFormat};

    use crate::buffer::{Chunk, ChunkPool};
    use crate::error::{Error, Result};

    use super::*;

    const FMT: AudioFormat = AudioFormat::new(44100, SampleFormat::S16, 2);

    /// Records bytes and fails on demand.
    #[derive(Clone, Default)]
    struct Script {
        played: Arc<Mutex<Vec<u8>>>,
        play_calls: Arc<AtomicUsize>,
        /// 1-based call number whose play should error; 0 = never.
        fail_on_call: Arc<AtomicUsize>,
        opens: Arc<AtomicUsize>,
    }

    struct ScriptedOutput {
        script: Script,
    }

    impl OutputPlugin for ScriptedOutput {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn open(&mut self, _format: &mut AudioFormat) -> Result<()> {
            self.script.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) {}

        fn play(&mut self, data: &[u8]) -> Result<usize> {
            let call = self.script.play_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fail_on = self.script.fail_on_call.load(Ordering::SeqCst);
            if fail_on != 0 && call >= fail_on {
                return Err(Error::OutputPlay {
                    name: "scripted".into(),
                    message: "synthetic device failure".into(),
                });
            }
            self.script.played.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }
    }

    fn make_output(script: Script, reopen_after: Duration) -> OutputControl {
        OutputControl::new(
            OutputParams::new("test", "scripted"),
            Box::new(ScriptedOutput { script }),
            None,
            ReplayGainParams::default(),
            reopen_after,
        )
    }

    fn filled_chunk(pool: &ChunkPool, byte: u8) -> Box<Chunk> {
        let mut c = pool.allocate().unwrap();
        let buf = c.write(FMT, Duration::ZERO, 0).unwrap();
        let n = 64;
        buf[..n].fill(byte);
        c.expand(FMT, n);
        c
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_open_play_close() {
        let pool = ChunkPool::new(8);
        let script = Script::default();
        let out = make_output(script.clone(), Duration::from_secs(10));

        assert_eq!(out.state(), OutputState::Closed);
        assert!(out.open(FMT));
        assert_eq!(out.state(), OutputState::Open);

        let chunk: Arc<Chunk> = Arc::from(filled_chunk(&pool, 0xAA));
        assert!(out.put_chunk(Arc::clone(&chunk)));

        wait_until(|| Arc::strong_count(&chunk) == 1);
        assert_eq!(script.played.lock().unwrap().len(), 64);

        out.close_wait();
        assert_eq!(out.state(), OutputState::Closed);
        assert!(!out.put_chunk(chunk), "closed output rejects chunks");
    }

    #[test]
    fn test_pause_and_resume() {
        let script = Script::default();
        let out = make_output(script, Duration::from_secs(10));
        assert!(out.open(FMT));

        out.pause_wait();
        assert_eq!(out.state(), OutputState::Paused);

        out.resume_wait();
        assert_eq!(out.state(), OutputState::Open);
    }

    #[test]
    fn test_play_failure_marks_failed_and_reopens() {
        let pool = ChunkPool::new(8);
        let script = Script::default();
        script.fail_on_call.store(1, Ordering::SeqCst);
        let out = make_output(script.clone(), Duration::from_millis(30));

        assert!(out.open(FMT));
        let chunk: Arc<Chunk> = Arc::from(filled_chunk(&pool, 1));
        out.put_chunk(Arc::clone(&chunk));

        wait_until(|| out.state() == OutputState::Failed);
        assert!(out.last_error().is_some());
        wait_until(|| Arc::strong_count(&chunk) == 1);

        // inside the failure window the open is refused
        assert!(!out.open(FMT));

        // after the window it may try again
        std::thread::sleep(Duration::from_millis(40));
        script.fail_on_call.store(0, Ordering::SeqCst);
        assert!(out.open(FMT));
        assert_eq!(out.state(), OutputState::Open);
        assert_eq!(script.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disabled_output_refuses_open() {
        let out = make_output(Script::default(), Duration::from_secs(10));
        out.set_enabled(false);
        assert!(!out.open(FMT));
        assert_eq!(out.state(), OutputState::Closed);
    }

    #[test]
    fn test_group_fan_out_and_reclaim() {
        let pool = Arc::new(ChunkPool::new(8));
        let a = Script::default();
        let b = Script::default();

        let mut group = OutputGroup::new(Arc::clone(&pool), 16);
        group.add(
            OutputParams::new("a", "scripted"),
            Box::new(ScriptedOutput { script: a.clone() }),
            None,
            ReplayGainParams::default(),
            Duration::from_secs(10),
        );
        group.add(
            OutputParams::new("b", "scripted"),
            Box::new(ScriptedOutput { script: b.clone() }),
            None,
            ReplayGainParams::default(),
            Duration::from_secs(10),
        );

        group.open_all(FMT).unwrap();
        assert!(group.play(filled_chunk(&pool, 7)));

        group.wait_all_consumed();
        assert_eq!(pool.stats().in_flight, 0, "chunk reclaimed after both released");
        assert_eq!(a.played.lock().unwrap().len(), 64);
        assert_eq!(b.played.lock().unwrap().len(), 64);

        group.close_all();
    }

    #[test]
    fn test_group_failure_isolation() {
        let pool = Arc::new(ChunkPool::new(16));
        let a = Script::default();
        a.fail_on_call.store(3, Ordering::SeqCst);
        let b = Script::default();

        let mut group = OutputGroup::new(Arc::clone(&pool), 16);
        group.add(
            OutputParams::new("a", "scripted"),
            Box::new(ScriptedOutput { script: a.clone() }),
            None,
            ReplayGainParams::default(),
            Duration::from_secs(10),
        );
        group.add(
            OutputParams::new("b", "scripted"),
            Box::new(ScriptedOutput { script: b.clone() }),
            None,
            ReplayGainParams::default(),
            Duration::from_secs(10),
        );

        group.open_all(FMT).unwrap();
        for i in 0..6 {
            assert!(group.play(filled_chunk(&pool, i)));
            group.wait_all_consumed();
        }

        // A died on its third write, B got everything
        assert_eq!(group.find("a").unwrap().state(), OutputState::Failed);
        assert_eq!(b.played.lock().unwrap().len(), 6 * 64);
        assert!(a.played.lock().unwrap().len() < 6 * 64);
        assert_eq!(pool.stats().in_flight, 0);

        group.close_all();
    }

    #[test]
    fn test_group_volume_aggregation() {
        let pool = Arc::new(ChunkPool::new(4));
        let mut group = OutputGroup::new(pool, 8);
        for name in ["a", "b"] {
            group.add(
                OutputParams::new(name, "scripted"),
                Box::new(ScriptedOutput { script: Script::default() }),
                None,
                ReplayGainParams::default(),
                Duration::from_secs(10),
            );
        }

        assert!(group.set_volume(80));
        assert_eq!(group.get_volume(), Some(80));

        group.find("a").unwrap().set_volume(40);
        assert_eq!(group.get_volume(), Some(60));
    }
}

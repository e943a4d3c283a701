//! End-to-end pipeline scenarios
//!
//! Drives the full decoder -> player -> output path with a
//! deterministic fake decoder and recording output plugins: gapless
//! transitions, output failure isolation, seeking, pause, and error
//! advancement.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cadenza_common::params::{EngineParams, OutputParams, ReplayGainParams};
use cadenza_common::{AudioFormat, SampleFormat};

use cadenza_engine::buffer::ChunkPool;
use cadenza_engine::decoder::{DecoderClient, DecoderCommand, DecoderPlugin};
use cadenza_engine::error::Result;
use cadenza_engine::input::{InputStream, MemoryInputStream};
use cadenza_engine::listener::NullListener;
use cadenza_engine::output::{OutputGroup, OutputPlugin, OutputState};
use cadenza_engine::player::{PlayerControl, PlayerState};
use cadenza_engine::song::Song;

const FMT: AudioFormat = AudioFormat::new(44100, SampleFormat::S16, 2);
const BLOCK_BYTES: usize = 16 * 1024;

/// The deterministic byte at stream position `i` of song `id`.
fn pattern_byte(id: u8, i: usize) -> u8 {
    id.wrapping_mul(37).wrapping_add((i % 251) as u8)
}

fn pattern_bytes(id: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| pattern_byte(id, i)).collect()
}

/// Byte length of `seconds` of audio in the test format, frame
/// aligned.
fn song_bytes(seconds: f64) -> usize {
    let bytes = (seconds * FMT.bytes_per_second() as f64) as usize;
    bytes - bytes % FMT.frame_size()
}

/// Fake decoder for `fake:<id>:<seconds>` URIs producing the pattern
/// stream.
struct PatternPlugin;

fn parse_fake_uri(uri: &str) -> Option<(u8, f64)> {
    let rest = uri.strip_prefix("fake:")?;
    let (id, seconds) = rest.split_once(':')?;
    Some((id.parse().ok()?, seconds.parse().ok()?))
}

impl DecoderPlugin for PatternPlugin {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn supports(&self, uri: &str, _mime: Option<&str>) -> bool {
        uri.starts_with("fake:")
    }

    fn decode(&self, client: &mut dyn DecoderClient, input: Box<dyn InputStream>) -> Result<()> {
        let (id, seconds) = parse_fake_uri(input.uri()).unwrap_or((0, 1.0));
        let total = song_bytes(seconds);

        client.ready(FMT, true, Some(Duration::from_secs_f64(seconds)));

        let mut pos = 0usize;
        while pos < total {
            let n = BLOCK_BYTES.min(total - pos);
            let block: Vec<u8> = (pos..pos + n).map(|i| pattern_byte(id, i)).collect();

            match client.submit_data(&block, 705) {
                DecoderCommand::None => pos += n,
                DecoderCommand::Stop => return Ok(()),
                DecoderCommand::Seek(target) => {
                    let frame = FMT.duration_to_frames(target) as usize;
                    pos = (frame * FMT.frame_size()).min(total);
                    client.command_finished();
                }
            }
        }
        Ok(())
    }
}

/// Shared observation state of one recording output.
#[derive(Clone, Default)]
struct Recorder {
    bytes: Arc<Mutex<Vec<u8>>>,
    play_calls: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
    /// 1-based play call to start failing at; 0 = never.
    fail_from_call: Arc<AtomicUsize>,
}

impl Recorder {
    fn recorded(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }
}

/// Records everything it is given; optionally paces itself to real
/// time like a sound device.
struct RecordingOutput {
    recorder: Recorder,
    paced: bool,
    format: Option<AudioFormat>,
    started: Option<Instant>,
    played: u64,
}

impl RecordingOutput {
    fn new(recorder: Recorder, paced: bool) -> Self {
        Self { recorder, paced, format: None, started: None, played: 0 }
    }
}

impl OutputPlugin for RecordingOutput {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn open(&mut self, format: &mut AudioFormat) -> Result<()> {
        self.recorder.opens.fetch_add(1, Ordering::SeqCst);
        self.format = Some(*format);
        self.started = Some(Instant::now());
        self.played = 0;
        Ok(())
    }

    fn close(&mut self) {}

    fn play(&mut self, data: &[u8]) -> Result<usize> {
        let call = self.recorder.play_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fail_from = self.recorder.fail_from_call.load(Ordering::SeqCst);
        if fail_from != 0 && call >= fail_from {
            return Err(cadenza_engine::Error::OutputPlay {
                name: "recording".into(),
                message: "synthetic failure".into(),
            });
        }

        if self.paced {
            if let (Some(format), Some(started)) = (self.format, self.started) {
                let ahead = format
                    .bytes_to_duration(self.played as usize)
                    .saturating_sub(started.elapsed());
                if ahead > Duration::from_millis(50) {
                    std::thread::sleep(ahead - Duration::from_millis(50));
                }
            }
        }

        self.recorder.bytes.lock().unwrap().extend_from_slice(data);
        self.played += data.len() as u64;
        Ok(data.len())
    }

    fn pause(&mut self) -> bool {
        std::thread::sleep(Duration::from_millis(5));
        true
    }
}

struct Harness {
    pool: Arc<ChunkPool>,
    group: Arc<OutputGroup>,
    player: Arc<PlayerControl>,
}

fn harness(outputs: Vec<(&str, Recorder, bool)>, reopen_after: Duration) -> Harness {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let params = EngineParams {
        buffered_before_play: 8,
        ..EngineParams::default()
    };

    let pool = Arc::new(ChunkPool::new(512));

    let mut group = OutputGroup::new(Arc::clone(&pool), 64);
    for (name, recorder, paced) in outputs {
        group.add(
            OutputParams::new(name, "recording"),
            Box::new(RecordingOutput::new(recorder, paced)),
            None,
            ReplayGainParams::default(),
            reopen_after,
        );
    }
    let group = Arc::new(group);

    let opener = Arc::new(|uri: &str| -> Result<Box<dyn InputStream>> {
        Ok(Box::new(MemoryInputStream::new(uri, Vec::new())))
    });

    let player = PlayerControl::new(
        &params,
        Arc::clone(&pool),
        Arc::clone(&group),
        vec![Arc::new(PatternPlugin)],
        opener,
        Arc::new(NullListener),
    );

    Harness { pool, group, player }
}

fn song(id: u8, seconds: f64) -> Song {
    Song::new(format!("fake:{id}:{seconds}"))
}

fn wait_for_stop(player: &PlayerControl) {
    for _ in 0..2000 {
        if player.state() == PlayerState::Stop {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("player did not stop in time");
}

#[test]
fn test_gapless_transition_is_byte_exact() {
    let recorder = Recorder::default();
    let h = harness(vec![("main", recorder.clone(), false)], Duration::from_secs(10));

    let a = song(1, 1.0);
    let b = song(2, 1.0);

    // arm the successor first so the transition is ready no matter how
    // fast the decode finishes
    h.player.queue_next(b);
    h.player.play(a);
    wait_for_stop(&h.player);

    let mut expected = pattern_bytes(1, song_bytes(1.0));
    expected.extend(pattern_bytes(2, song_bytes(1.0)));

    let recorded = recorder.recorded();
    assert_eq!(
        recorded.len(),
        expected.len(),
        "no inserted silence and no dropped samples"
    );
    assert_eq!(recorded, expected, "output equals the concatenation of both songs");

    assert_eq!(h.pool.stats().in_flight, 0, "every chunk returned to the pool");
}

#[test]
fn test_output_failure_isolation_and_retry() {
    let rec_a = Recorder::default();
    rec_a.fail_from_call.store(3, Ordering::SeqCst);
    let rec_b = Recorder::default();

    let h = harness(
        vec![("a", rec_a.clone(), false), ("b", rec_b.clone(), false)],
        Duration::from_millis(150),
    );

    let total = song_bytes(1.0);
    h.player.play(song(3, 1.0));
    wait_for_stop(&h.player);

    // B plays the complete song while A is parked in FAILED
    assert_eq!(rec_b.recorded().len(), total);
    assert!(rec_a.recorded().len() < total);
    assert_eq!(h.group.find("a").unwrap().state(), OutputState::Failed);
    assert_eq!(h.pool.stats().in_flight, 0);

    // after the reopen interval the next transport change tries again
    std::thread::sleep(Duration::from_millis(200));
    rec_a.fail_from_call.store(0, Ordering::SeqCst);

    h.player.play(song(4, 0.5));
    wait_for_stop(&h.player);

    assert_eq!(rec_a.opens.load(Ordering::SeqCst), 2, "failed output was reopened");
    let expected = pattern_bytes(4, song_bytes(0.5));
    assert!(rec_a.recorded().ends_with(&expected));
}

#[test]
fn test_seek_repositions_playback() -> anyhow::Result<()> {
    let recorder = Recorder::default();
    let h = harness(vec![("main", recorder.clone(), true)], Duration::from_secs(10));

    h.player.play(song(5, 30.0));

    // let it roll a little, then jump
    std::thread::sleep(Duration::from_millis(300));
    h.player.seek(Duration::from_secs(10))?;

    let status = h.player.status();
    assert_eq!(status.state, PlayerState::Play);
    assert!(
        status.elapsed_ms >= 10_000 && status.elapsed_ms < 11_000,
        "elapsed after seek: {}ms",
        status.elapsed_ms
    );

    h.player.stop();
    wait_for_stop(&h.player);
    assert_eq!(h.pool.stats().in_flight, 0);
    Ok(())
}

#[test]
fn test_elapsed_is_monotonic_during_play() {
    let recorder = Recorder::default();
    let h = harness(vec![("main", recorder.clone(), true)], Duration::from_secs(10));

    h.player.play(song(6, 10.0));

    let mut last = 0u64;
    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(50));
        let status = h.player.status();
        assert!(
            status.elapsed_ms >= last,
            "elapsed went backwards: {} -> {}",
            last,
            status.elapsed_ms
        );
        last = status.elapsed_ms;
    }
    assert!(last > 0, "time advanced");

    h.player.stop();
    wait_for_stop(&h.player);
}

#[test]
fn test_pause_and_resume() {
    let recorder = Recorder::default();
    let h = harness(vec![("main", recorder.clone(), true)], Duration::from_secs(10));

    h.player.play(song(7, 10.0));
    std::thread::sleep(Duration::from_millis(200));

    h.player.set_pause(true);
    assert_eq!(h.player.state(), PlayerState::Pause);
    let frozen = h.player.status().elapsed_ms;

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(h.player.status().elapsed_ms, frozen, "paused transport does not advance");

    h.player.set_pause(false);
    assert_eq!(h.player.state(), PlayerState::Play);

    // wait until the transport provably moved past the frozen point
    let mut advanced = false;
    for _ in 0..40 {
        std::thread::sleep(Duration::from_millis(50));
        if h.player.status().elapsed_ms > frozen {
            advanced = true;
            break;
        }
    }
    assert!(advanced, "transport advances after resume");

    h.player.stop();
    wait_for_stop(&h.player);
}

#[test]
fn test_decoder_error_advances_to_next_song() {
    let recorder = Recorder::default();
    let h = harness(vec![("main", recorder.clone(), false)], Duration::from_secs(10));

    // "bogus:" matches no plugin -> decoder error on song one
    h.player.queue_next(song(8, 0.5));
    h.player.play(Song::new("bogus:nothing"));
    wait_for_stop(&h.player);

    let status = h.player.status();
    assert_eq!(
        status.error_kind,
        Some(cadenza_engine::ErrorKind::Decoder),
        "decode failure is surfaced via the snapshot"
    );

    // the armed song still played
    assert_eq!(recorder.recorded(), pattern_bytes(8, song_bytes(0.5)));
    assert_eq!(h.pool.stats().in_flight, 0);
}

#[test]
fn test_stop_discards_pending_audio() {
    let recorder = Recorder::default();
    let h = harness(vec![("main", recorder.clone(), true)], Duration::from_secs(10));

    h.player.play(song(9, 30.0));
    std::thread::sleep(Duration::from_millis(200));
    h.player.stop();

    assert_eq!(h.player.state(), PlayerState::Stop);
    assert_eq!(h.pool.stats().in_flight, 0, "stop returns all chunks");

    let recorded = recorder.recorded().len();
    assert!(
        recorded < song_bytes(30.0),
        "stop interrupted playback ({recorded} bytes)"
    );
}

#[test]
fn test_status_snapshot_fields() {
    let recorder = Recorder::default();
    let h = harness(vec![("main", recorder.clone(), true)], Duration::from_secs(10));

    let s = song(10, 10.0);
    let song_id = s.id;
    h.player.play(s);

    let status = h.player.status();
    assert_eq!(status.state, PlayerState::Play);
    assert_eq!(status.current_song_id, Some(song_id));
    assert_eq!(status.audio_format, Some(FMT));
    assert_eq!(status.total_ms, Some(10_000));
    assert!(status.error_kind.is_none());

    h.player.stop();
    wait_for_stop(&h.player);
    assert_eq!(h.player.status().current_song_id, None);
}

//! Player control facade
//!
//! The thread-safe object shared by clients and the player worker.
//! Each public command takes the lock, stores the command code and
//! arguments, signals the worker, and waits for completion. Errors
//! from the worker are latched and surfaced through the status
//! snapshot until cleared.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use cadenza_common::params::{CrossfadeParams, EngineParams, ReplayGainMode};
use cadenza_common::time::duration_to_ms;
use cadenza_common::{AudioFormat, IdleFlags};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::buffer::ChunkPool;
use crate::decoder::{DecoderPlugin, InputOpener};
use crate::error::{Error, ErrorKind};
use crate::listener::PlayerListener;
use crate::output::OutputGroup;
use crate::song::Song;

use super::worker;

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Stop,
    Pause,
    Play,
}

/// Commands handed to the worker. Arguments live in dedicated slots of
/// [`Inner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    /// Start playing `pending_song`.
    Play,
    Stop,
    /// Apply `pause_target`.
    Pause,
    /// Seek the current song to `seek_time`.
    Seek,
    /// `next_song` changed.
    Queue,
    /// Abandon the prepared next song.
    Cancel,
    /// Refresh elapsed time and bit rate in the snapshot.
    Refresh,
    /// Output enable flags changed; commit them.
    UpdateAudio,
    /// Close all output devices (transport must be stopped).
    CloseAudio,
    Exit,
}

/// Runtime-changeable playback options.
#[derive(Debug, Clone, Copy)]
pub(super) struct Options {
    pub crossfade: CrossfadeParams,
    pub replay_gain_mode: ReplayGainMode,
}

pub(super) struct Inner {
    pub command: Option<Command>,
    pub state: PlayerState,

    /// Latched worker error; cleared by `clear_error` or overwritten
    /// by the next failure.
    pub error: Option<Error>,

    // command arguments
    pub pending_song: Option<Song>,
    pub next_song: Option<Song>,
    pub seek_time: Duration,
    pub pause_target: bool,
    pub border_pause: bool,
    pub options: Options,

    // status published by the worker
    pub current_song_id: Option<Uuid>,
    pub next_song_id: Option<Uuid>,
    pub elapsed: Duration,
    pub total_time: Option<Duration>,
    pub bit_rate: u16,
    pub audio_format: Option<AudioFormat>,
    pub total_play_time: Duration,
}

pub(super) struct Shared {
    pub mutex: Mutex<Inner>,
    /// Wakes the worker after `command` was set.
    pub cond: Condvar,
    /// Wakes clients when the worker finished a command.
    pub client_cond: Condvar,
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read-only transport snapshot exposed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub elapsed_ms: u64,
    pub total_ms: Option<u64>,
    pub bit_rate: u16,
    pub audio_format: Option<AudioFormat>,
    pub crossfade_seconds: f32,
    pub mixramp_db: f32,
    pub mixramp_delay_seconds: f32,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub current_song_id: Option<Uuid>,
    pub next_song_id: Option<Uuid>,
}

/// The serialized command channel between clients and the player
/// worker.
pub struct PlayerControl {
    shared: Arc<Shared>,
    group: Arc<OutputGroup>,
    listener: Arc<dyn PlayerListener>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerControl {
    /// Build the facade and spawn the long-lived player thread.
    pub fn new(
        params: &EngineParams,
        pool: Arc<ChunkPool>,
        group: Arc<OutputGroup>,
        plugins: Vec<Arc<dyn DecoderPlugin>>,
        opener: Arc<InputOpener>,
        listener: Arc<dyn PlayerListener>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            mutex: Mutex::new(Inner {
                command: None,
                state: PlayerState::Stop,
                error: None,
                pending_song: None,
                next_song: None,
                seek_time: Duration::ZERO,
                pause_target: false,
                border_pause: false,
                options: Options {
                    crossfade: params.crossfade,
                    replay_gain_mode: params.replay_gain.mode,
                },
                current_song_id: None,
                next_song_id: None,
                elapsed: Duration::ZERO,
                total_time: None,
                bit_rate: 0,
                audio_format: None,
                total_play_time: Duration::ZERO,
            }),
            cond: Condvar::new(),
            client_cond: Condvar::new(),
        });

        let ctx = worker::WorkerContext {
            shared: Arc::clone(&shared),
            pool,
            group: Arc::clone(&group),
            plugins,
            opener,
            listener: Arc::clone(&listener),
            buffered_before_play: params.buffered_before_play as usize,
            configured_audio_format: params.audio_output_format,
        };

        let thread = std::thread::Builder::new()
            .name("player".into())
            .spawn(move || worker::run(ctx))
            .expect("failed to spawn player thread");

        Arc::new(Self {
            shared,
            group,
            listener,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Issue `command` and wait until the worker has applied it.
    fn synchronous_command(&self, command: Command) {
        let mut inner = self.shared.lock();
        while inner.command.is_some() {
            inner = self
                .shared
                .client_cond
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
        inner.command = Some(command);
        self.shared.cond.notify_one();
        while inner.command.is_some() {
            inner = self
                .shared
                .client_cond
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Start playing `song`, replacing whatever plays now.
    pub fn play(&self, song: Song) {
        debug!(uri = %song.uri, "play");
        {
            let mut inner = self.shared.lock();
            inner.pending_song = Some(song);
        }
        self.synchronous_command(Command::Play);
        self.listener.on_idle(IdleFlags::PLAYER);
    }

    pub fn stop(&self) {
        self.synchronous_command(Command::Stop);
        self.listener.on_idle(IdleFlags::PLAYER);
    }

    pub fn set_pause(&self, pause: bool) {
        {
            let mut inner = self.shared.lock();
            inner.pause_target = pause;
        }
        self.synchronous_command(Command::Pause);
        self.listener.on_idle(IdleFlags::PLAYER);
    }

    /// Seek the current song. Not a state change: playback resumes in
    /// the previous state at the new position.
    pub fn seek(&self, position: Duration) -> Result<(), Error> {
        {
            let mut inner = self.shared.lock();
            inner.seek_time = position;
        }
        self.synchronous_command(Command::Seek);
        self.listener.on_idle(IdleFlags::PLAYER);

        // a seek failure is latched like any other worker error
        let inner = self.shared.lock();
        match &inner.error {
            Some(Error::SeekFailed { position_ms, message }) => Err(Error::SeekFailed {
                position_ms: *position_ms,
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Arm `song` as the gapless successor of the current one.
    pub fn queue_next(&self, song: Song) {
        {
            let mut inner = self.shared.lock();
            inner.next_song = Some(song);
        }
        self.synchronous_command(Command::Queue);
    }

    /// Abandon the prepared next song.
    pub fn cancel_next(&self) {
        self.synchronous_command(Command::Cancel);
    }

    /// Commit changed output enable flags.
    pub fn update_audio(&self) {
        self.synchronous_command(Command::UpdateAudio);
        self.listener.on_idle(IdleFlags::OUTPUT);
    }

    /// Close all output devices; valid while stopped.
    pub fn close_audio(&self) {
        self.synchronous_command(Command::CloseAudio);
    }

    /// Transport snapshot, refreshed from the worker.
    pub fn status(&self) -> PlayerStatus {
        self.synchronous_command(Command::Refresh);
        let inner = self.shared.lock();
        PlayerStatus {
            state: inner.state,
            elapsed_ms: duration_to_ms(inner.elapsed),
            total_ms: inner.total_time.map(duration_to_ms),
            bit_rate: inner.bit_rate,
            audio_format: inner.audio_format,
            crossfade_seconds: inner.options.crossfade.duration_seconds,
            mixramp_db: inner.options.crossfade.mixramp_db,
            mixramp_delay_seconds: inner.options.crossfade.mixramp_delay_seconds,
            error_kind: inner.error.as_ref().map(Error::kind),
            error_message: inner.error.as_ref().map(ToString::to_string),
            current_song_id: inner.current_song_id,
            next_song_id: inner.next_song_id,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.shared.lock().state
    }

    /// Seconds of audio played across all songs.
    pub fn total_play_time(&self) -> Duration {
        self.shared.lock().total_play_time
    }

    pub fn clear_error(&self) {
        self.shared.lock().error = None;
    }

    // options

    pub fn set_crossfade(&self, params: CrossfadeParams) {
        self.shared.lock().options.crossfade = params;
        self.listener.on_idle(IdleFlags::OPTIONS);
    }

    pub fn set_replay_gain_mode(&self, mode: ReplayGainMode) {
        self.shared.lock().options.replay_gain_mode = mode;
        self.listener.on_idle(IdleFlags::OPTIONS);
    }

    /// Auto-pause at the next song border (the queue's "single" mode).
    pub fn set_border_pause(&self, border_pause: bool) {
        self.shared.lock().border_pause = border_pause;
        self.listener.on_idle(IdleFlags::OPTIONS);
    }

    // volume pass-through

    pub fn get_volume(&self) -> Option<u32> {
        self.group.get_volume()
    }

    pub fn set_volume(&self, volume: u32) -> bool {
        let changed = self.group.set_volume(volume);
        if changed {
            self.listener.on_idle(IdleFlags::MIXER);
        }
        changed
    }

    /// Shut the worker down and join it. Called by `Drop`.
    pub fn exit(&self) {
        let thread = {
            let mut slot = self.thread.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        let Some(thread) = thread else {
            return;
        };

        self.synchronous_command(Command::Exit);
        if thread.join().is_err() {
            warn!("player thread panicked");
        }
    }
}

impl Drop for PlayerControl {
    fn drop(&mut self) {
        self.exit();
    }
}

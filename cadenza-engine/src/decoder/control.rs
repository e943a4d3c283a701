//! Decoder control
//!
//! The player-side handle of the decoder thread. One thread is spawned
//! per song and joined when the song ends or is preempted. All
//! coordination goes through one mutex and two condition variables:
//! `cond` wakes the decoder (command pending, pipe progress),
//! `client_cond` wakes the player (startup done, chunks pushed,
//! command finished).

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use cadenza_common::AudioFormat;
use tracing::{debug, warn};

use crate::buffer::{ChunkPipe, ChunkPool};
use crate::error::{Error, Result};
use crate::input::InputStream;
use crate::song::Song;

use super::plugin::DecoderPlugin;
use super::worker;

/// Opens an input stream for a URI; supplied by the daemon's input
/// layer.
pub type InputOpener = dyn Fn(&str) -> Result<Box<dyn InputStream>> + Send + Sync;

/// Externally visible decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No decode in progress (never started, finished, or stopped).
    Stop,
    /// Thread spawned, stream not yet announced.
    Start,
    /// Actively decoding.
    Decode,
    /// Decode failed; the error slot is set.
    Error,
}

/// Command slot written by the player, consumed by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    Stop,
    Seek(Duration),
}

pub(super) struct Inner {
    pub command: Option<Command>,
    pub state: DecoderState,
    pub seek_error: bool,

    /// Set when a seek command completes; the decoder produces nothing
    /// further until the player has cleared the pipes and lifts the
    /// gate. Keeps pre-clear chunks from mixing with post-seek audio.
    pub seek_gate: bool,

    /// Native stream format published by the worker on startup.
    pub audio_format: Option<AudioFormat>,

    /// Format of the chunks entering the pipe: the native format with
    /// the configured override applied.
    pub out_format: Option<AudioFormat>,

    pub seekable: bool,
    pub total_time: Option<Duration>,

    /// One-shot error slot.
    pub error: Option<Error>,
}

pub(super) struct Shared {
    pub mutex: Mutex<Inner>,
    /// Wakes the decoder thread.
    pub cond: Condvar,
    /// Wakes the player.
    pub client_cond: Condvar,
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Player-side decoder handle.
pub struct DecoderControl {
    shared: Arc<Shared>,
    pool: Arc<ChunkPool>,
    plugins: Arc<Vec<Arc<dyn DecoderPlugin>>>,
    opener: Arc<InputOpener>,

    /// Suspend the decoder once this many chunks are queued.
    max_pipe_chunks: usize,

    /// Convert decoded PCM to this format before chunking
    /// (the `audio_output_format` override).
    configured_format: Option<AudioFormat>,

    thread: Option<JoinHandle<()>>,
}

impl DecoderControl {
    pub fn new(
        pool: Arc<ChunkPool>,
        plugins: Vec<Arc<dyn DecoderPlugin>>,
        opener: Arc<InputOpener>,
        max_pipe_chunks: usize,
        configured_format: Option<AudioFormat>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                mutex: Mutex::new(Inner {
                    command: None,
                    state: DecoderState::Stop,
                    seek_error: false,
                    seek_gate: false,
                    audio_format: None,
                    out_format: None,
                    seekable: false,
                    total_time: None,
                    error: None,
                }),
                cond: Condvar::new(),
                client_cond: Condvar::new(),
            }),
            pool,
            plugins: Arc::new(plugins),
            opener,
            max_pipe_chunks,
            configured_format,
            thread: None,
        }
    }

    /// Spawn the decoder thread for `song`, pushing chunks into
    /// `pipe`. `start_at` skips into the song (used for seek-restart
    /// and ranged songs).
    pub fn start(&mut self, song: Song, pipe: Arc<ChunkPipe>, start_at: Duration) {
        assert!(self.thread.is_none(), "decoder already running");

        {
            let mut inner = self.shared.lock();
            inner.command = None;
            inner.state = DecoderState::Start;
            inner.seek_error = false;
            inner.seek_gate = false;
            inner.audio_format = None;
            inner.out_format = None;
            inner.seekable = false;
            inner.total_time = None;
            inner.error = None;
        }

        debug!(uri = %song.uri, ?start_at, "starting decoder");
        let params = worker::WorkerParams {
            shared: Arc::clone(&self.shared),
            pool: Arc::clone(&self.pool),
            pipe,
            plugins: Arc::clone(&self.plugins),
            opener: Arc::clone(&self.opener),
            max_pipe_chunks: self.max_pipe_chunks,
            configured_format: self.configured_format,
            song,
            start_at,
        };

        self.thread = Some(
            std::thread::Builder::new()
                .name("decoder".into())
                .spawn(move || worker::run(params))
                .expect("failed to spawn decoder thread"),
        );
    }

    /// True while a decoder thread exists (it may have finished its
    /// song already; `state` distinguishes).
    pub fn is_started(&self) -> bool {
        self.thread.is_some()
    }

    pub fn state(&self) -> DecoderState {
        self.shared.lock().state
    }

    /// True when the worker is past startup or failed.
    pub fn is_ready(&self) -> bool {
        !matches!(self.state(), DecoderState::Start)
    }

    /// True once the decode has ended, successfully or not.
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), DecoderState::Stop | DecoderState::Error)
    }

    pub fn has_failed(&self) -> bool {
        self.state() == DecoderState::Error
    }

    /// Native format of the decoded stream.
    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.shared.lock().audio_format
    }

    /// Format of the chunks this decoder pushes.
    pub fn out_format(&self) -> Option<AudioFormat> {
        self.shared.lock().out_format
    }

    pub fn seekable(&self) -> bool {
        self.shared.lock().seekable
    }

    pub fn total_time(&self) -> Option<Duration> {
        self.shared.lock().total_time
    }

    /// Take the latched decode error, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.shared.lock().error.take()
    }

    /// Block until the worker has announced the stream or failed.
    pub fn wait_for_startup(&self) {
        let mut inner = self.shared.lock();
        while inner.state == DecoderState::Start {
            inner = self
                .shared
                .client_cond
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Ask the decoder to reposition and wait for the outcome.
    ///
    /// The caller must clear the pipes afterwards; chunks pushed before
    /// the seek was observed carry pre-seek audio.
    pub fn seek(&self, position: Duration) -> Result<()> {
        let mut inner = self.shared.lock();
        if matches!(inner.state, DecoderState::Stop | DecoderState::Error) {
            return Err(Error::SeekFailed {
                position_ms: position.as_millis() as u64,
                message: "decoder not running".into(),
            });
        }

        inner.seek_error = false;
        inner.command = Some(Command::Seek(position));
        self.shared.cond.notify_one();

        while inner.command.is_some() {
            inner = self
                .shared
                .client_cond
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }

        if inner.seek_error {
            inner.seek_gate = false;
            Err(Error::SeekFailed {
                position_ms: position.as_millis() as u64,
                message: "decoder cannot seek".into(),
            })
        } else {
            Ok(())
        }
    }

    /// Lift the post-seek gate once the pipes have been cleared; the
    /// decoder resumes producing.
    pub fn finish_seek(&self) {
        let mut inner = self.shared.lock();
        inner.seek_gate = false;
        self.shared.cond.notify_one();
    }

    /// Stop the decode and join the thread. Idempotent.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        {
            let mut inner = self.shared.lock();
            if !matches!(inner.state, DecoderState::Stop | DecoderState::Error) {
                inner.command = Some(Command::Stop);
                self.shared.cond.notify_one();
            }
        }

        if thread.join().is_err() {
            warn!("decoder thread panicked");
        }
        self.shared.lock().command = None;
    }

    /// Wake a decoder suspended on "pipe full / pool empty"; the
    /// player calls this after consuming chunks.
    pub fn signal_progress(&self) {
        self.shared.cond.notify_one();
    }

    /// Block the player until the decoder has pushed something new or
    /// changed state.
    pub fn wait_for_progress(&self) {
        let inner = self.shared.lock();
        let _unused = self
            .shared
            .client_cond
            .wait_timeout(inner, Duration::from_millis(100))
            .unwrap_or_else(|e| e.into_inner());
    }
}

impl Drop for DecoderControl {
    fn drop(&mut self) {
        self.stop();
    }
}

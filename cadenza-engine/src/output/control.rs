//! Output instance control
//!
//! The engine-side handle of one configured output: command slot,
//! chunk feed, and state, protected by one mutex with a condition
//! variable pair (`cond` wakes the worker, `client_cond` wakes the
//! commander). The worker thread is spawned on first enable and lives
//! until the instance is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cadenza_common::params::{MixerType, OutputParams, ReplayGainParams};
use cadenza_common::AudioFormat;
use tracing::{debug, warn};

use crate::buffer::Chunk;
use crate::filter::{ReplayGainHandle, VolumeHandle};

use super::plugin::{MixerPlugin, OutputPlugin};
use super::worker;

/// Externally visible state of an output instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Closed,
    Open,
    Paused,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    Enable,
    Disable,
    Open,
    Close,
    Pause,
    Resume,
    Drain,
    Cancel,
    Kill,
}

pub(super) struct Inner {
    pub command: Option<Command>,
    pub state: OutputState,

    /// User intent; an output can be enabled while closed.
    pub enabled: bool,

    /// The plugin's `enable` hook has succeeded.
    pub really_enabled: bool,

    /// Cleared during CANCEL so the worker never plays a chunk the
    /// player is concurrently deallocating.
    pub allow_play: bool,

    /// Source format requested by the latest OPEN.
    pub request_format: Option<AudioFormat>,

    /// Source format the instance is currently open with.
    pub open_format: Option<AudioFormat>,

    /// Chunks waiting to be played, shared with the group.
    pub queue: VecDeque<Arc<Chunk>>,

    pub failed_at: Option<Instant>,
    pub last_error: Option<String>,
}

pub(super) struct Shared {
    pub mutex: Mutex<Inner>,
    /// Wakes the worker.
    pub cond: Condvar,
    /// Wakes whoever waits for a command to finish.
    pub client_cond: Condvar,
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cross-output wakeup: the worker pokes it whenever it consumes a
/// chunk or changes state, so the player can wait for room instead of
/// polling.
pub(crate) struct Wakeup {
    pub(crate) mutex: Mutex<u64>,
    pub(crate) cond: Condvar,
}

impl Wakeup {
    pub(crate) fn new() -> Self {
        Self { mutex: Mutex::new(0), cond: Condvar::new() }
    }

    pub(crate) fn notify(&self) {
        let mut n = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        *n += 1;
        self.cond.notify_all();
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) {
        let n = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        let _unused = self
            .cond
            .wait_timeout(n, timeout)
            .unwrap_or_else(|e| e.into_inner());
    }
}

struct Launch {
    plugin: Option<Box<dyn OutputPlugin>>,
    thread: Option<JoinHandle<()>>,
}

/// One configured output instance.
pub struct OutputControl {
    params: OutputParams,
    shared: Arc<Shared>,
    wakeup: Arc<Wakeup>,

    volume: VolumeHandle,
    replay_gain: ReplayGainHandle,
    mixer: Mutex<Option<Box<dyn MixerPlugin>>>,

    reopen_after: Duration,
    launch: Mutex<Launch>,
}

impl OutputControl {
    pub(super) fn with_wakeup(
        params: OutputParams,
        plugin: Box<dyn OutputPlugin>,
        mixer: Option<Box<dyn MixerPlugin>>,
        replay_gain: ReplayGainParams,
        reopen_after: Duration,
        wakeup: Arc<Wakeup>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                mutex: Mutex::new(Inner {
                    command: None,
                    state: OutputState::Closed,
                    enabled: true,
                    really_enabled: false,
                    allow_play: true,
                    request_format: None,
                    open_format: None,
                    queue: VecDeque::new(),
                    failed_at: None,
                    last_error: None,
                }),
                cond: Condvar::new(),
                client_cond: Condvar::new(),
            }),
            wakeup,
            volume: VolumeHandle::new(100),
            replay_gain: ReplayGainHandle::new(replay_gain),
            mixer: Mutex::new(mixer),
            reopen_after,
            params,
            launch: Mutex::new(Launch { plugin: Some(plugin), thread: None }),
        }
    }

    /// Construct a standalone instance (tests, single-output setups).
    pub fn new(
        params: OutputParams,
        plugin: Box<dyn OutputPlugin>,
        mixer: Option<Box<dyn MixerPlugin>>,
        replay_gain: ReplayGainParams,
        reopen_after: Duration,
    ) -> Self {
        Self::with_wakeup(params, plugin, mixer, replay_gain, reopen_after, Arc::new(Wakeup::new()))
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn params(&self) -> &OutputParams {
        &self.params
    }

    pub fn state(&self) -> OutputState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), OutputState::Open | OutputState::Paused)
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.lock().enabled
    }

    /// Flip the user-intent flag; takes effect at the next
    /// UPDATE_AUDIO.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.lock().enabled = enabled;
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    fn ensure_thread(&self) {
        let mut launch = self.launch.lock().unwrap_or_else(|e| e.into_inner());
        if launch.thread.is_some() {
            return;
        }
        let Some(plugin) = launch.plugin.take() else {
            return;
        };

        debug!(output = %self.params.name, "spawning output worker");
        let ctx = worker::WorkerContext {
            shared: Arc::clone(&self.shared),
            wakeup: Arc::clone(&self.wakeup),
            params: self.params.clone(),
            volume: self.volume.clone(),
            replay_gain: self.replay_gain.clone(),
            plugin,
        };
        launch.thread = Some(
            std::thread::Builder::new()
                .name(format!("output:{}", self.params.name))
                .spawn(move || worker::run(ctx))
                .expect("failed to spawn output thread"),
        );
    }

    fn command_wait(&self, command: Command) {
        self.ensure_thread();
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

    fn command_async(&self, command: Command) {
        self.ensure_thread();
        let mut inner = self.shared.lock();
        inner.command = Some(command);
        self.shared.cond.notify_one();
    }

    /// Run the plugin's enable hook if the output is enabled.
    pub fn enable_wait(&self) {
        if self.is_enabled() {
            self.command_wait(Command::Enable);
        }
    }

    pub fn disable_wait(&self) {
        self.command_wait(Command::Disable);
    }

    /// Open (or reopen) for `format`. Returns false when the output is
    /// disabled, still inside its failure window, or the open failed.
    pub fn open(&self, format: AudioFormat) -> bool {
        {
            let mut inner = self.shared.lock();
            if !inner.enabled {
                return false;
            }
            if inner.state == OutputState::Failed {
                match inner.failed_at {
                    Some(at) if at.elapsed() < self.reopen_after => return false,
                    _ => debug!(output = %self.params.name, "retrying failed output"),
                }
            }
            inner.request_format = Some(format);
        }

        self.enable_wait();
        self.command_wait(Command::Open);
        self.is_open()
    }

    pub fn close_wait(&self) {
        if self.is_open() {
            self.command_wait(Command::Close);
        }
    }

    pub fn pause_wait(&self) {
        if self.state() == OutputState::Open {
            self.command_wait(Command::Pause);
        }
    }

    pub fn resume_wait(&self) {
        if self.state() == OutputState::Paused {
            self.command_wait(Command::Resume);
        }
    }

    pub fn drain_wait(&self) {
        if self.state() == OutputState::Open {
            self.command_wait(Command::Drain);
        }
    }

    /// Best-effort cancel: ask the worker to drop its queue and the
    /// device buffer. Playback stays suspended until
    /// [`OutputControl::allow_play`].
    pub fn cancel_async(&self) {
        let mut inner = self.shared.lock();
        inner.allow_play = false;
        inner.command = Some(Command::Cancel);
        self.shared.cond.notify_one();
    }

    pub fn allow_play(&self) {
        let mut inner = self.shared.lock();
        inner.allow_play = true;
        self.shared.cond.notify_one();
    }

    /// Hand a chunk to this output. Returns false when the output is
    /// not accepting data (closed or failed).
    pub fn put_chunk(&self, chunk: Arc<Chunk>) -> bool {
        let mut inner = self.shared.lock();
        if !matches!(inner.state, OutputState::Open | OutputState::Paused) {
            return false;
        }
        inner.queue.push_back(chunk);
        self.shared.cond.notify_one();
        true
    }

    pub fn queued_chunks(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Volume of this output, if it has any mixer.
    pub fn get_volume(&self) -> Option<u32> {
        match self.params.mixer_type {
            MixerType::Software => Some(self.volume.get()),
            MixerType::Hardware => {
                let mut mixer = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
                match mixer.as_mut()?.get_volume() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(output = %self.params.name, %e, "mixer read failed");
                        None
                    }
                }
            }
            MixerType::None => None,
        }
    }

    pub fn set_volume(&self, volume: u32) -> bool {
        match self.params.mixer_type {
            MixerType::Software => {
                self.volume.set(volume);
                true
            }
            MixerType::Hardware => {
                let mut mixer = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
                match mixer.as_mut() {
                    Some(m) => match m.set_volume(volume) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(output = %self.params.name, %e, "mixer write failed");
                            false
                        }
                    },
                    None => false,
                }
            }
            MixerType::None => false,
        }
    }
}

impl Drop for OutputControl {
    fn drop(&mut self) {
        let thread = {
            let mut launch = self.launch.lock().unwrap_or_else(|e| e.into_inner());
            launch.thread.take()
        };
        if let Some(thread) = thread {
            self.command_async(Command::Kill);
            if thread.join().is_err() {
                warn!(output = %self.params.name, "output thread panicked");
            }
        }
    }
}

//! Output worker thread
//!
//! Waits for a command or a new chunk; on chunk, applies the filter
//! chain and PCM export, then feeds the driver in a short loop with
//! partial writes allowed. Driver calls run without any engine lock
//! held. A failed open or write parks the instance in FAILED with a
//! timestamp; the group skips it until the reopen interval elapses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza_common::params::{MixerType, OutputParams};
use cadenza_common::AudioFormat;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::Chunk;
use crate::error::{Error, Result};
use crate::filter::{
    ConvertFilter, FilterChain, PreparedFilter, PreparedReplayGainFilter, PreparedVolumeFilter,
    ReplayGainHandle, VolumeHandle,
};
use crate::pcm::PcmExport;

use super::control::{Command, OutputState, Shared, Wakeup};
use super::plugin::OutputPlugin;

/// Write retries after a successful `recover` before giving up.
const PLAY_RETRY_BUDGET: u32 = 3;

pub(super) struct WorkerContext {
    pub shared: Arc<Shared>,
    pub wakeup: Arc<Wakeup>,
    pub params: OutputParams,
    pub volume: VolumeHandle,
    pub replay_gain: ReplayGainHandle,
    pub plugin: Box<dyn OutputPlugin>,
}

struct Worker {
    shared: Arc<Shared>,
    wakeup: Arc<Wakeup>,
    params: OutputParams,
    volume: VolumeHandle,
    replay_gain: ReplayGainHandle,
    plugin: Box<dyn OutputPlugin>,

    /// Present while the device is open.
    chain: Option<FilterChain>,
    export: Option<PcmExport>,
}

pub(super) fn run(ctx: WorkerContext) {
    let WorkerContext { shared, wakeup, params, volume, replay_gain, plugin } = ctx;
    let mut worker =
        Worker { shared, wakeup, params, volume, replay_gain, plugin, chain: None, export: None };
    worker.run();
}

impl Worker {
    fn run(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut inner = shared.lock();

        loop {
            if let Some(command) = inner.command {
                drop(inner);
                let done = self.handle_command(command);
                inner = shared.lock();
                inner.command = None;
                shared.client_cond.notify_all();
                self.wakeup.notify();
                if done {
                    return;
                }
                continue;
            }

            if inner.state == OutputState::Open && inner.allow_play {
                if let Some(chunk) = inner.queue.pop_front() {
                    drop(inner);
                    let result = self.play_chunk(&chunk);
                    drop(chunk);
                    if let Err(e) = result {
                        self.fail(e);
                    }
                    self.wakeup.notify();
                    inner = shared.lock();
                    continue;
                }
            }

            if inner.state == OutputState::Paused {
                drop(inner);
                let keep_pause = self.plugin.pause();
                inner = shared.lock();
                if !keep_pause && inner.state == OutputState::Paused {
                    drop(inner);
                    self.do_close();
                    inner = shared.lock();
                    inner.state = OutputState::Closed;
                    inner.open_format = None;
                    self.wakeup.notify();
                }
                continue;
            }

            inner = shared.cond.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Execute one command with no lock held. Returns true on Kill.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Enable => {
                let already = self.shared.lock().really_enabled;
                if !already {
                    let result = self.plugin.enable();
                    let mut inner = self.shared.lock();
                    match result {
                        Ok(()) => inner.really_enabled = true,
                        Err(e) => {
                            warn!(output = %self.params.name, %e, "enable failed");
                            inner.last_error = Some(e.to_string());
                        }
                    }
                }
            }

            Command::Disable => {
                let was_open = {
                    let inner = self.shared.lock();
                    matches!(inner.state, OutputState::Open | OutputState::Paused)
                };
                if was_open {
                    self.do_close();
                }
                self.plugin.disable();
                let mut inner = self.shared.lock();
                inner.really_enabled = false;
                inner.state = OutputState::Closed;
                inner.open_format = None;
            }

            Command::Open => {
                let (request, already_open) = {
                    let inner = self.shared.lock();
                    (inner.request_format, inner.open_format)
                };
                let Some(request) = request else {
                    return false;
                };

                if already_open == Some(request) {
                    // same source format; just make sure we are playing
                    let mut inner = self.shared.lock();
                    if inner.state == OutputState::Paused {
                        inner.state = OutputState::Open;
                    }
                    return false;
                }

                if already_open.is_some() {
                    self.do_close();
                }

                match self.do_open(request) {
                    Ok(device_format) => {
                        info!(
                            output = %self.params.name,
                            source = %request,
                            device = %device_format,
                            "output open"
                        );
                        let mut inner = self.shared.lock();
                        inner.state = OutputState::Open;
                        inner.open_format = Some(request);
                        inner.failed_at = None;
                        inner.last_error = None;
                    }
                    Err(e) => self.fail(e),
                }
            }

            Command::Close => {
                self.do_close();
                let mut inner = self.shared.lock();
                inner.state = OutputState::Closed;
                inner.open_format = None;
                inner.queue.clear();
            }

            Command::Pause => {
                let mut inner = self.shared.lock();
                if inner.state == OutputState::Open {
                    inner.state = OutputState::Paused;
                }
            }

            Command::Resume => {
                let mut inner = self.shared.lock();
                if inner.state == OutputState::Paused {
                    inner.state = OutputState::Open;
                }
            }

            Command::Drain => {
                self.plugin.drain();
            }

            Command::Cancel => {
                self.plugin.cancel();
                if let Some(chain) = &mut self.chain {
                    chain.reset();
                }
                let mut inner = self.shared.lock();
                inner.queue.clear();
            }

            Command::Kill => {
                let was_open = {
                    let inner = self.shared.lock();
                    matches!(inner.state, OutputState::Open | OutputState::Paused)
                };
                if was_open {
                    self.do_close();
                }
                debug!(output = %self.params.name, "output worker exiting");
                return true;
            }
        }
        false
    }

    /// Open the device and build the filter chain and export stage.
    fn do_open(&mut self, source_format: AudioFormat) -> Result<AudioFormat> {
        let mut device_format = self.params.format.unwrap_or(source_format);
        self.plugin.open(&mut device_format).map_err(|e| Error::OutputOpen {
            name: self.params.name.clone(),
            message: e.to_string(),
        })?;

        let mut chain = FilterChain::new(source_format);
        let result = (|| -> Result<()> {
            let mut rg = PreparedReplayGainFilter::new(self.replay_gain.clone());
            chain.push(rg.open(source_format)?);

            if self.params.mixer_type == MixerType::Software {
                let mut vol = PreparedVolumeFilter::new(self.volume.clone());
                chain.push(vol.open(chain.out_format())?);
            }

            chain.push(Box::new(ConvertFilter::open(chain.out_format(), device_format)?));
            Ok(())
        })();

        if let Err(e) = result {
            self.plugin.close();
            return Err(Error::OutputOpen {
                name: self.params.name.clone(),
                message: e.to_string(),
            });
        }

        let mut export_params = self.plugin.export_params();
        export_params.dop |= self.params.dop;
        let export = PcmExport::open(device_format, export_params);
        trace!(
            output = %self.params.name,
            device_rate = export_params.calc_output_sample_rate(device_format.sample_rate),
            "export configured"
        );

        self.chain = Some(chain);
        self.export = Some(export);
        Ok(device_format)
    }

    fn do_close(&mut self) {
        self.plugin.cancel();
        self.plugin.close();
        self.chain = None;
        self.export = None;
        debug!(output = %self.params.name, "output closed");
    }

    /// Filter, export, and write one chunk.
    fn play_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        if self.params.tags {
            if let Some(tag) = &chunk.tag {
                self.plugin.send_tag(tag);
            }
        }

        // silence chunks keep the previous song's gain
        if !chunk.is_silence {
            self.replay_gain.set_info(chunk.replay_gain.as_ref());
        }

        let (Some(chain), Some(export)) = (self.chain.as_mut(), self.export.as_mut()) else {
            return Ok(());
        };

        let filtered = chain.filter(chunk.payload()).map_err(|e| Error::OutputPlay {
            name: self.params.name.clone(),
            message: format!("filter: {e}"),
        })?;
        let mut data = export.export(filtered);

        let mut retries = PLAY_RETRY_BUDGET;
        while !data.is_empty() {
            // observe cancel/close between writes, not mid-write
            if self.shared.lock().command.is_some() {
                return Ok(());
            }

            match self.plugin.play(data) {
                Ok(0) => {
                    let delay = self.plugin.delay();
                    if !delay.is_zero() {
                        std::thread::sleep(delay.min(Duration::from_millis(100)));
                    }
                }
                Ok(n) => {
                    data = &data[n.min(data.len())..];
                }
                Err(e) => {
                    if retries > 0 && matches!(self.plugin.recover(), Ok(true)) {
                        retries -= 1;
                        debug!(output = %self.params.name, "recovered after xrun, retrying");
                        continue;
                    }
                    return Err(Error::OutputPlay {
                        name: self.params.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Park the instance in FAILED and release its resources. Called
    /// without the lock held; the driver close must not block other
    /// threads on the instance mutex.
    fn fail(&mut self, e: Error) {
        error!(output = %self.params.name, %e, "output failed");
        self.plugin.close();
        self.chain = None;
        self.export = None;

        let mut inner = self.shared.lock();
        inner.last_error = Some(e.to_string());
        inner.state = OutputState::Failed;
        inner.failed_at = Some(Instant::now());
        inner.open_format = None;
        inner.queue.clear();
        drop(inner);
        self.wakeup.notify();
    }
}

//! Player thread
//!
//! The transport state machine: spawns one decoder per song, prebuffers
//! before unpausing outputs, moves chunks from the decoder pipe into
//! the output group, and handles seek, pause, under-run, cross-fade,
//! and end-of-song transitions. The facade mutex is held only for
//! command handling and status updates, never across a blocking
//! decoder or output call.

use std::sync::Arc;
use std::time::Duration;

use cadenza_common::{AudioFormat, IdleFlags};
use tracing::{debug, info, warn};

use crate::buffer::{Chunk, ChunkPipe, ChunkPool};
use crate::decoder::{DecoderControl, DecoderPlugin, InputOpener};
use crate::error::Error;
use crate::listener::PlayerListener;
use crate::output::OutputGroup;
use crate::pcm::mix;
use crate::song::Song;

use super::control::{Command, PlayerState, Shared};
use super::crossfade::{self, FadePlan};

/// How long the worker naps when it has nothing to move.
const IDLE_WAIT: Duration = Duration::from_millis(50);

pub(super) struct WorkerContext {
    pub shared: Arc<Shared>,
    pub pool: Arc<ChunkPool>,
    pub group: Arc<OutputGroup>,
    pub plugins: Vec<Arc<dyn DecoderPlugin>>,
    pub opener: Arc<InputOpener>,
    pub listener: Arc<dyn PlayerListener>,
    pub buffered_before_play: usize,
    pub configured_audio_format: Option<AudioFormat>,
}

pub(super) fn run(ctx: WorkerContext) {
    // keep a healthy margin between the decoder's high-water mark and
    // the pool so the output side can always make progress
    let max_pipe_chunks = (ctx.pool.capacity() * 3 / 4).max(4);

    let dc = DecoderControl::new(
        Arc::clone(&ctx.pool),
        ctx.plugins.clone(),
        Arc::clone(&ctx.opener),
        max_pipe_chunks,
        ctx.configured_audio_format,
    );

    let worker = PlayerWorker {
        shared: Arc::clone(&ctx.shared),
        pool: ctx.pool,
        group: ctx.group,
        listener: ctx.listener,
        buffered_before_play: ctx.buffered_before_play.max(1),
        dc,
        pipe: Arc::new(ChunkPipe::new()),
        next_pipe: None,
        current_song: None,
        play_format: None,
        buffering: false,
        decoder_at_next: false,
        fade: FadePlan::None,
        last_bit_rate: 0,
    };
    worker.run();
}

struct PlayerWorker {
    shared: Arc<Shared>,
    pool: Arc<ChunkPool>,
    group: Arc<OutputGroup>,
    listener: Arc<dyn PlayerListener>,
    buffered_before_play: usize,

    dc: DecoderControl,

    /// Pipe the current song's chunks are consumed from.
    pipe: Arc<ChunkPipe>,

    /// Pipe the next song decodes into once the current decode ends.
    next_pipe: Option<Arc<ChunkPipe>>,

    current_song: Option<Song>,

    /// Format the outputs are open with (the pipe's chunk format).
    play_format: Option<AudioFormat>,

    /// Waiting for the prebuffer threshold before feeding outputs.
    buffering: bool,

    /// The decoder has moved on to the armed next song.
    decoder_at_next: bool,

    fade: FadePlan,

    last_bit_rate: u16,
}

impl PlayerWorker {
    fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let mut inner = shared.lock();

        loop {
            if let Some(command) = inner.command {
                drop(inner);
                let exit = self.handle_command(command);
                inner = shared.lock();
                inner.command = None;
                shared.client_cond.notify_all();
                if exit {
                    return;
                }
                continue;
            }

            match inner.state {
                PlayerState::Stop => {
                    inner = shared.cond.wait(inner).unwrap_or_else(|e| e.into_inner());
                }
                PlayerState::Pause => {
                    drop(inner);
                    self.group.reclaim();
                    self.send_silence_to_always_on();
                    inner = shared.lock();
                    if inner.command.is_none() {
                        inner = shared
                            .cond
                            .wait_timeout(inner, Duration::from_millis(100))
                            .unwrap_or_else(|e| e.into_inner())
                            .0;
                    }
                }
                PlayerState::Play => {
                    drop(inner);
                    let advanced = self.play_iteration();
                    inner = shared.lock();
                    if !advanced && inner.command.is_none() {
                        inner = shared
                            .cond
                            .wait_timeout(inner, IDLE_WAIT)
                            .unwrap_or_else(|e| e.into_inner())
                            .0;
                    }
                }
            }
        }
    }

    /// Apply one facade command. Returns true on Exit.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Play => {
                let song = self.shared.lock().pending_song.take();
                if let Some(song) = song {
                    self.start_song(song);
                }
            }

            Command::Stop => self.stop_playback(false),

            Command::Pause => {
                let (target, state) = {
                    let inner = self.shared.lock();
                    (inner.pause_target, inner.state)
                };
                match (state, target) {
                    (PlayerState::Play, true) => {
                        self.group.pause_all();
                        self.shared.lock().state = PlayerState::Pause;
                        info!("paused");
                    }
                    (PlayerState::Pause, false) => {
                        self.group.resume_all();
                        self.shared.lock().state = PlayerState::Play;
                        info!("resumed");
                    }
                    _ => {}
                }
            }

            Command::Seek => {
                let target = self.shared.lock().seek_time;
                self.seek_current(target);
            }

            Command::Queue => {
                let next_id = {
                    let mut inner = self.shared.lock();
                    inner.next_song_id = inner.next_song.as_ref().map(|s| s.id);
                    inner.next_song_id
                };
                debug!(?next_id, "next song armed");
            }

            Command::Cancel => self.cancel_next(),

            Command::Refresh => {
                // elapsed and bit rate are kept current by the play
                // loop; nothing extra to collect
            }

            Command::UpdateAudio => {
                self.group.update_enabled();
                if let Some(format) = self.play_format {
                    if self.shared.lock().state != PlayerState::Stop {
                        if let Err(e) = self.group.open_all(format) {
                            self.latch_error(e);
                        }
                    }
                }
            }

            Command::CloseAudio => {
                if self.shared.lock().state == PlayerState::Stop {
                    self.group.close_all();
                }
            }

            Command::Exit => {
                self.dc.stop();
                self.clear_pipes();
                self.group.close_all();
                return true;
            }
        }
        false
    }

    /// Begin playback of `song`, replacing whatever plays now.
    fn start_song(&mut self, song: Song) {
        info!(uri = %song.uri, "starting song");

        self.dc.stop();
        self.clear_pipes();
        self.group.allow_play();

        self.pipe = Arc::new(ChunkPipe::new());
        self.next_pipe = None;
        self.decoder_at_next = false;
        self.fade = FadePlan::None;
        self.buffering = true;
        self.last_bit_rate = 0;

        self.dc.start(song.clone(), Arc::clone(&self.pipe), Duration::ZERO);
        self.dc.wait_for_startup();

        {
            let mut inner = self.shared.lock();
            inner.state = PlayerState::Play;
            inner.current_song_id = Some(song.id);
            inner.elapsed = Duration::ZERO;
            inner.bit_rate = 0;
            inner.audio_format = self.dc.audio_format();
            inner.total_time = self.dc.total_time().or(song.duration);
        }
        self.current_song = Some(song);

        if self.dc.has_failed() {
            self.song_failed();
        }
    }

    /// The decoder reported an error: latch it and move on.
    fn song_failed(&mut self) {
        if let Some(e) = self.dc.take_error() {
            warn!(%e, "song failed");
            self.latch_error(e);
        }
        self.dc.stop();

        let next = self.take_next_song();
        match next {
            Some(next) => self.start_song(next),
            None => self.stop_playback(false),
        }
    }

    fn take_next_song(&mut self) -> Option<Song> {
        let mut inner = self.shared.lock();
        inner.next_song_id = None;
        inner.next_song.take()
    }

    /// Stop the transport. With `drain`, let the outputs finish what
    /// they have (natural end of playlist); otherwise discard.
    fn stop_playback(&mut self, drain: bool) {
        self.dc.stop();
        self.clear_pipes();

        if drain {
            self.group.drain_all();
        } else {
            self.group.cancel_all();
            self.group.allow_play();
        }
        self.group.release_all();

        {
            let mut inner = self.shared.lock();
            inner.state = PlayerState::Stop;
            inner.current_song_id = None;
            inner.next_song_id = None;
            inner.next_song = None;
            inner.elapsed = Duration::ZERO;
            inner.bit_rate = 0;
        }
        self.current_song = None;
        self.play_format = None;
        self.decoder_at_next = false;
        self.fade = FadePlan::None;
        info!("stopped");
    }

    fn clear_pipes(&mut self) {
        self.pipe.clear(&self.pool);
        if let Some(next_pipe) = &self.next_pipe {
            next_pipe.clear(&self.pool);
        }
        self.next_pipe = None;
    }

    /// The synchronous seek sub-protocol: preempt the decoder, flush
    /// everything downstream, and resume at the target position.
    fn seek_current(&mut self, target: Duration) {
        let Some(current) = self.current_song.clone() else {
            return;
        };

        debug!(?target, "seek");

        // a decoder already at the next song cannot seek the current
        // one; restart it on the current song
        let result = if self.decoder_at_next || self.dc.is_finished() {
            Err(Error::SeekFailed {
                position_ms: target.as_millis() as u64,
                message: "decoder past current song".into(),
            })
        } else {
            self.dc.seek(target)
        };

        match result {
            Ok(()) => {
                self.after_seek(target);
            }
            Err(Error::SeekFailed { .. }) => {
                // re-open: restart the decode, skipping to the target
                self.dc.stop();
                self.clear_pipes();
                self.pipe = Arc::new(ChunkPipe::new());
                self.decoder_at_next = false;
                self.fade = FadePlan::None;
                self.dc.start(current, Arc::clone(&self.pipe), target);
                self.dc.wait_for_startup();
                if self.dc.has_failed() {
                    self.song_failed();
                    return;
                }
                self.after_seek(target);
            }
            Err(e) => self.latch_error(e),
        }
    }

    fn after_seek(&mut self, target: Duration) {
        // pre-seek chunks are garbage on both pipes and in the devices
        self.pipe.clear(&self.pool);
        if let Some(next_pipe) = &self.next_pipe {
            next_pipe.clear(&self.pool);
        }
        self.group.cancel_all();
        self.group.allow_play();
        // everything downstream is flushed; let the decoder produce
        self.dc.finish_seek();

        self.buffering = true;
        let mut inner = self.shared.lock();
        inner.elapsed = target;
    }

    /// Abandon the armed next song (and its decode, if started).
    fn cancel_next(&mut self) {
        if self.decoder_at_next {
            self.dc.stop();
            if let Some(next_pipe) = self.next_pipe.take() {
                next_pipe.clear(&self.pool);
            }
            self.decoder_at_next = false;
            self.fade = FadePlan::None;
        }
        let mut inner = self.shared.lock();
        inner.next_song = None;
        inner.next_song_id = None;
    }

    /// One step of the PLAY loop. Returns true when progress was made
    /// (caller skips the idle wait).
    fn play_iteration(&mut self) -> bool {
        self.group.reclaim();

        if self.dc.has_failed() && !self.decoder_at_next {
            self.song_failed();
            return true;
        }

        if self.buffering {
            return self.buffer_iteration();
        }

        // the current decode ended: either arm the next song's decoder
        // or begin the end-of-playlist wind-down
        if self.dc.is_finished() && !self.decoder_at_next {
            if self.dc.has_failed() {
                self.song_failed();
                return true;
            }
            let next = {
                let inner = self.shared.lock();
                inner.next_song.clone()
            };
            match next {
                Some(next) => {
                    self.start_next_decoder(next);
                    return true;
                }
                None if self.pipe.is_empty() => {
                    info!("end of playlist");
                    self.stop_playback(true);
                    return true;
                }
                None => {}
            }
        }

        if !self.group.has_room() {
            self.group.wait_for_consumption(IDLE_WAIT);
            self.group.reclaim();
            return false;
        }

        if self.decoder_at_next {
            self.play_transition_chunk()
        } else {
            self.play_normal_chunk()
        }
    }

    /// Prebuffer before feeding the outputs.
    fn buffer_iteration(&mut self) -> bool {
        if self.pipe.len() < self.buffered_before_play
            && !self.dc.is_finished()
            && !self.decoder_at_next
        {
            self.dc.wait_for_progress();
            return false;
        }

        let Some(format) = self.dc.out_format().or(self.play_format) else {
            // nothing decoded and the decoder is gone
            self.song_failed();
            return true;
        };

        if self.play_format != Some(format) {
            self.group.wait_all_consumed();
            if let Err(e) = self.group.open_all(format) {
                self.latch_error(e);
                self.stop_playback(false);
                return true;
            }
            self.play_format = Some(format);
        }

        self.group.resume_all();
        self.buffering = false;
        debug!(chunks = self.pipe.len(), "prebuffer complete");
        true
    }

    /// Normal steady-state: move the head chunk to the outputs.
    fn play_normal_chunk(&mut self) -> bool {
        let Some(chunk) = self.pipe.shift() else {
            if !self.dc.is_finished() {
                // under-run: decoder is behind and the outputs have
                // drained; pause them until the pipe refills
                if self.group.in_flight_len() == 0 {
                    warn!("decoder under-run");
                    self.group.pause_all();
                    self.buffering = true;
                }
                self.dc.signal_progress();
            }
            return false;
        };

        self.send_chunk(chunk);
        true
    }

    /// Transition mode: the decoder is producing the next song while
    /// the current one drains; mix when a fade is planned.
    fn play_transition_chunk(&mut self) -> bool {
        if self.fade == FadePlan::Cut && self.incoming_ready() {
            // abrupt transition at the fade point
            self.pipe.clear(&self.pool);
            self.dc.signal_progress();
        }

        let fade_chunks = match self.fade {
            FadePlan::Fade { chunks } => chunks,
            _ => 0,
        };

        let position = self.pipe.len();
        let Some(mut chunk) = self.pipe.shift() else {
            // outgoing song fully played; switch to the incoming one
            return self.switch_to_next();
        };

        if fade_chunks > 0 && position <= fade_chunks {
            if let Some(next_pipe) = &self.next_pipe {
                if let Some(other) = next_pipe.shift() {
                    let ratio = position as f32 / fade_chunks as f32;
                    self.mix_chunks(&mut chunk, &other, ratio);
                    self.pool.release(other);
                    self.dc.signal_progress();
                }
            }
        }

        self.send_chunk(chunk);
        true
    }

    fn incoming_ready(&self) -> bool {
        self.next_pipe.as_ref().map_or(false, |p| !p.is_empty()) || self.dc.is_finished()
    }

    /// Mix `other` into `chunk` with the given outgoing portion.
    fn mix_chunks(&self, chunk: &mut Chunk, other: &Chunk, ratio: f32) {
        let Some(format) = chunk.audio_format() else {
            return;
        };
        let len = chunk.len().min(other.len());
        if !mix::mix(
            &mut chunk.payload_mut()[..len],
            &other.payload()[..len],
            format,
            ratio,
        ) {
            debug!("mix unsupported for {format}; fade degraded to gapless");
        }
    }

    /// The current decode finished with a next song armed: plan the
    /// fade and start decoding the next song into a fresh pipe.
    fn start_next_decoder(&mut self, next: Song) {
        let crossfade = self.shared.lock().options.crossfade;
        let prev_format = self.play_format.unwrap_or_else(|| {
            // unreachable in practice: outputs are open by now
            AudioFormat::new(44100, cadenza_common::SampleFormat::S16, 2)
        });

        self.dc.stop();

        let next_pipe = Arc::new(ChunkPipe::new());
        self.dc.start(next.clone(), Arc::clone(&next_pipe), Duration::ZERO);
        self.dc.wait_for_startup();

        if self.dc.has_failed() {
            if let Some(e) = self.dc.take_error() {
                self.latch_error(e);
            }
            // keep draining the current song; the armed next song is
            // dropped
            let mut inner = self.shared.lock();
            inner.next_song = None;
            inner.next_song_id = None;
            return;
        }

        let next_format = self.dc.out_format().unwrap_or(prev_format);
        let prev_song = self.current_song.as_ref();

        let prev_rg_db = prev_song
            .and_then(|s| s.tag.replay_gain)
            .and_then(|rg| rg.tuple_for(self.replay_gain_mode()).map(|t| t.gain_db))
            .unwrap_or(0.0);
        let next_rg_db = next
            .tag
            .replay_gain
            .and_then(|rg| rg.tuple_for(self.replay_gain_mode()).map(|t| t.gain_db))
            .unwrap_or(0.0);

        // never fade with more chunks than the pool can spare
        let max_chunks = self.pool.capacity() / 4;

        self.fade = crossfade::plan(
            &crossfade,
            self.dc.total_time(),
            next_format,
            prev_format,
            &next.tag.mixramp.start,
            prev_song.map(|s| &s.tag.mixramp.end[..]).unwrap_or(&[]),
            next_rg_db,
            prev_rg_db,
            max_chunks,
        );

        self.next_pipe = Some(next_pipe);
        self.decoder_at_next = true;
        debug!(fade = ?self.fade, uri = %next.uri, "decoding next song");
    }

    fn replay_gain_mode(&self) -> cadenza_common::params::ReplayGainMode {
        self.shared.lock().options.replay_gain_mode
    }

    /// The outgoing pipe is empty: the armed song becomes current.
    fn switch_to_next(&mut self) -> bool {
        let Some(next_pipe) = self.next_pipe.take() else {
            return false;
        };

        let next = self.take_next_song();
        let Some(next) = next else {
            // cancel raced the transition; treat as end of song
            self.pipe = next_pipe;
            self.decoder_at_next = false;
            return true;
        };

        info!(uri = %next.uri, "song transition");

        self.pipe = next_pipe;
        self.decoder_at_next = false;
        self.fade = FadePlan::None;
        self.last_bit_rate = 0;

        let border_pause = {
            let mut inner = self.shared.lock();
            inner.current_song_id = Some(next.id);
            inner.elapsed = Duration::ZERO;
            inner.audio_format = self.dc.audio_format().or(inner.audio_format);
            inner.total_time = self.dc.total_time().or(next.duration);
            inner.border_pause
        };
        self.current_song = Some(next);

        // a format change between songs forces an output reopen once
        // the old chunks have drained
        if let Some(format) = self.dc.out_format() {
            if self.play_format != Some(format) {
                self.group.wait_all_consumed();
                if let Err(e) = self.group.open_all(format) {
                    self.latch_error(e);
                    self.stop_playback(false);
                    return true;
                }
                self.play_format = Some(format);
            }
        }

        if border_pause {
            self.group.pause_all();
            self.shared.lock().state = PlayerState::Pause;
            self.listener.on_border_pause();
        }

        self.listener.on_idle(IdleFlags::PLAYER);
        true
    }

    /// Push one chunk to the outputs, updating the public status.
    fn send_chunk(&mut self, chunk: Box<Chunk>) {
        {
            let mut inner = self.shared.lock();
            if let Some(t) = chunk.time {
                inner.elapsed = t;
            }
            if chunk.bit_rate != 0
                && (chunk.bit_rate_changed || self.last_bit_rate == 0)
            {
                inner.bit_rate = chunk.bit_rate;
                self.last_bit_rate = chunk.bit_rate;
            }
            if let Some(format) = chunk.audio_format() {
                inner.total_play_time += format.bytes_to_duration(chunk.len());
            }
        }

        // tag and bit-rate changes become client-visible at the chunk
        // boundary they ride on
        if let Some(tag) = &chunk.tag {
            if let Some(song) = &self.current_song {
                self.listener.on_tag_modified(song, tag);
            }
            self.listener.on_idle(IdleFlags::PLAYER);
        } else if chunk.bit_rate_changed {
            self.listener.on_idle(IdleFlags::PLAYER);
        }

        let accepted = self.group.play(chunk);
        self.dc.signal_progress();

        if !accepted {
            warn!("no output accepted the chunk");
            self.latch_error(Error::AllOutputsFailed);
            self.stop_playback(false);
        }
    }

    /// Keep always-on outputs fed while paused or stopped.
    fn send_silence_to_always_on(&mut self) {
        let Some(format) = self.play_format else {
            return;
        };
        if !self.group.outputs().iter().any(|o| o.params().always_on && o.is_open()) {
            return;
        }
        if !self.group.has_room() {
            return;
        }
        let Some(mut chunk) = self.pool.allocate() else {
            return;
        };
        chunk.fill_silence(format);
        self.group.play(chunk);
        self.group.reclaim();
    }

    fn latch_error(&self, e: Error) {
        if e.is_canceled() {
            return;
        }
        let mut inner = self.shared.lock();
        inner.error = Some(e);
    }
}

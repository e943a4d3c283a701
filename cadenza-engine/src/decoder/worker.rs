//! Decoder thread body
//!
//! Opens the input stream, selects a plugin, and runs its decode loop
//! through the bridge. Whatever happens, the final state and any error
//! land in the shared slot for the player to observe.

use std::sync::Arc;
use std::time::Duration;

use cadenza_common::AudioFormat;
use tracing::{debug, error, info};

use crate::buffer::{ChunkPipe, ChunkPool};
use crate::error::Error;
use crate::song::Song;

use super::bridge::DecoderBridge;
use super::control::{InputOpener, Shared};
use super::plugin::DecoderPlugin;
use super::DecoderState;

pub(super) struct WorkerParams {
    pub shared: Arc<Shared>,
    pub pool: Arc<ChunkPool>,
    pub pipe: Arc<ChunkPipe>,
    pub plugins: Arc<Vec<Arc<dyn DecoderPlugin>>>,
    pub opener: Arc<InputOpener>,
    pub max_pipe_chunks: usize,
    pub configured_format: Option<AudioFormat>,
    pub song: Song,
    pub start_at: Duration,
}

pub(super) fn run(params: WorkerParams) {
    let WorkerParams {
        shared,
        pool,
        pipe,
        plugins,
        opener,
        max_pipe_chunks,
        configured_format,
        song,
        start_at,
    } = params;

    let result = decode_song(
        &shared,
        &pool,
        &pipe,
        &plugins,
        &opener,
        max_pipe_chunks,
        configured_format,
        &song,
        start_at,
    );

    let mut inner = shared.lock();
    match result {
        Ok(()) => {
            debug!(uri = %song.uri, "decode finished");
            inner.state = DecoderState::Stop;
        }
        Err(e) => {
            if e.is_canceled() {
                inner.state = DecoderState::Stop;
            } else {
                error!(uri = %song.uri, %e, "decode failed");
                inner.error = Some(e);
                inner.state = DecoderState::Error;
            }
        }
    }
    inner.command = None;
    shared.client_cond.notify_all();
}

#[allow(clippy::too_many_arguments)]
fn decode_song(
    shared: &Arc<Shared>,
    pool: &Arc<ChunkPool>,
    pipe: &Arc<ChunkPipe>,
    plugins: &[Arc<dyn DecoderPlugin>],
    opener: &Arc<InputOpener>,
    max_pipe_chunks: usize,
    configured_format: Option<AudioFormat>,
    song: &Song,
    start_at: Duration,
) -> crate::error::Result<()> {
    let input = opener(&song.uri)?;
    let mime = input.mime().map(str::to_string);

    let plugin = plugins
        .iter()
        .find(|p| p.supports(&song.uri, mime.as_deref()))
        .ok_or_else(|| Error::NoDecoder { uri: song.uri.clone() })?;

    info!(uri = %song.uri, plugin = plugin.name(), "decoding");

    let mut bridge = DecoderBridge::new(
        Arc::clone(shared),
        Arc::clone(pool),
        Arc::clone(pipe),
        max_pipe_chunks,
        configured_format,
        Some(song.tag.clone()),
        start_at,
    );

    let result = plugin.decode(&mut bridge, input);
    bridge.flush();
    result
}

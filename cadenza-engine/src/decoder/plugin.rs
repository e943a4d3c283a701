//! Decoder plugin interface
//!
//! A plugin owns the codec know-how; the engine owns threading,
//! buffering, and command handling. The plugin calls back into a
//! [`DecoderClient`] and must act on the command returned by every
//! `submit_*` call: polling at least once per decoded block is what
//! makes seek and stop preemption work.

use std::time::Duration;

use cadenza_common::AudioFormat;

use crate::error::Result;
use crate::input::InputStream;
use crate::tag::Tag;

/// Commands the engine returns to the plugin from `submit_*` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderCommand {
    /// Keep decoding.
    None,
    /// Terminate the decode loop as soon as possible.
    Stop,
    /// Reposition to the given time, then call
    /// [`DecoderClient::command_finished`] (or
    /// [`DecoderClient::seek_error`] on failure).
    Seek(Duration),
}

/// The engine-side callbacks a plugin drives during decode.
pub trait DecoderClient {
    /// Announce stream parameters. Must be called exactly once before
    /// the first `submit_data`.
    fn ready(&mut self, format: AudioFormat, seekable: bool, total_time: Option<Duration>);

    /// Deliver decoded PCM in the announced format. Returns the
    /// pending command; the plugin must handle it before decoding more.
    fn submit_data(&mut self, data: &[u8], bit_rate_kbps: u16) -> DecoderCommand;

    /// Deliver an updated tag (stream metadata, song boundary).
    fn submit_tag(&mut self, tag: Tag) -> DecoderCommand;

    /// Acknowledge completion of a `Stop` or `Seek` command.
    fn command_finished(&mut self);

    /// Report that the requested seek could not be performed.
    fn seek_error(&mut self);
}

/// A decoder implementation for some family of formats.
pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap acceptance check by URI suffix and/or MIME type.
    fn supports(&self, uri: &str, mime: Option<&str>) -> bool;

    /// Decode `input` to completion, driving `client`. Returns when
    /// the stream ends or the client commands a stop.
    fn decode(&self, client: &mut dyn DecoderClient, input: Box<dyn InputStream>) -> Result<()>;
}

//! PCM primitives
//!
//! Byte-level transformations applied to decoded audio: the export
//! stage that shapes PCM for a device ([`export`]), cross-fade mixing
//! ([`mix`]), and fixed-point software volume ([`volume`]).

pub mod byteswap;
pub mod channel_order;
pub mod dsd;
pub mod export;
pub mod mix;
pub mod pack;
pub mod volume;

pub use export::{ExportParams, PcmExport};

//! Software volume filter
//!
//! Integer volume 0..=100 applied as a fixed-point scale. The
//! [`VolumeHandle`] doubles as the "software mixer": the output's
//! volume getter and setter talk to the same atomic the filter reads
//! in its hot loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cadenza_common::AudioFormat;

use crate::error::{Error, Result};
use crate::pcm::volume::{apply_volume, volume_to_scale, VOLUME_1};

use super::{Filter, PreparedFilter};

/// Shared volume knob, 0..=100.
#[derive(Clone)]
pub struct VolumeHandle {
    volume: Arc<AtomicU32>,
}

impl VolumeHandle {
    pub fn new(initial: u32) -> Self {
        Self { volume: Arc::new(AtomicU32::new(initial.min(100))) }
    }

    pub fn get(&self) -> u32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set(&self, volume: u32) {
        self.volume.store(volume.min(100), Ordering::Relaxed);
    }
}

/// Factory producing [`VolumeFilter`] instances bound to a handle.
pub struct PreparedVolumeFilter {
    handle: VolumeHandle,
}

impl PreparedVolumeFilter {
    pub fn new(handle: VolumeHandle) -> Self {
        Self { handle }
    }
}

impl PreparedFilter for PreparedVolumeFilter {
    fn open(&mut self, in_format: AudioFormat) -> Result<Box<dyn Filter>> {
        if in_format.sample_format == cadenza_common::SampleFormat::Dsd {
            return Err(Error::Config(
                "software volume cannot be applied to DSD; use a hardware mixer".into(),
            ));
        }
        Ok(Box::new(VolumeFilter {
            handle: self.handle.clone(),
            format: in_format,
            buffer: Vec::new(),
        }))
    }
}

/// Scales PCM by the current volume.
pub struct VolumeFilter {
    handle: VolumeHandle,
    format: AudioFormat,
    buffer: Vec<u8>,
}

impl Filter for VolumeFilter {
    fn out_format(&self) -> AudioFormat {
        self.format
    }

    fn filter<'a>(&'a mut self, src: &'a [u8]) -> Result<&'a [u8]> {
        let scale = volume_to_scale(self.handle.get());
        if scale == VOLUME_1 {
            return Ok(src);
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(src);
        apply_volume(&mut self.buffer, self.format, scale);
        Ok(&self.buffer)
    }
}

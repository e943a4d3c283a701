//! Output and mixer plugin interfaces
//!
//! A driver plugin is a value with behavior and a name; the engine owns
//! threading, the filter chain, and failure policy. All methods are
//! called from the output's worker thread, never with engine locks
//! held.

use std::time::Duration;

use cadenza_common::AudioFormat;

use crate::error::Result;
use crate::pcm::ExportParams;
use crate::tag::Tag;

/// A device driver behind one output instance.
pub trait OutputPlugin: Send {
    fn name(&self) -> &'static str;

    /// Allocate shared resources while the device stays closed.
    fn enable(&mut self) -> Result<()> {
        Ok(())
    }

    fn disable(&mut self) {}

    /// Open the device for the given source format. The plugin may
    /// adjust `format` to the closest configuration the device
    /// supports; the engine converts to the adjusted format.
    fn open(&mut self, format: &mut AudioFormat) -> Result<()>;

    /// PCM export effects this device needs for the format it was
    /// opened with (DoP packing, ALSA channel order, ...).
    fn export_params(&self) -> ExportParams {
        ExportParams::default()
    }

    fn close(&mut self);

    /// Estimated time until the device accepts more data; the worker
    /// sleeps this long before retrying `play`.
    fn delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Forward tag metadata to the device (stream outputs embed it).
    fn send_tag(&mut self, _tag: &Tag) {}

    /// Write PCM, returning the number of bytes consumed (> 0).
    /// Partial writes are allowed; the worker loops.
    fn play(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush buffered data to the hardware and wait for it to play.
    fn drain(&mut self) {}

    /// Drop data buffered in the device.
    fn cancel(&mut self) {}

    /// Enter device-level pause. Called repeatedly while paused; each
    /// call should block for roughly one period. Returning false means
    /// pause is unsupported and the device must be closed instead.
    fn pause(&mut self) -> bool {
        false
    }

    /// Try to recover from an xrun-style failure. `Ok(true)` tells the
    /// worker to retry the write.
    fn recover(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// Hardware volume control attached to an output.
pub trait MixerPlugin: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self);

    /// Current volume 0..=100.
    fn get_volume(&mut self) -> Result<u32>;

    fn set_volume(&mut self, volume: u32) -> Result<()>;
}

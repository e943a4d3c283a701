//! Cpal output
//!
//! Drives a sound device through cpal. The worker thread pushes f32
//! samples into a lock-free SPSC ring; the device callback pops them
//! and emits silence on underrun. Underruns and overruns are counted
//! and logged at a throttled rate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadenza_common::{AudioFormat, SampleFormat};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use ringbuf::{traits::*, HeapProd, HeapRb};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::super::plugin::OutputPlugin;

/// Ring capacity in frames (~190 ms at 44.1 kHz).
const DEFAULT_RING_FRAMES: usize = 8192;

pub struct CpalOutput {
    /// Requested device name; `None` selects the default device.
    device_name: Option<String>,

    /// Ring capacity override in frames.
    ring_frames: usize,

    stream: Option<Stream>,
    producer: Option<HeapProd<f32>>,
    channels: usize,
    sample_rate: u32,

    /// Set to make the callback drain the ring (cancel).
    flush: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
}

// SAFETY: `stream` is created and dropped on the output worker thread
// and never touched from anywhere else; every other field is Send.
// cpal's Stream is only !Send out of caution for some backends.
unsafe impl Send for CpalOutput {}

impl CpalOutput {
    pub fn new(device_name: Option<String>, buffer_time_us: Option<u32>) -> Self {
        // translate the configured buffer duration into ring frames at
        // a nominal 44.1 kHz; refined at open time
        let ring_frames = buffer_time_us
            .map(|us| (us as u64 * 44_100 / 1_000_000) as usize)
            .unwrap_or(DEFAULT_RING_FRAMES)
            .max(1024);

        Self {
            device_name,
            ring_frames,
            stream: None,
            producer: None,
            channels: 2,
            sample_rate: 44_100,
            flush: Arc::new(AtomicBool::new(false)),
            underruns: Arc::new(AtomicU64::new(0)),
        }
    }

    fn find_device(&self) -> Result<Device> {
        let host = cpal::default_host();

        if let Some(name) = &self.device_name {
            let mut devices = host.output_devices().map_err(|e| {
                Error::Config(format!("failed to enumerate audio devices: {e}"))
            })?;
            if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                info!(device = %name, "using requested audio device");
                return Ok(device);
            }
            warn!(device = %name, "requested device not found, falling back to default");
        }

        host.default_output_device()
            .ok_or_else(|| Error::Config("no default audio output device".into()))
    }
}

impl OutputPlugin for CpalOutput {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn open(&mut self, format: &mut AudioFormat) -> Result<()> {
        // the ring carries f32; let the convert filter do the rest
        format.sample_format = SampleFormat::F32;

        let device = self.find_device()?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Config(format!("device configs: {e}")))?
            .find(|c| {
                c.channels() == format.channels as u16
                    && c.min_sample_rate().0 <= format.sample_rate
                    && c.max_sample_rate().0 >= format.sample_rate
                    && c.sample_format() == cpal::SampleFormat::F32
            });

        let config: StreamConfig = match supported {
            Some(c) => c.with_sample_rate(SampleRate(format.sample_rate)).config(),
            None => {
                let default = device
                    .default_output_config()
                    .map_err(|e| Error::Config(format!("default config: {e}")))?;
                // negotiate: take the device's native rate and
                // channel count
                format.sample_rate = default.sample_rate().0;
                format.channels = (default.channels() as u8).clamp(1, 8);
                default.config()
            }
        };

        debug!(
            rate = config.sample_rate.0,
            channels = config.channels,
            "cpal stream config"
        );

        self.channels = config.channels as usize;
        self.sample_rate = config.sample_rate.0;

        let ring = HeapRb::<f32>::new(self.ring_frames * self.channels);
        let (producer, mut consumer) = ring.split();

        let flush = Arc::clone(&self.flush);
        let underruns = Arc::clone(&self.underruns);

        let stream = device
            .build_output_stream(
                &config,
                move |out: &mut [f32], _| {
                    if flush.swap(false, Ordering::Relaxed) {
                        consumer.clear();
                    }
                    let got = consumer.pop_slice(out);
                    if got < out.len() {
                        out[got..].fill(0.0);
                        let count = underruns.fetch_add(1, Ordering::Relaxed) + 1;
                        if count % 1000 == 0 {
                            warn!("audio callback underruns: {count}");
                        }
                    }
                },
                |e| warn!("cpal stream error: {e}"),
                None,
            )
            .map_err(|e| Error::Config(format!("build stream: {e}")))?;

        stream.play().map_err(|e| Error::Config(format!("start stream: {e}")))?;

        self.stream = Some(stream);
        self.producer = Some(producer);
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        self.producer = None;
    }

    fn delay(&self) -> Duration {
        let Some(producer) = &self.producer else {
            return Duration::ZERO;
        };
        if producer.vacant_len() > 0 {
            return Duration::ZERO;
        }
        // ring full: roughly half a ring until there is room again
        Duration::from_micros(
            (self.ring_frames as u64 / 2) * 1_000_000 / self.sample_rate as u64,
        )
    }

    fn play(&mut self, data: &[u8]) -> Result<usize> {
        let Some(producer) = &mut self.producer else {
            return Err(Error::OutputPlay { name: "cpal".into(), message: "not open".into() });
        };

        // whole f32 samples only
        let samples = data.len() / 4;
        if samples == 0 {
            return Ok(data.len());
        }

        let mut pushed = 0;
        for chunk in data[..samples * 4].chunks_exact(4) {
            let sample = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if producer.try_push(sample).is_err() {
                break;
            }
            pushed += 1;
        }

        Ok(pushed * 4)
    }

    fn cancel(&mut self) {
        self.flush.store(true, Ordering::Relaxed);
    }

    fn drain(&mut self) {
        let Some(producer) = &self.producer else {
            return;
        };
        let occupied = producer.occupied_len();
        let wait = Duration::from_micros(
            occupied as u64 / self.channels as u64 * 1_000_000 / self.sample_rate as u64,
        );
        std::thread::sleep(wait);
    }

    fn pause(&mut self) -> bool {
        // the callback keeps running and plays silence from the empty
        // ring; nothing to do but idle one period
        std::thread::sleep(Duration::from_millis(20));
        true
    }

    fn recover(&mut self) -> Result<bool> {
        if let Some(stream) = &self.stream {
            if stream.play().is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

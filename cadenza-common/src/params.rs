//! Engine configuration parameters
//!
//! All knobs the playback engine recognizes, as plain serde structs.
//! The daemon's configuration layer is responsible for producing an
//! [`EngineParams`] value; the engine takes it as an explicit handle at
//! construction time and never reads ambient global state.

use serde::{Deserialize, Serialize};

use crate::format::AudioFormat;

/// Which replay-gain measurement to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
}

/// Replay-gain policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayGainParams {
    pub mode: ReplayGainMode,

    /// Pre-amplification applied to songs with replay-gain data, in dB.
    pub preamp_db: f32,

    /// Pre-amplification applied to songs without replay-gain data, in dB.
    pub missing_preamp_db: f32,

    /// Clamp the scale so the declared peak cannot clip.
    pub limit: bool,
}

impl Default for ReplayGainParams {
    fn default() -> Self {
        Self {
            mode: ReplayGainMode::Off,
            preamp_db: 0.0,
            missing_preamp_db: 0.0,
            limit: true,
        }
    }
}

/// What to do when MixRamp thresholds collapse the fade window to zero
/// samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeShape {
    /// Play the songs back to back with no ramp (plain gapless).
    #[default]
    Skip,
    /// Cut to the next song abruptly at the mixramp point.
    Cut,
}

/// Cross-fade tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossfadeParams {
    /// Fade duration in seconds. Zero disables cross-fading.
    pub duration_seconds: f32,

    /// MixRamp overlap threshold in dB. `NaN` disables MixRamp.
    pub mixramp_db: f32,

    /// Extra silence trimmed between mixramp points, in seconds.
    pub mixramp_delay_seconds: f32,

    /// Behavior when the effective fade window is empty.
    pub on_collapse: FadeShape,
}

impl Default for CrossfadeParams {
    fn default() -> Self {
        Self {
            duration_seconds: 0.0,
            mixramp_db: f32::NAN,
            mixramp_delay_seconds: 0.0,
            on_collapse: FadeShape::Skip,
        }
    }
}

impl CrossfadeParams {
    pub fn mixramp_enabled(&self) -> bool {
        !self.mixramp_db.is_nan()
    }
}

/// How an output's volume is controlled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixerType {
    /// Volume through the driver's hardware mixer.
    Hardware,
    /// Volume through the software volume filter in the output's chain.
    #[default]
    Software,
    /// No volume control; volume queries report nothing.
    None,
}

/// Configuration for one output instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
    /// Display name, unique among outputs.
    pub name: String,

    /// Driver plugin name ("cpal", "null", ...).
    #[serde(rename = "type")]
    pub plugin: String,

    /// Device identifier, plugin-specific. `None` selects the default.
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default)]
    pub mixer_type: MixerType,

    /// Force a specific device format instead of negotiating.
    #[serde(default)]
    pub format: Option<AudioFormat>,

    /// Total device buffer duration in microseconds, driver-specific.
    #[serde(default)]
    pub buffer_time_us: Option<u32>,

    /// Device period duration in microseconds, driver-specific.
    #[serde(default)]
    pub period_time_us: Option<u32>,

    /// Encode DSD as DSD-over-PCM for this device.
    #[serde(default)]
    pub dop: bool,

    /// Keep the device open (paused, fed silence) across transport stop.
    #[serde(default)]
    pub always_on: bool,

    /// Forward tag metadata to the driver.
    #[serde(default = "default_true")]
    pub tags: bool,
}

fn default_true() -> bool {
    true
}

impl OutputParams {
    pub fn new(name: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: plugin.into(),
            device: None,
            mixer_type: MixerType::default(),
            format: None,
            buffer_time_us: None,
            period_time_us: None,
            dop: false,
            always_on: false,
            tags: true,
        }
    }
}

/// Top-level engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Total chunk pool size in MiB.
    pub audio_buffer_size_mib: u32,

    /// Chunks to prebuffer before starting playback.
    pub buffered_before_play: u32,

    /// Override the auto-negotiated device format.
    pub audio_output_format: Option<AudioFormat>,

    pub replay_gain: ReplayGainParams,

    pub crossfade: CrossfadeParams,

    /// Seconds a failed output stays out of rotation before a reopen is
    /// attempted.
    pub reopen_after_seconds: u32,

    pub outputs: Vec<OutputParams>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            audio_buffer_size_mib: 4,
            buffered_before_play: 32,
            audio_output_format: None,
            replay_gain: ReplayGainParams::default(),
            crossfade: CrossfadeParams::default(),
            reopen_after_seconds: 10,
            outputs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = EngineParams::default();
        assert_eq!(p.audio_buffer_size_mib, 4);
        assert_eq!(p.buffered_before_play, 32);
        assert!(p.audio_output_format.is_none());
        assert_eq!(p.replay_gain.mode, ReplayGainMode::Off);
        assert_eq!(p.crossfade.duration_seconds, 0.0);
        assert!(!p.crossfade.mixramp_enabled());
    }

    #[test]
    fn test_output_params_from_json() {
        let p: OutputParams = serde_json::from_str(
            r#"{
                "name": "living room",
                "type": "cpal",
                "device": "hw:1,0",
                "mixer_type": "hardware",
                "dop": true,
                "always_on": true
            }"#,
        )
        .unwrap();
        assert_eq!(p.name, "living room");
        assert_eq!(p.plugin, "cpal");
        assert_eq!(p.mixer_type, MixerType::Hardware);
        assert!(p.dop);
        assert!(p.always_on);
        assert!(p.tags, "tags default on");
    }

    #[test]
    fn test_engine_params_format_override() {
        let p: EngineParams =
            serde_json::from_str(r#"{"audio_output_format": "48000:24:2"}"#).unwrap();
        let af = p.audio_output_format.unwrap();
        assert_eq!(af.sample_rate, 48000);
    }
}

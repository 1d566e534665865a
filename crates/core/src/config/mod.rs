use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

use crate::{assets::AssetDescriptor, assets::Rgb, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub display: DisplayConfig,
    pub tempo: TempoConfig,
    pub smoothing: SmootherConfig,
    pub detection: DetectionConfig,
    pub effects: EffectsConfig,
    pub keys: KeyBindings,
    pub assets: Vec<AssetDescriptor>,
}

impl AppConfig {
    /// Loads the configuration from a JSON file. A missing file falls back to
    /// the defaults so the tool can still start with a bare asset list.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::from_json_str(&text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Parses a configuration document, filling omitted fields with defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialises the resolved configuration.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Output surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub window_name: String,
    pub width: u32,
    pub height: u32,
    /// Frame rate used when the active background does not report one.
    pub fallback_fps: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_name: "visual-hive Output".to_string(),
            width: 1920,
            height: 1080,
            fallback_fps: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempoSourceKind {
    /// Shared session clock, tempo agreed between peers.
    Network,
    /// Tempo detected from a live audio input.
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub source: TempoSourceKind,
    /// Grid length in beats used for the beat phase.
    pub quantum: f64,
    /// Length of one cue interval in beats.
    pub cue_beat_interval: f64,
    /// How close to a cue boundary, in beats, a commit may fire.
    pub cue_tolerance: f64,
    pub default_bpm: f64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            source: TempoSourceKind::Network,
            quantum: 4.0,
            cue_beat_interval: 32.0,
            cue_tolerance: 0.1,
            default_bpm: 120.0,
        }
    }
}

/// Tuning for the rolling-median tempo smoother. The numbers were tuned by
/// ear against live sets and have no derivation beyond that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    pub window_size: usize,
    /// Fraction of the published BPM a sample may lie outside the window range.
    pub percentage_tolerance: f64,
    pub initial_rounding_tolerance: f64,
    pub min_rounding_tolerance: f64,
    pub max_rounding_tolerance: f64,
    pub shrink_rate: f64,
    pub growth_rate: f64,
    /// Downward correction applied to the median before rounding.
    pub drift_correction: f64,
    pub strong_evidence_margin: f64,
    /// Samples below this are assumed to be half-tempo detections.
    pub octave_threshold: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            window_size: 15,
            percentage_tolerance: 0.1,
            initial_rounding_tolerance: 0.2,
            min_rounding_tolerance: 0.01,
            max_rounding_tolerance: 0.5,
            shrink_rate: 0.05,
            growth_rate: 0.1,
            drift_correction: 0.015,
            strong_evidence_margin: 0.1,
            octave_threshold: 100.0,
        }
    }
}

/// Audio detection cadence and analysis frame sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub read_interval_ms: u64,
    pub calculation_interval_ms: u64,
    pub window_size: usize,
    pub hop_size: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            read_interval_ms: 100,
            calculation_interval_ms: 500,
            window_size: 1024,
            hop_size: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub bounce_amplitude: f64,
    /// Strobe toggles per beat.
    pub strobe_divisions_per_beat: f64,
    pub flash_color: Rgb,
    pub bounce_on_start: bool,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            bounce_amplitude: 0.1,
            strobe_divisions_per_beat: 4.0,
            flash_color: Rgb::WHITE,
            bounce_on_start: false,
        }
    }
}

/// Keys the control loop reacts to besides the per-asset bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub bounce: char,
    pub strobe: char,
    pub cue: char,
    pub realign: char,
    pub quit: Vec<char>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            bounce: 'b',
            strobe: 's',
            cue: 'c',
            realign: ' ',
            quit: vec!['q', '\u{1b}'],
        }
    }
}

impl KeyBindings {
    /// True when `key` is reserved for a control action.
    pub fn is_reserved(&self, key: char) -> bool {
        key == self.bounce
            || key == self.strobe
            || key == self.cue
            || key == self.realign
            || self.quit.contains(&key)
    }
}

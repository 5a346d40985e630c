use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::analyzer::{Aggregation, FeatureOptions};

/// Application configuration loaded from TOML config file.
/// Every section is optional; missing keys take their defaults.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub features: FeaturesConfig,
    pub midi: MidiConfig,
    pub clock: ClockConfig,
}

/// Defaults for performance feature extraction.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Window (in beats, either side) for tempo/dynamics correlation.
    pub window_beats: f64,
    /// How velocities of simultaneous notes are combined: "mean" or "max".
    pub aggregation: Aggregation,
    /// Number of final beats fitted by the phrasing extractor.
    pub phrase_window_beats: f64,
    /// Also return legato/staccato/interval masks from the articulation extractor.
    pub articulation_mask: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            window_beats: 5.0,
            aggregation: Aggregation::Mean,
            phrase_window_beats: 4.0,
            articulation_mask: false,
        }
    }
}

impl FeaturesConfig {
    pub fn options(&self) -> FeatureOptions {
        FeatureOptions {
            window_beats: self.window_beats,
            aggregation: self.aggregation,
            articulation_mask: self.articulation_mask,
            phrase_window_beats: self.phrase_window_beats,
        }
    }
}

/// MIDI import settings.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MidiConfig {
    /// Tempo assumed until the first tempo event.
    pub default_bpm: f64,
    /// Report every note as track 0.
    pub merge_tracks: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            default_bpm: 120.0,
            merge_tracks: false,
        }
    }
}

/// Tick resolution used when a match file has no clock info lines.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ClockConfig {
    /// Ticks per quarter note.
    pub midi_clock_units: i64,
    /// Microseconds per quarter note.
    pub midi_clock_rate: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            midi_clock_units: 480,
            midi_clock_rate: 500_000,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/perfmatch/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path, falling back to defaults on error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

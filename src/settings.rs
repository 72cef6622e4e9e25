//! Persisted render settings.
//!
//! [`RenderSettings`] stays a plain engine-facing struct; this module mirrors
//! it into a serializable form, loads it from the user config directory and
//! saves it back atomically. Out-of-range stored values are clamped on apply
//! rather than rejected, so an edited or stale file still produces a usable
//! configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::params::{
    MAX_WINDOW_SIZE, MIN_WINDOW_SIZE, OverlapMode, RenderSettings, WindowMode,
};
use crate::util::{DB_SPAN_MAX, DB_SPAN_MIN};

const SETTINGS_FILE_NAME: &str = "settings.json";

/// Serializable mirror of [`RenderSettings`]. `window_size` and
/// `overlap_fraction` store `None` for the auto modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSettings {
    pub window_size: Option<usize>,
    pub overlap_fraction: Option<f32>,
    /// Selects the 90% auto-overlap ceiling when `overlap_fraction` is unset.
    pub high_overlap_tier: bool,
    pub trigger_enabled: bool,
    pub trigger_band_low_hz: f32,
    pub trigger_band_high_hz: f32,
    pub trigger_threshold_db: f32,
    pub max_page_seconds: f32,
    pub palette_size: usize,
}

impl Default for StoredSettings {
    fn default() -> Self {
        Self::from_config(&RenderSettings::default())
    }
}

impl StoredSettings {
    pub fn from_config(config: &RenderSettings) -> Self {
        let window_size = match config.window {
            WindowMode::Explicit(size) => Some(size),
            WindowMode::Auto => None,
        };
        let (overlap_fraction, high_overlap_tier) = match config.overlap {
            OverlapMode::Explicit(fraction) => (Some(fraction), false),
            OverlapMode::Auto => (None, false),
            OverlapMode::AutoHigh => (None, true),
        };
        Self {
            window_size,
            overlap_fraction,
            high_overlap_tier,
            trigger_enabled: config.trigger.enabled,
            trigger_band_low_hz: config.trigger.band_low_hz,
            trigger_band_high_hz: config.trigger.band_high_hz,
            trigger_threshold_db: config.trigger.threshold_db,
            max_page_seconds: config.max_page_seconds,
            palette_size: config.palette_size,
        }
    }

    pub fn apply_to(&self, config: &mut RenderSettings) {
        config.window = match self.window_size {
            Some(size) => {
                let size = size.clamp(MIN_WINDOW_SIZE, MAX_WINDOW_SIZE);
                WindowMode::Explicit(size - size % 2)
            }
            None => WindowMode::Auto,
        };
        config.overlap = match self.overlap_fraction {
            Some(fraction) => OverlapMode::Explicit(fraction.clamp(0.0, 1.0)),
            None if self.high_overlap_tier => OverlapMode::AutoHigh,
            None => OverlapMode::Auto,
        };
        let band_low = self.trigger_band_low_hz.max(0.0);
        config.trigger.enabled = self.trigger_enabled;
        config.trigger.band_low_hz = band_low;
        config.trigger.band_high_hz = self.trigger_band_high_hz.max(band_low);
        config.trigger.threshold_db = self.trigger_threshold_db.clamp(DB_SPAN_MIN, DB_SPAN_MAX);
        config.max_page_seconds = self.max_page_seconds.max(1.0);
        config.palette_size = self.palette_size.max(2);
    }
}

fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(dir).join("sonoscope")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config").join("sonoscope")
    } else {
        PathBuf::from(".sonoscope")
    }
}

#[derive(Debug)]
pub struct SettingsManager {
    path: PathBuf,
    data: StoredSettings,
}

impl SettingsManager {
    pub fn load_or_default() -> Self {
        Self::with_path(config_dir().join(SETTINGS_FILE_NAME))
    }

    pub fn with_path(path: PathBuf) -> Self {
        let data = Self::load_from_disk(&path).unwrap_or_default();
        Self { path, data }
    }

    fn load_from_disk(path: &Path) -> Option<StoredSettings> {
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(settings) => Some(settings),
            Err(err) => {
                warn!("[settings] failed to parse {path:?}: {err}");
                None
            }
        }
    }

    pub fn stored(&self) -> &StoredSettings {
        &self.data
    }

    /// Stored settings applied over the defaults.
    pub fn render_settings(&self) -> RenderSettings {
        let mut config = RenderSettings::default();
        self.data.apply_to(&mut config);
        config
    }

    pub fn update_render(&mut self, config: &RenderSettings) {
        self.data = StoredSettings::from_config(config);
    }

    pub fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.data)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)?;
        fs::rename(&tmp_path, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TriggerSettings;

    struct TempPath(PathBuf);

    impl TempPath {
        fn new(tag: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "sonoscope-settings-{tag}-{}.json",
                std::process::id()
            ));
            let _ = fs::remove_file(&path);
            Self(path)
        }
    }

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
            let _ = fs::remove_file(self.0.with_extension("json.tmp"));
        }
    }

    #[test]
    fn settings_survive_a_save_and_reload() {
        let temp = TempPath::new("roundtrip");
        let mut manager = SettingsManager::with_path(temp.0.clone());

        let config = RenderSettings {
            window: WindowMode::Explicit(2048),
            overlap: OverlapMode::Explicit(0.25),
            trigger: TriggerSettings {
                enabled: true,
                band_low_hz: 20_000.0,
                band_high_hz: 80_000.0,
                threshold_db: -30.0,
            },
            max_page_seconds: 12.0,
            palette_size: 512,
        };
        manager.update_render(&config);
        manager.save().expect("save settings");

        let reloaded = SettingsManager::with_path(temp.0.clone());
        assert_eq!(reloaded.render_settings(), config);
    }

    #[test]
    fn missing_or_corrupt_file_falls_back_to_defaults() {
        let temp = TempPath::new("fallback");
        let manager = SettingsManager::with_path(temp.0.clone());
        assert_eq!(manager.render_settings(), RenderSettings::default());

        fs::write(&temp.0, "{not json").expect("write corrupt file");
        let manager = SettingsManager::with_path(temp.0.clone());
        assert_eq!(manager.render_settings(), RenderSettings::default());
    }

    #[test]
    fn apply_clamps_out_of_range_values() {
        let stored = StoredSettings {
            window_size: Some(1_000_001),
            overlap_fraction: Some(1.5),
            palette_size: 1,
            max_page_seconds: 0.0,
            trigger_band_low_hz: -5.0,
            trigger_band_high_hz: -10.0,
            ..StoredSettings::default()
        };
        let mut config = RenderSettings::default();
        stored.apply_to(&mut config);

        assert_eq!(config.window, WindowMode::Explicit(MAX_WINDOW_SIZE));
        assert_eq!(config.overlap, OverlapMode::Explicit(1.0));
        assert_eq!(config.palette_size, 2);
        assert_eq!(config.max_page_seconds, 1.0);
        assert_eq!(config.trigger.band_low_hz, 0.0);
        assert_eq!(config.trigger.band_high_hz, 0.0);
    }

    #[test]
    fn auto_modes_round_trip_as_nulls() {
        let stored = StoredSettings::from_config(&RenderSettings::default());
        assert!(stored.window_size.is_none());
        assert!(stored.overlap_fraction.is_none());

        let json = serde_json::to_string(&stored).expect("serialize");
        let parsed: StoredSettings = serde_json::from_str(&json).expect("parse");
        let mut config = RenderSettings::default();
        parsed.apply_to(&mut config);
        assert_eq!(config.window, WindowMode::Auto);
        assert_eq!(config.overlap, OverlapMode::Auto);

        let high = StoredSettings {
            high_overlap_tier: true,
            ..StoredSettings::default()
        };
        let mut config = RenderSettings::default();
        high.apply_to(&mut config);
        assert_eq!(config.overlap, OverlapMode::AutoHigh);
    }
}

//! Coordinator configuration, read from JSON.
//!
//! ```json
//! {
//!   "asset_root": "assets",
//!   "music_volume": 0.8,
//!   "music_loop_mode": "all",
//!   "tick_interval_ms": 250,
//!   "transition": { "gap": { "millis": 300 } }
//! }
//! ```
//!
//! Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::LoopMode;

/// How the music stack moves between entries on replace and auto-advance.
///
/// The outgoing session is always released before the next one is armed,
/// so overlapping transitions are not offered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    #[default]
    HardCut,
    /// Pause the outgoing entry and hold silence before arming the next.
    Gap { millis: u64 },
}

impl TransitionPolicy {
    pub fn gap(&self) -> Option<Duration> {
        match self {
            TransitionPolicy::HardCut => None,
            TransitionPolicy::Gap { millis } => Some(Duration::from_millis(*millis)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaestroConfig {
    /// Directory bundled assets are resolved against.
    pub asset_root: PathBuf,
    pub music_volume: f32,
    pub voice_volume: f32,
    pub vfx_volume: f32,
    pub music_loop_mode: LoopMode,
    pub voice_loop_mode: LoopMode,
    /// Heartbeat period.
    pub tick_interval_ms: u64,
    pub transition: TransitionPolicy,
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("assets"),
            music_volume: 0.8,
            voice_volume: 1.0,
            vfx_volume: 1.0,
            music_loop_mode: LoopMode::All,
            voice_loop_mode: LoopMode::Off,
            tick_interval_ms: 250,
            transition: TransitionPolicy::HardCut,
        }
    }
}

impl MaestroConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Load `path`, falling back to defaults when it is missing or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "maestro: invalid config at {}, using defaults: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, volume) in [
            ("music_volume", self.music_volume),
            ("voice_volume", self.voice_volume),
            ("vfx_volume", self.vfx_volume),
        ] {
            if !(0.0..=1.0).contains(&volume) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, volume
                )));
            }
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_object_is_defaults() {
        assert_eq!(MaestroConfig::from_json_str("{}").unwrap(), MaestroConfig::default());
    }

    #[test]
    fn partial_config_overrides_fields() {
        let config = MaestroConfig::from_json_str(
            r#"{"music_loop_mode":"one","transition":{"gap":{"millis":300}},"vfx_volume":0.5}"#,
        )
        .unwrap();
        assert_eq!(config.music_loop_mode, LoopMode::One);
        assert_eq!(config.transition.gap(), Some(Duration::from_millis(300)));
        assert_eq!(config.vfx_volume, 0.5);
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
    }

    #[test]
    fn hardcut_serializes_as_plain_string() {
        let json = serde_json::to_value(TransitionPolicy::HardCut).unwrap();
        assert_eq!(json, serde_json::json!("hardcut"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(matches!(
            MaestroConfig::from_json_str(r#"{"music_volume":1.5}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            MaestroConfig::from_json_str(r#"{"tick_interval_ms":0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            MaestroConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_or_default_falls_back() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("maestro.json");
        assert_eq!(MaestroConfig::load_or_default(&path), MaestroConfig::default());

        std::fs::write(&path, r#"{"voice_loop_mode":"all"}"#).unwrap();
        assert_eq!(MaestroConfig::load_or_default(&path).voice_loop_mode, LoopMode::All);

        std::fs::write(&path, r#"{"voice_volume":-1}"#).unwrap();
        assert_eq!(MaestroConfig::load_or_default(&path), MaestroConfig::default());
    }
}

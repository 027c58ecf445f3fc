//! Configuration for the integration layer
//!
//! Provides centralized configuration for all components. Values come from
//! defaults, an optional TOML file, and the API base URL environment variable,
//! in that order.

use crate::dialogue::{DialogueConfig, DEFAULT_API_BASE_URL};
use crate::speech::{RecognitionConfig, SynthesisConfig};
use crate::vision::CaptureConstraints;
use crate::{AvatarError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the dialogue backend base URL
pub const API_BASE_URL_ENV: &str = "DIGITAL_HUMAN_API_BASE_URL";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub capture: CaptureConstraints,

    /// Frame loop tick
    pub frame_interval_ms: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConstraints::default(),
            frame_interval_ms: 33,
        }
    }
}

impl VisionConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Configuration for the complete application
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Dialogue backend, without a trailing path
    pub api_base_url: String,

    pub dialogue: DialogueConfig,

    pub synthesis: SynthesisConfig,

    pub recognition: RecognitionConfig,

    pub vision: VisionConfig,

    /// Directory holding the persisted session id
    pub session_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            dialogue: DialogueConfig::default(),
            synthesis: SynthesisConfig::default(),
            recognition: RecognitionConfig::default(),
            vision: VisionConfig::default(),
            session_dir: PathBuf::from(".digital-human"),
        }
    }
}

impl AppConfig {
    /// Defaults with the environment applied
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Load a TOML file, then apply the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config.apply_env())
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AvatarError::ConfigError(e.to_string()))
    }

    fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(API_BASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        self
    }

    /// Set the dialogue backend URL
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_dialogue(mut self, dialogue: DialogueConfig) -> Self {
        self.dialogue = dialogue;
        self
    }

    pub fn with_synthesis(mut self, synthesis: SynthesisConfig) -> Self {
        self.synthesis = synthesis;
        self
    }

    pub fn with_recognition(mut self, recognition: RecognitionConfig) -> Self {
        self.recognition = recognition;
        self
    }

    pub fn with_vision(mut self, vision: VisionConfig) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = dir.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = self.api_base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AvatarError::ConfigError(format!(
                "API base URL must be http(s): {}",
                url
            )));
        }
        if self.dialogue.timeout_ms == 0 || self.dialogue.health_timeout_ms == 0 {
            return Err(AvatarError::ConfigError(
                "dialogue timeouts must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.synthesis.volume) {
            return Err(AvatarError::ConfigError(format!(
                "synthesis volume out of range: {}",
                self.synthesis.volume
            )));
        }
        if self.synthesis.rate <= 0.0 {
            return Err(AvatarError::ConfigError(
                "synthesis rate must be positive".to_string(),
            ));
        }
        if self.recognition.max_listen_duration_ms == 0 {
            return Err(AvatarError::ConfigError(
                "max listen duration must be non-zero".to_string(),
            ));
        }
        let capture = &self.vision.capture;
        if capture.width == 0 || capture.height == 0 || capture.frame_rate == 0 {
            return Err(AvatarError::ConfigError(
                "capture constraints must be non-zero".to_string(),
            ));
        }
        if self.vision.frame_interval_ms == 0 {
            return Err(AvatarError::ConfigError(
                "frame interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.api_base_url, "http://localhost:8000");
        assert_eq!(config.dialogue.max_retries, 3);
        assert_eq!(config.dialogue.retry_delay_ms, 1000);
        assert_eq!(config.dialogue.timeout_ms, 15_000);
        assert_eq!(config.synthesis.lang, "zh-CN");
        assert_eq!(config.recognition.max_listen_duration(), Duration::from_secs(30));
        assert_eq!(config.vision.capture.width, 640);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = AppConfig::default()
            .with_api_base_url("https://avatar.example.com")
            .with_dialogue(DialogueConfig::default().with_max_retries(1))
            .with_session_dir("/tmp/dh");

        assert_eq!(config.api_base_url, "https://avatar.example.com");
        assert_eq!(config.dialogue.max_retries, 1);
        assert_eq!(config.session_dir, PathBuf::from("/tmp/dh"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            api_base_url = "http://backend:9000"

            [dialogue]
            max_retries = 5

            [synthesis]
            voice_name = "Tingting"
            "#,
        )
        .unwrap();
        assert_eq!(config.api_base_url, "http://backend:9000");
        assert_eq!(config.dialogue.max_retries, 5);
        assert_eq!(config.dialogue.timeout_ms, 15_000);
        assert_eq!(config.synthesis.voice_name.as_deref(), Some("Tingting"));
        assert_eq!(config.synthesis.volume, 0.8);
    }

    #[test]
    fn test_invalid_toml() {
        let err = AppConfig::from_toml("dialogue = 3").unwrap_err();
        assert!(matches!(err, AvatarError::ConfigError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[vision]\nframe_interval_ms = 50\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.vision.frame_interval(), Duration::from_millis(50));
        assert!(AppConfig::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(AppConfig::default()
            .with_api_base_url("localhost:8000")
            .validate()
            .is_err());

        let mut config = AppConfig::default();
        config.synthesis.volume = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.vision.frame_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}

//! Configuration management for CCPlayer
//!
//! This module handles loading and managing engine configuration from
//! defaults, the user config file and environment variables.

use crate::decoder::HardwareAcceleration;
use crate::player::{
    PlayerSettings, PrepareOptions, MAX_PLAYBACK_SPEED_FACTOR, MIN_AUDIO_BUFFER_SIZE,
    MIN_PLAYBACK_SPEED_FACTOR, MIN_VIDEO_BUFFER_SIZE,
};
use crate::utils::error::{CCPlayerError, IntoPlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stream buffer sizing
    pub buffer: BufferConfig,

    /// Initial playback settings
    pub playback: PlaybackConfig,

    /// Decoder configuration
    pub decoder: DecoderConfig,

    /// General settings
    pub general: GeneralConfig,
}

/// Stream buffer sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Audio frames decoded ahead of playback
    pub audio_buffer_size: usize,

    /// Video frames decoded ahead of playback
    pub video_buffer_size: usize,
}

/// Initial playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Initial volume (0.0 - 1.0)
    pub volume: f32,

    pub muted: bool,

    /// Speed factor (0.5 - 2.0)
    pub playback_speed: f64,
}

/// Decoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Acceleration methods to try, in order of preference
    pub hardware_acceleration: Vec<String>,

    /// Seek to the nearest keyframe only
    pub keyframes_only_seek: bool,
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            audio_buffer_size: MIN_AUDIO_BUFFER_SIZE,
            video_buffer_size: MIN_VIDEO_BUFFER_SIZE,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: 0.7,
            muted: false,
            playback_speed: 1.0,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            hardware_acceleration: Vec::new(),
            keyframes_only_seek: false,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

fn parse_override<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CCPlayerError::Config(format!("Invalid {}: {:?}", name, value)))
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. User config file (`<config dir>/ccplayer/core.toml`)
    /// 3. Environment variables (CCPLAYER_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = match Self::user_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).config_err("Failed to parse config file")
    }

    /// Save configuration to user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| CCPlayerError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(self).config_err("Failed to serialize config")?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Apply overrides looked up by variable name
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("CCPLAYER_AUDIO_BUFFER_SIZE") {
            self.buffer.audio_buffer_size = parse_override("CCPLAYER_AUDIO_BUFFER_SIZE", &value)?;
        }
        if let Some(value) = lookup("CCPLAYER_VIDEO_BUFFER_SIZE") {
            self.buffer.video_buffer_size = parse_override("CCPLAYER_VIDEO_BUFFER_SIZE", &value)?;
        }
        if let Some(value) = lookup("CCPLAYER_VOLUME") {
            self.playback.volume = parse_override("CCPLAYER_VOLUME", &value)?;
        }
        if let Some(value) = lookup("CCPLAYER_MUTED") {
            self.playback.muted = parse_override("CCPLAYER_MUTED", &value)?;
        }
        if let Some(value) = lookup("CCPLAYER_PLAYBACK_SPEED") {
            self.playback.playback_speed = parse_override("CCPLAYER_PLAYBACK_SPEED", &value)?;
        }
        if let Some(value) = lookup("CCPLAYER_HARDWARE_ACCELERATION") {
            self.decoder.hardware_acceleration = value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = lookup("CCPLAYER_KEYFRAMES_ONLY_SEEK") {
            self.decoder.keyframes_only_seek =
                parse_override("CCPLAYER_KEYFRAMES_ONLY_SEEK", &value)?;
        }
        if let Some(value) = lookup("CCPLAYER_LOG_LEVEL") {
            self.general.log_level = value;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.buffer.audio_buffer_size == 0 || self.buffer.video_buffer_size == 0 {
            return Err(CCPlayerError::Config(
                "Buffer sizes must be non-zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.playback.volume) {
            return Err(CCPlayerError::Config(
                "Volume must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(MIN_PLAYBACK_SPEED_FACTOR..=MAX_PLAYBACK_SPEED_FACTOR)
            .contains(&self.playback.playback_speed)
        {
            return Err(CCPlayerError::Config(format!(
                "Playback speed must be between {} and {}",
                MIN_PLAYBACK_SPEED_FACTOR, MAX_PLAYBACK_SPEED_FACTOR
            )));
        }

        self.hardware_acceleration()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(CCPlayerError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    /// Acceleration candidates parsed from their names
    pub fn hardware_acceleration(&self) -> Result<Vec<HardwareAcceleration>> {
        self.decoder
            .hardware_acceleration
            .iter()
            .map(|name| {
                name.parse::<HardwareAcceleration>()
                    .config_err("Invalid hardware acceleration")
            })
            .collect()
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            volume: self.playback.volume,
            is_muted: self.playback.muted,
            playback_speed_factor: self.playback.playback_speed,
        }
    }

    /// Prepare arguments for `location` with the configured sizes and decoder options
    pub fn prepare_options(&self, location: &str) -> Result<PrepareOptions> {
        Ok(PrepareOptions {
            location: location.to_string(),
            audio_buffer_size: self.buffer.audio_buffer_size,
            video_buffer_size: self.buffer.video_buffer_size,
            hardware_acceleration: self.hardware_acceleration()?,
            keyframes_only_seek: self.decoder.keyframes_only_seek,
        })
    }

    /// Get user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ccplayer").join("core.toml"))
    }
}

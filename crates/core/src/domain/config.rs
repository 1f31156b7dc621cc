//! Engine configuration
//!
//! Buffer geometry, control tick rate and capacity limits, stored as TOML.

use crate::domain::audio::{ChannelCount, SampleRate, StreamFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine-wide settings fixed at initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Output channel count
    pub channels: u16,

    /// Input channel count (0 = no input stream)
    pub input_channels: u16,

    /// Frames per buffer callback
    pub frames_per_buffer: u32,

    /// Control ticks per second
    pub tick_rate_hz: f32,

    /// Upper bound on DSP units registered at once
    pub max_dsp_units: usize,

    /// Slots in the control → mixer command queue
    pub command_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            input_channels: 1,
            frames_per_buffer: 256,
            tick_rate_hz: 50.0,
            max_dsp_units: 64,
            command_queue_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub const MAX_CHANNELS: u16 = 32;
    pub const MAX_FRAMES_PER_BUFFER: u32 = 8192;
    pub const MIN_TICK_RATE_HZ: f32 = 0.1;
    pub const MAX_TICK_RATE_HZ: f32 = 1000.0;

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.channels == 0 || self.channels > Self::MAX_CHANNELS {
            return Err(ConfigError::Invalid(format!(
                "channels must be in 1..={}, got {}",
                Self::MAX_CHANNELS,
                self.channels
            )));
        }
        if self.input_channels > Self::MAX_CHANNELS {
            return Err(ConfigError::Invalid(format!(
                "input_channels must be at most {}, got {}",
                Self::MAX_CHANNELS,
                self.input_channels
            )));
        }
        if self.frames_per_buffer == 0 || self.frames_per_buffer > Self::MAX_FRAMES_PER_BUFFER {
            return Err(ConfigError::Invalid(format!(
                "frames_per_buffer must be in 1..={}, got {}",
                Self::MAX_FRAMES_PER_BUFFER,
                self.frames_per_buffer
            )));
        }
        // NaN fails the range check too
        if !(Self::MIN_TICK_RATE_HZ..=Self::MAX_TICK_RATE_HZ).contains(&self.tick_rate_hz) {
            return Err(ConfigError::Invalid(format!(
                "tick_rate_hz must be in {}..={}, got {}",
                Self::MIN_TICK_RATE_HZ,
                Self::MAX_TICK_RATE_HZ,
                self.tick_rate_hz
            )));
        }
        if self.max_dsp_units == 0 {
            return Err(ConfigError::Invalid("max_dsp_units must be positive".into()));
        }
        // Every attach call can enqueue two commands
        if self.command_queue_capacity < 2 {
            return Err(ConfigError::Invalid(
                "command_queue_capacity must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// Geometry of output buffers
    pub fn output_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: SampleRate::from_hz(self.sample_rate),
            channels: ChannelCount::from_count(self.channels),
            frames_per_buffer: self.frames_per_buffer as usize,
        }
    }

    /// Geometry of input buffers, if an input stream is configured
    pub fn input_format(&self) -> Option<StreamFormat> {
        (self.input_channels > 0).then(|| StreamFormat {
            sample_rate: SampleRate::from_hz(self.sample_rate),
            channels: ChannelCount::from_count(self.input_channels),
            frames_per_buffer: self.frames_per_buffer as usize,
        })
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&contents)?;

        debug!(?config, "Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(path, self.to_toml_string()?).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }
}

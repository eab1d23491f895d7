// Capture configuration
//
// Recording parameters arrive as a loosely typed table (TOML file or host
// script). Each field carries a presence policy that is resolved once, after
// which the session works with a fully typed, validated `CaptureParams`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::recording::circular::BufferPlan;

/// Shortest bounded recording, in seconds
pub const MIN_DURATION_SECS: f64 = 5.0;

/// Error type for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    Missing(&'static str),

    #[error("Invalid width and/or height. Must be positive and divisible by two.")]
    InvalidDimensions,

    #[error("Too small duration, must be at least 5 seconds.")]
    DurationTooShort,

    #[error("Invalid parameter {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How a parameter behaves when absent
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPolicy<T> {
    Required,
    Optional,
    Default(T),
}

impl<T> FieldPolicy<T> {
    pub fn resolve(self, name: &'static str, value: Option<T>) -> Result<Option<T>, ConfigError> {
        match (value, self) {
            (Some(v), _) => Ok(Some(v)),
            (None, FieldPolicy::Required) => Err(ConfigError::Missing(name)),
            (None, FieldPolicy::Optional) => Ok(None),
            (None, FieldPolicy::Default(d)) => Ok(Some(d)),
        }
    }

    /// Resolve a policy that always yields a value (Required or Default).
    fn resolve_value(self, name: &'static str, value: Option<T>) -> Result<T, ConfigError> {
        self.resolve(name, value)?.ok_or(ConfigError::Missing(name))
    }
}

/// Parameters as supplied, before policies and validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCaptureParams {
    pub filename: Option<PathBuf>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub bitrate: Option<i64>,
    pub iframe: Option<i64>,
    pub fps: Option<i64>,
    pub duration: Option<f64>,
    pub x_scale: Option<f64>,
    pub y_scale: Option<f64>,
    /// Opaque handle of the render target texture to capture
    pub texture: Option<u64>,
    pub async_encoding: Option<bool>,
}

/// Validated recording parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureParams {
    pub filename: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Keyframe interval in seconds
    pub iframe: u32,
    pub fps: u32,
    /// Keep only the last `duration` seconds when set
    pub duration: Option<f64>,
    pub x_scale: f64,
    pub y_scale: f64,
    pub texture: u64,
    pub async_encoding: bool,
}

fn positive_u32(name: &'static str, value: i64) -> Result<u32, ConfigError> {
    if value <= 0 || value > u32::MAX as i64 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("must be a positive integer, got {}", value),
        });
    }
    Ok(value as u32)
}

impl CaptureParams {
    pub fn from_raw(raw: RawCaptureParams) -> Result<Self, ConfigError> {
        let filename = FieldPolicy::Required.resolve_value("filename", raw.filename)?;
        let width = FieldPolicy::Default(1280).resolve_value("width", raw.width)?;
        let height = FieldPolicy::Default(720).resolve_value("height", raw.height)?;
        let bitrate = FieldPolicy::Default(2 * 1024 * 1024).resolve_value("bitrate", raw.bitrate)?;
        let iframe = FieldPolicy::Default(1).resolve_value("iframe", raw.iframe)?;
        let fps = FieldPolicy::Default(30).resolve_value("fps", raw.fps)?;
        let duration = FieldPolicy::Optional.resolve("duration", raw.duration)?;
        let x_scale = FieldPolicy::Default(1.0).resolve_value("x_scale", raw.x_scale)?;
        let y_scale = FieldPolicy::Default(1.0).resolve_value("y_scale", raw.y_scale)?;
        let texture = FieldPolicy::Required.resolve_value("texture", raw.texture)?;
        let async_encoding = FieldPolicy::Default(false).resolve_value("async_encoding", raw.async_encoding)?;

        if filename.as_os_str().is_empty() {
            return Err(ConfigError::Missing("filename"));
        }
        if width <= 0 || height <= 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if let Some(d) = duration {
            if !(d >= MIN_DURATION_SECS) {
                return Err(ConfigError::DurationTooShort);
            }
        }
        for (name, scale) in [("x_scale", x_scale), ("y_scale", y_scale)] {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("must be a positive number, got {}", scale),
                });
            }
        }

        Ok(Self {
            filename,
            width: positive_u32("width", width)?,
            height: positive_u32("height", height)?,
            bitrate: positive_u32("bitrate", bitrate)?,
            iframe: positive_u32("iframe", iframe)?,
            fps: positive_u32("fps", fps)?,
            duration,
            x_scale,
            y_scale,
            texture,
            async_encoding,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawCaptureParams = toml::from_str(contents)?;
        Self::from_raw(raw)
    }

    /// Load and validate parameters from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let params = Self::from_toml_str(&contents)?;
        log::debug!("Loaded capture config from {:?}", path.as_ref());
        Ok(params)
    }

    pub fn is_bounded(&self) -> bool {
        self.duration.is_some()
    }

    /// Frames between forced keyframes
    pub fn keyframe_max_dist(&self) -> u32 {
        self.iframe.saturating_mul(self.fps)
    }

    /// Bytes in one I420 frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3 / 2
    }

    /// Circular buffer sizing for bounded sessions
    pub fn buffer_plan(&self) -> Option<BufferPlan> {
        self.duration
            .map(|d| BufferPlan::for_session(d, self.iframe, self.bitrate, self.fps))
    }
}

/// Default location of the capture config file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("screenrec")
        .join("capture.toml")
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CompositorError, Result, SurfaceSize};

/// Number of composited layer slots. Fixed for the lifetime of the process.
pub const LAYER_COUNT: usize = 4;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub preview: SurfaceSize,
    pub output: OutputConfig,
    pub audio: AudioConfig,
    pub presets: PresetConfig,
    pub video: VideoConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preview: SurfaceSize::new(200, 150),
            output: OutputConfig::default(),
            audio: AudioConfig::default(),
            presets: PresetConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.preview.is_empty() {
            return Err(CompositorError::invalid("preview surface must not be empty"));
        }
        if self.output.size().is_empty() {
            return Err(CompositorError::invalid("output surface must not be empty"));
        }
        if self.output.refresh_hz == 0 {
            return Err(CompositorError::invalid("refresh rate must be positive"));
        }
        if self.audio.sample_rate == 0 || self.audio.block_size < 2 {
            return Err(CompositorError::invalid(
                "audio needs a positive sample rate and blocks of at least two samples",
            ));
        }
        if !(self.audio.delay_seconds >= 0.0) {
            return Err(CompositorError::invalid("audio delay must not be negative"));
        }
        if !(self.presets.crossfade_seconds >= 0.0) {
            return Err(CompositorError::invalid("crossfade must not be negative"));
        }
        Ok(())
    }
}

/// External display defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
}

impl OutputConfig {
    pub fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.width, self.height)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            refresh_hz: 60,
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    /// Delay between the raw source and both the sinks and the audible path.
    pub delay_seconds: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
            delay_seconds: 0.26,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    /// Blend time used for every preset switch after the first load.
    pub crossfade_seconds: f32,
    /// Maximum number of characters of a preset name shown in a selector.
    pub label_limit: usize,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            crossfade_seconds: 2.0,
            label_limit: 60,
        }
    }
}

/// Bounds applied when decoding video into memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub max_width: u32,
    pub max_frames: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_width: 320,
            max_frames: 150,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = AppConfig::from_json_str(r#"{ "output": { "width": 1920, "height": 1080 } }"#)
            .unwrap();

        assert_eq!(config.output.size(), SurfaceSize::new(1920, 1080));
        assert_eq!(config.output.refresh_hz, 60);
        assert_eq!(config.preview, SurfaceSize::new(200, 150));
        assert!((config.audio.delay_seconds - 0.26).abs() < f32::EPSILON);
        assert!((config.presets.crossfade_seconds - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_degenerate_values() {
        let err = AppConfig::from_json_str(r#"{ "preview": { "width": 0, "height": 10 } }"#)
            .unwrap_err();
        assert!(format!("{err}").contains("preview"));

        let err = AppConfig::from_json_str(r#"{ "presets": { "crossfade_seconds": -1.0 } }"#)
            .unwrap_err();
        assert!(format!("{err}").contains("crossfade"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "audio": {{ "delay_seconds": 0.5 }} }}"#).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        approx::assert_relative_eq!(config.audio.delay_seconds, 0.5);
        assert_eq!(config.audio.sample_rate, 48_000);
    }
}

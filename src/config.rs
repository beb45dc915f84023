use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    compositor::{CanvasSize, MIN_CROP_SPAN},
    error::{ConfigError, Result},
    export::{BatchSettings, ExportPreset, ExportSettings},
    video::MAX_PREVIEW_FRAMES,
};

/// Main configuration for gifsmith
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preview canvas and sampling settings
    pub preview: PreviewConfig,

    /// Default export settings
    pub export: ExportSettings,

    /// Batch fast-path settings
    pub batch: BatchSettings,

    /// Worker pool settings
    pub processing: ProcessingConfig,

    /// Extra font locations
    pub fonts: FontConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            value: e.to_string(),
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.preview.validate()?;
        self.export
            .check_parameters()
            .map_err(|e| invalid("export", e.to_string()))?;
        validate_batch(&self.batch)?;
        self.processing.validate()?;
        Ok(())
    }

    /// Overwrite the export defaults with a named preset
    pub fn apply_preset(&mut self, name: &str) -> Result<ExportPreset> {
        let preset: ExportPreset = name.parse()?;
        self.export.apply_preset(preset);
        Ok(preset)
    }
}

fn invalid<K: Into<String>, V: ToString>(key: K, value: V) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        value: value.to_string(),
    }
}

/// Preview configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Canvas the crop region is drawn on
    pub canvas_width: u32,
    pub canvas_height: u32,

    /// Upper bound on frames sampled for scrubbing
    pub max_frames: usize,

    /// Text size in the preview relative to the export
    pub text_scale: f64,

    /// Smallest crop drag, in canvas pixels, that creates a region
    pub min_crop_span: f64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        let canvas = CanvasSize::default();
        Self {
            canvas_width: canvas.width,
            canvas_height: canvas.height,
            max_frames: MAX_PREVIEW_FRAMES,
            text_scale: 0.5,
            min_crop_span: MIN_CROP_SPAN,
        }
    }
}

impl PreviewConfig {
    pub fn canvas(&self) -> CanvasSize {
        CanvasSize::new(self.canvas_width, self.canvas_height)
    }

    fn validate(&self) -> Result<()> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(invalid(
                "preview.canvas",
                format!("{}x{}", self.canvas_width, self.canvas_height),
            )
            .into());
        }

        if self.max_frames == 0 {
            return Err(invalid("preview.max_frames", self.max_frames).into());
        }

        if !(self.text_scale > 0.0 && self.text_scale <= 1.0) {
            return Err(invalid("preview.text_scale", self.text_scale).into());
        }

        if self.min_crop_span < 0.0 {
            return Err(invalid("preview.min_crop_span", self.min_crop_span).into());
        }

        Ok(())
    }
}

fn validate_batch(batch: &BatchSettings) -> Result<()> {
    if batch.stride == 0 {
        return Err(invalid("batch.stride", batch.stride).into());
    }

    if !(batch.scale.is_finite() && batch.scale > 0.0) {
        return Err(invalid("batch.scale", batch.scale).into());
    }

    if batch.frame_delay_ms == 0 {
        return Err(invalid("batch.frame_delay_ms", batch.frame_delay_ms).into());
    }

    Ok(())
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Threads for pixel-parallel work
    pub threads: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
        }
    }
}

impl ProcessingConfig {
    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(invalid("processing.threads", self.threads).into());
        }
        Ok(())
    }
}

/// Font configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// Searched in addition to the system fonts
    pub directory: Option<PathBuf>,
}

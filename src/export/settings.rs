use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::encode::OutputFormat;
use crate::error::{ConfigError, SettingsError};
use crate::quantize::DitherMode;
use crate::video::types::VideoInfo;

pub const MIN_COLORS: u16 = 32;
pub const MAX_COLORS: u16 = 256;

/// Half-open range of source frame indices, `start..end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: usize,
    pub end: usize,
}

impl FrameRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The whole video
    pub fn full(total_frames: usize) -> Self {
        Self::new(0, total_frames)
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pull the range inside `0..total`, keeping it at least one frame long
    ///
    /// Mirrors timeline slider behavior: when the start passes the end, the
    /// end follows it to `start + 1`. A video without frames clamps to the
    /// empty range `0..0`.
    pub fn clamp_to(self, total_frames: usize) -> Self {
        if total_frames == 0 {
            return Self::new(0, 0);
        }
        let last = total_frames.saturating_sub(1);
        let start = self.start.min(last);
        let mut end = self.end.min(total_frames);
        if start >= end {
            end = start + 1;
        }
        Self::new(start, end)
    }

    /// Length of the selection in seconds at `fps`
    pub fn selection_seconds(&self, fps: f64) -> f64 {
        if fps > 0.0 {
            self.len() as f64 / fps
        } else {
            0.0
        }
    }

    /// Number of frames kept when every `skip`-th frame is extracted
    pub fn strided_len(&self, skip: u32) -> usize {
        self.len().div_ceil(skip.max(1) as usize)
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Parameters of one export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub frame_rate: u32,
    /// Resize factor applied after cropping
    pub scale: f64,
    /// Palette size per frame, 256 keeps full color
    pub color_count: u16,
    pub optimize: bool,
    pub reverse: bool,
    pub format: OutputFormat,
    pub dither: DitherMode,
    /// Keep every `frame_skip`-th frame of the range
    pub frame_skip: u32,
    /// `None` exports the whole video
    pub frame_range: Option<FrameRange>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            frame_rate: 15,
            scale: 0.5,
            color_count: 256,
            optimize: true,
            reverse: false,
            format: OutputFormat::Gif,
            dither: DitherMode::FloydSteinberg,
            frame_skip: 1,
            frame_range: None,
        }
    }
}

impl ExportSettings {
    /// Check the parameters that do not depend on a particular video
    pub fn check_parameters(&self) -> std::result::Result<(), SettingsError> {
        if self.frame_rate == 0 {
            return Err(SettingsError::FrameRate {
                value: self.frame_rate as i64,
            });
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(SettingsError::Scale { value: self.scale });
        }
        if !(MIN_COLORS..=MAX_COLORS).contains(&self.color_count) {
            return Err(SettingsError::ColorCount {
                value: self.color_count as i64,
            });
        }
        if self.frame_skip == 0 {
            return Err(SettingsError::FrameSkip {
                value: self.frame_skip as i64,
            });
        }
        Ok(())
    }

    /// Check every parameter against a video, returning the resolved range
    pub fn validate(&self, info: &VideoInfo) -> std::result::Result<FrameRange, SettingsError> {
        self.check_parameters()?;

        let range = self.frame_range.unwrap_or(FrameRange::full(info.total_frames));
        if range.start >= range.end || range.end > info.total_frames {
            return Err(SettingsError::FrameRange {
                start: range.start,
                end: range.end,
                total: info.total_frames,
            });
        }

        Ok(range)
    }

    /// Overwrite frame rate, scale, color count and optimize with a preset
    pub fn apply_preset(&mut self, preset: ExportPreset) {
        let values = preset.values();
        self.frame_rate = values.frame_rate;
        self.scale = values.scale;
        self.color_count = values.color_count;
        self.optimize = values.optimize;
    }

    pub fn with_preset(mut self, preset: ExportPreset) -> Self {
        self.apply_preset(preset);
        self
    }
}

/// Rough output size in bytes for `settings` over `range`
///
/// Scaled pixels per frame, weighted by palette size, times the number of
/// kept frames; optimization is assumed to save 30%.
pub fn estimate_output_bytes(info: &VideoInfo, settings: &ExportSettings, range: FrameRange) -> u64 {
    let width = (info.width as f64 * settings.scale) as u64;
    let height = (info.height as f64 * settings.scale) as u64;
    let frames = (range.len() / settings.frame_skip.max(1) as usize) as f64;

    let mut bytes = (width * height) as f64 * (settings.color_count as f64 / 256.0) * frames;
    if settings.optimize {
        bytes *= 0.7;
    }
    bytes as u64
}

/// `<stem>_output.<ext>` next to nothing in particular; callers pick the directory
pub fn default_output_name<P: AsRef<Path>>(video: P, format: OutputFormat) -> PathBuf {
    let stem = video
        .as_ref()
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    PathBuf::from(format!("{}_output.{}", stem, format.extension()))
}

/// The subset of settings a preset controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetValues {
    pub frame_rate: u32,
    pub scale: f64,
    pub color_count: u16,
    pub optimize: bool,
}

/// Named starting points for common destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportPreset {
    Twitter,
    Instagram,
    Discord,
    HighQuality,
    SmallFile,
}

impl ExportPreset {
    pub const ALL: [ExportPreset; 5] = [
        Self::Twitter,
        Self::Instagram,
        Self::Discord,
        Self::HighQuality,
        Self::SmallFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Twitter => "Twitter",
            Self::Instagram => "Instagram",
            Self::Discord => "Discord",
            Self::HighQuality => "High Quality",
            Self::SmallFile => "Small File",
        }
    }

    pub fn values(self) -> PresetValues {
        let (frame_rate, scale, color_count, optimize) = match self {
            Self::Twitter => (15, 0.5, 256, true),
            Self::Instagram => (30, 0.7, 256, true),
            Self::Discord => (20, 0.6, 128, true),
            Self::HighQuality => (30, 1.0, 256, false),
            Self::SmallFile => (10, 0.3, 64, true),
        };
        PresetValues {
            frame_rate,
            scale,
            color_count,
            optimize,
        }
    }
}

impl FromStr for ExportPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Self::ALL
            .into_iter()
            .find(|preset| preset.name().replace(' ', "").to_ascii_lowercase() == wanted)
            .ok_or_else(|| ConfigError::UnknownPreset { name: s.to_string() })
    }
}

impl fmt::Display for ExportPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

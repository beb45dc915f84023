//! # Animated Image Encoder
//!
//! Serializes an ordered frame sequence into GIF, animated WebP or APNG with
//! one uniform frame delay and loop metadata.

mod apng;
mod gif;
mod webp;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EncodeError, Result};
use crate::quantize::DitherMode;
use crate::video::types::Frame;

/// Target container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Gif,
    WebP,
    Apng,
}

impl OutputFormat {
    /// Pick the format implied by a path: `.gif`, `.webp`, anything else is APNG
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match ext.as_deref() {
            Some("gif") => Self::Gif,
            Some("webp") => Self::WebP,
            _ => Self::Apng,
        }
    }

    /// File extension written for this format
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::WebP => "webp",
            Self::Apng => "png",
        }
    }

    /// The delay a player will actually use for a requested `delay_ms`
    ///
    /// GIF counts in centiseconds, so its delays drop to a multiple of 10.
    pub fn stored_delay_ms(self, delay_ms: u32) -> u32 {
        match self {
            Self::Gif => delay_ms / 10 * 10,
            Self::WebP | Self::Apng => delay_ms,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gif => "GIF",
            Self::WebP => "WebP",
            Self::Apng => "APNG",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gif" => Ok(Self::Gif),
            "webp" => Ok(Self::WebP),
            "apng" | "png" => Ok(Self::Apng),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoder knobs for one animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub format: OutputFormat,
    /// Display time of every frame
    pub frame_delay_ms: u32,
    /// Number of plays, 0 loops forever
    pub loop_count: u16,
    /// GIF only: store only the changed rectangle of each frame
    pub optimize: bool,
    /// GIF only: dithering used when a frame still exceeds the GIF palette
    pub dither: DitherMode,
}

impl EncodeOptions {
    pub fn new(format: OutputFormat, frame_rate: u32) -> Self {
        Self {
            format,
            frame_delay_ms: frame_delay_ms(frame_rate),
            loop_count: 0,
            optimize: true,
            dither: DitherMode::FloydSteinberg,
        }
    }

    pub fn with_delay_ms(mut self, frame_delay_ms: u32) -> Self {
        self.frame_delay_ms = frame_delay_ms;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_dither(mut self, dither: DitherMode) -> Self {
        self.dither = dither;
        self
    }
}

/// Per-frame delay for a frame rate, `1000 / fps` rounded down
pub fn frame_delay_ms(frame_rate: u32) -> u32 {
    1000 / frame_rate.max(1)
}

/// An encoded animation held in memory
#[derive(Debug, Clone)]
pub struct EncodedAnimation {
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
    pub frame_count: usize,
    /// Delay as stored in the container
    pub frame_delay_ms: u32,
    pub width: u32,
    pub height: u32,
}

impl EncodedAnimation {
    /// Playback time of one loop
    pub fn nominal_duration_ms(&self) -> u64 {
        self.frame_count as u64 * self.frame_delay_ms as u64
    }
}

/// Encodes frame sequences into animated containers
#[derive(Debug, Clone, Copy, Default)]
pub struct AnimatedImageEncoder;

impl AnimatedImageEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode `frames` in order; all frames must share the first frame's size
    pub fn encode(&self, frames: &[Frame], options: &EncodeOptions) -> Result<EncodedAnimation> {
        let first = frames.first().ok_or(EncodeError::EmptySequence)?;
        let (width, height) = first.dimensions();

        for (index, frame) in frames.iter().enumerate() {
            let (actual_width, actual_height) = frame.dimensions();
            if (actual_width, actual_height) != (width, height) {
                return Err(EncodeError::MismatchedDimensions {
                    index,
                    width,
                    height,
                    actual_width,
                    actual_height,
                }
                .into());
            }
        }

        let bytes = match options.format {
            OutputFormat::Gif => self::gif::encode(frames, options)?,
            OutputFormat::WebP => self::webp::encode(frames, options)?,
            OutputFormat::Apng => self::apng::encode(frames, options)?,
        };

        info!(
            "Encoded {} {}x{} frames as {} ({} bytes)",
            frames.len(),
            width,
            height,
            options.format,
            bytes.len()
        );

        Ok(EncodedAnimation {
            format: options.format,
            bytes,
            frame_count: frames.len(),
            frame_delay_ms: options.format.stored_delay_ms(options.frame_delay_ms),
            width,
            height,
        })
    }
}

pub(crate) fn codec_error(format: OutputFormat, reason: impl ToString) -> EncodeError {
    EncodeError::Codec {
        format: format.name(),
        reason: reason.to_string(),
    }
}

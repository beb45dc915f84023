//! # Filter Pipeline Module
//!
//! Ordered, stateless per-frame pixel transforms: geometry first, then the
//! color enhancements, then the monochrome looks.

pub mod enhance;

use std::fmt;

use image::imageops;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::video::types::Frame;

/// Clockwise rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = String;

    fn try_from(degrees: u32) -> std::result::Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Self::None),
            90 => Ok(Self::Cw90),
            180 => Ok(Self::Cw180),
            270 => Ok(Self::Cw270),
            other => Err(format!("rotation must be 0, 90, 180 or 270 degrees, got {}", other)),
        }
    }
}

impl From<Rotation> for u32 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Per-job (or per-preview-tick) filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// 1.0 leaves brightness unchanged, 0.0 is black
    pub brightness: f32,
    /// 1.0 leaves contrast unchanged, 0.0 is flat gray
    pub contrast: f32,
    /// 1.0 leaves saturation unchanged, 0.0 is grayscale
    pub saturation: f32,
    pub grayscale: bool,
    /// Drawn after grayscale and overrides it when both are set
    pub sepia: bool,
    pub rotation: Rotation,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            grayscale: false,
            sepia: false,
            rotation: Rotation::None,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

impl FilterSettings {
    /// True when applying these settings cannot change a frame
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// Applies `FilterSettings` to frames in a fixed stage order:
/// rotate, flip horizontal, flip vertical, brightness, contrast, saturation,
/// grayscale, sepia.
///
/// With the fast path on (the default) stages whose parameter is at its
/// identity value are skipped. Output is bit-identical either way.
#[derive(Debug, Clone, Copy)]
pub struct FilterPipeline {
    fast_path: bool,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self { fast_path: true }
    }

    /// A pipeline that runs every stage, identity or not
    pub fn exhaustive() -> Self {
        Self { fast_path: false }
    }

    pub fn apply(&self, frame: Frame, settings: &FilterSettings) -> Frame {
        if self.fast_path && settings.is_identity() {
            return frame;
        }

        let source_index = frame.source_index();
        let mut image = frame.into_image();

        image = match settings.rotation {
            Rotation::None => image,
            Rotation::Cw90 => imageops::rotate90(&image),
            Rotation::Cw180 => imageops::rotate180(&image),
            Rotation::Cw270 => imageops::rotate270(&image),
        };

        if settings.flip_horizontal {
            imageops::flip_horizontal_in_place(&mut image);
        }
        if settings.flip_vertical {
            imageops::flip_vertical_in_place(&mut image);
        }

        if self.runs(settings.brightness != 1.0) {
            enhance::brightness(&mut image, settings.brightness);
        }
        if self.runs(settings.contrast != 1.0) {
            enhance::contrast(&mut image, settings.contrast);
        }
        if self.runs(settings.saturation != 1.0) {
            enhance::saturation(&mut image, settings.saturation);
        }

        if settings.grayscale {
            enhance::grayscale(&mut image);
        }
        if settings.sepia {
            enhance::sepia(&mut image);
        }

        trace!("Filtered frame {} ({}x{})", source_index, image.width(), image.height());
        Frame::new(image, source_index)
    }

    #[inline]
    fn runs(&self, changes_pixels: bool) -> bool {
        !self.fast_path || changes_pixels
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

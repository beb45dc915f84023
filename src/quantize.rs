//! # Palette Quantizer
//!
//! Reduces a frame to an adaptive palette and expands it straight back to RGB,
//! so the encoder sees at most `color_count` distinct colors per frame.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use color_quant::NeuQuant;
use image::imageops::{self, ColorMap};
use image::{Rgb, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::video::types::Frame;

/// Color counts at or above this keep full color
pub const FULL_COLOR: u16 = 256;

/// NeuQuant sampling factor, 1 is slowest and best, 30 fastest
const SAMPLE_FACTOR: i32 = 10;

/// How colors are mapped onto the reduced palette
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DitherMode {
    /// Nearest palette color
    None,
    /// Floyd-Steinberg error diffusion
    #[default]
    FloydSteinberg,
}

impl FromStr for DitherMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "none" | "nearest" => Ok(Self::None),
            "floydsteinberg" | "fs" => Ok(Self::FloydSteinberg),
            other => Err(format!("unknown dither mode '{}'", other)),
        }
    }
}

impl fmt::Display for DitherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::FloydSteinberg => f.write_str("floyd-steinberg"),
        }
    }
}

/// An adaptive palette learned from one frame
struct AdaptivePalette {
    quant: NeuQuant,
}

impl AdaptivePalette {
    fn learn(image: &RgbImage, colors: usize) -> Self {
        let rgba: Vec<u8> = image
            .pixels()
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect();
        Self {
            quant: NeuQuant::new(SAMPLE_FACTOR, colors, &rgba),
        }
    }
}

impl ColorMap for AdaptivePalette {
    type Color = Rgb<u8>;

    #[inline]
    fn index_of(&self, color: &Rgb<u8>) -> usize {
        self.quant.index_of(&[color[0], color[1], color[2], 255])
    }

    #[inline]
    fn lookup(&self, index: usize) -> Option<Rgb<u8>> {
        self.quant.lookup(index).map(|[r, g, b, _]| Rgb([r, g, b]))
    }

    fn has_lookup(&self) -> bool {
        true
    }

    #[inline]
    fn map_color(&self, color: &mut Rgb<u8>) {
        if let Some(mapped) = self.lookup(self.index_of(color)) {
            *color = mapped;
        }
    }
}

/// Reduces frames to at most `color_count` colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteQuantizer {
    color_count: u16,
    dither: DitherMode,
}

impl PaletteQuantizer {
    pub fn new(color_count: u16, dither: DitherMode) -> Self {
        Self {
            color_count: color_count.clamp(2, FULL_COLOR),
            dither,
        }
    }

    pub fn color_count(&self) -> u16 {
        self.color_count
    }

    /// True when `quantize` hands frames back untouched
    pub fn is_noop(&self) -> bool {
        self.color_count >= FULL_COLOR
    }

    pub fn quantize(&self, frame: Frame) -> Frame {
        if self.is_noop() {
            return frame;
        }

        let index = frame.source_index();
        let image = reduce_colors(frame.into_image(), self.color_count as usize, self.dither);
        Frame::new(image, index)
    }
}

/// Map `image` onto an adaptive palette of at most `limit` colors
///
/// Images that already fit are returned untouched.
pub(crate) fn reduce_colors(mut image: RgbImage, limit: usize, dither: DitherMode) -> RgbImage {
    if fits_palette(&image, limit) {
        trace!("Image already has at most {} colors", limit);
        return image;
    }

    let palette = AdaptivePalette::learn(&image, limit);
    match dither {
        DitherMode::FloydSteinberg => imageops::dither(&mut image, &palette),
        DitherMode::None => {
            image.par_chunks_mut(3).for_each(|pixel| {
                let mut color = Rgb([pixel[0], pixel[1], pixel[2]]);
                palette.map_color(&mut color);
                pixel.copy_from_slice(&color.0);
            });
        }
    }
    image
}

/// Whether `image` uses no more than `limit` distinct colors
fn fits_palette(image: &RgbImage, limit: usize) -> bool {
    let mut seen = HashSet::with_capacity(limit + 1);
    for pixel in image.pixels() {
        seen.insert(pixel.0);
        if seen.len() > limit {
            return false;
        }
    }
    true
}

/// Number of distinct colors in a frame
pub fn distinct_colors(frame: &Frame) -> usize {
    frame.as_image().pixels().map(|p| p.0).collect::<HashSet<_>>().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn noise(width: u32, height: u32, seed: u64) -> Frame {
        let mut rng = SmallRng::seed_from_u64(seed);
        let image = RgbImage::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
        Frame::new(image, 5)
    }

    #[test]
    fn test_full_color_is_a_noop() {
        let frame = noise(48, 32, 1);
        for dither in [DitherMode::None, DitherMode::FloydSteinberg] {
            let quantizer = PaletteQuantizer::new(256, dither);
            assert!(quantizer.is_noop());
            assert_eq!(quantizer.quantize(frame.clone()), frame);
        }
    }

    #[test]
    fn test_color_count_is_an_upper_bound() {
        let frame = noise(64, 64, 2);
        assert!(distinct_colors(&frame) > 256);

        for count in [32u16, 64, 128, 255] {
            for dither in [DitherMode::None, DitherMode::FloydSteinberg] {
                let out = PaletteQuantizer::new(count, dither).quantize(frame.clone());
                assert!(distinct_colors(&out) <= count as usize, "{} colors, {}", count, dither);
                assert_eq!(out.dimensions(), frame.dimensions());
                assert_eq!(out.source_index(), 5);
            }
        }
    }

    #[test]
    fn test_small_palettes_pass_through() {
        let image = RgbImage::from_fn(20, 20, |x, y| Rgb([(x % 4) as u8 * 60, (y % 4) as u8 * 60, 0]));
        let frame = Frame::new(image, 0);
        let out = PaletteQuantizer::new(32, DitherMode::FloydSteinberg).quantize(frame.clone());
        assert_eq!(out, frame);
    }

    #[test]
    fn test_dither_mode_parsing() {
        assert_eq!("FLOYDSTEINBERG".parse::<DitherMode>().unwrap(), DitherMode::FloydSteinberg);
        assert_eq!("floyd-steinberg".parse::<DitherMode>().unwrap(), DitherMode::FloydSteinberg);
        assert_eq!("none".parse::<DitherMode>().unwrap(), DitherMode::None);
        assert!("ordered".parse::<DitherMode>().is_err());
    }
}

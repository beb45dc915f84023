use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::font::GlyphMask;
use crate::error::{Result, SettingsError};

pub const MIN_FONT_SIZE: u32 = 10;
pub const MAX_FONT_SIZE: u32 = 200;
pub const DEFAULT_FONT_SIZE: u32 = 30;

/// Distance from the frame edges for anchored text, in pixels
const MARGIN: i64 = 10;

/// Where a text overlay is anchored on the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextPosition {
    Top,
    Center,
    #[default]
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl TextPosition {
    pub const ALL: [TextPosition; 7] = [
        Self::Top,
        Self::Center,
        Self::Bottom,
        Self::TopLeft,
        Self::TopRight,
        Self::BottomLeft,
        Self::BottomRight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Center => "center",
            Self::Bottom => "bottom",
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
        }
    }

    /// Top-left corner for a `text_w`x`text_h` run on a `width`x`height` frame
    ///
    /// Text larger than the frame gets a negative offset and is clipped
    /// rather than shifted.
    pub fn anchor(self, width: u32, height: u32, text_w: u32, text_h: u32) -> (i64, i64) {
        let (w, h) = (width as i64, height as i64);
        let (tw, th) = (text_w as i64, text_h as i64);
        let centered_x = w / 2 - tw / 2;

        match self {
            Self::Top => (centered_x, MARGIN),
            Self::Center => (centered_x, h / 2 - th / 2),
            Self::Bottom => (centered_x, h - th - MARGIN),
            Self::TopLeft => (MARGIN, MARGIN),
            Self::TopRight => (w - tw - MARGIN, MARGIN),
            Self::BottomLeft => (MARGIN, h - th - MARGIN),
            Self::BottomRight => (w - tw - MARGIN, h - th - MARGIN),
        }
    }
}

/// Parses position names; anything unrecognized means `Bottom`
impl FromStr for TextPosition {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Ok(Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .unwrap_or_default())
    }
}

impl fmt::Display for TextPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RGB color written as `#RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TextColor(pub [u8; 3]);

impl TextColor {
    pub const WHITE: TextColor = TextColor([255, 255, 255]);
    pub const BLACK: TextColor = TextColor([0, 0, 0]);
}

impl Default for TextColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl FromStr for TextColor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("'{}' is not a #RRGGBB color", s));
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
        Ok(Self([channel(0)?, channel(2)?, channel(4)?]))
    }
}

impl TryFrom<String> for TextColor {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TextColor> for String {
    fn from(color: TextColor) -> Self {
        color.to_string()
    }
}

impl fmt::Display for TextColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
    }
}

/// A caption drawn on every exported frame
///
/// Overlays are never edited in place; the session replaces or removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOverlay {
    text: String,
    font_size: u32,
    #[serde(default)]
    position: TextPosition,
    #[serde(default)]
    color: TextColor,
}

impl TextOverlay {
    /// Create an overlay, clamping the font size into its supported range
    pub fn new<S: Into<String>>(
        text: S,
        font_size: u32,
        position: TextPosition,
        color: TextColor,
    ) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SettingsError::EmptyOverlayText.into());
        }

        Ok(Self {
            text,
            font_size: font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE),
            position,
            color,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn font_size(&self) -> u32 {
        self.font_size
    }

    pub fn position(&self) -> TextPosition {
        self.position
    }

    pub fn color(&self) -> TextColor {
        self.color
    }
}

/// Blend `color` into `image` through `mask` placed at (`x`, `y`)
pub(crate) fn blend_mask(image: &mut RgbImage, mask: &GlyphMask, x: i64, y: i64, color: [u8; 3]) {
    let (width, height) = (image.width() as i64, image.height() as i64);

    for my in 0..mask.height() {
        let py = y + my as i64;
        if py < 0 || py >= height {
            continue;
        }
        for mx in 0..mask.width() {
            let px = x + mx as i64;
            if px < 0 || px >= width {
                continue;
            }

            let alpha = mask.coverage(mx, my) as u32;
            if alpha == 0 {
                continue;
            }

            let pixel = image.get_pixel_mut(px as u32, py as u32);
            for (channel, &target) in pixel.0.iter_mut().zip(color.iter()) {
                let mixed = (target as u32 * alpha + *channel as u32 * (255 - alpha) + 127) / 255;
                *channel = mixed as u8;
            }
        }
    }
}

/// Draw a text run with a one pixel black outline beneath the fill
pub(crate) fn draw_outlined(image: &mut RgbImage, mask: &GlyphMask, position: TextPosition, color: TextColor) {
    let (x, y) = position.anchor(image.width(), image.height(), mask.width(), mask.height());

    for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
        blend_mask(image, mask, x + dx, y + dy, TextColor::BLACK.0);
    }
    blend_mask(image, mask, x, y, color.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::font::TextRenderer;
    use image::Rgb;

    #[test]
    fn test_anchor_table() {
        let (w, h, tw, th) = (320, 240, 100, 30);
        assert_eq!(TextPosition::Top.anchor(w, h, tw, th), (110, 10));
        assert_eq!(TextPosition::Center.anchor(w, h, tw, th), (110, 105));
        assert_eq!(TextPosition::Bottom.anchor(w, h, tw, th), (110, 200));
        assert_eq!(TextPosition::TopLeft.anchor(w, h, tw, th), (10, 10));
        assert_eq!(TextPosition::TopRight.anchor(w, h, tw, th), (210, 10));
        assert_eq!(TextPosition::BottomLeft.anchor(w, h, tw, th), (10, 200));
        assert_eq!(TextPosition::BottomRight.anchor(w, h, tw, th), (210, 200));
    }

    #[test]
    fn test_wide_text_goes_negative() {
        assert_eq!(TextPosition::Top.anchor(50, 50, 101, 10), (-25, 10));
        assert_eq!(TextPosition::BottomRight.anchor(50, 50, 101, 60), (-61, -20));
    }

    #[test]
    fn test_unknown_position_is_bottom() {
        assert_eq!("top-left".parse::<TextPosition>().unwrap(), TextPosition::TopLeft);
        assert_eq!("BOTTOM_RIGHT".parse::<TextPosition>().unwrap(), TextPosition::BottomRight);
        assert_eq!("sideways".parse::<TextPosition>().unwrap(), TextPosition::Bottom);
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!("#ff8000".parse::<TextColor>().unwrap(), TextColor([255, 128, 0]));
        assert_eq!(TextColor([1, 2, 255]).to_string(), "#0102FF");
        assert!("#12345".parse::<TextColor>().is_err());
        assert!("zzzzzz".parse::<TextColor>().is_err());
    }

    #[test]
    fn test_overlay_validation() {
        assert!(TextOverlay::new("   ", 30, TextPosition::Top, TextColor::WHITE).is_err());

        let small = TextOverlay::new("hi", 2, TextPosition::Top, TextColor::WHITE).unwrap();
        assert_eq!(small.font_size(), MIN_FONT_SIZE);
        let large = TextOverlay::new("hi", 900, TextPosition::Top, TextColor::WHITE).unwrap();
        assert_eq!(large.font_size(), MAX_FONT_SIZE);
    }

    #[test]
    fn test_outline_surrounds_fill() {
        let mut image = RgbImage::from_pixel(60, 40, Rgb([128, 128, 128]));
        let (mask, _) = TextRenderer::builtin().rasterize("I", 8);
        draw_outlined(&mut image, &mask, TextPosition::TopLeft, TextColor([255, 0, 0]));

        // stem of the I sits at column 12 from row 11, the top bar spans 11..=13 on row 10
        assert_eq!(image.get_pixel(12, 13).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(11, 13).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(13, 13).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(40, 30).0, [128, 128, 128]);
    }

    #[test]
    fn test_blend_mask_clips_at_edges() {
        let mut image = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let (mask, _) = TextRenderer::builtin().rasterize("##", 16);
        blend_mask(&mut image, &mask, -3, -3, [255, 255, 255]);
        blend_mask(&mut image, &mask, 2, 2, [255, 255, 255]);
        assert_eq!(image.dimensions(), (4, 4));
    }
}

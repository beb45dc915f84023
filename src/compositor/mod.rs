//! # Compositor Module
//!
//! Crops filtered frames to the selected region, resizes them, then draws
//! text overlays and the watermark on top.

pub mod crop;
pub mod font;
pub mod text;
pub mod watermark;

mod glyphs;

use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use crop::{CanvasSize, CropBox, CropRegion, MIN_CROP_SPAN};
pub use font::{GlyphMask, TextRenderer};
pub use text::{TextColor, TextOverlay, TextPosition};
pub use watermark::Watermark;

use crate::error::{Degradation, GifsmithError, Result};
use crate::video::types::Frame;

/// Everything the compositor draws, captured once per job or preview tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layers {
    pub crop: Option<CropRegion>,
    pub canvas: CanvasSize,
    /// Drawn in order, later overlays on top
    pub overlays: Vec<TextOverlay>,
    pub watermark: Option<PathBuf>,
}

/// How the cropped frame is resized
#[derive(Debug, Clone, Copy, PartialEq)]
enum Resize {
    /// Multiply both sides by a factor, rounding down
    Scale(f64),
    /// Shrink to fit the canvas, keeping aspect; never enlarge
    FitCanvas,
}

#[derive(Debug, Clone)]
struct PreparedOverlay {
    mask: GlyphMask,
    position: TextPosition,
    color: TextColor,
}

/// Applies crop, resize, text and watermark to frames of one job
///
/// Text is rasterized and the watermark decoded when the compositor is built,
/// so each frame only pays for blending. Best-effort failures are kept as
/// `Degradation`s instead of failing the frame.
#[derive(Debug)]
pub struct Compositor {
    crop: Option<CropRegion>,
    canvas: CanvasSize,
    resize: Resize,
    overlays: Vec<PreparedOverlay>,
    watermark: Option<Watermark>,
    degradations: Vec<Degradation>,
    reported: usize,
}

impl Compositor {
    /// Compositor for exported frames, resized by `scale`
    pub fn for_export(layers: &Layers, scale: f64, fonts: &TextRenderer) -> Self {
        let mut compositor = Self::empty(layers, Resize::Scale(scale));
        compositor.prepare_overlays(&layers.overlays, 1.0, fonts);

        if let Some(path) = &layers.watermark {
            match Watermark::load(path) {
                Ok(watermark) => compositor.watermark = Some(watermark),
                Err(degradation) => compositor.degrade(degradation),
            }
        }

        compositor
    }

    /// Compositor for the on-screen preview
    ///
    /// Frames are fitted to the canvas and text is drawn at `text_scale` times
    /// its export size. The watermark is left out.
    pub fn for_preview(layers: &Layers, text_scale: f64, fonts: &TextRenderer) -> Self {
        let mut compositor = Self::empty(layers, Resize::FitCanvas);
        compositor.prepare_overlays(&layers.overlays, text_scale, fonts);
        compositor
    }

    fn empty(layers: &Layers, resize: Resize) -> Self {
        Self {
            crop: layers.crop,
            canvas: layers.canvas,
            resize,
            overlays: Vec::with_capacity(layers.overlays.len()),
            watermark: None,
            degradations: Vec::new(),
            reported: 0,
        }
    }

    fn prepare_overlays(&mut self, overlays: &[TextOverlay], text_scale: f64, fonts: &TextRenderer) {
        for overlay in overlays {
            let size = ((overlay.font_size() as f64 * text_scale) as u32).max(1);
            let (mask, degradation) = fonts.rasterize(overlay.text(), size);
            if let Some(degradation) = degradation {
                self.degrade(degradation);
            }

            debug!(
                "Prepared overlay '{}' at {}px: {}x{}",
                overlay.text(),
                size,
                mask.width(),
                mask.height()
            );
            self.overlays.push(PreparedOverlay {
                mask,
                position: overlay.position(),
                color: overlay.color(),
            });
        }
    }

    fn degrade(&mut self, degradation: Degradation) {
        if !self.degradations.contains(&degradation) {
            warn!("{}", degradation);
            self.degradations.push(degradation);
        }
    }

    /// Crop, resize, then draw overlays and the watermark
    pub fn apply(&mut self, frame: Frame) -> Result<Frame> {
        let index = frame.source_index();
        let mut image = frame.into_image();

        if let Some(region) = &self.crop {
            let (width, height) = image.dimensions();
            let crop = region.remap(width, height, self.canvas).ok_or_else(|| {
                GifsmithError::frame(index, format!("crop region falls outside the {}x{} frame", width, height))
            })?;
            image = imageops::crop_imm(&image, crop.x, crop.y, crop.width, crop.height).to_image();
        }

        let target = match self.resize {
            Resize::Scale(scale) => scaled_size(image.dimensions(), scale),
            Resize::FitCanvas => {
                watermark::fit_within(image.dimensions(), (self.canvas.width, self.canvas.height))
            }
        };
        image = resize_image(image, index, target)?;

        for overlay in &self.overlays {
            text::draw_outlined(&mut image, &overlay.mask, overlay.position, overlay.color);
        }

        let watermarked = self.watermark.as_mut().map(|mark| mark.composite(&mut image));
        if let Some(Err(degradation)) = watermarked {
            self.degrade(degradation);
        }

        Ok(Frame::new(image, index))
    }

    /// Every degradation seen so far
    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    /// Degradations not returned by a previous call
    pub fn new_degradations(&mut self) -> Vec<Degradation> {
        let fresh = self.degradations[self.reported..].to_vec();
        self.reported = self.degradations.len();
        fresh
    }
}

/// Resize a frame by `scale`, rounding both sides down
pub fn scale_frame(frame: Frame, scale: f64) -> Result<Frame> {
    let index = frame.source_index();
    let target = scaled_size(frame.dimensions(), scale);
    let image = resize_image(frame.into_image(), index, target)?;
    Ok(Frame::new(image, index))
}

fn scaled_size((width, height): (u32, u32), scale: f64) -> (u32, u32) {
    (
        (width as f64 * scale).floor() as u32,
        (height as f64 * scale).floor() as u32,
    )
}

fn resize_image(image: RgbImage, index: usize, (new_w, new_h): (u32, u32)) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if new_w == 0 || new_h == 0 {
        return Err(GifsmithError::frame(
            index,
            format!("{}x{} frame resizes to {}x{}", width, height, new_w, new_h),
        ));
    }
    if (new_w, new_h) == (width, height) {
        return Ok(image);
    }
    Ok(imageops::resize(&image, new_w, new_h, FilterType::Lanczos3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_frame;
    use image::{Rgb, Rgba, RgbaImage};
    use tempfile::tempdir;

    fn overlay(text: &str, position: TextPosition) -> TextOverlay {
        TextOverlay::new(text, 16, position, TextColor([255, 0, 0])).unwrap()
    }

    #[test]
    fn test_scale_rounds_down() {
        let mut compositor = Compositor::for_export(&Layers::default(), 0.5, &TextRenderer::builtin());
        let frame = compositor.apply(synthetic_frame(0, 641, 481)).unwrap();
        assert_eq!(frame.dimensions(), (320, 240));
        assert!(compositor.degradations().is_empty());
    }

    #[test]
    fn test_unit_scale_without_layers_is_identity() {
        let mut compositor = Compositor::for_export(&Layers::default(), 1.0, &TextRenderer::builtin());
        let frame = synthetic_frame(3, 40, 30);
        assert_eq!(compositor.apply(frame.clone()).unwrap(), frame);
    }

    #[test]
    fn test_crop_happens_before_resize() {
        let layers = Layers {
            crop: CropRegion::new(0.0, 0.0, 350.0, 200.0),
            ..Default::default()
        };
        let mut compositor = Compositor::for_export(&layers, 0.5, &TextRenderer::builtin());
        let frame = compositor.apply(synthetic_frame(0, 700, 400)).unwrap();
        assert_eq!(frame.dimensions(), (175, 100));
    }

    #[test]
    fn test_zero_size_resize_fails_the_frame() {
        let mut compositor = Compositor::for_export(&Layers::default(), 0.01, &TextRenderer::builtin());
        let err = compositor.apply(synthetic_frame(4, 50, 50)).unwrap_err();
        assert!(matches!(err, GifsmithError::FrameProcessing { index: 4, .. }));
    }

    #[test]
    fn test_text_is_drawn() {
        let layers = Layers {
            overlays: vec![overlay("HI", TextPosition::Center)],
            ..Default::default()
        };
        let mut compositor = Compositor::for_export(&layers, 1.0, &TextRenderer::builtin());
        let blank = Frame::new(RgbImage::from_pixel(100, 60, Rgb([40, 40, 40])), 0);
        let drawn = compositor.apply(blank.clone()).unwrap();

        assert!(drawn.as_image().pixels().any(|p| p.0 == [255, 0, 0]));
        assert!(drawn.as_image().pixels().any(|p| p.0 == [0, 0, 0]));
        assert_ne!(drawn, blank);
    }

    #[test]
    fn test_later_overlays_draw_on_top() {
        let blue = TextOverlay::new("HI", 16, TextPosition::Center, TextColor([0, 0, 255])).unwrap();
        let layers = Layers {
            overlays: vec![overlay("HI", TextPosition::Center), blue],
            ..Default::default()
        };
        let mut compositor = Compositor::for_export(&layers, 1.0, &TextRenderer::builtin());
        let blank = Frame::new(RgbImage::from_pixel(100, 60, Rgb([40, 40, 40])), 0);
        let drawn = compositor.apply(blank).unwrap();

        assert!(drawn.as_image().pixels().any(|p| p.0 == [0, 0, 255]));
        assert!(!drawn.as_image().pixels().any(|p| p.0 == [255, 0, 0]));
    }

    #[test]
    fn test_builtin_font_is_reported_once() {
        let layers = Layers {
            overlays: vec![overlay("A", TextPosition::Top), overlay("B", TextPosition::Bottom)],
            ..Default::default()
        };
        let mut compositor = Compositor::for_export(&layers, 1.0, &TextRenderer::builtin());
        assert_eq!(compositor.degradations().len(), 1);
        assert_eq!(compositor.new_degradations().len(), 1);
        compositor.apply(synthetic_frame(0, 80, 80)).unwrap();
        assert!(compositor.new_degradations().is_empty());
    }

    #[test]
    fn test_missing_watermark_degrades_without_failing() {
        let layers = Layers {
            watermark: Some(PathBuf::from("/nowhere/mark.png")),
            ..Default::default()
        };
        let mut compositor = Compositor::for_export(&layers, 1.0, &TextRenderer::builtin());
        let frame = synthetic_frame(1, 64, 64);
        assert_eq!(compositor.apply(frame.clone()).unwrap(), frame);
        assert!(matches!(
            compositor.degradations(),
            [Degradation::WatermarkUnavailable { .. }]
        ));
    }

    #[test]
    fn test_watermark_is_drawn_last() {
        let dir = tempdir().unwrap();
        let mark = dir.path().join("mark.png");
        RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255])).save(&mark).unwrap();

        let layers = Layers {
            overlays: vec![overlay("XXXXXXXXXXXX", TextPosition::BottomRight)],
            watermark: Some(mark),
            ..Default::default()
        };
        let mut compositor = Compositor::for_export(&layers, 1.0, &TextRenderer::builtin());
        let frame = compositor.apply(synthetic_frame(0, 120, 80)).unwrap();
        // 8x8 mark fits in 30x20, anchored at (102, 62)
        assert_eq!(frame.get_pixel(105, 65), [0, 255, 0]);
    }

    #[test]
    fn test_scale_frame_keeps_index() {
        let frame = scale_frame(synthetic_frame(9, 101, 60), 0.5).unwrap();
        assert_eq!(frame.dimensions(), (50, 30));
        assert_eq!(frame.source_index(), 9);
        assert!(scale_frame(synthetic_frame(9, 1, 1), 0.5).is_err());
    }

    #[test]
    fn test_preview_fits_canvas_and_skips_watermark() {
        let layers = Layers {
            watermark: Some(PathBuf::from("/nowhere/mark.png")),
            ..Default::default()
        };
        let mut compositor = Compositor::for_preview(&layers, 0.5, &TextRenderer::builtin());
        let frame = compositor.apply(synthetic_frame(0, 1400, 400)).unwrap();
        assert_eq!(frame.dimensions(), (700, 200));
        assert!(compositor.degradations().is_empty());

        let small = compositor.apply(synthetic_frame(0, 320, 240)).unwrap();
        assert_eq!(small.dimensions(), (320, 240));
    }
}

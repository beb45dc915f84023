use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage, RgbaImage};
use tracing::debug;

use crate::error::Degradation;

/// Gap between the watermark and the bottom-right frame corner, in pixels
const MARGIN: i64 = 10;

/// A watermark image, decoded once and refitted whenever the frame size changes
#[derive(Debug, Clone)]
pub struct Watermark {
    path: PathBuf,
    source: RgbaImage,
    fitted: Option<RgbaImage>,
    fitted_for: (u32, u32),
}

impl Watermark {
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, Degradation> {
        let path = path.as_ref();
        let source = ImageReader::open(path)
            .map_err(|e| unavailable(path, e))?
            .with_guessed_format()
            .map_err(|e| unavailable(path, e))?
            .decode()
            .map_err(|e| unavailable(path, e))?
            .to_rgba8();

        debug!("Loaded watermark {} ({}x{})", path.display(), source.width(), source.height());

        Ok(Self {
            path: path.to_path_buf(),
            source,
            fitted: None,
            fitted_for: (0, 0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Alpha-composite the watermark into the bottom-right corner of `image`
    ///
    /// The watermark is shrunk (never enlarged) to fit a quarter of the
    /// frame's width and height, keeping its aspect ratio.
    pub fn composite(&mut self, image: &mut RgbImage) -> std::result::Result<(), Degradation> {
        let (width, height) = image.dimensions();
        let mark = self.fitted(width, height)?;

        let x0 = width as i64 - mark.width() as i64 - MARGIN;
        let y0 = height as i64 - mark.height() as i64 - MARGIN;

        for (mx, my, pixel) in mark.enumerate_pixels() {
            let (px, py) = (x0 + mx as i64, y0 + my as i64);
            if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                continue;
            }

            let alpha = pixel[3] as u32;
            if alpha == 0 {
                continue;
            }

            let target = image.get_pixel_mut(px as u32, py as u32);
            for c in 0..3 {
                target[c] = ((pixel[c] as u32 * alpha + target[c] as u32 * (255 - alpha) + 127) / 255) as u8;
            }
        }

        Ok(())
    }

    fn fitted(&mut self, width: u32, height: u32) -> std::result::Result<&RgbaImage, Degradation> {
        let (max_w, max_h) = (width / 4, height / 4);
        if max_w == 0 || max_h == 0 {
            return Err(unavailable(
                &self.path,
                format!("a {}x{} frame has no room for a watermark", width, height),
            ));
        }

        if self.fitted.is_none() || self.fitted_for != (width, height) {
            let (w, h) = fit_within(self.source.dimensions(), (max_w, max_h));
            let fitted = if (w, h) == self.source.dimensions() {
                self.source.clone()
            } else {
                imageops::resize(&self.source, w, h, FilterType::Lanczos3)
            };
            self.fitted = Some(fitted);
            self.fitted_for = (width, height);
        }

        self.fitted
            .as_ref()
            .ok_or_else(|| unavailable(&self.path, "watermark was not prepared"))
    }
}

/// Largest size with the same aspect ratio that fits in `bounds`, never upscaled
pub(crate) fn fit_within((w, h): (u32, u32), (max_w, max_h): (u32, u32)) -> (u32, u32) {
    if w <= max_w && h <= max_h {
        return (w, h);
    }

    let ratio = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    let scaled = |v: u32, max: u32| ((v as f64 * ratio).round() as u32).clamp(1, max.max(1));
    (scaled(w, max_w), scaled(h, max_h))
}

fn unavailable(path: &Path, reason: impl ToString) -> Degradation {
    Degradation::WatermarkUnavailable {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};
    use tempfile::tempdir;

    fn write_mark(dir: &Path, w: u32, h: u32, alpha: u8) -> PathBuf {
        let path = dir.join("mark.png");
        RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, alpha])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within((100, 50), (160, 120)), (100, 50));
        assert_eq!(fit_within((400, 200), (160, 120)), (160, 80));
        assert_eq!(fit_within((200, 400), (160, 120)), (60, 120));
    }

    #[test]
    fn test_missing_file_is_a_degradation() {
        let err = Watermark::load("/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, Degradation::WatermarkUnavailable { .. }));
    }

    #[test]
    fn test_composite_bottom_right() {
        let dir = tempdir().unwrap();
        let path = write_mark(dir.path(), 40, 40, 255);
        let mut mark = Watermark::load(&path).unwrap();

        let mut image = RgbImage::from_pixel(200, 100, Rgb([0, 0, 0]));
        mark.composite(&mut image).unwrap();

        // fitted to 25x25, placed at (165, 65)
        assert_eq!(image.get_pixel(165, 65).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(189, 89).0, [255, 255, 255]);
        assert_eq!(image.get_pixel(190, 90).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(164, 65).0, [0, 0, 0]);
    }

    #[test]
    fn test_transparent_mark_leaves_frame() {
        let dir = tempdir().unwrap();
        let path = write_mark(dir.path(), 10, 10, 0);
        let mut mark = Watermark::load(&path).unwrap();

        let before = RgbImage::from_pixel(80, 80, Rgb([9, 8, 7]));
        let mut image = before.clone();
        mark.composite(&mut image).unwrap();
        assert_eq!(image, before);
    }

    #[test]
    fn test_tiny_frame_degrades() {
        let dir = tempdir().unwrap();
        let path = write_mark(dir.path(), 10, 10, 255);
        let mut mark = Watermark::load(&path).unwrap();
        let mut image = RgbImage::new(3, 3);
        assert!(mark.composite(&mut image).is_err());
    }
}

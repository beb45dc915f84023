// src/filters/enhance.rs - per-pixel color stages

use image::RgbImage;
use rayon::prelude::*;

/// ITU-R 601 luma with 16-bit fixed point weights, rounded
#[inline]
pub fn luma(pixel: &[u8]) -> u8 {
    let weighted = pixel[0] as u32 * 19595 + pixel[1] as u32 * 38470 + pixel[2] as u32 * 7471;
    ((weighted + 0x8000) >> 16) as u8
}

/// Interpolate (or extrapolate) from `base` towards `value`
///
/// `factor == 1.0` returns `value` unchanged; results outside the channel
/// range are clipped and fractional results truncated.
#[inline]
fn blend_channel(base: u8, value: u8, factor: f32) -> u8 {
    let base = base as f32;
    let out = base + factor * (value as f32 - base);
    if out <= 0.0 {
        0
    } else if out >= 255.0 {
        255
    } else {
        out as u8
    }
}

/// Apply `op` to every pixel, rows in parallel
fn map_pixels<F>(image: &mut RgbImage, op: F)
where
    F: Fn(&mut [u8]) + Sync,
{
    let row_len = image.width() as usize * 3;
    if row_len == 0 {
        return;
    }

    image.par_chunks_mut(row_len).for_each(|row| {
        for pixel in row.chunks_exact_mut(3) {
            op(pixel);
        }
    });
}

/// Scale brightness against black; 0.0 yields a black frame
pub fn brightness(image: &mut RgbImage, factor: f32) {
    map_pixels(image, |pixel| {
        for channel in pixel.iter_mut() {
            *channel = blend_channel(0, *channel, factor);
        }
    });
}

/// Scale contrast against the frame's mean gray level
pub fn contrast(image: &mut RgbImage, factor: f32) {
    let pixel_count = image.width() as u64 * image.height() as u64;
    if pixel_count == 0 {
        return;
    }

    let total: u64 = image
        .par_chunks(3)
        .map(|pixel| luma(pixel) as u64)
        .sum();
    let mean = (total as f64 / pixel_count as f64 + 0.5) as u8;

    map_pixels(image, |pixel| {
        for channel in pixel.iter_mut() {
            *channel = blend_channel(mean, *channel, factor);
        }
    });
}

/// Scale saturation against each pixel's own gray level
pub fn saturation(image: &mut RgbImage, factor: f32) {
    map_pixels(image, |pixel| {
        let gray = luma(pixel);
        for channel in pixel.iter_mut() {
            *channel = blend_channel(gray, *channel, factor);
        }
    });
}

/// Collapse to luma and spread it back over three channels
pub fn grayscale(image: &mut RgbImage) {
    map_pixels(image, |pixel| {
        let gray = luma(pixel);
        pixel.fill(gray);
    });
}

/// Warm monochrome tint computed from the current luma
pub fn sepia(image: &mut RgbImage) {
    map_pixels(image, |pixel| {
        let gray = luma(pixel) as f64;
        pixel[0] = (gray * 0.9) as u8;
        pixel[1] = (gray * 0.7) as u8;
        pixel[2] = (gray * 0.4) as u8;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_luma_extremes() {
        assert_eq!(luma(&[0, 0, 0]), 0);
        assert_eq!(luma(&[255, 255, 255]), 255);
        assert_eq!(luma(&[255, 0, 0]), 76);
    }

    #[test]
    fn test_brightness_scales_and_clips() {
        let mut image = RgbImage::from_pixel(2, 2, Rgb([100, 200, 10]));
        brightness(&mut image, 1.5);
        assert_eq!(image.get_pixel(0, 0).0, [150, 255, 15]);

        brightness(&mut image, 0.0);
        assert_eq!(image.get_pixel(1, 1).0, [0, 0, 0]);
    }

    #[test]
    fn test_zero_contrast_is_flat_gray() {
        let mut image = RgbImage::from_fn(4, 1, |x, _| Rgb([x as u8 * 60, 0, 0]));
        contrast(&mut image, 0.0);
        let first = image.get_pixel(0, 0).0;
        assert!(image.pixels().all(|p| p.0 == first));
        assert_eq!(first[0], first[1]);
    }

    #[test]
    fn test_zero_saturation_matches_grayscale() {
        let source = RgbImage::from_fn(5, 5, |x, y| Rgb([x as u8 * 40, y as u8 * 30, 90]));
        let mut desaturated = source.clone();
        saturation(&mut desaturated, 0.0);
        let mut gray = source;
        grayscale(&mut gray);
        assert_eq!(desaturated, gray);
    }

    #[test]
    fn test_sepia_weights() {
        let mut image = RgbImage::from_pixel(1, 1, Rgb([200, 200, 200]));
        sepia(&mut image);
        assert_eq!(image.get_pixel(0, 0).0, [180, 140, 80]);
    }

    #[test]
    fn test_identity_factors_leave_pixels_alone() {
        let source = RgbImage::from_fn(7, 3, |x, y| Rgb([x as u8 * 31, y as u8 * 77, (x * y) as u8]));
        let mut image = source.clone();
        brightness(&mut image, 1.0);
        contrast(&mut image, 1.0);
        saturation(&mut image, 1.0);
        assert_eq!(image, source);
    }
}

use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Represents a single decoded video frame
///
/// A thin wrapper around an RGB image buffer that remembers which frame of
/// the source video it was sampled from. Pipeline stages consume a frame and
/// hand back a new one; the source index travels with the pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbImage,
    source_index: usize,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage, source_index: usize) -> Self {
        Self {
            buffer,
            source_index,
        }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb(color));
        Self::new(buffer, 0)
    }

    /// Create a frame from raw, tightly packed RGB bytes
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>, source_index: usize) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buffer| Self::new(buffer, source_index))
    }

    /// Replace the pixels while keeping the source index
    pub fn with_image(&self, buffer: RgbImage) -> Self {
        Self::new(buffer, self.source_index)
    }

    /// Index of the source video frame these pixels came from
    pub fn source_index(&self) -> usize {
        self.source_index
    }

    /// Get the width of the frame
    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    /// Get the height of the frame
    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Get a pixel at the given coordinates
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    /// Set a pixel at the given coordinates
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        self.buffer.put_pixel(x, y, Rgb(color));
    }

    /// Get the underlying image buffer
    pub fn as_image(&self) -> &RgbImage {
        &self.buffer
    }

    /// Get a mutable reference to the underlying image buffer
    pub fn as_image_mut(&mut self) -> &mut RgbImage {
        &mut self.buffer
    }

    pub fn into_image(self) -> RgbImage {
        self.buffer
    }

    /// Raw RGB bytes, row major
    pub fn as_rgb_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }
}

/// Metadata read once when a video is opened
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub total_frames: usize,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: u64,
}

impl VideoInfo {
    /// Build metadata, deriving the whole-second duration from the frame count
    pub fn new(total_frames: usize, fps: f64, width: u32, height: u32) -> Self {
        let duration_seconds = if fps > 0.0 {
            (total_frames as f64 / fps) as u64
        } else {
            0
        };

        Self {
            total_frames,
            fps,
            width,
            height,
            duration_seconds,
        }
    }

    /// Stride that keeps a preview extraction at or below `max_frames` frames
    pub fn preview_stride(&self, max_frames: usize) -> usize {
        (self.total_frames / max_frames.max(1)).max(1)
    }
}

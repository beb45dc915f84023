use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder as _, DynamicImage, Frames, ImageReader};
use tracing::debug;

use crate::error::{Result, VideoError};
use crate::video::decoder::{FrameDecoder, FrameStream};
use crate::video::types::{Frame, VideoInfo};

/// Frame rate reported for still images and animations without timing
const DEFAULT_FPS: f64 = 30.0;

/// Decoder for animated GIF, APNG and WebP files, plus still images
///
/// Animated containers are read through the `image` crate's animation
/// support, which already composites each frame onto the full canvas. Any
/// other image format is treated as a one-frame video.
pub struct AnimationDecoder;

impl AnimationDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Whether the file extension belongs to an image container
    pub fn handles(path: &Path) -> bool {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => matches!(
                ext.to_lowercase().as_str(),
                "gif" | "png" | "apng" | "webp" | "jpg" | "jpeg" | "bmp"
            ),
            None => false,
        }
    }

    fn unreadable(path: &Path, reason: impl ToString) -> VideoError {
        VideoError::Unreadable {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn open_reader(path: &Path) -> Result<BufReader<File>> {
        let file = File::open(path).map_err(|e| Self::unreadable(path, e))?;
        Ok(BufReader::new(file))
    }

    /// Open the animation frames, or `None` if the file holds a still image
    fn open_frames(path: &Path) -> Result<Option<Frames<'static>>> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();

        let frames = match ext.as_str() {
            "gif" => {
                let decoder = GifDecoder::new(Self::open_reader(path)?)
                    .map_err(|e| Self::unreadable(path, e))?;
                Some(decoder.into_frames())
            }
            "png" | "apng" => {
                let decoder = PngDecoder::new(Self::open_reader(path)?)
                    .map_err(|e| Self::unreadable(path, e))?;
                if decoder.is_apng().map_err(|e| Self::unreadable(path, e))? {
                    let apng = decoder.apng().map_err(|e| Self::unreadable(path, e))?;
                    Some(apng.into_frames())
                } else {
                    None
                }
            }
            "webp" => {
                let decoder = WebPDecoder::new(Self::open_reader(path)?)
                    .map_err(|e| Self::unreadable(path, e))?;
                if decoder.has_animation() {
                    Some(decoder.into_frames())
                } else {
                    None
                }
            }
            _ => None,
        };

        Ok(frames)
    }

    fn load_still(path: &Path) -> Result<Frame> {
        let image = ImageReader::open(path)
            .map_err(|e| Self::unreadable(path, e))?
            .with_guessed_format()
            .map_err(|e| Self::unreadable(path, e))?
            .decode()
            .map_err(|e| Self::unreadable(path, e))?;

        Ok(Frame::new(image.to_rgb8(), 0))
    }
}

impl Default for AnimationDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for AnimationDecoder {
    fn name(&self) -> &str {
        "image"
    }

    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        let Some(frames) = Self::open_frames(path)? else {
            let still = Self::load_still(path)?;
            return Ok(VideoInfo::new(1, DEFAULT_FPS, still.width(), still.height()));
        };

        // Animated containers carry no frame count, so walk the frames once
        let mut total_frames = 0usize;
        let mut dimensions = None;
        let mut fps = DEFAULT_FPS;

        for frame in frames {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) if total_frames == 0 => return Err(Self::unreadable(path, e).into()),
                Err(_) => break,
            };

            if total_frames == 0 {
                let (numer, denom) = frame.delay().numer_denom_ms();
                if numer > 0 {
                    fps = 1000.0 * denom as f64 / numer as f64;
                }
                dimensions = Some(frame.buffer().dimensions());
            }
            total_frames += 1;
        }

        let (width, height) = dimensions.ok_or_else(|| Self::unreadable(path, "animation has no frames"))?;
        debug!("Animated image {}: {} frames at {:.2}fps", path.display(), total_frames, fps);

        Ok(VideoInfo::new(total_frames, fps, width, height))
    }

    fn decode(&self, path: &Path) -> Result<FrameStream> {
        let Some(frames) = Self::open_frames(path)? else {
            let still = Self::load_still(path)?;
            return Ok(Box::new(std::iter::once(Ok(still))));
        };

        let path = path.display().to_string();
        let stream = frames.enumerate().map(move |(index, frame)| {
            frame
                .map(|frame| {
                    let rgb = DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8();
                    Frame::new(rgb, index)
                })
                .map_err(|e| {
                    VideoError::DecodeFailed {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                    .into()
                })
        });

        Ok(Box::new(stream))
    }
}

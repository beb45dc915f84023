use ::webp::{AnimEncoder, AnimFrame, WebPConfig};

use super::{codec_error, EncodeOptions, OutputFormat};
use crate::error::{EncodeError, Result};
use crate::video::types::Frame;

/// Lossy quality used for every animated WebP
const QUALITY: f32 = 85.0;

/// Largest width or height a WebP canvas can have
const MAX_DIMENSION: u32 = 16383;

/// Encode frames as a lossy animated WebP; `optimize` and `dither` do not apply
pub(super) fn encode(frames: &[Frame], options: &EncodeOptions) -> Result<Vec<u8>> {
    let (width, height) = frames[0].dimensions();
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(EncodeError::TooLarge {
            format: OutputFormat::WebP.name(),
            width,
            height,
        }
        .into());
    }

    let mut config =
        WebPConfig::new().map_err(|_| codec_error(OutputFormat::WebP, "failed to initialize encoder config"))?;
    config.lossless = 0;
    config.quality = QUALITY;

    let mut encoder = AnimEncoder::new(width, height, &config);
    encoder.set_loop_count(options.loop_count as i32);

    let delay = options.frame_delay_ms as i32;
    for (i, frame) in frames.iter().enumerate() {
        let timestamp = (i as i32).saturating_mul(delay);
        encoder.add_frame(AnimFrame::from_rgb(frame.as_rgb_bytes(), width, height, timestamp));
    }

    let encoded = encoder
        .try_encode()
        .map_err(|e| codec_error(OutputFormat::WebP, format!("{:?}", e)))?;

    // WebPMemory is not Send; copy out before it crosses a thread boundary
    Ok(encoded.to_vec())
}

use png::{BitDepth, ColorType, Encoder};

use super::{codec_error, EncodeOptions, OutputFormat};
use crate::error::Result;
use crate::video::types::Frame;

/// Encode frames as an animated PNG; `optimize` and `dither` do not apply
pub(super) fn encode(frames: &[Frame], options: &EncodeOptions) -> Result<Vec<u8>> {
    let (width, height) = frames[0].dimensions();
    let png_err = |e: png::EncodingError| codec_error(OutputFormat::Apng, e);

    let mut bytes = Vec::new();
    {
        let mut encoder = Encoder::new(&mut bytes, width, height);
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);
        encoder
            .set_animated(frames.len() as u32, options.loop_count as u32)
            .map_err(png_err)?;

        let delay = options.frame_delay_ms.min(u16::MAX as u32) as u16;
        encoder.set_frame_delay(delay, 1000).map_err(png_err)?;

        let mut writer = encoder.write_header().map_err(png_err)?;
        for frame in frames {
            writer.write_image_data(frame.as_rgb_bytes()).map_err(png_err)?;
        }
        writer.finish().map_err(png_err)?;
    }

    Ok(bytes)
}

use ::gif::{DisposalMethod, Encoder, Frame as GifFrame, Repeat};
use image::RgbImage;
use tracing::debug;

use super::{codec_error, EncodeOptions, OutputFormat};
use crate::error::{EncodeError, Result};
use crate::quantize::reduce_colors;
use crate::video::types::Frame;

const PALETTE_SIZE: usize = 256;

/// NeuQuant speed the gif crate uses if a frame still has too many colors
const SPEED: i32 = 10;

/// Encode frames as a looping GIF
///
/// GIF delays are stored in centiseconds, so the millisecond delay is rounded
/// down to a multiple of 10. With `optimize`, every frame after the first
/// stores only the rectangle that changed, with unchanged pixels transparent.
pub(super) fn encode(frames: &[Frame], options: &EncodeOptions) -> Result<Vec<u8>> {
    let (width, height) = frames[0].dimensions();
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(EncodeError::TooLarge {
            format: OutputFormat::Gif.name(),
            width,
            height,
        }
        .into());
    };

    let delay = (options.frame_delay_ms / 10).min(u16::MAX as u32) as u16;
    // Leave one palette slot free for the transparent index
    let limit = if options.optimize { PALETTE_SIZE - 1 } else { PALETTE_SIZE };
    let gif_err = |e: ::gif::EncodingError| codec_error(OutputFormat::Gif, e);

    let mut bytes = Vec::new();
    {
        let mut encoder = Encoder::new(&mut bytes, w, h, &[]).map_err(gif_err)?;
        let repeat = match options.loop_count {
            0 => Repeat::Infinite,
            n => Repeat::Finite(n),
        };
        encoder.set_repeat(repeat).map_err(gif_err)?;

        let mut previous: Option<RgbImage> = None;
        for frame in frames {
            let image = reduce_colors(frame.as_image().clone(), limit, options.dither);

            let mut gif_frame = match &previous {
                Some(prev) if options.optimize => delta_frame(prev, &image),
                _ => GifFrame::from_rgb_speed(w, h, image.as_raw(), SPEED),
            };
            gif_frame.delay = delay;
            gif_frame.dispose = DisposalMethod::Keep;

            encoder.write_frame(&gif_frame).map_err(gif_err)?;
            previous = Some(image);
        }
    }

    debug!("GIF: {} frames, {}cs delay, optimize {}", frames.len(), delay, options.optimize);
    Ok(bytes)
}

/// The changed rectangle of `current` relative to `previous`
///
/// Pixels equal to the previous frame become transparent; an unchanged frame
/// becomes a single transparent pixel that only extends the display time.
fn delta_frame(previous: &RgbImage, current: &RgbImage) -> GifFrame<'static> {
    let Some((x0, y0, x1, y1)) = changed_bounds(previous, current) else {
        let mut pixel = [0u8; 4];
        return GifFrame::from_rgba_speed(1, 1, &mut pixel, SPEED);
    };

    let (w, h) = (x1 - x0 + 1, y1 - y0 + 1);
    let mut rgba = Vec::with_capacity((w * h * 4) as usize);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let now = current.get_pixel(x, y);
            if now == previous.get_pixel(x, y) {
                rgba.extend_from_slice(&[0, 0, 0, 0]);
            } else {
                rgba.extend_from_slice(&[now[0], now[1], now[2], 255]);
            }
        }
    }

    let mut frame = GifFrame::from_rgba_speed(w as u16, h as u16, &mut rgba, SPEED);
    frame.left = x0 as u16;
    frame.top = y0 as u16;
    frame
}

/// Inclusive bounding box of differing pixels, `None` if the frames match
fn changed_bounds(previous: &RgbImage, current: &RgbImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, pixel) in current.enumerate_pixels() {
        if pixel == previous.get_pixel(x, y) {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    bounds
}

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::video::decoder::{AutoDecoder, FrameDecoder};
use crate::video::types::{Frame, VideoInfo};

/// Frame budget for preview extraction
pub const MAX_PREVIEW_FRAMES: usize = 100;

/// Which frames of a video to materialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extraction {
    /// First frame to decode, inclusive
    pub start: usize,
    /// Frame to stop at, exclusive; `None` reads to the end of the container
    pub end: Option<usize>,
    /// Keep every `stride`-th frame, starting with `start`
    pub stride: usize,
}

impl Extraction {
    /// Every frame of the container
    pub fn all() -> Self {
        Self {
            start: 0,
            end: None,
            stride: 1,
        }
    }

    pub fn range(start: usize, end: usize, stride: usize) -> Self {
        Self {
            start,
            end: Some(end),
            stride,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }
}

/// Opens videos and decodes bounded, strided frame ranges into memory
///
/// Nothing is cached between calls. Every extraction is a fresh sequential
/// decode, so memory is bounded by the frames a caller keeps rather than by
/// the length of the video.
#[derive(Clone)]
pub struct VideoSource {
    decoder: Arc<dyn FrameDecoder>,
}

impl VideoSource {
    pub fn new() -> Self {
        Self::with_decoder(Arc::new(AutoDecoder::new()))
    }

    pub fn with_decoder(decoder: Arc<dyn FrameDecoder>) -> Self {
        Self { decoder }
    }

    /// Read the video's metadata
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<VideoInfo> {
        self.decoder.probe(path.as_ref())
    }

    /// Decode frames `start, start + stride, ...` below `end`
    ///
    /// Frames between retained positions are decoded and dropped. If the
    /// container runs out (or a trailing frame fails to decode) before `end`,
    /// the frames gathered so far are returned.
    pub fn extract<P: AsRef<Path>>(&self, path: P, extraction: Extraction) -> Result<Vec<Frame>> {
        let path = path.as_ref();
        let stride = extraction.stride.max(1);
        let limit = extraction.end.map(|end| end.saturating_sub(extraction.start));

        if limit == Some(0) {
            return Ok(Vec::new());
        }

        debug!(
            "Extracting {} from frame {} to {:?} with stride {}",
            path.display(),
            extraction.start,
            extraction.end,
            stride
        );

        let stream = self.decoder.decode_from(path, extraction.start)?;
        let capacity = limit.map(|n| n.div_ceil(stride)).unwrap_or(0);
        let mut frames = Vec::with_capacity(capacity);

        for (offset, frame) in stream.enumerate() {
            if limit.is_some_and(|limit| offset >= limit) {
                break;
            }

            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Stopping extraction of {} after {} frames: {}", path.display(), offset, e);
                    break;
                }
            };

            if offset % stride == 0 {
                frames.push(frame);
            }
        }

        info!("Extracted {} frames from {}", frames.len(), path.display());
        Ok(frames)
    }

    /// Decode a low-density sample of the whole video for previewing
    pub fn preview_frames<P: AsRef<Path>>(&self, path: P) -> Result<(VideoInfo, Vec<Frame>)> {
        let path = path.as_ref();
        let info = self.open(path)?;
        let stride = info.preview_stride(MAX_PREVIEW_FRAMES);
        let frames = self.extract(path, Extraction::all().with_stride(stride))?;

        info!(
            "Loaded {} preview frames of {} (stride {})",
            frames.len(),
            info.total_frames,
            stride
        );
        Ok((info, frames))
    }
}

impl Default for VideoSource {
    fn default() -> Self {
        Self::new()
    }
}

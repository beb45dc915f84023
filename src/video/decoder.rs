use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::video::animation::AnimationDecoder;
use crate::video::ffmpeg::FfmpegDecoder;
use crate::video::types::{Frame, VideoInfo};

/// Sequential stream of decoded frames, in container order
///
/// An `Err` item ends the stream; callers treat it as the container ending
/// early rather than as a failure of the whole extraction.
pub type FrameStream = Box<dyn Iterator<Item = Result<Frame>>>;

/// Backend that knows how to read one family of containers
pub trait FrameDecoder: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Read container metadata without decoding frames
    fn probe(&self, path: &Path) -> Result<VideoInfo>;

    /// Open a fresh sequential decode starting at frame 0
    fn decode(&self, path: &Path) -> Result<FrameStream>;

    /// Open a sequential decode whose first item is frame `start`
    ///
    /// Frames before `start` are still decoded so the container state stays
    /// consistent, they are just never handed out.
    fn decode_from(&self, path: &Path, start: usize) -> Result<FrameStream> {
        Ok(Box::new(self.decode(path)?.skip(start)))
    }
}

/// Picks a backend from the file extension
///
/// Animated and still image containers go through the `image` crate, anything
/// else is assumed to be a video container and handed to ffmpeg.
pub struct AutoDecoder {
    animation: AnimationDecoder,
    ffmpeg: FfmpegDecoder,
}

impl AutoDecoder {
    pub fn new() -> Self {
        Self {
            animation: AnimationDecoder::new(),
            ffmpeg: FfmpegDecoder::new(),
        }
    }

    fn backend_for(&self, path: &Path) -> &dyn FrameDecoder {
        if AnimationDecoder::handles(path) {
            &self.animation
        } else {
            &self.ffmpeg
        }
    }
}

impl Default for AutoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for AutoDecoder {
    fn name(&self) -> &str {
        "auto"
    }

    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        let backend = self.backend_for(path);
        debug!("Probing {} with {} backend", path.display(), backend.name());
        backend.probe(path)
    }

    fn decode(&self, path: &Path) -> Result<FrameStream> {
        self.backend_for(path).decode(path)
    }

    fn decode_from(&self, path: &Path, start: usize) -> Result<FrameStream> {
        self.backend_for(path).decode_from(path, start)
    }
}

//! Test doubles shared by the unit tests of several modules.

use std::collections::HashMap;
use std::path::Path;

use image::{Rgb, RgbImage};

use crate::error::{Result, VideoError};
use crate::video::{Frame, FrameDecoder, FrameStream, VideoInfo};

/// Deterministic frame content that differs per frame index
pub(crate) fn synthetic_frame(index: usize, width: u32, height: u32) -> Frame {
    let buffer = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x as usize * 7 + index * 3) as u8,
            (y as usize * 5 + index) as u8,
            (index * 11) as u8,
        ])
    });
    Frame::new(buffer, index)
}

#[derive(Debug, Clone)]
struct SyntheticVideo {
    frames: usize,
    fps: f64,
    width: u32,
    height: u32,
    fail_after: Option<usize>,
}

/// In-memory stand-in for a real container decoder
#[derive(Debug, Clone, Default)]
pub(crate) struct SyntheticDecoder {
    videos: HashMap<String, SyntheticVideo>,
}

impl SyntheticDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_video<P: AsRef<Path>>(
        mut self,
        path: P,
        frames: usize,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Self {
        self.videos.insert(
            key(path.as_ref()),
            SyntheticVideo {
                frames,
                fps,
                width,
                height,
                fail_after: None,
            },
        );
        self
    }

    /// Make decoding of `path` fail once `frames` frames have been produced
    pub(crate) fn failing_after<P: AsRef<Path>>(mut self, path: P, frames: usize) -> Self {
        if let Some(video) = self.videos.get_mut(&key(path.as_ref())) {
            video.fail_after = Some(frames);
        }
        self
    }

    fn lookup(&self, path: &Path) -> Result<SyntheticVideo> {
        self.videos.get(&key(path)).cloned().ok_or_else(|| {
            VideoError::Unreadable {
                path: path.display().to_string(),
                reason: "no such synthetic video".to_string(),
            }
            .into()
        })
    }
}

fn key(path: &Path) -> String {
    path.display().to_string()
}

impl FrameDecoder for SyntheticDecoder {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        let video = self.lookup(path)?;
        Ok(VideoInfo::new(video.frames, video.fps, video.width, video.height))
    }

    fn decode(&self, path: &Path) -> Result<FrameStream> {
        let video = self.lookup(path)?;
        let path = key(path);

        let stream = (0..video.frames).map(move |index| {
            if video.fail_after.is_some_and(|limit| index >= limit) {
                return Err(VideoError::DecodeFailed {
                    path: path.clone(),
                    reason: "corrupt frame".to_string(),
                }
                .into());
            }
            Ok(synthetic_frame(index, video.width, video.height))
        });

        Ok(Box::new(stream))
    }
}

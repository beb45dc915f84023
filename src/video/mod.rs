//! # Video Source Module
//!
//! Opens video containers, reports their metadata and decodes bounded,
//! strided frame ranges into memory.

pub mod decoder;
pub mod source;
pub mod types;

mod animation;
mod ffmpeg;

pub use animation::AnimationDecoder;
pub use decoder::{AutoDecoder, FrameDecoder, FrameStream};
pub use ffmpeg::FfmpegDecoder;
pub use source::{Extraction, VideoSource, MAX_PREVIEW_FRAMES};
pub use types::{Frame, VideoInfo};

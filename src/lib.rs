//! # gifsmith
//!
//! Turn video clips into animated GIF, WebP and APNG files.
//!
//! This library decodes a frame range from a video, runs every frame through
//! color filters, crop, resize, text overlays and a watermark, reduces the
//! palette and encodes the result as a looping animation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gifsmith::{config::Config, export::JobEvent, session::Session};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let mut session = Session::new(Config::default());
//! session.open_video("clip.mp4")?;
//! session.settings.frame_rate = 20;
//!
//! let job = session.export_job("clip.gif")?;
//! let mut handle = session.start_export(job)?;
//! while let Some(event) = handle.next_event().await {
//!     if let JobEvent::Progress { completed, total } = event {
//!         println!("{}/{}", completed, total);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - Container probing and strided frame extraction
//! - [`filters`] - Rotation, flips and color enhancement
//! - [`compositor`] - Crop, resize, text overlays and watermark
//! - [`quantize`] - Adaptive palette reduction
//! - [`encode`] - GIF, WebP and APNG encoders
//! - [`export`] - Export pipeline, batch runner and job events
//! - [`session`] - Interactive state and background job control
//! - [`config`] - Configuration management

pub mod compositor;
pub mod config;
pub mod encode;
pub mod error;
pub mod export;
pub mod filters;
pub mod quantize;
pub mod session;
pub mod video;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use crate::{
    config::Config,
    encode::{AnimatedImageEncoder, OutputFormat},
    error::{Degradation, ErrorKind, GifsmithError, Result},
    export::{ExportJob, ExportPipeline, ExportSettings, JobEvent, JobHandle},
    filters::{FilterPipeline, FilterSettings},
    session::Session,
    video::{Frame, VideoInfo, VideoSource},
};

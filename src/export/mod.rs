//! # Export Module
//!
//! Turns a video plus a settings snapshot into an animated image file, either
//! one export at a time through the full pipeline or many inputs through the
//! batch fast path. Both run as background jobs that report through events.

pub mod batch;
pub mod job;
pub mod pipeline;
pub mod settings;

pub use batch::{BatchResult, BatchRunner, BatchSettings};
pub use job::{CancelToken, EventSink, JobEvent, JobHandle};
pub use pipeline::{ExportJob, ExportPipeline, ExportState, ExportSummary};
pub use settings::{
    default_output_name, estimate_output_bytes, ExportPreset, ExportSettings, FrameRange, PresetValues,
};

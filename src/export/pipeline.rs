use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::compositor::{Compositor, Layers, TextRenderer};
use crate::encode::{AnimatedImageEncoder, EncodeOptions, EncodedAnimation, OutputFormat};
use crate::error::{Degradation, EncodeError, ErrorKind, GifsmithError, Result};
use crate::export::job::{CancelToken, EventSink};
use crate::export::settings::ExportSettings;
use crate::filters::{FilterPipeline, FilterSettings};
use crate::quantize::PaletteQuantizer;
use crate::video::{Extraction, Frame, VideoSource};

/// Where an export currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    Idle,
    Validating,
    Extracting,
    Processing { completed: usize, total: usize },
    Encoding,
    Done,
    Failed(ErrorKind),
    Cancelled,
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Validating => f.write_str("validating"),
            Self::Extracting => f.write_str("extracting"),
            Self::Processing { completed, total } => write!(f, "processing {}/{}", completed, total),
            Self::Encoding => f.write_str("encoding"),
            Self::Done => f.write_str("done"),
            Self::Failed(kind) => write!(f, "failed ({})", kind),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Immutable snapshot of everything one export needs
///
/// Built once when the job starts; later edits to the session do not reach a
/// running job.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub settings: ExportSettings,
    pub filters: FilterSettings,
    pub layers: Layers,
    pub fonts: TextRenderer,
}

impl ExportJob {
    /// A job with default settings and no filters or layers
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(input: P, output: Q) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            settings: ExportSettings::default(),
            filters: FilterSettings::default(),
            layers: Layers::default(),
            fonts: TextRenderer::builtin(),
        }
    }

    pub fn with_settings(mut self, settings: ExportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_filters(mut self, filters: FilterSettings) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_layers(mut self, layers: Layers) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_fonts(mut self, fonts: TextRenderer) -> Self {
        self.fonts = fonts;
        self
    }
}

/// Result of a finished export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub output: PathBuf,
    pub format: OutputFormat,
    pub frame_count: usize,
    /// Size of the written file
    pub output_bytes: u64,
    pub width: u32,
    pub height: u32,
    pub frame_delay_ms: u32,
    /// Best-effort steps that were skipped along the way
    pub degradations: Vec<Degradation>,
}

/// Runs one export from source video to written file
///
/// The pipeline follows a fixed sequence:
/// 1. Validating - reject out-of-range settings before touching the video
/// 2. Extracting - decode the selected range, reversed if requested
/// 3. Processing - filters, compositor and quantizer, frame by frame
/// 4. Encoding - encode the full sequence and write it out
///
/// Any error aborts the job and nothing is written to the destination.
pub struct ExportPipeline {
    source: VideoSource,
    filters: FilterPipeline,
    encoder: AnimatedImageEncoder,
    state: ExportState,
}

impl ExportPipeline {
    pub fn new(source: VideoSource) -> Self {
        Self {
            source,
            filters: FilterPipeline::new(),
            encoder: AnimatedImageEncoder::new(),
            state: ExportState::Idle,
        }
    }

    /// Use a specific filter pipeline, e.g. one without the identity fast path
    pub fn with_filters(mut self, filters: FilterPipeline) -> Self {
        self.filters = filters;
        self
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    fn transition(&mut self, state: ExportState) {
        debug!("Export state: {} -> {}", self.state, state);
        self.state = state;
    }

    /// Run `job` to completion, reporting progress through `events`
    ///
    /// `cancel` is checked before every frame and once more before encoding.
    pub fn run(&mut self, job: &ExportJob, events: &EventSink, cancel: &CancelToken) -> Result<ExportSummary> {
        let result = self.run_stages(job, events, cancel);

        let terminal = match &result {
            Ok(_) => ExportState::Done,
            Err(GifsmithError::Cancelled) => ExportState::Cancelled,
            Err(e) => ExportState::Failed(e.kind()),
        };
        self.transition(terminal);
        result
    }

    fn run_stages(&mut self, job: &ExportJob, events: &EventSink, cancel: &CancelToken) -> Result<ExportSummary> {
        let settings = &job.settings;
        events.log(format!("Starting export to {}", job.output.display()));
        events.log(format!(
            "Settings: {} fps, {}x scale, {} colors",
            settings.frame_rate, settings.scale, settings.color_count
        ));

        let frames = self.extract(job, events)?;
        let (processed, degradations) = self.process(job, frames, events, cancel)?;

        cancel.check()?;
        self.transition(ExportState::Encoding);
        events.log(format!("Saving {} frames...", processed.len()));

        let options = EncodeOptions::new(settings.format, settings.frame_rate)
            .with_optimize(settings.optimize)
            .with_dither(settings.dither);
        let animation = self.encoder.encode(&processed, &options)?;
        let output_bytes = write_output(&job.output, &animation)?;

        events.log(format!(
            "Export complete: {} ({:.1} KB)",
            job.output.display(),
            output_bytes as f64 / 1024.0
        ));

        Ok(ExportSummary {
            output: job.output.clone(),
            format: animation.format,
            frame_count: animation.frame_count,
            output_bytes,
            width: animation.width,
            height: animation.height,
            frame_delay_ms: animation.frame_delay_ms,
            degradations,
        })
    }

    // ==========================================
    // VALIDATING + EXTRACTING
    // ==========================================

    fn extract(&mut self, job: &ExportJob, events: &EventSink) -> Result<Vec<Frame>> {
        self.transition(ExportState::Validating);
        job.settings.check_parameters()?;
        let info = self.source.open(&job.input)?;
        let range = job.settings.validate(&info)?;

        self.transition(ExportState::Extracting);
        let extraction = Extraction::range(range.start, range.end, job.settings.frame_skip as usize);
        let mut frames = self.source.extract(&job.input, extraction)?;

        if job.settings.reverse {
            frames.reverse();
        }

        events.log(format!("Processing {} frames...", frames.len()));
        Ok(frames)
    }

    // ==========================================
    // PROCESSING
    // ==========================================

    fn process(
        &mut self,
        job: &ExportJob,
        frames: Vec<Frame>,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<(Vec<Frame>, Vec<Degradation>)> {
        let total = frames.len();
        self.transition(ExportState::Processing { completed: 0, total });

        let mut compositor = Compositor::for_export(&job.layers, job.settings.scale, &job.fonts);
        let quantizer = PaletteQuantizer::new(job.settings.color_count, job.settings.dither);
        let mut processed = Vec::with_capacity(total);

        for (i, frame) in frames.into_iter().enumerate() {
            cancel.check()?;

            let filtered = self.filters.apply(frame, &job.filters);
            let composited = compositor.apply(filtered)?;
            processed.push(quantizer.quantize(composited));

            for degradation in compositor.new_degradations() {
                events.degraded(degradation);
            }

            self.state = ExportState::Processing { completed: i + 1, total };
            events.progress(i + 1, total);
        }

        Ok((processed, compositor.degradations().to_vec()))
    }
}

/// Write an encoded animation to `path` and return its size
///
/// Bytes go to a sibling temporary file that is renamed into place, so a
/// failed write never leaves a truncated file at `path`.
pub(crate) fn write_output(path: &Path, animation: &EncodedAnimation) -> Result<u64> {
    let write_err = |source| EncodeError::Write {
        path: path.display().to_string(),
        source,
    };

    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    if let Err(e) = fs::write(&partial, &animation.bytes).and_then(|_| fs::rename(&partial, path)) {
        if partial.exists() {
            if let Err(cleanup) = fs::remove_file(&partial) {
                warn!("Could not remove {}: {}", partial.display(), cleanup);
            }
        }
        return Err(write_err(e).into());
    }

    let size = fs::metadata(path).map_err(write_err)?.len();
    info!("Wrote {} ({} bytes)", path.display(), size);
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{CropRegion, TextColor, TextOverlay, TextPosition};
    use crate::export::settings::FrameRange;
    use crate::testing::{synthetic_frame, SyntheticDecoder};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn pipeline_with(path: &str, frames: usize, width: u32, height: u32) -> ExportPipeline {
        let decoder = SyntheticDecoder::new().with_video(path, frames, 30.0, width, height);
        ExportPipeline::new(VideoSource::with_decoder(Arc::new(decoder)))
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<crate::export::JobEvent>) -> Vec<crate::export::JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_export_writes_scaled_gif() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.gif");
        let mut pipeline = pipeline_with("clip.mp4", 12, 64, 48);

        let job = ExportJob::new("clip.mp4", &output).with_settings(ExportSettings {
            color_count: 64,
            ..Default::default()
        });
        let summary = pipeline
            .run(&job, &EventSink::detached(), &CancelToken::new())
            .unwrap();

        assert_eq!(pipeline.state(), ExportState::Done);
        assert_eq!(summary.frame_count, 12);
        assert_eq!((summary.width, summary.height), (32, 24));
        // 15 fps is 66 ms, stored by GIF as 6 cs
        assert_eq!(summary.frame_delay_ms, 60);
        assert!(summary.output_bytes > 0);
        assert_eq!(fs::metadata(&output).unwrap().len(), summary.output_bytes);
        assert!(!dir.path().join("out.gif.part").exists());
    }

    #[test]
    fn test_progress_is_monotonic_and_complete() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_with("clip.mp4", 20, 16, 16);
        let (sink, mut rx) = EventSink::channel();

        let job = ExportJob::new("clip.mp4", dir.path().join("out.png")).with_settings(ExportSettings {
            format: OutputFormat::Apng,
            frame_skip: 3,
            frame_range: Some(FrameRange::new(2, 20)),
            scale: 1.0,
            ..Default::default()
        });
        let summary = pipeline.run(&job, &sink, &CancelToken::new()).unwrap();
        assert_eq!(summary.frame_count, 6);

        let progress: Vec<(usize, usize)> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                crate::export::JobEvent::Progress { completed, total } => Some((completed, total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, (1..=6).map(|i| (i, 6)).collect::<Vec<_>>());
    }

    #[test]
    fn test_log_lines_follow_the_stages() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_with("clip.mp4", 4, 16, 16);
        let (sink, mut rx) = EventSink::channel();

        let job = ExportJob::new("clip.mp4", dir.path().join("out.gif"));
        pipeline.run(&job, &sink, &CancelToken::new()).unwrap();

        let logs: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                crate::export::JobEvent::Log(line) => Some(line),
                _ => None,
            })
            .collect();
        assert!(logs[0].starts_with("Starting export to"));
        assert_eq!(logs[1], "Settings: 15 fps, 0.5x scale, 256 colors");
        assert_eq!(logs[2], "Processing 4 frames...");
        assert_eq!(logs[3], "Saving 4 frames...");
    }

    #[test]
    fn test_invalid_settings_fail_before_decoding() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.gif");
        // Unknown path: a decode attempt would fail as VideoUnreadable
        let mut pipeline = pipeline_with("clip.mp4", 4, 16, 16);

        let job = ExportJob::new("missing.mp4", &output).with_settings(ExportSettings {
            color_count: 8,
            ..Default::default()
        });
        let err = pipeline
            .run(&job, &EventSink::detached(), &CancelToken::new())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidSettings);
        assert_eq!(pipeline.state(), ExportState::Failed(ErrorKind::InvalidSettings));
        assert!(!output.exists());
    }

    #[test]
    fn test_reverse_playback() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.png");
        let mut pipeline = pipeline_with("clip.mp4", 10, 8, 8);

        let job = ExportJob::new("clip.mp4", &output).with_settings(ExportSettings {
            format: OutputFormat::Apng,
            scale: 1.0,
            reverse: true,
            ..Default::default()
        });
        pipeline
            .run(&job, &EventSink::detached(), &CancelToken::new())
            .unwrap();

        let file = fs::File::open(&output).unwrap();
        let decoder = image::codecs::png::PngDecoder::new(std::io::BufReader::new(file)).unwrap();
        let frames: Vec<_> = image::AnimationDecoder::into_frames(decoder.apng().unwrap())
            .collect_frames()
            .unwrap();

        assert_eq!(frames.len(), 10);
        let first = image::DynamicImage::ImageRgba8(frames[0].buffer().clone()).to_rgb8();
        let last = image::DynamicImage::ImageRgba8(frames[9].buffer().clone()).to_rgb8();
        assert_eq!(&first, synthetic_frame(9, 8, 8).as_image());
        assert_eq!(&last, synthetic_frame(0, 8, 8).as_image());
    }

    #[test]
    fn test_cancel_stops_before_writing() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.gif");
        let mut pipeline = pipeline_with("clip.mp4", 10, 8, 8);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = pipeline
            .run(&ExportJob::new("clip.mp4", &output), &EventSink::detached(), &cancel)
            .unwrap_err();
        assert!(matches!(err, GifsmithError::Cancelled));
        assert_eq!(pipeline.state(), ExportState::Cancelled);
        assert!(!output.exists());
    }

    #[test]
    fn test_frame_failure_aborts_without_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.gif");
        let mut pipeline = pipeline_with("clip.mp4", 5, 8, 8);

        // 0.05 of 8 pixels rounds down to nothing
        let job = ExportJob::new("clip.mp4", &output).with_settings(ExportSettings {
            scale: 0.05,
            ..Default::default()
        });
        let err = pipeline
            .run(&job, &EventSink::detached(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FrameProcessing);
        assert!(!output.exists());
    }

    #[test]
    fn test_degradations_are_reported_not_fatal() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_with("clip.mp4", 3, 80, 60);
        let (sink, mut rx) = EventSink::channel();

        let layers = Layers {
            crop: CropRegion::new(0.0, 0.0, 700.0, 400.0),
            overlays: vec![TextOverlay::new("HI", 12, TextPosition::Top, TextColor::WHITE).unwrap()],
            watermark: Some(dir.path().join("no-such-mark.png")),
            ..Default::default()
        };
        let job = ExportJob::new("clip.mp4", dir.path().join("out.gif"))
            .with_layers(layers)
            .with_settings(ExportSettings {
                scale: 1.0,
                ..Default::default()
            });
        let summary = pipeline.run(&job, &sink, &CancelToken::new()).unwrap();

        assert_eq!(summary.degradations.len(), 2);
        let degraded = drain(&mut rx)
            .into_iter()
            .filter(|event| matches!(event, crate::export::JobEvent::Degraded(_)))
            .count();
        assert_eq!(degraded, 2);
    }

    #[test]
    fn test_write_failure_is_an_encode_failure() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("missing-dir").join("out.gif");
        let mut pipeline = pipeline_with("clip.mp4", 2, 8, 8);

        let err = pipeline
            .run(&ExportJob::new("clip.mp4", &output), &EventSink::detached(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncodeFailure);
    }
}

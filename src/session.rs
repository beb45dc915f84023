//! # Session
//!
//! Interactive state owned by the front end: the open video, its preview
//! frames, crop, overlays, watermark and export settings. Long-running work is
//! started from here on a snapshot of that state and runs in the background.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tracing::info;

use crate::compositor::{CanvasSize, Compositor, CropRegion, Layers, TextOverlay, TextRenderer};
use crate::config::Config;
use crate::error::{GifsmithError, Result, VideoError};
use crate::export::{
    estimate_output_bytes, BatchRunner, ExportJob, ExportPipeline, ExportSettings, FrameRange, JobEvent, JobHandle,
};
use crate::export::job::spawn_job;
use crate::filters::{FilterPipeline, FilterSettings};
use crate::video::{Extraction, Frame, VideoInfo, VideoSource};

/// Released when the background job holding it ends
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| GifsmithError::JobInFlight)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct OpenVideo {
    path: PathBuf,
    info: VideoInfo,
}

/// One user's editing session
pub struct Session {
    config: Config,
    source: VideoSource,
    fonts: TextRenderer,
    filter_pipeline: FilterPipeline,
    video: Option<OpenVideo>,
    preview: Vec<Frame>,
    /// Live settings; jobs get a copy
    pub settings: ExportSettings,
    pub filters: FilterSettings,
    layers: Layers,
    in_flight: Arc<AtomicBool>,
    activity: Vec<String>,
}

impl Session {
    /// A session decoding through ffmpeg and the `image` crate
    pub fn new(config: Config) -> Self {
        let fonts = TextRenderer::load(config.fonts.directory.as_deref());
        Self::with_parts(config, VideoSource::new(), fonts)
    }

    pub fn with_parts(config: Config, source: VideoSource, fonts: TextRenderer) -> Self {
        let layers = Layers {
            canvas: config.preview.canvas(),
            ..Default::default()
        };
        Self {
            settings: config.export.clone(),
            filters: FilterSettings::default(),
            filter_pipeline: FilterPipeline::new(),
            video: None,
            preview: Vec::new(),
            layers,
            in_flight: Arc::new(AtomicBool::new(false)),
            activity: Vec::new(),
            config,
            source,
            fonts,
        }
    }

    // ==========================================
    // VIDEO
    // ==========================================

    /// Open a video and make it the session's current one
    pub fn open_video<P: AsRef<Path>>(&mut self, path: P) -> Result<VideoInfo> {
        let path = path.as_ref();
        let info = self.source.open(path)?;

        self.video = Some(OpenVideo {
            path: path.to_path_buf(),
            info,
        });
        self.preview.clear();
        self.settings.frame_range = None;

        self.log(format!(
            "Opened {}: {}x{}, {:.1} fps, {} frames",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.total_frames
        ));
        Ok(info)
    }

    pub fn video_info(&self) -> Option<&VideoInfo> {
        self.video.as_ref().map(|video| &video.info)
    }

    pub fn video_path(&self) -> Option<&Path> {
        self.video.as_ref().map(|video| video.path.as_path())
    }

    /// Sample up to the configured number of frames of `path` for scrubbing
    pub fn preview_frames<P: AsRef<Path>>(&mut self, path: P) -> Result<&[Frame]> {
        let path = path.as_ref();
        if self.video_path() != Some(path) {
            self.open_video(path)?;
        }

        let stride = self
            .video_info()
            .map(|info| info.preview_stride(self.config.preview.max_frames))
            .unwrap_or(1);
        self.preview = self.source.extract(path, Extraction::all().with_stride(stride))?;

        self.log(format!("Loaded {} preview frames", self.preview.len()));
        Ok(&self.preview)
    }

    /// Render preview frame `index` with explicit filters and layers
    ///
    /// The frame is fitted to `layers.canvas`, text is drawn at the preview
    /// text scale and the watermark is left out.
    pub fn preview_frame(&self, index: usize, filters: &FilterSettings, layers: &Layers) -> Result<Frame> {
        let frame = self.preview.get(index).ok_or(VideoError::FrameOutOfRange {
            index,
            available: self.preview.len(),
        })?;

        let filtered = self.filter_pipeline.apply(frame.clone(), filters);
        let mut compositor = Compositor::for_preview(layers, self.config.preview.text_scale, &self.fonts);
        compositor.apply(filtered)
    }

    /// Render preview frame `index` with the session's own settings
    pub fn render_preview(&self, index: usize) -> Result<Frame> {
        self.preview_frame(index, &self.filters, &self.layers)
    }

    /// Source frame index shown at preview position `index`
    pub fn preview_source_index(&self, index: usize) -> Option<usize> {
        self.preview.get(index).map(Frame::source_index)
    }

    // ==========================================
    // LAYERS
    // ==========================================

    pub fn layers(&self) -> &Layers {
        &self.layers
    }

    pub fn set_canvas(&mut self, canvas: CanvasSize) {
        self.layers.canvas = canvas;
    }

    /// Set the crop from a drag on the canvas; short drags are ignored
    pub fn set_crop_drag(&mut self, start: (f64, f64), end: (f64, f64)) -> Option<CropRegion> {
        let region = CropRegion::from_drag(start, end, self.config.preview.min_crop_span)?;
        self.set_crop(region);
        Some(region)
    }

    pub fn set_crop(&mut self, region: CropRegion) {
        self.layers.crop = Some(region);
        let (x1, y1, x2, y2) = region.corners();
        self.log(format!("Crop set: ({:.0}, {:.0}) to ({:.0}, {:.0})", x1, y1, x2, y2));
    }

    pub fn reset_crop(&mut self) {
        if self.layers.crop.take().is_some() {
            self.log("Crop reset");
        }
    }

    pub fn overlays(&self) -> &[TextOverlay] {
        &self.layers.overlays
    }

    pub fn add_overlay(&mut self, overlay: TextOverlay) {
        self.log(format!("Added text '{}' at {}", overlay.text(), overlay.position()));
        self.layers.overlays.push(overlay);
    }

    pub fn remove_overlay(&mut self, index: usize) -> Option<TextOverlay> {
        if index >= self.layers.overlays.len() {
            return None;
        }
        let overlay = self.layers.overlays.remove(index);
        self.log(format!("Removed text '{}'", overlay.text()));
        Some(overlay)
    }

    pub fn clear_overlays(&mut self) {
        if !self.layers.overlays.is_empty() {
            self.layers.overlays.clear();
            self.log("Cleared all text overlays");
        }
    }

    pub fn set_watermark<P: Into<PathBuf>>(&mut self, path: P) {
        let path = path.into();
        self.log(format!("Watermark set: {}", path.display()));
        self.layers.watermark = Some(path);
    }

    pub fn clear_watermark(&mut self) {
        if self.layers.watermark.take().is_some() {
            self.log("Watermark removed");
        }
    }

    // ==========================================
    // SETTINGS
    // ==========================================

    /// Select frames `start..end`, clamped to the open video
    pub fn set_frame_range(&mut self, start: usize, end: usize) -> Option<FrameRange> {
        let total = self.video_info()?.total_frames;
        let range = FrameRange::new(start, end).clamp_to(total);
        self.settings.frame_range = Some(range);
        Some(range)
    }

    /// Expected output size for the current settings
    pub fn estimated_bytes(&self) -> Option<u64> {
        let info = self.video_info()?;
        let range = self.settings.frame_range.unwrap_or(FrameRange::full(info.total_frames));
        Some(estimate_output_bytes(info, &self.settings, range))
    }

    // ==========================================
    // JOBS
    // ==========================================

    /// Snapshot the current session into an export of the open video
    pub fn export_job<P: Into<PathBuf>>(&self, output: P) -> Result<ExportJob> {
        let video = self.video.as_ref().ok_or_else(|| VideoError::Unreadable {
            path: String::new(),
            reason: "no video is open".to_string(),
        })?;

        Ok(ExportJob {
            input: video.path.clone(),
            output: output.into(),
            settings: self.settings.clone(),
            filters: self.filters.clone(),
            layers: self.layers.clone(),
            fonts: self.fonts.clone(),
        })
    }

    /// Start an export in the background
    ///
    /// Fails with `JobInFlight` while another export or batch is running.
    /// Must be called from within a tokio runtime.
    pub fn start_export(&mut self, job: ExportJob) -> Result<JobHandle> {
        let guard = InFlight::acquire(&self.in_flight)?;
        self.log(format!("Export started: {}", job.output.display()));

        let source = self.source.clone();
        let handle = spawn_job(
            "export",
            guard,
            move |events, cancel| ExportPipeline::new(source).run(&job, events, cancel),
            JobEvent::Finished,
        );
        Ok(handle)
    }

    /// Start a batch conversion of `inputs` into `output_dir`
    pub fn start_batch<P: Into<PathBuf>>(&mut self, inputs: Vec<PathBuf>, output_dir: P) -> Result<JobHandle> {
        let guard = InFlight::acquire(&self.in_flight)?;
        let output_dir = output_dir.into();
        self.log(format!("Batch started: {} videos", inputs.len()));

        let runner = BatchRunner::new(self.source.clone(), self.config.batch.clone());
        let handle = spawn_job(
            "batch",
            guard,
            move |events, cancel| runner.run(&inputs, &output_dir, events, cancel),
            JobEvent::BatchFinished,
        );
        Ok(handle)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Note a job's terminal event in the activity log
    pub fn record(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Finished(summary) => self.log(format!(
                "Export complete: {} ({:.1} KB)",
                summary.output.display(),
                summary.output_bytes as f64 / 1024.0
            )),
            JobEvent::BatchFinished(result) => self.log(format!(
                "Batch complete: {} succeeded, {} failed",
                result.succeeded, result.failed
            )),
            JobEvent::Failed { message, .. } => self.log(format!("Export failed: {}", message)),
            JobEvent::Cancelled => self.log("Job cancelled"),
            _ => {}
        }
    }

    // ==========================================
    // ACTIVITY LOG
    // ==========================================

    pub fn activity(&self) -> &[String] {
        &self.activity
    }

    fn log<S: AsRef<str>>(&mut self, message: S) {
        let message = message.as_ref();
        info!("{}", message);
        self.activity
            .push(format!("[{}] {}", Local::now().format("%H:%M:%S"), message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{TextColor, TextPosition};
    use crate::encode::OutputFormat;
    use crate::error::ErrorKind;
    use crate::filters::Rotation;
    use crate::testing::SyntheticDecoder;
    use tempfile::tempdir;

    fn session(decoder: SyntheticDecoder) -> Session {
        Session::with_parts(
            Config::default(),
            VideoSource::with_decoder(Arc::new(decoder)),
            TextRenderer::builtin(),
        )
    }

    #[test]
    fn test_open_and_preview() {
        let mut session = session(SyntheticDecoder::new().with_video("clip.mp4", 250, 25.0, 1400, 800));
        let info = session.open_video("clip.mp4").unwrap();
        assert_eq!(info.total_frames, 250);

        let frames = session.preview_frames("clip.mp4").unwrap();
        // stride 2 over 250 frames
        assert_eq!(frames.len(), 125);
        assert_eq!(session.preview_source_index(1), Some(2));

        let rendered = session.render_preview(0).unwrap();
        assert_eq!(rendered.dimensions(), (700, 400));
        assert!(session.activity()[0].starts_with('['));
    }

    #[test]
    fn test_preview_frame_out_of_range() {
        let mut session = session(SyntheticDecoder::new().with_video("clip.mp4", 5, 25.0, 32, 32));
        session.preview_frames("clip.mp4").unwrap();
        let err = session.render_preview(5).unwrap_err();
        assert!(matches!(
            err,
            GifsmithError::Video(VideoError::FrameOutOfRange { index: 5, available: 5 })
        ));
    }

    #[test]
    fn test_preview_applies_filters_and_crop() {
        let mut session = session(SyntheticDecoder::new().with_video("clip.mp4", 3, 25.0, 140, 80));
        session.preview_frames("clip.mp4").unwrap();

        let filters = FilterSettings {
            rotation: Rotation::Cw90,
            ..Default::default()
        };
        let rotated = session.preview_frame(0, &filters, session.layers()).unwrap();
        assert_eq!(rotated.dimensions(), (80, 140));

        session.set_canvas(CanvasSize::new(140, 80));
        session.set_crop_drag((0.0, 0.0), (70.0, 40.0)).unwrap();
        let cropped = session.render_preview(0).unwrap();
        assert_eq!(cropped.dimensions(), (70, 40));

        assert!(session.set_crop_drag((0.0, 0.0), (5.0, 5.0)).is_none());
        session.reset_crop();
        assert_eq!(session.render_preview(0).unwrap().dimensions(), (140, 80));
    }

    #[test]
    fn test_overlay_and_watermark_management() {
        let mut session = session(SyntheticDecoder::new());
        session.add_overlay(TextOverlay::new("one", 30, TextPosition::Top, TextColor::WHITE).unwrap());
        session.add_overlay(TextOverlay::new("two", 30, TextPosition::Bottom, TextColor::WHITE).unwrap());
        assert_eq!(session.remove_overlay(0).unwrap().text(), "one");
        assert!(session.remove_overlay(4).is_none());
        assert_eq!(session.overlays().len(), 1);
        session.clear_overlays();
        assert!(session.overlays().is_empty());

        session.set_watermark("mark.png");
        assert!(session.layers().watermark.is_some());
        session.clear_watermark();
        assert!(session.layers().watermark.is_none());
        assert_eq!(session.activity().len(), 6);
    }

    #[test]
    fn test_frame_range_and_estimate() {
        let mut session = session(SyntheticDecoder::new().with_video("clip.mp4", 300, 30.0, 640, 480));
        assert!(session.set_frame_range(0, 10).is_none());

        session.open_video("clip.mp4").unwrap();
        assert_eq!(session.set_frame_range(250, 100), Some(FrameRange::new(250, 251)));

        session.settings.frame_range = None;
        session.settings.optimize = false;
        // 320 * 240 * 1.0 * 300
        assert_eq!(session.estimated_bytes(), Some(23_040_000));
    }

    #[tokio::test]
    async fn test_export_scenario() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.gif");
        let mut session = session(SyntheticDecoder::new().with_video("clip.mp4", 300, 30.0, 640, 480));
        session.open_video("clip.mp4").unwrap();
        session.settings = ExportSettings {
            scale: 0.5,
            color_count: 128,
            format: OutputFormat::Gif,
            ..Default::default()
        };

        let job = session.export_job(&output).unwrap();
        let mut handle = session.start_export(job).unwrap();

        let mut last_completed = 0;
        let mut terminal = None;
        while let Some(event) = handle.next_event().await {
            assert!(terminal.is_none(), "event after terminal: {:?}", event);
            match event {
                JobEvent::Progress { completed, total } => {
                    assert_eq!(total, 300);
                    assert!(completed > last_completed);
                    last_completed = completed;
                }
                event if event.is_terminal() => terminal = Some(event),
                _ => {}
            }
        }

        match terminal {
            Some(JobEvent::Finished(summary)) => {
                assert_eq!(summary.frame_count, 300);
                assert_eq!((summary.width, summary.height), (320, 240));
                assert!(summary.output_bytes > 0);
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
        assert!(std::fs::metadata(&output).unwrap().len() > 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_edits() {
        let dir = tempdir().unwrap();
        let mut session = session(SyntheticDecoder::new().with_video("clip.mp4", 6, 30.0, 40, 40));
        session.open_video("clip.mp4").unwrap();
        session.settings.scale = 1.0;

        let job = session.export_job(dir.path().join("out.gif")).unwrap();
        session.settings.scale = 0.25;
        session.add_overlay(TextOverlay::new("late", 30, TextPosition::Top, TextColor::WHITE).unwrap());

        let handle = session.start_export(job).unwrap();
        match handle.finish().await {
            Some(JobEvent::Finished(summary)) => {
                assert_eq!((summary.width, summary.height), (40, 40));
                assert!(summary.degradations.is_empty());
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_job_is_rejected_while_one_runs() {
        let dir = tempdir().unwrap();
        let mut session = session(SyntheticDecoder::new().with_video("clip.mp4", 120, 30.0, 64, 64));
        session.open_video("clip.mp4").unwrap();

        let first = session.start_export(session.export_job(dir.path().join("a.gif")).unwrap()).unwrap();
        let second = session.start_batch(vec![PathBuf::from("clip.mp4")], dir.path());
        assert!(matches!(second, Err(GifsmithError::JobInFlight)));
        assert_eq!(second.unwrap_err().kind(), ErrorKind::JobInFlight);

        first.finish().await;
        assert!(!session.is_busy());
        let again = session.start_batch(vec![PathBuf::from("clip.mp4")], dir.path()).unwrap();
        assert!(matches!(again.finish().await, Some(JobEvent::BatchFinished(_))));
    }

    #[tokio::test]
    async fn test_batch_scenario() {
        let dir = tempdir().unwrap();
        let decoder = SyntheticDecoder::new()
            .with_video("one.mp4", 8, 30.0, 24, 24)
            .with_video("two.mp4", 9, 30.0, 24, 16)
            .with_video("three.mp4", 10, 30.0, 16, 24);
        let mut session = session(decoder);

        let inputs = ["one.mp4", "two.mp4", "unreadable.mp4", "three.mp4"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let handle = session.start_batch(inputs, dir.path().join("batch")).unwrap();

        match handle.finish().await {
            Some(JobEvent::BatchFinished(result)) => {
                assert_eq!((result.succeeded, result.failed), (3, 1));
                assert_eq!(result.per_file_errors[0].0, PathBuf::from("unreadable.mp4"));
                assert!(!result.per_file_errors[0].1.is_empty());
                session.record(&JobEvent::BatchFinished(result));
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
        assert!(session.activity().last().unwrap().ends_with("3 succeeded, 1 failed"));
    }

    #[tokio::test]
    async fn test_cancelled_export_reports_cancelled() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.gif");
        let mut session = session(SyntheticDecoder::new().with_video("clip.mp4", 200, 30.0, 64, 64));
        session.open_video("clip.mp4").unwrap();

        let mut handle = session.start_export(session.export_job(&output).unwrap()).unwrap();
        handle.cancel();

        let mut terminal = None;
        while let Some(event) = handle.next_event().await {
            if event.is_terminal() {
                terminal = Some(event);
            }
        }
        // The worker may finish before it sees the flag on a fast machine
        match terminal {
            Some(JobEvent::Cancelled) => assert!(!output.exists()),
            Some(JobEvent::Finished(_)) => assert!(output.exists()),
            other => panic!("unexpected terminal event {:?}", other),
        }
    }
}

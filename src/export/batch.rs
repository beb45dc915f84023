use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compositor::scale_frame;
use crate::encode::{AnimatedImageEncoder, EncodeOptions, OutputFormat};
use crate::error::Result;
use crate::export::job::{CancelToken, EventSink};
use crate::export::pipeline::write_output;
use crate::video::{Extraction, VideoSource};

/// Fixed parameters of the batch fast path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Keep every `stride`-th frame
    pub stride: usize,
    pub scale: f64,
    pub frame_delay_ms: u32,
    /// Appended to the input stem to name each output
    pub suffix: String,
    pub optimize: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            stride: 2,
            scale: 0.5,
            frame_delay_ms: 100,
            suffix: "_batch".to_string(),
            optimize: true,
        }
    }
}

impl BatchSettings {
    /// `<dir>/<stem><suffix>.gif`
    pub fn output_path(&self, input: &Path, output_dir: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        output_dir.join(format!("{}{}.{}", stem, self.suffix, OutputFormat::Gif.extension()))
    }
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub succeeded: usize,
    pub failed: usize,
    /// Input path and reason for every failed input
    pub per_file_errors: Vec<(PathBuf, String)>,
    pub outputs: Vec<PathBuf>,
}

/// Converts many videos with fixed settings, isolating per-input failures
///
/// Batch mode skips filters, crop, overlays and quantization: each input is
/// strided, scaled and written as an optimized GIF.
pub struct BatchRunner {
    source: VideoSource,
    settings: BatchSettings,
    encoder: AnimatedImageEncoder,
}

impl BatchRunner {
    pub fn new(source: VideoSource, settings: BatchSettings) -> Self {
        Self {
            source,
            settings,
            encoder: AnimatedImageEncoder::new(),
        }
    }

    /// Convert every input into `output_dir`
    ///
    /// Only cancellation or an unusable output directory fail the batch.
    /// `cancel` is checked between inputs.
    pub fn run(
        &self,
        inputs: &[PathBuf],
        output_dir: &Path,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<BatchResult> {
        fs::create_dir_all(output_dir)?;
        events.log(format!(
            "Starting batch of {} videos into {}",
            inputs.len(),
            output_dir.display()
        ));

        let mut result = BatchResult::default();
        for (i, input) in inputs.iter().enumerate() {
            cancel.check()?;

            match self.convert(input, output_dir) {
                Ok(output) => {
                    events.log(format!("Converted {} -> {}", input.display(), output.display()));
                    result.succeeded += 1;
                    result.outputs.push(output);
                }
                Err(e) => {
                    warn!("Batch input {} failed: {}", input.display(), e);
                    events.log(format!("Failed {}: {}", input.display(), e));
                    result.failed += 1;
                    result.per_file_errors.push((input.clone(), e.to_string()));
                }
            }

            events.progress(i + 1, inputs.len());
        }

        info!(
            "Batch complete: {} succeeded, {} failed",
            result.succeeded, result.failed
        );
        Ok(result)
    }

    fn convert(&self, input: &Path, output_dir: &Path) -> Result<PathBuf> {
        let info = self.source.open(input)?;
        let extraction = Extraction::range(0, info.total_frames, self.settings.stride);
        let frames = self.source.extract(input, extraction)?;

        let scale = self.settings.scale;
        let frames = frames
            .into_par_iter()
            .map(|frame| scale_frame(frame, scale))
            .collect::<Result<Vec<_>>>()?;

        let options = EncodeOptions::new(OutputFormat::Gif, 1)
            .with_delay_ms(self.settings.frame_delay_ms)
            .with_optimize(self.settings.optimize);
        let animation = self.encoder.encode(&frames, &options)?;

        let output = self.settings.output_path(input, output_dir);
        write_output(&output, &animation)?;
        Ok(output)
    }
}

// src/video/ffmpeg.rs - sequential decoding through the ffmpeg command line tools

use std::io::{ErrorKind as IoErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Result, VideoError};
use crate::video::decoder::{FrameDecoder, FrameStream};
use crate::video::types::{Frame, VideoInfo};

/// Decoder backed by external `ffprobe` and `ffmpeg` processes
///
/// Metadata comes from `ffprobe` JSON output. Frames are decoded by an
/// `ffmpeg` child that writes packed `rgb24` frames to its stdout, which we
/// read one frame-sized chunk at a time so only the frames a caller keeps
/// are ever resident.
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self::with_binaries("ffmpeg", "ffprobe")
    }

    /// Use explicit tool locations instead of looking them up on `PATH`
    pub fn with_binaries<P: Into<PathBuf>, Q: Into<PathBuf>>(ffmpeg: P, ffprobe: Q) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Whether the ffmpeg binary can be executed
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn unreadable(path: &Path, reason: impl Into<String>) -> VideoError {
        VideoError::Unreadable {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    fn spawn_decoder(&self, path: &Path, start: usize) -> Result<Child> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path);

        if start > 0 {
            // Still decodes the leading frames, but never converts or pipes them
            cmd.args(["-vf", &format!("select=gte(n\\,{})", start)]);
        }

        cmd.args(["-vsync", "0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        cmd.spawn()
            .map_err(|e| Self::unreadable(path, format!("failed to start ffmpeg: {}", e)).into())
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        if !path.is_file() {
            return Err(Self::unreadable(path, "file does not exist").into());
        }

        let output = Command::new(&self.ffprobe)
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_streams",
                "-print_format", "json",
            ])
            .arg(path)
            .output()
            .map_err(|e| Self::unreadable(path, format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::unreadable(path, stderr.trim().to_string()).into());
        }

        let info = parse_probe_output(&output.stdout)
            .map_err(|reason| Self::unreadable(path, reason))?;

        info!(
            "Video metadata: {}x{} @ {:.2}fps, {} frames",
            info.width, info.height, info.fps, info.total_frames
        );
        Ok(info)
    }

    fn decode(&self, path: &Path) -> Result<FrameStream> {
        self.decode_from(path, 0)
    }

    fn decode_from(&self, path: &Path, start: usize) -> Result<FrameStream> {
        let info = self.probe(path)?;
        let mut child = self.spawn_decoder(path, start)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Self::unreadable(path, "ffmpeg stdout was not captured"))?;

        debug!("Started ffmpeg decode of {} at frame {}", path.display(), start);

        Ok(Box::new(RawFrameStream {
            child,
            stdout,
            width: info.width,
            height: info.height,
            next_index: start,
            path: path.to_path_buf(),
            finished: false,
        }))
    }
}

/// Reads fixed-size rgb24 frames from an ffmpeg child process
struct RawFrameStream {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    next_index: usize,
    path: PathBuf,
    finished: bool,
}

impl Iterator for RawFrameStream {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let frame_len = self.width as usize * self.height as usize * 3;
        let mut data = vec![0u8; frame_len];

        match self.stdout.read_exact(&mut data) {
            Ok(()) => {
                let index = self.next_index;
                self.next_index += 1;
                Frame::from_rgb_bytes(self.width, self.height, data, index).map(Ok)
            }
            // A short read is the container ending, possibly mid-frame
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(VideoError::DecodeFailed {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                }
                .into()))
            }
        }
    }
}

impl Drop for RawFrameStream {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            // InvalidInput means the process already exited
            if e.kind() != IoErrorKind::InvalidInput {
                warn!("Failed to stop ffmpeg decoder: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

fn parse_probe_output(json: &[u8]) -> std::result::Result<VideoInfo, String> {
    let probe: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| format!("invalid ffprobe output: {}", e))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream found".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational))
        .unwrap_or(0.0);

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<usize>().ok())
        .or_else(|| {
            let duration = stream.duration.as_deref()?.parse::<f64>().ok()?;
            (fps > 0.0).then(|| (duration * fps).round() as usize)
        })
        .unwrap_or(0);

    Ok(VideoInfo::new(total_frames, fps, width, height))
}

/// Parse ffprobe rates like `30000/1001`
fn parse_rational(value: &str) -> Option<f64> {
    let (num, den) = match value.split_once('/') {
        Some((num, den)) => (num.trim().parse::<f64>().ok()?, den.trim().parse::<f64>().ok()?),
        None => (value.trim().parse::<f64>().ok()?, 1.0),
    };

    if den == 0.0 || num <= 0.0 {
        None
    } else {
        Some(num / den)
    }
}

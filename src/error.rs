use std::fmt;

use thiserror::Error;

/// Main error type for the gifsmith library
#[derive(Error, Debug)]
pub enum GifsmithError {
    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Invalid export settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing failed at frame {index}: {reason}")]
    FrameProcessing { index: usize, reason: String },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Another export or batch job is already running")]
    JobInFlight,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Video source errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Could not read video '{path}': {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Video decoding failed for '{path}': {reason}")]
    DecodeFailed { path: String, reason: String },

    #[error("Frame index {index} is outside the {available} loaded frames")]
    FrameOutOfRange { index: usize, available: usize },
}

/// Export parameter validation errors, raised before any decode work starts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("frame rate must be positive, got {value}")]
    FrameRate { value: i64 },

    #[error("scale must be positive, got {value}")]
    Scale { value: f64 },

    #[error("color count must be within 32..=256, got {value}")]
    ColorCount { value: i64 },

    #[error("frame skip must be at least 1, got {value}")]
    FrameSkip { value: i64 },

    #[error("frame range {start}..{end} is not within 0..={total} or is empty")]
    FrameRange { start: usize, end: usize, total: usize },

    #[error("text overlay must not be empty")]
    EmptyOverlayText,
}

/// Animated image encoder errors
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("cannot encode an empty frame sequence")]
    EmptySequence,

    #[error("frame {index} is {actual_width}x{actual_height}, expected {width}x{height}")]
    MismatchedDimensions {
        index: usize,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame dimensions {width}x{height} exceed the {format} limit")]
    TooLarge { format: &'static str, width: u32, height: u32 },

    #[error("{format} encoder failed: {reason}")]
    Codec { format: &'static str, reason: String },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Unknown preset: {name}")]
    UnknownPreset { name: String },
}

/// Convenience type alias for Results using GifsmithError
pub type Result<T> = std::result::Result<T, GifsmithError>;

/// Machine-distinguishable failure category, reported with every failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    VideoUnreadable,
    InvalidSettings,
    EmptySequence,
    EncodeFailure,
    FrameProcessing,
    Cancelled,
    JobInFlight,
    Config,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VideoUnreadable => "video-unreadable",
            Self::InvalidSettings => "invalid-settings",
            Self::EmptySequence => "empty-sequence",
            Self::EncodeFailure => "encode-failure",
            Self::FrameProcessing => "frame-processing",
            Self::Cancelled => "cancelled",
            Self::JobInFlight => "job-in-flight",
            Self::Config => "config",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

impl GifsmithError {
    /// Create a per-frame processing failure
    pub fn frame<S: Into<String>>(index: usize, reason: S) -> Self {
        Self::FrameProcessing {
            index,
            reason: reason.into(),
        }
    }

    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Video(_) => ErrorKind::VideoUnreadable,
            Self::Settings(_) => ErrorKind::InvalidSettings,
            Self::Encode(EncodeError::EmptySequence) => ErrorKind::EmptySequence,
            Self::Encode(_) => ErrorKind::EncodeFailure,
            Self::Config(_) => ErrorKind::Config,
            Self::FrameProcessing { .. } => ErrorKind::FrameProcessing,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::JobInFlight => ErrorKind::JobInFlight,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Video(VideoError::Unreadable { path, .. }) => {
                format!("Could not open video '{}'. Please check the file exists and is a supported format.", path)
            }
            Self::Settings(e) => format!("Invalid export settings: {}.", e),
            Self::Encode(EncodeError::EmptySequence) => {
                "The selected frame range produced no frames to export.".to_string()
            }
            Self::JobInFlight => {
                "An export is already running. Wait for it to finish before starting another.".to_string()
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

/// A best-effort step that was skipped; the job carries on without it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// The watermark image could not be loaded or composited
    WatermarkUnavailable { path: String, reason: String },

    /// No usable font was found; text falls back to the built-in glyph set
    FontUnavailable { reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WatermarkUnavailable { path, reason } => {
                write!(f, "watermark '{}' skipped: {}", path, reason)
            }
            Self::FontUnavailable { reason } => {
                write!(f, "using built-in font: {}", reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_separates_empty_sequence_from_other_encode_errors() {
        let empty: GifsmithError = EncodeError::EmptySequence.into();
        assert_eq!(empty.kind(), ErrorKind::EmptySequence);

        let codec: GifsmithError = EncodeError::Codec {
            format: "GIF",
            reason: "boom".to_string(),
        }
        .into();
        assert_eq!(codec.kind(), ErrorKind::EncodeFailure);
    }

    #[test]
    fn test_settings_errors_are_invalid_settings() {
        let err: GifsmithError = SettingsError::ColorCount { value: 12 }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidSettings);
        assert!(err.user_message().contains("32..=256"));
    }

    #[test]
    fn test_unreadable_video_message_names_path() {
        let err: GifsmithError = VideoError::Unreadable {
            path: "missing.mp4".to_string(),
            reason: "no such file".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::VideoUnreadable);
        assert!(err.user_message().contains("missing.mp4"));
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gifsmith::{
    compositor::{text::DEFAULT_FONT_SIZE, CanvasSize, CropRegion, TextColor, TextOverlay, TextPosition},
    config::Config,
    encode::OutputFormat,
    export::{default_output_name, estimate_output_bytes, ExportPreset, FrameRange, JobEvent, JobHandle},
    filters::Rotation,
    quantize::DitherMode,
    session::Session,
};

#[derive(Parser)]
#[command(
    name = "gifsmith",
    version,
    about = "Turn video clips into animated GIF, WebP and APNG files",
    long_about = "gifsmith extracts a frame range from a video, applies filters, crops, captions and a watermark, and encodes the result as a looping GIF, WebP or APNG."
)]
struct Cli {
    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a video's metadata
    Info {
        video: PathBuf,
    },

    /// Export one video as an animation
    Export(ExportArgs),

    /// Convert many videos with the batch fast path
    Batch {
        #[arg(required = true)]
        videos: Vec<PathBuf>,

        /// Output directory
        #[arg(short = 'd', long = "dir")]
        output_dir: PathBuf,
    },

    /// List the export presets
    Presets,
}

#[derive(Args)]
struct ExportArgs {
    video: PathBuf,

    /// Output file; the extension picks the format
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format when no output file is given
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Start from a preset (twitter, instagram, discord, high-quality, small-file)
    #[arg(long)]
    preset: Option<ExportPreset>,

    #[arg(long)]
    fps: Option<u32>,

    #[arg(long)]
    scale: Option<f64>,

    /// Palette size, 32 to 256
    #[arg(long)]
    colors: Option<u16>,

    #[arg(long)]
    no_optimize: bool,

    /// Play the frames backwards
    #[arg(long)]
    reverse: bool,

    /// none or floyd-steinberg
    #[arg(long)]
    dither: Option<DitherMode>,

    /// Keep every Nth frame
    #[arg(long)]
    skip: Option<u32>,

    /// First frame to export
    #[arg(long)]
    start: Option<usize>,

    /// Frame to stop before
    #[arg(long)]
    end: Option<usize>,

    #[arg(long)]
    brightness: Option<f32>,

    #[arg(long)]
    contrast: Option<f32>,

    #[arg(long)]
    saturation: Option<f32>,

    #[arg(long)]
    grayscale: bool,

    #[arg(long)]
    sepia: bool,

    /// Clockwise rotation: 0, 90, 180 or 270
    #[arg(long, value_parser = parse_rotation)]
    rotate: Option<Rotation>,

    #[arg(long)]
    flip_h: bool,

    #[arg(long)]
    flip_v: bool,

    /// Crop box on the preview canvas: x1,y1,x2,y2
    #[arg(long, value_parser = parse_crop)]
    crop: Option<CropRegion>,

    /// Canvas the crop box refers to: WIDTHxHEIGHT
    #[arg(long, value_parser = parse_canvas)]
    canvas: Option<CanvasSize>,

    /// Caption, optionally with a position: "TEXT@bottom-right"; repeatable
    #[arg(long)]
    text: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_FONT_SIZE)]
    text_size: u32,

    #[arg(long, default_value = "#FFFFFF")]
    text_color: TextColor,

    /// Image drawn in the bottom-right corner
    #[arg(long)]
    watermark: Option<PathBuf>,
}

fn parse_rotation(s: &str) -> std::result::Result<Rotation, String> {
    let degrees: u32 = s.trim().parse().map_err(|e| format!("{}", e))?;
    Rotation::try_from(degrees)
}

fn parse_crop(s: &str) -> std::result::Result<CropRegion, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("'{}': {}", v, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let [x1, y1, x2, y2] = values[..] else {
        return Err("expected four values: x1,y1,x2,y2".to_string());
    };
    CropRegion::new(x1, y1, x2, y2).ok_or_else(|| "crop region is too small".to_string())
}

fn parse_canvas(s: &str) -> std::result::Result<CanvasSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    if width == 0 || height == 0 {
        return Err("canvas sides must be positive".to_string());
    }
    Ok(CanvasSize::new(width, height))
}

/// Split "TEXT@position"; a missing or unknown position means bottom
fn parse_caption(spec: &str) -> (String, TextPosition) {
    match spec.rsplit_once('@') {
        Some((text, position)) => {
            let position = position.parse().unwrap_or_default();
            (text.to_string(), position)
        }
        None => (spec.to_string(), TextPosition::Bottom),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting gifsmith v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => Config::default(),
    };
    config.validate()?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.processing.threads)
        .build_global()
        .context("failed to size the worker pool")?;

    match cli.command {
        Command::Info { video } => show_info(config, &video),
        Command::Export(args) => run_export(config, args).await,
        Command::Batch { videos, output_dir } => run_batch(config, videos, output_dir).await,
        Command::Presets => {
            for preset in ExportPreset::ALL {
                let v = preset.values();
                println!(
                    "{:<14} {:>3} fps  {:.1}x  {:>3} colors  optimize {}",
                    preset.name(),
                    v.frame_rate,
                    v.scale,
                    v.color_count,
                    v.optimize
                );
            }
            Ok(())
        }
    }
}

fn show_info(config: Config, video: &Path) -> Result<()> {
    let mut session = Session::new(config);
    let info = session.open_video(video)?;

    println!("File:       {}", video.display());
    println!("Resolution: {}x{}", info.width, info.height);
    println!("Frame rate: {:.2} fps", info.fps);
    println!("Frames:     {}", info.total_frames);
    println!("Duration:   {}s", info.duration_seconds);
    Ok(())
}

async fn run_export(config: Config, args: ExportArgs) -> Result<()> {
    let mut session = Session::new(config);
    let info = session.open_video(&args.video)?;

    // Export settings, preset first so explicit flags win
    if let Some(preset) = args.preset {
        session.settings.apply_preset(preset);
        info!("Using {} preset", preset);
    }
    let settings = &mut session.settings;
    if let Some(fps) = args.fps {
        settings.frame_rate = fps;
    }
    if let Some(scale) = args.scale {
        settings.scale = scale;
    }
    if let Some(colors) = args.colors {
        settings.color_count = colors;
    }
    if args.no_optimize {
        settings.optimize = false;
    }
    settings.reverse = args.reverse;
    if let Some(dither) = args.dither {
        settings.dither = dither;
    }
    if let Some(skip) = args.skip {
        settings.frame_skip = skip;
    }
    if args.start.is_some() || args.end.is_some() {
        let start = args.start.unwrap_or(0);
        let end = args.end.unwrap_or(info.total_frames);
        settings.frame_range = Some(FrameRange::new(start, end));
    }

    let output = match args.output {
        Some(output) => {
            settings.format = OutputFormat::from_path(&output);
            output
        }
        None => {
            if let Some(format) = args.format {
                settings.format = format;
            }
            default_output_name(&args.video, settings.format)
        }
    };

    // Filters
    let filters = &mut session.filters;
    filters.brightness = args.brightness.unwrap_or(1.0);
    filters.contrast = args.contrast.unwrap_or(1.0);
    filters.saturation = args.saturation.unwrap_or(1.0);
    filters.grayscale = args.grayscale;
    filters.sepia = args.sepia;
    filters.rotation = args.rotate.unwrap_or_default();
    filters.flip_horizontal = args.flip_h;
    filters.flip_vertical = args.flip_v;

    // Layers
    if let Some(canvas) = args.canvas {
        session.set_canvas(canvas);
    }
    if let Some(crop) = args.crop {
        session.set_crop(crop);
    }
    for caption in &args.text {
        let (text, position) = parse_caption(caption);
        let overlay = TextOverlay::new(text, args.text_size, position, args.text_color)
            .with_context(|| format!("invalid caption '{}'", caption))?;
        session.add_overlay(overlay);
    }
    if let Some(watermark) = args.watermark {
        session.set_watermark(watermark);
    }

    let range = session.settings.validate(&info)?;
    let estimate = estimate_output_bytes(&info, &session.settings, range);
    info!("Estimated size: {:.1} MB", estimate as f64 / (1024.0 * 1024.0));

    let job = session.export_job(&output)?;
    let handle = session.start_export(job)?;
    let terminal = follow(handle, "Exporting").await;

    match terminal {
        Some(JobEvent::Finished(summary)) => {
            println!(
                "Saved {} ({} frames, {}x{}, {:.1} KB)",
                summary.output.display(),
                summary.frame_count,
                summary.width,
                summary.height,
                summary.output_bytes as f64 / 1024.0
            );
            for degradation in &summary.degradations {
                println!("  note: {}", degradation);
            }
            Ok(())
        }
        other => report_failure(other),
    }
}

async fn run_batch(config: Config, videos: Vec<PathBuf>, output_dir: PathBuf) -> Result<()> {
    let mut session = Session::new(config);
    let handle = session.start_batch(videos, &output_dir)?;

    match follow(handle, "Converting").await {
        Some(JobEvent::BatchFinished(result)) => {
            println!("Batch complete: {} succeeded, {} failed", result.succeeded, result.failed);
            for (path, reason) in &result.per_file_errors {
                println!("  {}: {}", path.display(), reason);
            }
            if result.succeeded == 0 && result.failed > 0 {
                bail!("every input failed");
            }
            Ok(())
        }
        other => report_failure(other),
    }
}

/// Render a job's progress and return its terminal event
async fn follow(mut handle: JobHandle, message: &'static str) -> Option<JobEvent> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    let mut terminal = None;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Progress { completed, total } => {
                bar.set_length(total as u64);
                bar.set_position(completed as u64);
            }
            JobEvent::Log(line) => bar.println(line),
            JobEvent::Degraded(degradation) => warn!("{}", degradation),
            JobEvent::Started => {}
            event => terminal = Some(event),
        }
    }

    bar.finish_and_clear();
    terminal
}

fn report_failure(terminal: Option<JobEvent>) -> Result<()> {
    match terminal {
        Some(JobEvent::Failed { kind, message }) => Err(anyhow!("{} ({})", message, kind)),
        Some(JobEvent::Cancelled) => Err(anyhow!("job was cancelled")),
        Some(other) => Err(anyhow!("unexpected job result: {:?}", other)),
        None => Err(anyhow!("job ended without a result")),
    }
}

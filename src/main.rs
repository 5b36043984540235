use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use dotvid::capture::{
    total_frame_count, CaptureArgs, CaptureController, ExportStatus, TARGET_FPS,
};
use dotvid::dot_model::{validate_dot_size, RenderMode, DEFAULT_DOT_SIZE};
use dotvid::encoding::{artifact_path, pick_container, FfmpegPipe};
use dotvid::play::{FfplayTarget, PlaybackLoop};
use dotvid::render::{render_frame, PlacementJitter};
use dotvid::source::{command_available, FfmpegFrameSource, FrameSource, SourceInput};

#[derive(Debug, Parser)]
#[command(name = "dotvid")]
#[command(about = "Halftone dot video stylizer")]
#[command(version, long_version = long_version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a source and print its declared properties.
    Probe { input: String },
    /// Export the dot-transformed video (enhanced mode, frame-accurate).
    Export {
        input: String,
        #[arg(short = 'o', long = "output", default_value = "dotted-video.mp4")]
        output: PathBuf,
        #[arg(long = "dot-size", default_value_t = DEFAULT_DOT_SIZE)]
        dot_size: u32,
        #[arg(long, default_value_t = TARGET_FPS)]
        fps: u32,
        /// Skip the inter-frame pacing delay (export as fast as the
        /// encoder accepts frames).
        #[arg(long = "no-pacing")]
        no_pacing: bool,
    },
    /// Live preview (plain mode) in an ffplay window.
    Preview {
        input: String,
        #[arg(long = "dot-size", default_value_t = DEFAULT_DOT_SIZE)]
        dot_size: u32,
        /// Stop after this many seconds instead of the full duration.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Render a single frame at a timestamp to a PNG.
    Still {
        input: String,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        time: f64,
        #[arg(long = "dot-size", default_value_t = DEFAULT_DOT_SIZE)]
        dot_size: u32,
        #[arg(long, value_enum, default_value_t = ModeArg::Plain)]
        mode: ModeArg,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Plain,
    Enhanced,
}

impl From<ModeArg> for RenderMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Plain => RenderMode::Plain,
            ModeArg::Enhanced => RenderMode::Enhanced,
        }
    }
}

fn long_version() -> String {
    match option_env!("DOTVID_GIT_HASH") {
        Some(hash) => format!("{} ({hash})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_owned(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Probe { input } => run_probe(&input),
        Commands::Export {
            input,
            output,
            dot_size,
            fps,
            no_pacing,
        } => run_export(&input, &output, dot_size, fps, !no_pacing),
        Commands::Preview {
            input,
            dot_size,
            duration,
        } => run_preview(&input, dot_size, duration),
        Commands::Still {
            input,
            output,
            time,
            dot_size,
            mode,
        } => run_still(&input, &output, time, dot_size, mode.into()),
    }
}

fn run_probe(input: &str) -> Result<()> {
    let source = FfmpegFrameSource::open(SourceInput::parse(input))?;
    println!(
        "OK: {} ({}x{}, {:.2}s, {} frames @ {} fps)",
        input,
        source.width(),
        source.height(),
        source.duration_seconds(),
        total_frame_count(source.duration_seconds(), TARGET_FPS),
        TARGET_FPS
    );
    Ok(())
}

fn run_export(
    input: &str,
    output: &std::path::Path,
    dot_size: u32,
    fps: u32,
    pacing: bool,
) -> Result<()> {
    validate_dot_size(dot_size)?;
    let mut source = FfmpegFrameSource::open(SourceInput::parse(input))?;
    let container = pick_container()?;
    let path = artifact_path(output, container);
    let total = total_frame_count(source.duration_seconds(), fps);

    eprintln!(
        "[dotvid] exporting {} -> {} ({}x{}, {} frames @ {} fps)",
        input,
        path.display(),
        source.width(),
        source.height(),
        total,
        fps
    );

    let mut controller = CaptureController::new();
    let mut args = CaptureArgs::new(dot_size, fps);
    args.pacing = pacing;

    let mut last_percent = None;
    let summary = controller.run(
        &mut source,
        &args,
        |width, height| FfmpegPipe::spawn(width, height, fps, container, &path),
        |status| match status {
            ExportStatus::Processing { percent } => {
                if last_percent != Some(*percent) {
                    eprintln!("[dotvid] processing {percent}%");
                    last_percent = Some(*percent);
                }
            }
            ExportStatus::Error { message } => {
                eprintln!("[dotvid] export failed: {message} (fix the input and retry)");
            }
            ExportStatus::Idle => {}
        },
    )?;

    println!("Wrote {} ({} frames)", path.display(), summary.frames_written);
    Ok(())
}

fn run_preview(input: &str, dot_size: u32, duration: Option<f64>) -> Result<()> {
    if !command_available("ffplay") {
        bail!("ffplay not found; install ffmpeg to use preview");
    }
    let mut source = FfmpegFrameSource::open(SourceInput::parse(input))?;
    eprintln!(
        "[dotvid] preview {} ({}x{} @ {} fps, dot size {})",
        input,
        source.width(),
        source.height(),
        TARGET_FPS,
        dot_size
    );

    let target = FfplayTarget::new(TARGET_FPS);
    let mut playback = PlaybackLoop::new(&mut source, target, dot_size, TARGET_FPS)?;
    playback.start()?;
    playback.run(duration)?;
    Ok(())
}

fn run_still(
    input: &str,
    output: &std::path::Path,
    time: f64,
    dot_size: u32,
    mode: RenderMode,
) -> Result<()> {
    validate_dot_size(dot_size)?;
    let mut source = FfmpegFrameSource::open(SourceInput::parse(input))?;
    source.seek_to(time)?;
    let frame = source.current_frame()?;

    let mut surface = tiny_skia::Pixmap::new(frame.width(), frame.height())
        .ok_or_else(|| anyhow!("failed to allocate render surface"))?;
    let mut jitter = PlacementJitter::from_clock();
    render_frame(&frame, dot_size, mode, &mut jitter, &mut surface)?;
    surface
        .save_png(output)
        .with_context(|| format!("failed writing {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}

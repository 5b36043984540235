//! Encoder feed: rawvideo RGBA frames piped into an ffmpeg process on a
//! worker thread. The capture pipeline talks to it through `FrameSink` so
//! tests can substitute an in-memory sink.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::error::DotvidError;

/// Fixed target bitrate for exports.
pub const TARGET_BITRATE: &str = "12M";
const FRAME_CHANNEL_CAPACITY: usize = 4;
const STDERR_TAIL_CHARS: usize = 500;

/// Output container/codec pairs, in preference order: H.264/MP4 when the
/// platform encoder supports it, VP9/WebM as the compatible fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Webm,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }

    pub fn codec(self) -> &'static str {
        match self {
            Self::Mp4 => "libx264",
            Self::Webm => "libvpx-vp9",
        }
    }
}

/// Chooses a container from `ffmpeg -encoders` output.
pub fn container_from_encoders(listing: &str) -> Option<Container> {
    if listing.contains("libx264") {
        Some(Container::Mp4)
    } else if listing.contains("libvpx-vp9") {
        Some(Container::Webm)
    } else {
        None
    }
}

/// Queries the local ffmpeg for a supported encoder. Failure here is an
/// encoder-init failure, reported before any frame work starts.
pub fn pick_container() -> Result<Container, DotvidError> {
    let output = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-encoders")
        .stderr(Stdio::null())
        .output()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                DotvidError::Encoding("ffmpeg executable not found; install ffmpeg".to_owned())
            } else {
                DotvidError::Encoding(format!("failed to query ffmpeg encoders: {error}"))
            }
        })?;
    let listing = String::from_utf8_lossy(&output.stdout);
    container_from_encoders(&listing).ok_or_else(|| {
        DotvidError::Encoding("ffmpeg supports neither libx264 nor libvpx-vp9".to_owned())
    })
}

/// The artifact filename always reflects the chosen container.
pub fn artifact_path(requested: &Path, container: Container) -> PathBuf {
    requested.with_extension(container.extension())
}

/// One frame's worth of encoder input per call; `finish` assembles the final
/// playable file, `abort` guarantees no partial artifact survives.
pub trait FrameSink {
    fn write_frame(&mut self, rgba: Vec<u8>) -> Result<(), DotvidError>;

    fn finish(self) -> Result<(), DotvidError>
    where
        Self: Sized;

    fn abort(self)
    where
        Self: Sized;
}

pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<(), DotvidError>>>,
    output_path: PathBuf,
}

impl FfmpegPipe {
    pub fn spawn(
        width: u32,
        height: u32,
        fps: u32,
        container: Container,
        output_path: &Path,
    ) -> Result<Self, DotvidError> {
        let size = format!("{width}x{height}");
        let fps = fps.to_string();
        let output_path = output_path.to_path_buf();
        let worker_output = output_path.clone();
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(FRAME_CHANNEL_CAPACITY);

        let worker = thread::Builder::new()
            .name("dotvid-ffmpeg-encoder".to_owned())
            .spawn(move || run_encoder_process(receiver, &size, &fps, container, &worker_output))
            .map_err(|error| {
                DotvidError::Encoding(format!("failed to spawn encoder thread: {error}"))
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            output_path,
        })
    }

    fn join_worker(&mut self) -> Result<(), DotvidError> {
        drop(self.sender.take());
        match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(DotvidError::Encoding(
                    "encoder worker thread panicked".to_owned(),
                )),
            },
            None => Ok(()),
        }
    }
}

impl FrameSink for FfmpegPipe {
    fn write_frame(&mut self, rgba: Vec<u8>) -> Result<(), DotvidError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| DotvidError::Encoding("encoder already finalized".to_owned()))?;
        sender
            .send(rgba)
            .map_err(|_| DotvidError::Encoding("encoder stopped accepting frames".to_owned()))
    }

    fn finish(mut self) -> Result<(), DotvidError> {
        let result = self.join_worker();
        if result.is_err() {
            let _ = std::fs::remove_file(&self.output_path);
        }
        result
    }

    fn abort(mut self) {
        let _ = self.join_worker();
        let _ = std::fs::remove_file(&self.output_path);
    }
}

fn run_encoder_process(
    receiver: mpsc::Receiver<Vec<u8>>,
    size: &str,
    fps: &str,
    container: Container,
    output_path: &Path,
) -> Result<(), DotvidError> {
    let mut command = Command::new("ffmpeg");
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgba")
        .arg("-s:v")
        .arg(size)
        .arg("-r")
        .arg(fps)
        .arg("-i")
        .arg("-")
        .arg("-an")
        .arg("-c:v")
        .arg(container.codec())
        .arg("-b:v")
        .arg(TARGET_BITRATE)
        .arg("-pix_fmt")
        .arg("yuv420p");
    if container == Container::Mp4 {
        command.arg("-movflags").arg("+faststart");
    }
    let mut child = command
        .arg(output_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                DotvidError::Encoding("ffmpeg executable not found; install ffmpeg".to_owned())
            } else {
                DotvidError::Encoding(format!("failed to spawn ffmpeg encoder: {error}"))
            }
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| DotvidError::Encoding("failed to capture ffmpeg stdin".to_owned()))?;
    let mut stderr_pipe = child.stderr.take();

    while let Ok(frame) = receiver.recv() {
        stdin
            .write_all(&frame)
            .map_err(|error| DotvidError::Encoding(format!("failed writing frame: {error}")))?;
    }

    stdin
        .flush()
        .map_err(|error| DotvidError::Encoding(format!("failed flushing encoder: {error}")))?;
    drop(stdin);

    let status = child
        .wait()
        .map_err(|error| DotvidError::Encoding(format!("failed waiting for ffmpeg: {error}")))?;
    if !status.success() {
        let tail = read_stderr_tail(&mut stderr_pipe);
        return Err(DotvidError::Encoding(format!(
            "ffmpeg exited with {status}: {tail}"
        )));
    }
    Ok(())
}

fn read_stderr_tail(stderr: &mut Option<std::process::ChildStderr>) -> String {
    let Some(mut pipe) = stderr.take() else {
        return String::new();
    };
    let mut buffer = Vec::new();
    if pipe.read_to_end(&mut buffer).is_err() {
        return String::new();
    }
    let text = String::from_utf8_lossy(&buffer);
    let chars = text.chars().collect::<Vec<_>>();
    let start = chars.len().saturating_sub(STDERR_TAIL_CHARS);
    chars[start..].iter().collect::<String>().trim().to_owned()
}

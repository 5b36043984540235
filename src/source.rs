//! Frame source adapter: wraps seek + decode of a media source behind a
//! trait so the capture pipeline and the playback loop share one contract.
//!
//! The real implementation shells out to `ffprobe`/`ffmpeg` over pipes with
//! bounded waits. The decode position is a single mutable cursor; only one
//! stage may issue seeks at a time, which `&mut self` enforces.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DotvidError;
use crate::frame::{FrameBuffer, BYTES_PER_PIXEL};

pub const MAX_SOURCE_BYTES: u64 = 500 * 1024 * 1024;
/// Bounded wait for the initial probe to report the source ready.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(10);
/// Bounded wait for any single seek+decode to produce its frame.
pub const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// A video source, either on disk or remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    File(PathBuf),
    Url(String),
}

impl SourceInput {
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        if value.starts_with("http://") || value.starts_with("https://") {
            Self::Url(value.to_owned())
        } else {
            Self::File(PathBuf::from(value))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
        }
    }

    fn ffmpeg_arg(&self) -> std::ffi::OsString {
        match self {
            Self::File(path) => path.as_os_str().to_owned(),
            Self::Url(url) => url.clone().into(),
        }
    }
}

/// External collaborator contract: `seek_to` resolves only once the frame at
/// the timestamp is decoded; `current_frame` is valid only after a seek.
pub trait FrameSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn duration_seconds(&self) -> f64;
    fn seek_to(&mut self, timestamp: f64) -> Result<(), DotvidError>;
    fn current_frame(&self) -> Result<FrameBuffer, DotvidError>;
}

/// What the probe declared about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedMedia {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
    pub declared_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
}

/// Interprets `ffprobe -print_format json` output. The source is accepted
/// only if it declares a video stream with positive dimensions and duration.
pub fn parse_probe(json: &str) -> Result<ProbedMedia, DotvidError> {
    let document: ProbeDocument = serde_json::from_str(json)
        .map_err(|error| DotvidError::MediaReadiness(format!("malformed probe output: {error}")))?;

    let video = document
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| {
            DotvidError::InputValidation("source does not contain a video stream".to_owned())
        })?;
    let (Some(width), Some(height)) = (video.width, video.height) else {
        return Err(DotvidError::InputValidation(
            "video stream has no declared dimensions".to_owned(),
        ));
    };
    if width == 0 || height == 0 {
        return Err(DotvidError::InputValidation(format!(
            "video stream declares empty dimensions {width}x{height}"
        )));
    }

    let duration_seconds = video
        .duration
        .as_deref()
        .or_else(|| {
            document
                .format
                .as_ref()
                .and_then(|format| format.duration.as_deref())
        })
        .and_then(|raw| raw.parse::<f64>().ok())
        .unwrap_or(0.0);
    if !(duration_seconds > 0.0) {
        return Err(DotvidError::InputValidation(
            "source declares no playable duration".to_owned(),
        ));
    }

    let declared_bytes = document
        .format
        .as_ref()
        .and_then(|format| format.size.as_deref())
        .and_then(|raw| raw.parse::<u64>().ok());

    Ok(ProbedMedia {
        width,
        height,
        duration_seconds,
        declared_bytes,
    })
}

pub fn check_declared_size(media: &ProbedMedia) -> Result<(), DotvidError> {
    if let Some(bytes) = media.declared_bytes {
        if bytes > MAX_SOURCE_BYTES {
            return Err(DotvidError::InputValidation(format!(
                "source is {bytes} bytes, which exceeds the 500 MiB limit"
            )));
        }
    }
    Ok(())
}

/// Rejects bad inputs up front, before any process is spawned. Rejection
/// leaves no state behind.
pub fn validate_input(input: &SourceInput) -> Result<(), DotvidError> {
    match input {
        SourceInput::File(path) => {
            let metadata = std::fs::metadata(path).map_err(|_| {
                DotvidError::InputValidation(format!("source not found: {}", path.display()))
            })?;
            if !metadata.is_file() {
                return Err(DotvidError::InputValidation(format!(
                    "source is not a file: {}",
                    path.display()
                )));
            }
            if metadata.len() > MAX_SOURCE_BYTES {
                return Err(DotvidError::InputValidation(format!(
                    "source is {} bytes, which exceeds the 500 MiB limit",
                    metadata.len()
                )));
            }
            Ok(())
        }
        // Remote sources carry no local size; the probe's declared size is
        // checked after open.
        SourceInput::Url(_) => Ok(()),
    }
}

/// ffmpeg-backed frame source: one probe at open, one short-lived decode
/// process per seek. Frames are copied out, never aliased.
pub struct FfmpegFrameSource {
    input: SourceInput,
    width: u32,
    height: u32,
    duration_seconds: f64,
    current: Option<FrameBuffer>,
}

impl FfmpegFrameSource {
    pub fn open(input: SourceInput) -> Result<Self, DotvidError> {
        validate_input(&input)?;
        let media = probe_source(&input)?;
        check_declared_size(&media)?;
        Ok(Self {
            input,
            width: media.width,
            height: media.height,
            duration_seconds: media.duration_seconds,
            current: None,
        })
    }
}

impl FrameSource for FfmpegFrameSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    fn seek_to(&mut self, timestamp: f64) -> Result<(), DotvidError> {
        if !timestamp.is_finite() || timestamp < 0.0 {
            return Err(DotvidError::InputValidation(format!(
                "seek timestamp {timestamp} is not a valid time"
            )));
        }
        let data = decode_frame_at(&self.input, timestamp, self.width, self.height)?;
        self.current = Some(FrameBuffer::from_rgba(self.width, self.height, data)?);
        Ok(())
    }

    fn current_frame(&self) -> Result<FrameBuffer, DotvidError> {
        self.current.clone().ok_or_else(|| {
            DotvidError::MediaReadiness("no frame decoded yet; seek first".to_owned())
        })
    }
}

fn probe_source(input: &SourceInput) -> Result<ProbedMedia, DotvidError> {
    let mut child = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(input.ffmpeg_arg())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|error| {
            DotvidError::MediaReadiness(format!("failed to spawn ffprobe: {error}"))
        })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| DotvidError::MediaReadiness("failed to capture ffprobe stdout".to_owned()))?;
    let (sender, receiver) = mpsc::channel::<std::io::Result<String>>();
    let reader = thread::Builder::new()
        .name("dotvid-ffprobe".to_owned())
        .spawn(move || {
            let mut json = String::new();
            let result = stdout.read_to_string(&mut json).map(|_| json);
            let _ = sender.send(result);
        })
        .map_err(|error| {
            DotvidError::MediaReadiness(format!("failed to spawn probe reader: {error}"))
        })?;

    let json = match receiver.recv_timeout(LOAD_TIMEOUT) {
        Ok(Ok(json)) => json,
        Ok(Err(error)) => {
            reap(&mut child);
            let _ = reader.join();
            return Err(DotvidError::MediaReadiness(format!(
                "failed reading ffprobe output: {error}"
            )));
        }
        Err(_) => {
            reap(&mut child);
            let _ = reader.join();
            return Err(DotvidError::MediaReadiness(format!(
                "source did not become ready within {}s",
                LOAD_TIMEOUT.as_secs()
            )));
        }
    };
    let _ = reader.join();

    let status = child.wait().map_err(|error| {
        DotvidError::MediaReadiness(format!("failed waiting for ffprobe: {error}"))
    })?;
    if !status.success() {
        return Err(DotvidError::MediaReadiness(format!(
            "ffprobe failed with status {status} for {}",
            input.describe()
        )));
    }

    parse_probe(&json)
}

fn decode_frame_at(
    input: &SourceInput,
    timestamp: f64,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, DotvidError> {
    let size = format!("{width}x{height}");
    let mut child = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-ss")
        .arg(format!("{timestamp:.6}"))
        .arg("-i")
        .arg(input.ffmpeg_arg())
        .arg("-frames:v")
        .arg("1")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgba")
        .arg("-s")
        .arg(size)
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|error| {
            DotvidError::MediaReadiness(format!("failed to spawn ffmpeg decoder: {error}"))
        })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| DotvidError::MediaReadiness("failed to capture ffmpeg stdout".to_owned()))?;
    let frame_size = width as usize * height as usize * BYTES_PER_PIXEL;
    let (sender, receiver) = mpsc::channel::<std::io::Result<Vec<u8>>>();
    let reader = thread::Builder::new()
        .name("dotvid-frame-decode".to_owned())
        .spawn(move || {
            let mut buffer = vec![0u8; frame_size];
            let result = stdout.read_exact(&mut buffer).map(|_| buffer);
            let _ = sender.send(result);
        })
        .map_err(|error| {
            DotvidError::MediaReadiness(format!("failed to spawn decode reader: {error}"))
        })?;

    let outcome = receiver.recv_timeout(SEEK_TIMEOUT);
    reap(&mut child);
    let _ = reader.join();

    match outcome {
        Ok(Ok(buffer)) => Ok(buffer),
        Ok(Err(error)) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(DotvidError::MediaReadiness(format!(
                "no decodable frame at {timestamp:.3}s"
            )))
        }
        Ok(Err(error)) => Err(DotvidError::MediaReadiness(format!(
            "failed reading decoded frame: {error}"
        ))),
        Err(_) => Err(DotvidError::MediaReadiness(format!(
            "seek to {timestamp:.3}s timed out after {}s",
            SEEK_TIMEOUT.as_secs()
        ))),
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Availability check used by commands that want a friendlier message than a
/// spawn error.
pub fn command_available(name: &str) -> bool {
    Command::new(name)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        check_declared_size, parse_probe, validate_input, SourceInput, MAX_SOURCE_BYTES,
    };
    use crate::error::DotvidError;

    #[test]
    fn parse_distinguishes_urls_from_paths() {
        assert_eq!(
            SourceInput::parse("https://example.com/clip.mp4"),
            SourceInput::Url("https://example.com/clip.mp4".to_owned())
        );
        assert_eq!(
            SourceInput::parse("clips/input.mp4"),
            SourceInput::File(PathBuf::from("clips/input.mp4"))
        );
    }

    #[test]
    fn missing_file_is_an_input_validation_error() {
        let input = SourceInput::File(PathBuf::from("definitely-not-here.mp4"));
        match validate_input(&input) {
            Err(DotvidError::InputValidation(message)) => {
                assert!(message.contains("not found"), "got: {message}")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        file.as_file()
            .set_len(MAX_SOURCE_BYTES + 1)
            .expect("sparse grow");
        let input = SourceInput::File(file.path().to_path_buf());
        match validate_input(&input) {
            Err(DotvidError::InputValidation(message)) => {
                assert!(message.contains("500 MiB"), "got: {message}")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn probe_with_video_stream_parses() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "duration": "2.5"},
                {"codec_type": "video", "width": 640, "height": 360, "duration": "2.0"}
            ],
            "format": {"duration": "2.1", "size": "1048576"}
        }"#;
        let media = parse_probe(json).expect("probe parses");
        assert_eq!(media.width, 640);
        assert_eq!(media.height, 360);
        assert!((media.duration_seconds - 2.0).abs() < 1e-9);
        assert_eq!(media.declared_bytes, Some(1_048_576));
        assert!(check_declared_size(&media).is_ok());
    }

    #[test]
    fn probe_duration_falls_back_to_format() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 320, "height": 240}],
            "format": {"duration": "4.75"}
        }"#;
        let media = parse_probe(json).expect("probe parses");
        assert!((media.duration_seconds - 4.75).abs() < 1e-9);
    }

    #[test]
    fn probe_without_video_stream_is_rejected() {
        let json = r#"{"streams": [{"codec_type": "audio", "duration": "3.0"}]}"#;
        assert!(matches!(
            parse_probe(json),
            Err(DotvidError::InputValidation(_))
        ));
    }

    #[test]
    fn probe_without_duration_is_rejected() {
        let json = r#"{"streams": [{"codec_type": "video", "width": 64, "height": 64}]}"#;
        assert!(matches!(
            parse_probe(json),
            Err(DotvidError::InputValidation(_))
        ));
    }

    #[test]
    fn declared_size_over_limit_is_rejected() {
        let json = format!(
            r#"{{
                "streams": [{{"codec_type": "video", "width": 64, "height": 64, "duration": "1.0"}}],
                "format": {{"size": "{}"}}
            }}"#,
            MAX_SOURCE_BYTES + 1
        );
        let media = parse_probe(&json).expect("probe parses");
        assert!(matches!(
            check_declared_size(&media),
            Err(DotvidError::InputValidation(_))
        ));
    }
}

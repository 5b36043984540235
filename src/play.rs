//! Live playback loop: cooperative, cancellable, one plain-mode render per
//! tick against the presentation surface. Shares the rendering contract
//! with the capture pipeline but never the same surface or source cursor.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tiny_skia::Pixmap;

use crate::dot_model::{validate_dot_size, RenderMode};
use crate::error::DotvidError;
use crate::render::{render_frame, PlacementJitter};
use crate::source::FrameSource;

/// Where live frames go: a window, a pipe, a test collector.
pub trait PresentTarget {
    fn resize(&mut self, width: u32, height: u32) -> Result<(), DotvidError>;
    fn present(&mut self, surface: &Pixmap) -> Result<(), DotvidError>;
}

/// Single-threaded cooperative loop. Starting renders one frame
/// synchronously before scheduling ticks; stopping cancels the pending
/// tick; any tick error stops the loop and clears scheduling state.
pub struct PlaybackLoop<'a, S: FrameSource, P: PresentTarget> {
    source: &'a mut S,
    target: P,
    dot_size: u32,
    fps: u32,
    surface: Pixmap,
    jitter: PlacementJitter,
    position: f64,
    is_playing: bool,
    next_tick_at: Option<Instant>,
}

impl<'a, S: FrameSource, P: PresentTarget> PlaybackLoop<'a, S, P> {
    pub fn new(
        source: &'a mut S,
        mut target: P,
        dot_size: u32,
        fps: u32,
    ) -> Result<Self, DotvidError> {
        validate_dot_size(dot_size)?;
        if fps == 0 {
            return Err(DotvidError::InputValidation(
                "playback frame rate must be positive".to_owned(),
            ));
        }
        let width = source.width();
        let height = source.height();
        let surface = Pixmap::new(width, height).ok_or_else(|| {
            DotvidError::Render(format!(
                "failed to allocate {width}x{height} presentation surface"
            ))
        })?;
        target.resize(width, height)?;
        Ok(Self {
            source,
            target,
            dot_size,
            fps,
            surface,
            jitter: PlacementJitter::seeded(1),
            position: 0.0,
            is_playing: false,
            next_tick_at: None,
        })
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn has_pending_tick(&self) -> bool {
        self.next_tick_at.is_some()
    }

    /// Takes effect on the next rendered frame.
    pub fn set_dot_size(&mut self, dot_size: u32) -> Result<(), DotvidError> {
        validate_dot_size(dot_size)?;
        self.dot_size = dot_size;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DotvidError> {
        self.is_playing = true;
        if let Err(error) = self.render_current() {
            self.stop();
            return Err(error);
        }
        self.position += self.frame_interval();
        self.next_tick_at = Some(Instant::now() + self.tick_delay());
        Ok(())
    }

    pub fn stop(&mut self) {
        self.is_playing = false;
        self.next_tick_at = None;
    }

    /// Runs ticks until stopped, the end position is reached, or a tick
    /// fails. `max_seconds` bounds the run below the source duration.
    pub fn run(&mut self, max_seconds: Option<f64>) -> Result<(), DotvidError> {
        let duration = self.source.duration_seconds();
        let end = max_seconds.unwrap_or(duration).min(duration);

        while self.is_playing && self.position < end {
            if let Some(deadline) = self.next_tick_at {
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
            }
            if let Err(error) = self.tick() {
                self.stop();
                return Err(error);
            }
        }
        self.stop();
        Ok(())
    }

    fn tick(&mut self) -> Result<(), DotvidError> {
        self.render_current()?;
        self.position += self.frame_interval();
        self.next_tick_at = Some(Instant::now() + self.tick_delay());
        Ok(())
    }

    fn render_current(&mut self) -> Result<(), DotvidError> {
        // Presentation surface follows the source dimensions.
        let width = self.source.width();
        let height = self.source.height();
        if self.surface.width() != width || self.surface.height() != height {
            self.surface = Pixmap::new(width, height).ok_or_else(|| {
                DotvidError::Render(format!(
                    "failed to allocate {width}x{height} presentation surface"
                ))
            })?;
            self.target.resize(width, height)?;
        }

        self.source.seek_to(self.position)?;
        let frame = self.source.current_frame()?;
        render_frame(
            &frame,
            self.dot_size,
            RenderMode::Plain,
            &mut self.jitter,
            &mut self.surface,
        )?;
        self.target.present(&self.surface)
    }

    fn frame_interval(&self) -> f64 {
        1.0 / f64::from(self.fps)
    }

    fn tick_delay(&self) -> Duration {
        Duration::from_secs_f64(self.frame_interval())
    }
}

/// Presentation surface backed by an `ffplay` window fed raw RGBA frames.
pub struct FfplayTarget {
    fps: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfplayTarget {
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            child: None,
            stdin: None,
        }
    }

    fn shutdown(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl PresentTarget for FfplayTarget {
    fn resize(&mut self, width: u32, height: u32) -> Result<(), DotvidError> {
        self.shutdown();
        let mut child = Command::new("ffplay")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-window_title")
            .arg("dotvid preview")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pixel_format")
            .arg("rgba")
            .arg("-video_size")
            .arg(format!("{width}x{height}"))
            .arg("-framerate")
            .arg(self.fps.to_string())
            .arg("-i")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| {
                DotvidError::Render(format!("failed to spawn ffplay preview: {error}"))
            })?;
        self.stdin = child.stdin.take();
        self.child = Some(child);
        Ok(())
    }

    fn present(&mut self, surface: &Pixmap) -> Result<(), DotvidError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DotvidError::Render("preview window is not open".to_owned()))?;
        stdin
            .write_all(surface.data())
            .map_err(|error| DotvidError::Render(format!("preview window closed: {error}")))
    }
}

impl Drop for FfplayTarget {
    fn drop(&mut self) {
        self.shutdown();
    }
}

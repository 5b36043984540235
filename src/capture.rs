//! Capture pipeline: drives the halftone renderer once per output frame at
//! fixed timestamps, feeds the encoder, and finalizes a playable file.
//!
//! State machine: Idle → Initializing → Encoding → Finalizing →
//! {Completed | Failed} → Idle. Any per-frame failure aborts the whole
//! session; a partial export is never finalized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tiny_skia::Pixmap;

use crate::dot_model::{validate_dot_size, RenderMode};
use crate::encoding::FrameSink;
use crate::error::DotvidError;
use crate::render::{render_frame, PlacementJitter};
use crate::source::FrameSource;

pub const TARGET_FPS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Initializing,
    Encoding,
    Finalizing,
    Completed,
    Failed,
}

/// Progress contract exposed to the UI layer: a pure state+payload pair,
/// decoupled from rendering internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    /// Ready to start (also emitted after a successful finalize).
    Idle,
    Processing { percent: u8 },
    /// Terminal failure; the session has been reset and may be retried.
    Error { message: String },
}

/// Cooperative cancellation for an in-flight session. Checked once per
/// frame, so an abort halts before the next seek is issued.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CaptureArgs {
    pub dot_size: u32,
    pub fps: u32,
    /// Inter-frame pacing delay (~1000/fps ms) to respect encoder
    /// backpressure. Tests turn it off.
    pub pacing: bool,
    pub cancel: CancelToken,
}

impl CaptureArgs {
    pub fn new(dot_size: u32, fps: u32) -> Self {
        Self {
            dot_size,
            fps,
            pacing: true,
            cancel: CancelToken::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames_written: u32,
    pub width: u32,
    pub height: u32,
}

/// Total output frames for a source duration at the target rate.
pub fn total_frame_count(duration_seconds: f64, fps: u32) -> u32 {
    (duration_seconds * f64::from(fps)).ceil() as u32
}

/// Owns the session lifecycle. One controller, at most one active session;
/// starting another while one is active is rejected without touching the
/// active session's progress.
pub struct CaptureController {
    state: CaptureState,
    total_frames: u32,
    current_frame: u32,
}

impl CaptureController {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            total_frames: 0,
            current_frame: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// (current frame index, total frames) of the active session.
    pub fn progress(&self) -> (u32, u32) {
        (self.current_frame, self.total_frames)
    }

    /// Claims the controller for a new session. Rejected unless idle.
    pub fn begin_session(&mut self, total_frames: u32) -> Result<(), DotvidError> {
        if self.state != CaptureState::Idle {
            return Err(DotvidError::InputValidation(
                "a capture session is already active".to_owned(),
            ));
        }
        self.state = CaptureState::Initializing;
        self.total_frames = total_frames;
        self.current_frame = 0;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = CaptureState::Idle;
        self.total_frames = 0;
        self.current_frame = 0;
    }

    /// Runs a full capture session: every frame in `[0, total)` in strictly
    /// increasing timestamp order, rendered in enhanced mode into an
    /// isolated capture surface. `make_sink` is invoked during
    /// initialization so encoder-init failures follow the same Failed path
    /// as everything else.
    pub fn run<S, K, M, F>(
        &mut self,
        source: &mut S,
        args: &CaptureArgs,
        make_sink: M,
        mut observer: F,
    ) -> Result<CaptureSummary, DotvidError>
    where
        S: FrameSource,
        K: FrameSink,
        M: FnOnce(u32, u32) -> Result<K, DotvidError>,
        F: FnMut(&ExportStatus),
    {
        self.begin_session(total_frame_count(source.duration_seconds(), args.fps))?;

        match self.drive(source, args, make_sink, &mut observer) {
            Ok(summary) => {
                self.state = CaptureState::Completed;
                observer(&ExportStatus::Idle);
                self.reset();
                Ok(summary)
            }
            Err(error) => {
                self.state = CaptureState::Failed;
                observer(&ExportStatus::Error {
                    message: error.to_string(),
                });
                self.reset();
                Err(error)
            }
        }
    }

    fn drive<S, K, M, F>(
        &mut self,
        source: &mut S,
        args: &CaptureArgs,
        make_sink: M,
        observer: &mut F,
    ) -> Result<CaptureSummary, DotvidError>
    where
        S: FrameSource,
        K: FrameSink,
        M: FnOnce(u32, u32) -> Result<K, DotvidError>,
        F: FnMut(&ExportStatus),
    {
        validate_dot_size(args.dot_size)?;
        if args.fps == 0 {
            return Err(DotvidError::InputValidation(
                "target frame rate must be positive".to_owned(),
            ));
        }
        let width = source.width();
        let height = source.height();
        if width == 0 || height == 0 {
            return Err(DotvidError::InputValidation(format!(
                "source has no pixels ({width}x{height})"
            )));
        }
        if self.total_frames == 0 {
            return Err(DotvidError::InputValidation(
                "source duration yields zero output frames".to_owned(),
            ));
        }

        // Isolated rendering surface, distinct from any live-preview surface.
        let mut surface = Pixmap::new(width, height).ok_or_else(|| {
            DotvidError::Render(format!("failed to allocate {width}x{height} capture surface"))
        })?;
        let mut sink = make_sink(width, height)?;
        let mut jitter = PlacementJitter::from_clock();
        let pacing_delay = Duration::from_millis(u64::from(1000 / args.fps));

        self.state = CaptureState::Encoding;
        for frame_index in 0..self.total_frames {
            self.current_frame = frame_index;
            if args.cancel.is_cancelled() {
                sink.abort();
                return Err(DotvidError::Cancelled(format!(
                    "capture aborted before frame {frame_index}"
                )));
            }

            let step = encode_one_frame(
                source,
                args,
                frame_index,
                self.total_frames,
                &mut jitter,
                &mut surface,
                &mut sink,
            );
            if let Err(error) = step {
                sink.abort();
                return Err(error);
            }

            observer(&ExportStatus::Processing {
                percent: progress_percent(frame_index, self.total_frames),
            });
            if args.pacing {
                thread::sleep(pacing_delay);
            }
        }

        self.state = CaptureState::Finalizing;
        sink.finish()?;
        Ok(CaptureSummary {
            frames_written: self.total_frames,
            width,
            height,
        })
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}

fn progress_percent(frame_index: u32, total_frames: u32) -> u8 {
    (f64::from(frame_index) / f64::from(total_frames) * 100.0).round() as u8
}

/// One frame's worth of work, each step an explicit result the state
/// machine aggregates: seek, copy out, render, feed the encoder.
fn encode_one_frame<S, K>(
    source: &mut S,
    args: &CaptureArgs,
    frame_index: u32,
    total_frames: u32,
    jitter: &mut PlacementJitter,
    surface: &mut Pixmap,
    sink: &mut K,
) -> Result<(), DotvidError>
where
    S: FrameSource,
    K: FrameSink,
{
    debug_assert!(frame_index < total_frames);
    let frame_time = f64::from(frame_index) / f64::from(args.fps);
    source.seek_to(frame_time)?;
    let frame = source.current_frame()?;
    render_frame(
        &frame,
        args.dot_size,
        RenderMode::Enhanced,
        jitter,
        surface,
    )?;
    sink.write_frame(surface.data().to_vec())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{
        total_frame_count, CaptureArgs, CaptureController, CaptureState, ExportStatus,
    };
    use crate::encoding::FrameSink;
    use crate::error::DotvidError;
    use crate::frame::FrameBuffer;
    use crate::source::FrameSource;

    struct SyntheticSource {
        width: u32,
        height: u32,
        duration: f64,
        seeks: Vec<f64>,
        fail_at_seek: Option<usize>,
    }

    impl SyntheticSource {
        fn new(duration: f64) -> Self {
            Self {
                width: 8,
                height: 6,
                duration,
                seeks: Vec::new(),
                fail_at_seek: None,
            }
        }
    }

    impl FrameSource for SyntheticSource {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn duration_seconds(&self) -> f64 {
            self.duration
        }

        fn seek_to(&mut self, timestamp: f64) -> Result<(), DotvidError> {
            if self.fail_at_seek == Some(self.seeks.len()) {
                return Err(DotvidError::MediaReadiness("synthetic seek failure".into()));
            }
            self.seeks.push(timestamp);
            Ok(())
        }

        fn current_frame(&self) -> Result<FrameBuffer, DotvidError> {
            let pixels = (self.width * self.height) as usize;
            let mut data = Vec::with_capacity(pixels * 4);
            for _ in 0..pixels {
                data.extend_from_slice(&[30, 30, 30, 255]);
            }
            FrameBuffer::from_rgba(self.width, self.height, data)
        }
    }

    #[derive(Default)]
    struct SinkLog {
        frames: usize,
        finished: bool,
        aborted: bool,
    }

    struct RecordingSink {
        log: Rc<RefCell<SinkLog>>,
    }

    impl FrameSink for RecordingSink {
        fn write_frame(&mut self, _rgba: Vec<u8>) -> Result<(), DotvidError> {
            self.log.borrow_mut().frames += 1;
            Ok(())
        }

        fn finish(self) -> Result<(), DotvidError> {
            self.log.borrow_mut().finished = true;
            Ok(())
        }

        fn abort(self) {
            self.log.borrow_mut().aborted = true;
        }
    }

    fn test_args(dot_size: u32) -> CaptureArgs {
        let mut args = CaptureArgs::new(dot_size, 30);
        args.pacing = false;
        args
    }

    #[test]
    fn frame_count_is_ceil_of_duration_times_rate() {
        assert_eq!(total_frame_count(2.0, 30), 60);
        assert_eq!(total_frame_count(0.1, 30), 3);
        assert_eq!(total_frame_count(1.001, 30), 31);
    }

    #[test]
    fn successful_session_writes_every_frame_in_order() {
        let mut source = SyntheticSource::new(0.1);
        let mut controller = CaptureController::new();
        let log = Rc::new(RefCell::new(SinkLog::default()));
        let sink_log = log.clone();
        let mut statuses = Vec::new();

        let summary = controller
            .run(
                &mut source,
                &test_args(4),
                move |_, _| Ok(RecordingSink { log: sink_log }),
                |status| statuses.push(status.clone()),
            )
            .expect("capture succeeds");

        assert_eq!(summary.frames_written, 3);
        assert_eq!(log.borrow().frames, 3);
        assert!(log.borrow().finished);
        assert!(!log.borrow().aborted);
        assert_eq!(controller.state(), CaptureState::Idle);

        // Timestamps are frame_index / fps, strictly increasing.
        assert_eq!(source.seeks.len(), 3);
        for (index, timestamp) in source.seeks.iter().enumerate() {
            assert!((timestamp - index as f64 / 30.0).abs() < 1e-9);
        }
        assert!(source
            .seeks
            .windows(2)
            .all(|pair| pair[0] < pair[1]));

        assert_eq!(
            statuses.first(),
            Some(&ExportStatus::Processing { percent: 0 })
        );
        assert_eq!(statuses.last(), Some(&ExportStatus::Idle));
    }

    #[test]
    fn seek_failure_aborts_whole_session_and_resets() {
        let mut source = SyntheticSource::new(10.0 / 30.0);
        source.fail_at_seek = Some(5);
        let mut controller = CaptureController::new();
        let log = Rc::new(RefCell::new(SinkLog::default()));
        let sink_log = log.clone();
        let mut last_status = ExportStatus::Idle;

        let result = controller.run(
            &mut source,
            &test_args(4),
            move |_, _| Ok(RecordingSink { log: sink_log }),
            |status| last_status = status.clone(),
        );

        assert!(matches!(result, Err(DotvidError::MediaReadiness(_))));
        assert_eq!(log.borrow().frames, 5);
        assert!(log.borrow().aborted, "partial artifact must be discarded");
        assert!(!log.borrow().finished);
        assert!(matches!(last_status, ExportStatus::Error { .. }));
        assert_eq!(controller.state(), CaptureState::Idle);

        // A subsequent valid attempt succeeds independently.
        let mut retry_source = SyntheticSource::new(0.1);
        let retry_log = Rc::new(RefCell::new(SinkLog::default()));
        let retry_sink_log = retry_log.clone();
        controller
            .run(
                &mut retry_source,
                &test_args(4),
                move |_, _| Ok(RecordingSink { log: retry_sink_log }),
                |_| {},
            )
            .expect("retry succeeds");
        assert!(retry_log.borrow().finished);
    }

    #[test]
    fn second_session_is_rejected_while_one_is_active() {
        let mut controller = CaptureController::new();
        controller.begin_session(12).expect("first claim");
        let before = controller.progress();

        let rejected = controller.begin_session(99);
        assert!(matches!(rejected, Err(DotvidError::InputValidation(_))));
        assert_eq!(controller.progress(), before);
        assert_eq!(controller.state(), CaptureState::Initializing);
    }

    #[test]
    fn invalid_dot_size_fails_before_any_encoder_work() {
        let mut source = SyntheticSource::new(1.0);
        let mut controller = CaptureController::new();
        let mut sink_created = false;

        let result = controller.run(
            &mut source,
            &test_args(0),
            |_, _| {
                sink_created = true;
                Ok(RecordingSink {
                    log: Rc::new(RefCell::new(SinkLog::default())),
                })
            },
            |_| {},
        );

        assert!(matches!(result, Err(DotvidError::InputValidation(_))));
        assert!(!sink_created);
        assert!(source.seeks.is_empty());
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[test]
    fn cancellation_halts_before_the_next_seek() {
        let mut source = SyntheticSource::new(1.0);
        let mut controller = CaptureController::new();
        let log = Rc::new(RefCell::new(SinkLog::default()));
        let sink_log = log.clone();
        let args = test_args(4);
        let token = args.cancel.clone();

        let mut seen = 0;
        let result = controller.run(
            &mut source,
            &args,
            move |_, _| Ok(RecordingSink { log: sink_log }),
            |status| {
                if matches!(status, ExportStatus::Processing { .. }) {
                    seen += 1;
                    if seen == 2 {
                        token.cancel();
                    }
                }
            },
        );

        assert!(matches!(result, Err(DotvidError::Cancelled(_))));
        assert_eq!(log.borrow().frames, 2);
        assert!(log.borrow().aborted);
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[test]
    fn encoder_init_failure_reports_error_without_frame_work() {
        let mut source = SyntheticSource::new(1.0);
        let mut controller = CaptureController::new();
        let mut last_status = ExportStatus::Idle;

        let result = controller.run(
            &mut source,
            &test_args(4),
            |_, _| -> Result<RecordingSink, DotvidError> {
                Err(DotvidError::Encoding("no encoder".into()))
            },
            |status| last_status = status.clone(),
        );

        assert!(matches!(result, Err(DotvidError::Encoding(_))));
        assert!(source.seeks.is_empty());
        assert!(matches!(last_status, ExportStatus::Error { .. }));
        assert_eq!(controller.state(), CaptureState::Idle);
    }
}

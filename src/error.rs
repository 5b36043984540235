use thiserror::Error;

/// Failure taxonomy for the dot pipeline.
///
/// Render errors are contained at the call site: live playback stops its
/// loop, capture aborts the whole session. Nothing here is retried
/// automatically; a partially-rendered export is never delivered.
#[derive(Debug, Error)]
pub enum DotvidError {
    /// Bad input before any work starts: missing source, oversized file,
    /// non-video content, out-of-range dot size, session already active.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// The media source did not become ready: seek/decode failure or a
    /// bounded wait that timed out.
    #[error("media not ready: {0}")]
    MediaReadiness(String),

    /// Encoder init or flush failure.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Unexpected failure inside the renderer or presentation surface.
    #[error("render failed: {0}")]
    Render(String),

    /// User-requested abort of an in-flight capture session. Not a fault,
    /// but it still drives the fail-fast teardown path.
    #[error("aborted: {0}")]
    Cancelled(String),
}

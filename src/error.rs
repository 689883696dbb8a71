//! Error types shared by the capture engine
//!
//! Errors are split by who raises them: the page under control
//! ([`TargetError`]), a single image capture or persist ([`CaptureError`]) and
//! the session bookkeeping ([`SessionError`]). [`EngineError`] is what a
//! whole chapter run reports.

/// Errors raised by the page-control collaborator (browser tab or static page)
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("JavaScript execution error: {0}")]
    Script(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("No page loaded")]
    NotLoaded,
}

/// Errors raised while capturing or persisting a single image
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The locator found nothing or the page could not be scanned
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// The rendered image is cross-origin restricted and cannot be read back
    #[error("Image is tainted by cross-origin restrictions: {0}")]
    Tainted(String),

    /// Network level failure (connection reset, DNS, body read)
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// The image never showed up in the intercepted network traffic
    #[error("No intercepted response for {0}")]
    NotIntercepted(String),

    /// The strategy cannot run against this target
    #[error("Capture method unavailable: {0}")]
    Unsupported(String),

    #[error("Could not decode image payload: {0}")]
    Decode(String),

    #[error("Write failed: {0}")]
    Persist(String),
}

impl CaptureError {
    /// Whether repeating the same strategy can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CaptureError::Transient(_) | CaptureError::Timeout(_) => true,
            CaptureError::Status(code) => is_retryable_status(*code),
            _ => false,
        }
    }

    /// Whether a more expensive strategy should be tried instead
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            CaptureError::Tainted(_)
                | CaptureError::NotIntercepted(_)
                | CaptureError::Unsupported(_)
                | CaptureError::Decode(_)
        )
    }
}

/// Check if a status code is worth another attempt
pub fn is_retryable_status(code: u16) -> bool {
    matches!(
        code,
        // Request timeout and rate limiting
        408 | 429 |
        // Server errors
        500 | 502 | 503 | 504 |
        // Cloudflare errors
        520 | 521 | 522 | 523 | 524 | 525 | 526 | 527
    )
}

/// Errors raised by the session registry and lifecycle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("A capture is already running for {0}")]
    AlreadyActive(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Scan results were already assigned to this session")]
    AlreadyScanned,

    #[error("Outcome for item {0} was already recorded")]
    DuplicateOutcome(usize),

    #[error("Item {0} does not belong to this session")]
    UnknownItem(usize),
}

/// Why a chapter capture did not run to completion
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

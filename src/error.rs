//! Domain errors shared across the engine.

use thiserror::Error;

/// Errors surfaced by the engine's public APIs.
///
/// Soft lookup failures (an unknown PTY or session on an action path) are
/// generally reported as `false`/`None` return values instead; these
/// variants cover the cases where a caller needs to distinguish the cause.
#[derive(Debug, Error)]
pub enum Error {
    /// The referenced PTY does not exist in the registry.
    #[error("unknown pty: {0}")]
    PtyNotFound(u64),

    /// The referenced session does not exist.
    #[error("unknown session: {0}")]
    SessionNotFound(String),

    /// The owning worker crashed and was restarted; the request was lost
    /// and may be retried.
    #[error("worker restarted while request was in flight")]
    WorkerRestarted,

    /// An async request to a worker did not complete in time.
    #[error("request timed out")]
    RequestTimeout,

    /// A packed buffer has an impossible length for its declared shape.
    #[error("bad packed length: {0}")]
    BadLength(String),

    /// Writing a scrollback chunk to disk failed. The hot ring keeps
    /// working; the archive is disabled for the affected PTY.
    #[error("scrollback archive i/o failed: {0}")]
    ArchiveIoFailed(String),

    /// Warning-class: lines were dropped because the archive is disabled
    /// or over budget.
    #[error("scrollback truncated")]
    ScrollbackTruncated,

    /// The request was cancelled before completion (PTY disposed, session
    /// suspended).
    #[error("cancelled")]
    Cancelled,

    /// Resize called with a zero or negative dimension.
    #[error("rejected resize to {cols}x{rows}")]
    ResizeRejected { cols: u16, rows: u16 },

    /// A session with this name already exists.
    #[error("duplicate session: {0}")]
    DuplicateSession(String),

    /// Persisting a session to the store failed; the manager retries on
    /// the next autosave tick.
    #[error("session persist failed: {0}")]
    SessionPersistFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Request/response messages between the pool and its workers.
//!
//! Data payloads travel as owned `Vec<u8>` buffers: moving them through
//! the channel transfers ownership without copying, and update payloads
//! use the cell codec so the wire shape matches the cross-thread
//! transport contract.

use crate::term::cell::Row;
use crate::term::{EmulatorConfig, ModeSnapshot, SearchOutcome};

/// Pool-unique id for one emulator session.
pub type PoolSessionId = u64;

/// Messages sent from the pool to a worker.
pub enum WorkerRequest {
    /// Create an emulator for `session`. Writes received before this
    /// completes are buffered at the worker and replayed in order.
    Init {
        session: PoolSessionId,
        config: EmulatorConfig,
        update_high_water: usize,
    },
    /// Fire-and-forget child output.
    Write {
        session: PoolSessionId,
        data: Vec<u8>,
    },
    Resize {
        session: PoolSessionId,
        cols: u16,
        rows: u16,
    },
    Reset {
        session: PoolSessionId,
    },
    SetUpdateEnabled {
        session: PoolSessionId,
        enabled: bool,
    },
    /// Emit a full-refresh update now (a consumer subscribed mid-stream
    /// and needs a baseline before deltas).
    Refresh {
        session: PoolSessionId,
    },
    /// Adjust the viewport offset by `delta` lines (positive scrolls into
    /// history), clamped to `[0, scrollback_len]`.
    SetScrollOffset {
        session: PoolSessionId,
        delta: i64,
    },
    ScrollToBottom {
        session: PoolSessionId,
    },
    GetScrollbackLine {
        session: PoolSessionId,
        request_id: u64,
        index: u64,
    },
    Search {
        session: PoolSessionId,
        request_id: u64,
        query: String,
        limit: usize,
    },
    Capture {
        session: PoolSessionId,
        request_id: u64,
        scrollback_lines: u64,
    },
    /// The pool consumed `count` update payloads for `session`; lowers the
    /// worker's outstanding-update counter used for back-pressure.
    AckUpdates {
        session: PoolSessionId,
        count: usize,
    },
    Destroy {
        session: PoolSessionId,
    },
    Shutdown,
}

/// Messages emitted by a worker, tagged with `(worker index, generation)`
/// by the transport so the pool can discard events from replaced workers.
pub enum WorkerEvent {
    Initialized {
        session: PoolSessionId,
    },
    InitFailed {
        session: PoolSessionId,
        message: String,
    },
    /// A codec-packed `DirtyUpdate` for the session.
    Update {
        session: PoolSessionId,
        payload: Vec<u8>,
    },
    TitleChanged {
        session: PoolSessionId,
        title: String,
    },
    ModeChanged {
        session: PoolSessionId,
        modes: ModeSnapshot,
    },
    CwdChanged {
        session: PoolSessionId,
        cwd: String,
    },
    /// Bytes the emulator owes the child (device reports, kitty acks).
    PtyReply {
        session: PoolSessionId,
        data: Vec<u8>,
    },
    ScrollbackTruncated {
        session: PoolSessionId,
    },
    ScrollbackLine {
        session: PoolSessionId,
        request_id: u64,
        row: Option<Row>,
    },
    SearchResults {
        session: PoolSessionId,
        request_id: u64,
        outcome: SearchOutcome,
    },
    Captured {
        session: PoolSessionId,
        request_id: u64,
        text: String,
    },
    Destroyed {
        session: PoolSessionId,
    },
    Error {
        session: Option<PoolSessionId>,
        message: String,
    },
}

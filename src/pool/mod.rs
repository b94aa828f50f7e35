//! Emulator worker pool: shards sessions across background workers,
//! correlates async requests, and restarts workers that misbehave.
//!
//! The pool is polled from the main loop. [`EmulatorPool::poll`] drains
//! worker events, resolves pending requests, expires timeouts, and applies
//! the restart policy: enough worker errors inside the error window
//! replace the worker thread and re-initialize its sessions from cached
//! parameters, after which each session naturally produces a full-refresh
//! update.

pub mod message;
mod worker;

pub use message::{PoolSessionId, WorkerEvent, WorkerRequest};

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::Error;
use crate::term::cell::Row;
use crate::term::{codec, DirtyUpdate, EmulatorConfig, ModeSnapshot, SearchOutcome};
use worker::TaggedEvent;

/// Correlation id for an async pool request.
pub type RequestId = u64;

/// Events surfaced to the pool's consumer.
pub enum PoolEvent {
    Update {
        session: PoolSessionId,
        update: DirtyUpdate,
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
    PtyReply {
        session: PoolSessionId,
        data: Vec<u8>,
    },
    ScrollbackTruncated {
        session: PoolSessionId,
    },
    ScrollbackLine {
        session: PoolSessionId,
        request: RequestId,
        result: Result<Option<Row>, Error>,
    },
    SearchResults {
        session: PoolSessionId,
        request: RequestId,
        result: Result<SearchOutcome, Error>,
    },
    Captured {
        session: PoolSessionId,
        request: RequestId,
        result: Result<String, Error>,
    },
    SessionInitFailed {
        session: PoolSessionId,
        message: String,
    },
    Destroyed {
        session: PoolSessionId,
    },
    WorkerRestarted {
        worker: usize,
    },
}

struct WorkerHandle {
    tx: Sender<WorkerRequest>,
    generation: u64,
    errors: VecDeque<Instant>,
}

struct SessionEntry {
    worker: usize,
    config: EmulatorConfig,
}

enum RequestKind {
    ScrollbackLine,
    Search,
    Capture,
}

struct PendingRequest {
    session: PoolSessionId,
    worker: usize,
    kind: RequestKind,
    deadline: Instant,
}

pub struct EmulatorPool {
    workers: Vec<WorkerHandle>,
    events_tx: Sender<TaggedEvent>,
    events_rx: Receiver<TaggedEvent>,
    sessions: HashMap<PoolSessionId, SessionEntry>,
    pending: HashMap<RequestId, PendingRequest>,
    next_session: PoolSessionId,
    next_request: RequestId,
    round_robin: usize,
    request_timeout: Duration,
    max_consecutive_errors: usize,
    error_window: Duration,
    update_high_water: usize,
}

impl EmulatorPool {
    pub fn new(config: &Config) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let worker_count = config.worker_count.max(1);
        let workers = (0..worker_count)
            .map(|index| {
                let (tx, rx) = mpsc::channel();
                let _ = worker::spawn_worker(index, 1, rx, events_tx.clone());
                WorkerHandle {
                    tx,
                    generation: 1,
                    errors: VecDeque::new(),
                }
            })
            .collect();

        Self {
            workers,
            events_tx,
            events_rx,
            sessions: HashMap::new(),
            pending: HashMap::new(),
            next_session: 0,
            next_request: 0,
            round_robin: 0,
            request_timeout: config.request_timeout,
            max_consecutive_errors: config.max_consecutive_errors,
            error_window: config.error_window,
            update_high_water: config.update_high_water,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Which worker a session is sharded onto (for diagnostics).
    pub fn worker_of(&self, session: PoolSessionId) -> Option<usize> {
        self.sessions.get(&session).map(|s| s.worker)
    }

    /// Create a new emulator session. Returns immediately; the caller may
    /// write before initialization completes (the worker buffers).
    pub fn create_session(&mut self, config: EmulatorConfig) -> PoolSessionId {
        self.next_session += 1;
        let session = self.next_session;
        let worker = self.round_robin % self.workers.len();
        self.round_robin += 1;

        self.sessions.insert(
            session,
            SessionEntry {
                worker,
                config: config.clone(),
            },
        );
        let _ = self.workers[worker].tx.send(WorkerRequest::Init {
            session,
            config,
            update_high_water: self.update_high_water,
        });
        session
    }

    fn send(&self, session: PoolSessionId, build: impl FnOnce() -> WorkerRequest) -> bool {
        match self.sessions.get(&session) {
            Some(entry) => {
                let _ = self.workers[entry.worker].tx.send(build());
                true
            }
            None => false,
        }
    }

    /// Fire-and-forget write of child output.
    pub fn write(&self, session: PoolSessionId, data: Vec<u8>) -> bool {
        self.send(session, || WorkerRequest::Write { session, data })
    }

    pub fn resize(&self, session: PoolSessionId, cols: u16, rows: u16) -> bool {
        self.send(session, || WorkerRequest::Resize {
            session,
            cols,
            rows,
        })
    }

    pub fn reset(&self, session: PoolSessionId) -> bool {
        self.send(session, || WorkerRequest::Reset { session })
    }

    pub fn set_update_enabled(&self, session: PoolSessionId, enabled: bool) -> bool {
        self.send(session, || WorkerRequest::SetUpdateEnabled {
            session,
            enabled,
        })
    }

    /// Ask for an immediate full-refresh update.
    pub fn refresh(&self, session: PoolSessionId) -> bool {
        self.send(session, || WorkerRequest::Refresh { session })
    }

    pub fn set_scroll_offset(&self, session: PoolSessionId, delta: i64) -> bool {
        self.send(session, || WorkerRequest::SetScrollOffset { session, delta })
    }

    pub fn scroll_to_bottom(&self, session: PoolSessionId) -> bool {
        self.send(session, || WorkerRequest::ScrollToBottom { session })
    }

    fn request(
        &mut self,
        session: PoolSessionId,
        kind: RequestKind,
        build: impl FnOnce(RequestId) -> WorkerRequest,
    ) -> Result<RequestId, Error> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(Error::SessionNotFound(session.to_string()))?;
        self.next_request += 1;
        let request_id = self.next_request;
        let worker = entry.worker;
        let _ = self.workers[worker].tx.send(build(request_id));
        self.pending.insert(
            request_id,
            PendingRequest {
                session,
                worker,
                kind,
                deadline: Instant::now() + self.request_timeout,
            },
        );
        Ok(request_id)
    }

    pub fn get_scrollback_line(
        &mut self,
        session: PoolSessionId,
        index: u64,
    ) -> Result<RequestId, Error> {
        self.request(session, RequestKind::ScrollbackLine, |request_id| {
            WorkerRequest::GetScrollbackLine {
                session,
                request_id,
                index,
            }
        })
    }

    pub fn search(
        &mut self,
        session: PoolSessionId,
        query: &str,
        limit: usize,
    ) -> Result<RequestId, Error> {
        let query = query.to_string();
        self.request(session, RequestKind::Search, |request_id| {
            WorkerRequest::Search {
                session,
                request_id,
                query,
                limit,
            }
        })
    }

    pub fn capture(
        &mut self,
        session: PoolSessionId,
        scrollback_lines: u64,
    ) -> Result<RequestId, Error> {
        self.request(session, RequestKind::Capture, |request_id| {
            WorkerRequest::Capture {
                session,
                request_id,
                scrollback_lines,
            }
        })
    }

    /// Tear down a session. Pending requests on it reject with
    /// `Cancelled` on the next poll.
    pub fn destroy_session(&mut self, session: PoolSessionId) -> Vec<PoolEvent> {
        let mut events = Vec::new();
        if let Some(entry) = self.sessions.remove(&session) {
            let _ = self.workers[entry.worker]
                .tx
                .send(WorkerRequest::Destroy { session });
        }
        let cancelled: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.session == session)
            .map(|(id, _)| *id)
            .collect();
        for id in cancelled {
            if let Some(pending) = self.pending.remove(&id) {
                events.push(reject(id, &pending, Error::Cancelled));
            }
        }
        events
    }

    /// Drain worker events, resolve requests, expire timeouts, and apply
    /// the restart policy. Call from the main loop.
    pub fn poll(&mut self) -> Vec<PoolEvent> {
        let now = Instant::now();
        let mut out = Vec::new();

        while let Ok((worker_index, generation, event)) = self.events_rx.try_recv() {
            if self
                .workers
                .get(worker_index)
                .map(|w| w.generation != generation)
                .unwrap_or(true)
            {
                // Straggler from a replaced worker.
                continue;
            }
            self.dispatch(worker_index, event, now, &mut out);
        }

        // Expire overdue requests.
        let overdue: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in overdue {
            if let Some(pending) = self.pending.remove(&id) {
                out.push(reject(id, &pending, Error::RequestTimeout));
            }
        }

        out
    }

    fn dispatch(
        &mut self,
        worker_index: usize,
        event: WorkerEvent,
        now: Instant,
        out: &mut Vec<PoolEvent>,
    ) {
        match event {
            WorkerEvent::Initialized { .. } => {}
            WorkerEvent::InitFailed { session, message } => {
                self.sessions.remove(&session);
                out.push(PoolEvent::SessionInitFailed { session, message });
            }
            WorkerEvent::Update { session, payload } => {
                // Ack so the worker's back-pressure counter drains.
                if let Some(entry) = self.sessions.get(&session) {
                    let _ = self.workers[entry.worker]
                        .tx
                        .send(WorkerRequest::AckUpdates { session, count: 1 });
                }
                match codec::unpack_dirty_update(&payload) {
                    Ok(update) => out.push(PoolEvent::Update { session, update }),
                    Err(err) => {
                        log::warn!("dropping undecodable update for session {session}: {err}");
                        self.record_worker_error(worker_index, now, out);
                    }
                }
            }
            WorkerEvent::TitleChanged { session, title } => {
                out.push(PoolEvent::TitleChanged { session, title });
            }
            WorkerEvent::ModeChanged { session, modes } => {
                out.push(PoolEvent::ModeChanged { session, modes });
            }
            WorkerEvent::CwdChanged { session, cwd } => {
                out.push(PoolEvent::CwdChanged { session, cwd });
            }
            WorkerEvent::PtyReply { session, data } => {
                out.push(PoolEvent::PtyReply { session, data });
            }
            WorkerEvent::ScrollbackTruncated { session } => {
                out.push(PoolEvent::ScrollbackTruncated { session });
            }
            WorkerEvent::ScrollbackLine {
                session,
                request_id,
                row,
            } => {
                if self.pending.remove(&request_id).is_some() {
                    out.push(PoolEvent::ScrollbackLine {
                        session,
                        request: request_id,
                        result: Ok(row),
                    });
                }
            }
            WorkerEvent::SearchResults {
                session,
                request_id,
                outcome,
            } => {
                if self.pending.remove(&request_id).is_some() {
                    out.push(PoolEvent::SearchResults {
                        session,
                        request: request_id,
                        result: Ok(outcome),
                    });
                }
            }
            WorkerEvent::Captured {
                session,
                request_id,
                text,
            } => {
                if self.pending.remove(&request_id).is_some() {
                    out.push(PoolEvent::Captured {
                        session,
                        request: request_id,
                        result: Ok(text),
                    });
                }
            }
            WorkerEvent::Destroyed { session } => {
                out.push(PoolEvent::Destroyed { session });
            }
            WorkerEvent::Error { session, message } => {
                log::warn!(
                    "emulator worker {worker_index} error (session {session:?}): {message}"
                );
                self.record_worker_error(worker_index, now, out);
            }
        }
    }

    fn record_worker_error(&mut self, worker_index: usize, now: Instant, out: &mut Vec<PoolEvent>) {
        let window = self.error_window;
        let handle = &mut self.workers[worker_index];
        handle.errors.push_back(now);
        while let Some(&front) = handle.errors.front() {
            if now.duration_since(front) > window {
                handle.errors.pop_front();
            } else {
                break;
            }
        }
        if handle.errors.len() >= self.max_consecutive_errors {
            self.restart_worker(worker_index, out);
        }
    }

    /// Replace a worker thread: reject its in-flight requests, spawn a
    /// fresh thread, and re-initialize every session it hosted from cached
    /// parameters.
    fn restart_worker(&mut self, worker_index: usize, out: &mut Vec<PoolEvent>) {
        log::warn!("restarting emulator worker {worker_index}");

        let rejected: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.worker == worker_index)
            .map(|(id, _)| *id)
            .collect();
        for id in rejected {
            if let Some(pending) = self.pending.remove(&id) {
                out.push(reject(id, &pending, Error::WorkerRestarted));
            }
        }

        let handle = &mut self.workers[worker_index];
        let _ = handle.tx.send(WorkerRequest::Shutdown);
        let generation = handle.generation + 1;
        let (tx, rx) = mpsc::channel();
        let _ = worker::spawn_worker(worker_index, generation, rx, self.events_tx.clone());
        handle.tx = tx;
        handle.generation = generation;
        handle.errors.clear();

        for (session, entry) in &self.sessions {
            if entry.worker == worker_index {
                let _ = self.workers[worker_index].tx.send(WorkerRequest::Init {
                    session: *session,
                    config: entry.config.clone(),
                    update_high_water: self.update_high_water,
                });
            }
        }

        out.push(PoolEvent::WorkerRestarted {
            worker: worker_index,
        });
    }
}

impl Drop for EmulatorPool {
    fn drop(&mut self) {
        for handle in &self.workers {
            let _ = handle.tx.send(WorkerRequest::Shutdown);
        }
    }
}

fn reject(id: RequestId, pending: &PendingRequest, error: Error) -> PoolEvent {
    match pending.kind {
        RequestKind::ScrollbackLine => PoolEvent::ScrollbackLine {
            session: pending.session,
            request: id,
            result: Err(error),
        },
        RequestKind::Search => PoolEvent::SearchResults {
            session: pending.session,
            request: id,
            result: Err(error),
        },
        RequestKind::Capture => PoolEvent::Captured {
            session: pending.session,
            request: id,
            result: Err(error),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrollback::ScrollbackConfig;
    use std::time::Duration;

    fn pool_with(workers: usize) -> EmulatorPool {
        let config = Config {
            worker_count: workers,
            request_timeout: Duration::from_secs(2),
            max_consecutive_errors: 5,
            error_window: Duration::from_secs(30),
            ..Config::default()
        };
        EmulatorPool::new(&config)
    }

    fn emulator_config(cols: u16, rows: u16) -> EmulatorConfig {
        EmulatorConfig {
            cols,
            rows,
            scrollback: ScrollbackConfig::memory_only(100),
        }
    }

    /// Poll until `pred` collects what it needs or the deadline passes.
    fn poll_until(
        pool: &mut EmulatorPool,
        mut pred: impl FnMut(&mut Vec<PoolEvent>) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            let mut events = pool.poll();
            if pred(&mut events) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn sessions_are_assigned_round_robin() {
        let mut pool = pool_with(3);
        let a = pool.create_session(emulator_config(10, 2));
        let b = pool.create_session(emulator_config(10, 2));
        let c = pool.create_session(emulator_config(10, 2));
        let d = pool.create_session(emulator_config(10, 2));
        assert_eq!(pool.worker_of(a), Some(0));
        assert_eq!(pool.worker_of(b), Some(1));
        assert_eq!(pool.worker_of(c), Some(2));
        assert_eq!(pool.worker_of(d), Some(0));
    }

    #[test]
    fn write_immediately_after_create_is_not_lost() {
        let mut pool = pool_with(1);
        let session = pool.create_session(emulator_config(40, 3));
        assert!(pool.write(session, b"no await needed".to_vec()));

        let request = pool.capture(session, 0).unwrap();
        let mut captured = None;
        assert!(poll_until(&mut pool, |events| {
            for event in events.drain(..) {
                if let PoolEvent::Captured { request: r, result, .. } = event {
                    if r == request {
                        captured = Some(result.unwrap());
                        return true;
                    }
                }
            }
            false
        }));
        assert!(captured.unwrap().starts_with("no await needed"));
    }

    #[test]
    fn search_resolves_through_poll() {
        let mut pool = pool_with(2);
        let session = pool.create_session(emulator_config(40, 3));
        pool.write(session, b"findme here".to_vec());
        let request = pool.search(session, "findme", 10).unwrap();

        let mut found = false;
        assert!(poll_until(&mut pool, |events| {
            for event in events.drain(..) {
                if let PoolEvent::SearchResults { request: r, result, .. } = event {
                    if r == request {
                        found = result.unwrap().matches.len() == 1;
                        return true;
                    }
                }
            }
            false
        }));
        assert!(found);
    }

    #[test]
    fn requests_against_unknown_sessions_fail_fast() {
        let mut pool = pool_with(1);
        assert!(matches!(
            pool.search(999, "x", 1),
            Err(Error::SessionNotFound(_))
        ));
        assert!(!pool.write(999, b"x".to_vec()));
    }

    #[test]
    fn repeated_errors_restart_the_worker_and_reject_pending() {
        let mut pool = pool_with(1);
        let sessions: Vec<_> = (0..5)
            .map(|_| pool.create_session(emulator_config(10, 2)))
            .collect();

        // Resize to 0x0 is rejected by the emulator and surfaces as a
        // worker error; five of them trip the restart threshold. The
        // search request sits behind them in the queue, so its eventual
        // reply carries a stale generation and the pool rejects it with
        // WorkerRestarted instead.
        for _ in 0..5 {
            pool.resize(sessions[0], 0, 0);
        }
        let request = pool.search(sessions[0], "x", 1).unwrap();

        let mut restarted = false;
        let mut rejected = false;
        let mut full_refreshes = std::collections::HashSet::new();
        assert!(poll_until(&mut pool, |events| {
            for event in events.drain(..) {
                match event {
                    PoolEvent::WorkerRestarted { .. } => restarted = true,
                    PoolEvent::SearchResults { request: r, result, .. } if r == request => {
                        rejected = matches!(result, Err(Error::WorkerRestarted));
                    }
                    // Count only the post-restart recovery refreshes.
                    PoolEvent::Update { session, update } if restarted && update.is_full => {
                        full_refreshes.insert(session);
                    }
                    _ => {}
                }
            }
            restarted && rejected && full_refreshes.len() == sessions.len()
        }));
        assert!(restarted);
        assert!(rejected);
        // Every session on the restarted worker recovered with a full
        // refresh.
        assert_eq!(full_refreshes.len(), 5);
    }

    #[test]
    fn destroy_cancels_in_flight_requests() {
        let mut pool = pool_with(1);
        let session = pool.create_session(emulator_config(10, 2));
        let request = pool.get_scrollback_line(session, 0).unwrap();
        let events = pool.destroy_session(session);

        let cancelled = events.iter().any(|event| {
            matches!(
                event,
                PoolEvent::ScrollbackLine { request: r, result: Err(Error::Cancelled), .. }
                if *r == request
            )
        });
        assert!(cancelled);
    }

    #[test]
    fn updates_flow_after_worker_recovery() {
        let mut pool = pool_with(1);
        let session = pool.create_session(emulator_config(20, 2));
        for _ in 0..5 {
            pool.resize(session, 0, 0);
        }
        assert!(poll_until(&mut pool, |events| {
            events
                .iter()
                .any(|e| matches!(e, PoolEvent::WorkerRestarted { .. }))
        }));

        pool.write(session, b"alive again".to_vec());
        let request = pool.capture(session, 0).unwrap();
        let mut text = None;
        assert!(poll_until(&mut pool, |events| {
            for event in events.drain(..) {
                if let PoolEvent::Captured { request: r, result, .. } = event {
                    if r == request {
                        text = result.ok();
                        return true;
                    }
                }
            }
            false
        }));
        assert!(text.unwrap().contains("alive again"));
    }
}

//! One emulator worker: an OS thread hosting a set of VT emulators keyed
//! by pool session id.
//!
//! The worker drains its request channel in batches and emits at most one
//! update per touched session per batch, which is the per-tick coalescing
//! consumers rely on. When the pool falls behind (outstanding updates
//! above the high-water mark) further deltas collapse into full refreshes.

use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use crate::pool::message::{PoolSessionId, WorkerEvent, WorkerRequest};
use crate::term::codec;
use crate::term::{Emulator, ScrollState};

/// Events are tagged with the worker's slot and generation so the pool can
/// ignore stragglers from a replaced worker.
pub type TaggedEvent = (usize, u64, WorkerEvent);

struct WorkerSession {
    emulator: Emulator,
    scroll_offset: u64,
    outstanding_updates: usize,
    update_high_water: usize,
}

impl WorkerSession {
    fn scroll_state(&self) -> ScrollState {
        let len = self.emulator.scrollback_len();
        let offset = self.scroll_offset.min(len);
        ScrollState {
            viewport_offset: offset,
            scrollback_len: len,
            is_at_bottom: offset == 0,
            is_at_scrollback_limit: self.emulator.scrollback_at_limit(),
        }
    }
}

struct Worker {
    index: usize,
    generation: u64,
    events: Sender<TaggedEvent>,
    sessions: HashMap<PoolSessionId, WorkerSession>,
    /// Writes for sessions whose init has not been processed yet,
    /// replayed FIFO once the session appears.
    pending_writes: HashMap<PoolSessionId, Vec<Vec<u8>>>,
}

/// Spawn a worker thread. The thread exits when the request sender is
/// dropped or a `Shutdown` message arrives.
pub fn spawn_worker(
    index: usize,
    generation: u64,
    requests: Receiver<WorkerRequest>,
    events: Sender<TaggedEvent>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("openmux-emulator-{index}"))
        .spawn(move || {
            let mut worker = Worker {
                index,
                generation,
                events,
                sessions: HashMap::new(),
                pending_writes: HashMap::new(),
            };
            worker.run(&requests);
        })
        .expect("spawn emulator worker thread")
}

const BATCH_LIMIT: usize = 128;

impl Worker {
    fn run(&mut self, requests: &Receiver<WorkerRequest>) {
        loop {
            let first = match requests.recv() {
                Ok(msg) => msg,
                Err(_) => return,
            };

            let mut touched = BTreeSet::new();
            if self.handle(first, &mut touched) {
                return;
            }
            // Coalesce everything already queued into this batch.
            while let Ok(msg) = requests.try_recv() {
                if self.handle(msg, &mut touched) {
                    return;
                }
                if touched.len() >= BATCH_LIMIT {
                    break;
                }
            }

            for session in touched {
                self.emit_update(session);
                self.drain_side_channels(session);
            }
        }
    }

    fn send(&self, event: WorkerEvent) {
        let _ = self.events.send((self.index, self.generation, event));
    }

    /// Returns true when the worker should shut down.
    fn handle(&mut self, msg: WorkerRequest, touched: &mut BTreeSet<PoolSessionId>) -> bool {
        match msg {
            WorkerRequest::Init {
                session,
                config,
                update_high_water,
            } => {
                if config.cols == 0 || config.rows == 0 {
                    self.send(WorkerEvent::InitFailed {
                        session,
                        message: format!("invalid dimensions {}x{}", config.cols, config.rows),
                    });
                    return false;
                }
                let mut emulator = Emulator::new(config);
                let events = self.events.clone();
                let tag = (self.index, self.generation);
                emulator.on_title_change(Box::new(move |title| {
                    let _ = events.send((
                        tag.0,
                        tag.1,
                        WorkerEvent::TitleChanged {
                            session,
                            title: title.to_string(),
                        },
                    ));
                }));
                let events = self.events.clone();
                emulator.on_mode_change(Box::new(move |modes| {
                    let _ = events.send((
                        tag.0,
                        tag.1,
                        WorkerEvent::ModeChanged {
                            session,
                            modes: *modes,
                        },
                    ));
                }));

                self.sessions.insert(
                    session,
                    WorkerSession {
                        emulator,
                        scroll_offset: 0,
                        outstanding_updates: 0,
                        update_high_water,
                    },
                );
                self.send(WorkerEvent::Initialized { session });

                if let Some(writes) = self.pending_writes.remove(&session) {
                    let ws = self.sessions.get_mut(&session).unwrap();
                    for data in writes {
                        ws.emulator.write(&data);
                    }
                }
                touched.insert(session);
            }
            WorkerRequest::Write { session, data } => match self.sessions.get_mut(&session) {
                Some(ws) => {
                    ws.emulator.write(&data);
                    touched.insert(session);
                }
                None => self.pending_writes.entry(session).or_default().push(data),
            },
            WorkerRequest::Resize {
                session,
                cols,
                rows,
            } => {
                if let Some(ws) = self.sessions.get_mut(&session) {
                    if let Err(err) = ws.emulator.resize(cols, rows) {
                        self.send(WorkerEvent::Error {
                            session: Some(session),
                            message: err.to_string(),
                        });
                    } else {
                        touched.insert(session);
                    }
                }
            }
            WorkerRequest::Reset { session } => {
                if let Some(ws) = self.sessions.get_mut(&session) {
                    ws.emulator.reset();
                    touched.insert(session);
                }
            }
            WorkerRequest::SetUpdateEnabled { session, enabled } => {
                if let Some(ws) = self.sessions.get_mut(&session) {
                    ws.emulator.set_update_enabled(enabled);
                    if enabled {
                        touched.insert(session);
                    }
                }
            }
            WorkerRequest::Refresh { session } => {
                if let Some(ws) = self.sessions.get_mut(&session) {
                    ws.emulator.force_full_refresh();
                    touched.insert(session);
                }
            }
            WorkerRequest::SetScrollOffset { session, delta } => {
                if let Some(ws) = self.sessions.get_mut(&session) {
                    let len = ws.emulator.scrollback_len();
                    let next = ws.scroll_offset as i64 + delta;
                    ws.scroll_offset = next.clamp(0, len as i64) as u64;
                    touched.insert(session);
                }
            }
            WorkerRequest::ScrollToBottom { session } => {
                if let Some(ws) = self.sessions.get_mut(&session) {
                    ws.scroll_offset = 0;
                    touched.insert(session);
                }
            }
            WorkerRequest::GetScrollbackLine {
                session,
                request_id,
                index,
            } => {
                let row = self
                    .sessions
                    .get_mut(&session)
                    .and_then(|ws| ws.emulator.get_scrollback_line(index));
                self.send(WorkerEvent::ScrollbackLine {
                    session,
                    request_id,
                    row,
                });
            }
            WorkerRequest::Search {
                session,
                request_id,
                query,
                limit,
            } => {
                let outcome = self
                    .sessions
                    .get_mut(&session)
                    .map(|ws| ws.emulator.search(&query, limit))
                    .unwrap_or_default();
                self.send(WorkerEvent::SearchResults {
                    session,
                    request_id,
                    outcome,
                });
            }
            WorkerRequest::Capture {
                session,
                request_id,
                scrollback_lines,
            } => {
                let text = self
                    .sessions
                    .get_mut(&session)
                    .map(|ws| ws.emulator.capture(scrollback_lines))
                    .unwrap_or_default();
                self.send(WorkerEvent::Captured {
                    session,
                    request_id,
                    text,
                });
            }
            WorkerRequest::AckUpdates { session, count } => {
                if let Some(ws) = self.sessions.get_mut(&session) {
                    ws.outstanding_updates = ws.outstanding_updates.saturating_sub(count);
                }
            }
            WorkerRequest::Destroy { session } => {
                self.pending_writes.remove(&session);
                if let Some(mut ws) = self.sessions.remove(&session) {
                    ws.emulator.dispose();
                }
                self.send(WorkerEvent::Destroyed { session });
            }
            WorkerRequest::Shutdown => return true,
        }
        false
    }

    fn emit_update(&mut self, session: PoolSessionId) {
        let Some(ws) = self.sessions.get_mut(&session) else {
            return;
        };
        if ws.outstanding_updates >= ws.update_high_water {
            ws.emulator.force_full_refresh();
        }
        let scroll = ws.scroll_state();
        let update = ws.emulator.get_dirty_update(scroll);
        let payload = codec::pack_dirty_update(&update);
        ws.outstanding_updates += 1;
        self.send(WorkerEvent::Update { session, payload });
    }

    fn drain_side_channels(&mut self, session: PoolSessionId) {
        let Some(ws) = self.sessions.get_mut(&session) else {
            return;
        };
        let replies = ws.emulator.drain_responses();
        let cwd = ws.emulator.take_cwd_change();
        let truncated = !ws
            .emulator
            .take_scrollback_events()
            .is_empty();

        for data in replies {
            self.send(WorkerEvent::PtyReply { session, data });
        }
        if let Some(cwd) = cwd {
            self.send(WorkerEvent::CwdChanged { session, cwd });
        }
        if truncated {
            self.send(WorkerEvent::ScrollbackTruncated { session });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrollback::ScrollbackConfig;
    use crate::term::EmulatorConfig;
    use std::sync::mpsc;
    use std::time::Duration;

    fn config(cols: u16, rows: u16) -> EmulatorConfig {
        EmulatorConfig {
            cols,
            rows,
            scrollback: ScrollbackConfig::memory_only(100),
        }
    }

    fn start() -> (Sender<WorkerRequest>, Receiver<TaggedEvent>) {
        let (req_tx, req_rx) = mpsc::channel();
        let (ev_tx, ev_rx) = mpsc::channel();
        let _ = spawn_worker(0, 1, req_rx, ev_tx);
        (req_tx, ev_rx)
    }

    fn next_event(rx: &Receiver<TaggedEvent>) -> WorkerEvent {
        rx.recv_timeout(Duration::from_secs(2)).expect("event").2
    }

    #[test]
    fn init_then_write_produces_an_update() {
        let (tx, rx) = start();
        tx.send(WorkerRequest::Init {
            session: 1,
            config: config(20, 3),
            update_high_water: 256,
        })
        .unwrap();
        tx.send(WorkerRequest::Write {
            session: 1,
            data: b"hello".to_vec(),
        })
        .unwrap();

        assert!(matches!(next_event(&rx), WorkerEvent::Initialized { session: 1 }));
        // First update after init is a full refresh.
        match next_event(&rx) {
            WorkerEvent::Update { session, payload } => {
                assert_eq!(session, 1);
                let update = codec::unpack_dirty_update(&payload).unwrap();
                assert!(update.is_full);
            }
            other => panic!("expected update, got {}", name_of(&other)),
        }
    }

    #[test]
    fn writes_before_init_are_buffered_and_replayed() {
        let (tx, rx) = start();
        tx.send(WorkerRequest::Write {
            session: 7,
            data: b"early ".to_vec(),
        })
        .unwrap();
        tx.send(WorkerRequest::Write {
            session: 7,
            data: b"bytes".to_vec(),
        })
        .unwrap();
        tx.send(WorkerRequest::Init {
            session: 7,
            config: config(40, 2),
            update_high_water: 256,
        })
        .unwrap();
        tx.send(WorkerRequest::Capture {
            session: 7,
            request_id: 1,
            scrollback_lines: 0,
        })
        .unwrap();

        loop {
            match next_event(&rx) {
                WorkerEvent::Captured { text, .. } => {
                    assert!(text.starts_with("early bytes"));
                    break;
                }
                _ => continue,
            }
        }
    }

    #[test]
    fn zero_sized_init_fails() {
        let (tx, rx) = start();
        tx.send(WorkerRequest::Init {
            session: 2,
            config: config(0, 10),
            update_high_water: 256,
        })
        .unwrap();
        assert!(matches!(
            next_event(&rx),
            WorkerEvent::InitFailed { session: 2, .. }
        ));
    }

    #[test]
    fn search_round_trips_through_the_worker() {
        let (tx, rx) = start();
        tx.send(WorkerRequest::Init {
            session: 3,
            config: config(40, 3),
            update_high_water: 256,
        })
        .unwrap();
        tx.send(WorkerRequest::Write {
            session: 3,
            data: b"needle in a haystack".to_vec(),
        })
        .unwrap();
        tx.send(WorkerRequest::Search {
            session: 3,
            request_id: 9,
            query: "needle".into(),
            limit: 10,
        })
        .unwrap();

        loop {
            match next_event(&rx) {
                WorkerEvent::SearchResults {
                    request_id,
                    outcome,
                    ..
                } => {
                    assert_eq!(request_id, 9);
                    assert_eq!(outcome.matches.len(), 1);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[test]
    fn high_water_downgrades_deltas_to_full_refreshes() {
        let (tx, rx) = start();
        tx.send(WorkerRequest::Init {
            session: 4,
            config: config(20, 2),
            update_high_water: 1,
        })
        .unwrap();
        // Never acked, so after the first update the worker exceeds the
        // high-water mark and every later update is full.
        for _ in 0..3 {
            tx.send(WorkerRequest::Write {
                session: 4,
                data: b"x".to_vec(),
            })
            .unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }

        let mut updates = Vec::new();
        while let Ok((_, _, event)) = rx.recv_timeout(Duration::from_millis(200)) {
            if let WorkerEvent::Update { payload, .. } = event {
                updates.push(codec::unpack_dirty_update(&payload).unwrap());
            }
        }
        assert!(updates.len() >= 2);
        assert!(updates.last().unwrap().is_full);
    }

    #[test]
    fn destroy_disposes_and_acknowledges() {
        let (tx, rx) = start();
        tx.send(WorkerRequest::Init {
            session: 5,
            config: config(10, 2),
            update_high_water: 256,
        })
        .unwrap();
        tx.send(WorkerRequest::Destroy { session: 5 }).unwrap();

        loop {
            match next_event(&rx) {
                WorkerEvent::Destroyed { session } => {
                    assert_eq!(session, 5);
                    break;
                }
                _ => continue,
            }
        }
    }

    fn name_of(event: &WorkerEvent) -> &'static str {
        match event {
            WorkerEvent::Initialized { .. } => "Initialized",
            WorkerEvent::InitFailed { .. } => "InitFailed",
            WorkerEvent::Update { .. } => "Update",
            WorkerEvent::TitleChanged { .. } => "TitleChanged",
            WorkerEvent::ModeChanged { .. } => "ModeChanged",
            WorkerEvent::CwdChanged { .. } => "CwdChanged",
            WorkerEvent::PtyReply { .. } => "PtyReply",
            WorkerEvent::ScrollbackTruncated { .. } => "ScrollbackTruncated",
            WorkerEvent::ScrollbackLine { .. } => "ScrollbackLine",
            WorkerEvent::SearchResults { .. } => "SearchResults",
            WorkerEvent::Captured { .. } => "Captured",
            WorkerEvent::Destroyed { .. } => "Destroyed",
            WorkerEvent::Error { .. } => "Error",
        }
    }
}

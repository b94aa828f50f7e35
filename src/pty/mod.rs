//! PTY service: owns the registry of child shells, bridges their bytes to
//! the emulator pool, and fans results out to subscribers.
//!
//! Per output chunk the data handler 1) holds sync-mode windows,
//! 2) answers host-level device queries, 3) forwards the remaining text to
//! the owning emulator worker, 4) writes emulator replies back to the
//! child, and 5) keeps focus-reporting children informed of the host
//! focus state.

pub mod handle;
pub mod query;
pub mod sync_mode;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use crate::bus::{EngineNotice, ExitStatus, SubscriptionBus};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::{EmulatorPool, PoolEvent, PoolSessionId, RequestId};
use crate::scrollback::{ArchiveBudget, ArchiveSlot, ScrollbackConfig};
use crate::term::cell::Row;
use crate::term::{EmulatorConfig, ModeSnapshot, ScrollState, SearchOutcome};
use handle::{PtyHandle, PtyIo, SpawnOptions};
use query::QueryPassthrough;
use sync_mode::SyncModeParser;

/// Process-unique PTY id.
pub type PtyId = u64;

/// Scrollback lines included in a capture snapshot.
const CAPTURE_SCROLLBACK_LINES: u64 = 200;

/// How a new PTY should be created.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<String>,
    pub shell: Option<String>,
    pub env: Vec<(String, String)>,
}

/// Results surfaced from [`PtyService::pump`].
pub enum ServiceEvent {
    /// The child exited; exit subscribers have already fired.
    Exited { pty_id: PtyId, status: ExitStatus },
    SearchResults {
        pty_id: PtyId,
        request: RequestId,
        result: std::result::Result<SearchOutcome, Error>,
    },
    ScrollbackLine {
        pty_id: PtyId,
        request: RequestId,
        result: std::result::Result<Option<Row>, Error>,
    },
    Captured {
        pty_id: PtyId,
        request: RequestId,
        result: std::result::Result<String, Error>,
    },
}

struct PtyRecord {
    session: PoolSessionId,
    handle: PtyHandle,
    cols: u16,
    rows: u16,
    /// Tracked working directory: spawn cwd, updated by OSC 7.
    cwd: String,
    shell: String,
    pane: Option<String>,
    owner_session: Option<String>,
    title: String,
    scroll: ScrollState,
    modes: ModeSnapshot,
    sync: SyncModeParser,
    query: QueryPassthrough,
    pane_position: (u16, u16),
    suspended: bool,
    exited: bool,
}

pub struct PtyService {
    config: Config,
    pool: EmulatorPool,
    bus: SubscriptionBus,
    registry: HashMap<PtyId, PtyRecord>,
    by_session: HashMap<PoolSessionId, PtyId>,
    io_tx: Sender<PtyIo>,
    io_rx: Receiver<PtyIo>,
    budget: Arc<ArchiveBudget>,
    archive_root: PathBuf,
    next_id: PtyId,
    host_focused: bool,
    /// Events produced outside pump (request cancellations on destroy),
    /// delivered on the next pump.
    queued: Vec<ServiceEvent>,
}

impl PtyService {
    pub fn new(config: Config) -> Self {
        let archive_root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("openmux")
            .join("scrollback");
        Self::with_archive_root(config, archive_root)
    }

    /// Like [`PtyService::new`] with an explicit scrollback archive root.
    pub fn with_archive_root(config: Config, archive_root: PathBuf) -> Self {
        let (io_tx, io_rx) = mpsc::channel();
        let pool = EmulatorPool::new(&config);
        let budget = ArchiveBudget::new(config.archive_global_max_bytes());
        Self {
            pool,
            bus: SubscriptionBus::new(),
            registry: HashMap::new(),
            by_session: HashMap::new(),
            io_tx,
            io_rx,
            budget,
            archive_root,
            next_id: 0,
            host_focused: true,
            queued: Vec::new(),
            config,
        }
    }

    pub fn bus(&mut self) -> &mut SubscriptionBus {
        &mut self.bus
    }

    pub fn pty_ids(&self) -> Vec<PtyId> {
        let mut ids: Vec<PtyId> = self.registry.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_live(&self, pty_id: PtyId) -> bool {
        self.registry
            .get(&pty_id)
            .map(|r| !r.exited)
            .unwrap_or(false)
    }

    // ==== lifecycle ===================================================

    /// Spawn a child shell on a new PTY and register its emulator.
    pub fn create(&mut self, options: &CreateOptions) -> anyhow::Result<PtyId> {
        let cols = options.cols.max(1);
        let rows = options.rows.max(1);
        let cwd = options
            .cwd
            .clone()
            .or_else(|| self.config.original_cwd.clone())
            .or_else(|| {
                std::env::current_dir()
                    .ok()
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "/".to_string());
        let shell = options
            .shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "sh".to_string());

        self.next_id += 1;
        let pty_id = self.next_id;

        let spawn = SpawnOptions {
            cols,
            rows,
            cwd: cwd.clone(),
            shell: shell.clone(),
            env: options.env.clone(),
        };
        let handle = PtyHandle::spawn(pty_id, &spawn, self.io_tx.clone())?;

        let session = self.pool.create_session(EmulatorConfig {
            cols,
            rows,
            scrollback: ScrollbackConfig {
                hot_limit: self.config.scrollback_hot_limit,
                chunk_lines: self.config.archive_chunk_lines,
                archive: Some(ArchiveSlot {
                    pty_id,
                    dir: self.archive_root.join(format!("pty-{pty_id}")),
                    per_pty_max_bytes: self.config.archive_max_bytes(),
                    budget: Arc::clone(&self.budget),
                }),
            },
        });

        self.by_session.insert(session, pty_id);
        self.registry.insert(
            pty_id,
            PtyRecord {
                session,
                handle,
                cols,
                rows,
                cwd,
                shell,
                pane: None,
                owner_session: None,
                title: String::new(),
                scroll: ScrollState::at_bottom(0, false),
                modes: ModeSnapshot::default(),
                sync: SyncModeParser::new(self.config.sync_timeout),
                query: QueryPassthrough::new(),
                pane_position: (0, 0),
                suspended: false,
                exited: false,
            },
        );
        Ok(pty_id)
    }

    /// Kill the child, dispose the emulator, and fire exit callbacks if
    /// they have not fired yet. Returns false for unknown ids.
    pub fn destroy(&mut self, pty_id: PtyId) -> bool {
        let Some(mut record) = self.registry.remove(&pty_id) else {
            log::debug!("destroy: unknown pty {pty_id}");
            return false;
        };
        record.handle.kill();
        let status = ExitStatus {
            code: record.handle.try_exit_code(),
            signal: None,
        };
        self.bus.emit_exit(pty_id, &status);
        self.bus.remove_pty(pty_id);
        self.by_session.remove(&record.session);
        // In-flight requests reject with Cancelled; surface them on the
        // next pump.
        for event in self.pool.destroy_session(record.session) {
            match event {
                PoolEvent::ScrollbackLine { request, result, .. } => {
                    self.queued.push(ServiceEvent::ScrollbackLine {
                        pty_id,
                        request,
                        result,
                    });
                }
                PoolEvent::SearchResults { request, result, .. } => {
                    self.queued.push(ServiceEvent::SearchResults {
                        pty_id,
                        request,
                        result,
                    });
                }
                PoolEvent::Captured { request, result, .. } => {
                    self.queued.push(ServiceEvent::Captured {
                        pty_id,
                        request,
                        result,
                    });
                }
                _ => {}
            }
        }
        self.budget.remove(pty_id);
        true
    }

    // ==== plain operations ============================================

    /// Forward input bytes (keyboard) to the child.
    pub fn write(&mut self, pty_id: PtyId, data: &[u8]) -> bool {
        match self.registry.get_mut(&pty_id) {
            Some(record) => record.handle.write(data).is_ok(),
            None => {
                log::debug!("write: unknown pty {pty_id}");
                false
            }
        }
    }

    /// Resize child PTY and emulator together.
    pub fn resize(&mut self, pty_id: PtyId, cols: u16, rows: u16) -> Result<()> {
        if cols == 0 || rows == 0 {
            return Err(Error::ResizeRejected { cols, rows });
        }
        let record = self
            .registry
            .get_mut(&pty_id)
            .ok_or(Error::PtyNotFound(pty_id))?;
        if record.cols == cols && record.rows == rows {
            return Ok(());
        }
        let _ = record.handle.resize(cols, rows);
        record.cols = cols;
        record.rows = rows;
        self.pool.resize(record.session, cols, rows);
        Ok(())
    }

    pub fn dimensions(&self, pty_id: PtyId) -> Option<(u16, u16)> {
        self.registry.get(&pty_id).map(|r| (r.cols, r.rows))
    }

    pub fn title(&self, pty_id: PtyId) -> Option<&str> {
        self.registry.get(&pty_id).map(|r| r.title.as_str())
    }

    pub fn cwd(&self, pty_id: PtyId) -> Option<&str> {
        self.registry.get(&pty_id).map(|r| r.cwd.as_str())
    }

    pub fn shell(&self, pty_id: PtyId) -> Option<&str> {
        self.registry.get(&pty_id).map(|r| r.shell.as_str())
    }

    pub fn modes(&self, pty_id: PtyId) -> Option<ModeSnapshot> {
        self.registry.get(&pty_id).map(|r| r.modes)
    }

    /// Pane-relative origin used by graphics passthrough.
    pub fn set_pane_position(&mut self, pty_id: PtyId, x: u16, y: u16) -> bool {
        match self.registry.get_mut(&pty_id) {
            Some(record) => {
                record.pane_position = (x, y);
                true
            }
            None => false,
        }
    }

    pub fn pane_position(&self, pty_id: PtyId) -> Option<(u16, u16)> {
        self.registry.get(&pty_id).map(|r| r.pane_position)
    }

    // ==== bindings ====================================================

    pub fn bind_pane(&mut self, pty_id: PtyId, pane: &str, owner_session: &str) -> bool {
        match self.registry.get_mut(&pty_id) {
            Some(record) => {
                record.pane = Some(pane.to_string());
                record.owner_session = Some(owner_session.to_string());
                true
            }
            None => false,
        }
    }

    pub fn pane_of(&self, pty_id: PtyId) -> Option<&str> {
        self.registry.get(&pty_id).and_then(|r| r.pane.as_deref())
    }

    pub fn owner_session_of(&self, pty_id: PtyId) -> Option<&str> {
        self.registry
            .get(&pty_id)
            .and_then(|r| r.owner_session.as_deref())
    }

    /// PTYs owned by one multiplexer session.
    pub fn ptys_of_session(&self, session_id: &str) -> Vec<PtyId> {
        let mut ids: Vec<PtyId> = self
            .registry
            .iter()
            .filter(|(_, r)| r.owner_session.as_deref() == Some(session_id))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Detach a PTY from its pane without destroying the child or the
    /// emulator. Subscribers are dropped and update emission is gated off.
    pub fn suspend(&mut self, pty_id: PtyId) -> bool {
        let Some(record) = self.registry.get_mut(&pty_id) else {
            return false;
        };
        record.suspended = true;
        record.pane = None;
        self.bus.detach_pty(pty_id);
        self.pool.set_update_enabled(record.session, false);
        true
    }

    /// Rebind a suspended PTY to a pane. The worker emits a synthetic full
    /// refresh once updates are re-enabled.
    pub fn resume(&mut self, pty_id: PtyId, pane: &str) -> bool {
        let Some(record) = self.registry.get_mut(&pty_id) else {
            return false;
        };
        record.suspended = false;
        record.pane = Some(pane.to_string());
        self.pool.set_update_enabled(record.session, true);
        true
    }

    /// Request a full-refresh update, giving a subscriber that joined
    /// mid-stream a baseline before any delta.
    pub fn request_refresh(&mut self, pty_id: PtyId) -> bool {
        match self.registry.get(&pty_id) {
            Some(record) => self.pool.refresh(record.session),
            None => false,
        }
    }

    // ==== scroll ======================================================

    pub fn get_scroll_state(&self, pty_id: PtyId) -> Option<ScrollState> {
        self.registry.get(&pty_id).map(|r| r.scroll)
    }

    /// Adjust the viewport by `delta` lines (positive scrolls into
    /// history). The worker clamps and emits an update so the TUI
    /// re-reads.
    pub fn set_scroll_offset(&mut self, pty_id: PtyId, delta: i64) -> bool {
        match self.registry.get(&pty_id) {
            Some(record) => self.pool.set_scroll_offset(record.session, delta),
            None => false,
        }
    }

    pub fn scroll_to_bottom(&mut self, pty_id: PtyId) -> bool {
        match self.registry.get(&pty_id) {
            Some(record) => self.pool.scroll_to_bottom(record.session),
            None => false,
        }
    }

    // ==== async requests ==============================================

    pub fn search(&mut self, pty_id: PtyId, query: &str, limit: usize) -> Result<RequestId> {
        let session = self.session_of(pty_id)?;
        self.pool.search(session, query, limit)
    }

    pub fn get_scrollback_line(&mut self, pty_id: PtyId, index: u64) -> Result<RequestId> {
        let session = self.session_of(pty_id)?;
        self.pool.get_scrollback_line(session, index)
    }

    /// Snapshot of the screen plus recent scrollback for external tools.
    pub fn capture(&mut self, pty_id: PtyId) -> Result<RequestId> {
        let session = self.session_of(pty_id)?;
        self.pool.capture(session, CAPTURE_SCROLLBACK_LINES)
    }

    fn session_of(&self, pty_id: PtyId) -> Result<PoolSessionId> {
        self.registry
            .get(&pty_id)
            .map(|r| r.session)
            .ok_or(Error::PtyNotFound(pty_id))
    }

    // ==== focus =======================================================

    /// Record the host terminal's focus and tell every focus-tracking
    /// child immediately.
    pub fn set_focus(&mut self, focused: bool) {
        if self.host_focused == focused {
            return;
        }
        self.host_focused = focused;
        let report: &[u8] = if focused { b"\x1b[I" } else { b"\x1b[O" };
        for record in self.registry.values_mut() {
            if record.modes.focus_reporting && !record.exited {
                let _ = record.handle.write(report);
            }
        }
    }

    // ==== aggregate support ===========================================

    /// Basename of the foreground process on the PTY, if the platform
    /// exposes it.
    pub fn foreground_process(&self, pty_id: PtyId) -> Option<String> {
        let record = self.registry.get(&pty_id)?;
        let pid = record.handle.foreground_pid()?;
        read_process_name(pid)
    }

    // ==== pump ========================================================

    /// Drain PTY bytes and pool events. Call from the main loop; returns
    /// request results and exit notifications.
    pub fn pump(&mut self) -> Vec<ServiceEvent> {
        let now = Instant::now();
        let mut out = std::mem::take(&mut self.queued);

        while let Ok(io) = self.io_rx.try_recv() {
            match io {
                PtyIo::Data { pty_id, bytes } => {
                    let released = match self.registry.get_mut(&pty_id) {
                        Some(record) => record.sync.feed(&bytes, now),
                        None => continue,
                    };
                    self.process_released(pty_id, released);
                }
                PtyIo::Exit { pty_id } => self.handle_exit(pty_id, &mut out),
            }
        }

        // Expired sync-mode windows release their held bytes.
        let flushes: Vec<(PtyId, Vec<u8>)> = self
            .registry
            .iter_mut()
            .filter_map(|(id, record)| {
                let released = record.sync.poll(now);
                if released.is_empty() {
                    None
                } else {
                    Some((*id, released))
                }
            })
            .collect();
        for (pty_id, released) in flushes {
            self.process_released(pty_id, released);
        }

        for event in self.pool.poll() {
            self.dispatch_pool_event(event, &mut out);
        }

        out
    }

    fn process_released(&mut self, pty_id: PtyId, released: Vec<u8>) {
        if released.is_empty() {
            return;
        }
        let Some(record) = self.registry.get_mut(&pty_id) else {
            return;
        };
        let outcome = record.query.feed(&released);
        if !outcome.text.is_empty() {
            self.pool.write(record.session, outcome.text);
        }
        for response in outcome.responses {
            let _ = record.handle.write(&response);
        }
    }

    fn handle_exit(&mut self, pty_id: PtyId, out: &mut Vec<ServiceEvent>) {
        let Some(record) = self.registry.get_mut(&pty_id) else {
            return;
        };
        if record.exited {
            return;
        }
        record.exited = true;
        let status = ExitStatus {
            code: record.handle.try_exit_code(),
            signal: None,
        };
        self.bus.emit_exit(pty_id, &status);
        out.push(ServiceEvent::Exited { pty_id, status });
    }

    fn dispatch_pool_event(&mut self, event: PoolEvent, out: &mut Vec<ServiceEvent>) {
        match event {
            PoolEvent::Update { session, update } => {
                let Some(&pty_id) = self.by_session.get(&session) else {
                    return;
                };
                if let Some(record) = self.registry.get_mut(&pty_id) {
                    record.scroll = update.scroll;
                    let was_reporting = record.modes.focus_reporting;
                    record.modes = update.modes;
                    if update.modes.focus_reporting && !was_reporting {
                        // Newly enabled focus tracking learns the current
                        // state right away.
                        let report: &[u8] = if self.host_focused {
                            b"\x1b[I"
                        } else {
                            b"\x1b[O"
                        };
                        let _ = record.handle.write(report);
                    }
                }
                self.bus.emit_update(pty_id, &update);
                self.bus.emit_scroll(pty_id, &update.scroll);
            }
            PoolEvent::TitleChanged { session, title } => {
                let Some(&pty_id) = self.by_session.get(&session) else {
                    return;
                };
                if let Some(record) = self.registry.get_mut(&pty_id) {
                    record.title = title.clone();
                }
                self.bus.emit_title(pty_id, &title);
            }
            PoolEvent::ModeChanged { session, modes } => {
                let Some(&pty_id) = self.by_session.get(&session) else {
                    return;
                };
                if let Some(record) = self.registry.get_mut(&pty_id) {
                    let was_reporting = record.modes.focus_reporting;
                    record.modes = modes;
                    if modes.focus_reporting && !was_reporting {
                        let report: &[u8] = if self.host_focused {
                            b"\x1b[I"
                        } else {
                            b"\x1b[O"
                        };
                        let _ = record.handle.write(report);
                    }
                }
            }
            PoolEvent::CwdChanged { session, cwd } => {
                if let Some(&pty_id) = self.by_session.get(&session) {
                    if let Some(record) = self.registry.get_mut(&pty_id) {
                        record.cwd = cwd;
                    }
                }
            }
            PoolEvent::PtyReply { session, data } => {
                if let Some(&pty_id) = self.by_session.get(&session) {
                    if let Some(record) = self.registry.get_mut(&pty_id) {
                        let _ = record.handle.write(&data);
                    }
                }
            }
            PoolEvent::ScrollbackTruncated { session } => {
                if let Some(&pty_id) = self.by_session.get(&session) {
                    self.bus
                        .emit_notice(&EngineNotice::ScrollbackTruncated { pty_id });
                }
            }
            PoolEvent::ScrollbackLine {
                session,
                request,
                result,
            } => {
                if let Some(&pty_id) = self.by_session.get(&session) {
                    out.push(ServiceEvent::ScrollbackLine {
                        pty_id,
                        request,
                        result,
                    });
                }
            }
            PoolEvent::SearchResults {
                session,
                request,
                result,
            } => {
                if let Some(&pty_id) = self.by_session.get(&session) {
                    out.push(ServiceEvent::SearchResults {
                        pty_id,
                        request,
                        result,
                    });
                }
            }
            PoolEvent::Captured {
                session,
                request,
                result,
            } => {
                if let Some(&pty_id) = self.by_session.get(&session) {
                    out.push(ServiceEvent::Captured {
                        pty_id,
                        request,
                        result,
                    });
                }
            }
            PoolEvent::SessionInitFailed { session, message } => {
                log::warn!("emulator init failed for pool session {session}: {message}");
            }
            PoolEvent::Destroyed { .. } | PoolEvent::WorkerRestarted { .. } => {}
        }
    }
}

#[cfg(unix)]
fn read_process_name(pid: i32) -> Option<String> {
    let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    let name = comm.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(not(unix))]
fn read_process_name(_pid: i32) -> Option<String> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn service() -> (PtyService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            worker_count: 1,
            ..Config::default()
        };
        (
            PtyService::with_archive_root(config, dir.path().to_path_buf()),
            dir,
        )
    }

    fn pump_until(
        service: &mut PtyService,
        mut pred: impl FnMut(&mut PtyService, Vec<ServiceEvent>) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            let events = service.pump();
            if pred(service, events) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn spawned_shell_output_reaches_update_subscribers() {
        let (mut service, _dir) = service();
        let pty = service
            .create(&CreateOptions {
                cols: 80,
                rows: 24,
                shell: Some("sh".into()),
                ..CreateOptions::default()
            })
            .unwrap();

        let seen = std::rc::Rc::new(std::cell::RefCell::new(String::new()));
        let sink = std::rc::Rc::clone(&seen);
        service.bus().on_update(
            pty,
            Box::new(move |update| {
                let mut text = sink.borrow_mut();
                if let Some(full) = &update.full {
                    text.clear();
                    for row in &full.row_data {
                        text.push_str(row.text().trim_end());
                        text.push('\n');
                    }
                } else {
                    for (_, row) in &update.dirty_rows {
                        text.push_str(row.text().trim_end());
                        text.push('\n');
                    }
                }
            }),
        );

        assert!(service.write(pty, b"echo marker_4271\n"));
        let found = pump_until(&mut service, |_, _| {
            seen.borrow().contains("marker_4271")
        });
        assert!(found, "shell output never arrived");

        assert!(service.destroy(pty));
        assert!(!service.is_live(pty));
    }

    #[test]
    fn exit_callbacks_fire_exactly_once_for_a_short_lived_child() {
        let (mut service, _dir) = service();
        let pty = service
            .create(&CreateOptions {
                cols: 40,
                rows: 5,
                shell: Some("true".into()),
                ..CreateOptions::default()
            })
            .unwrap();

        let count = std::rc::Rc::new(std::cell::RefCell::new(0));
        let sink = std::rc::Rc::clone(&count);
        service
            .bus()
            .on_exit(pty, Box::new(move |_| *sink.borrow_mut() += 1));

        assert!(pump_until(&mut service, |_, events| {
            events
                .iter()
                .any(|e| matches!(e, ServiceEvent::Exited { pty_id, .. } if *pty_id == pty))
        }));
        // Extra pumps and an explicit destroy never re-fire exit.
        service.pump();
        service.destroy(pty);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn capture_round_trips_through_the_service() {
        let (mut service, _dir) = service();
        let pty = service
            .create(&CreateOptions {
                cols: 60,
                rows: 10,
                shell: Some("sh".into()),
                ..CreateOptions::default()
            })
            .unwrap();
        service.write(pty, b"echo capture_me_9\n");

        // Wait for the output to land first.
        let seen = std::rc::Rc::new(std::cell::RefCell::new(false));
        let sink = std::rc::Rc::clone(&seen);
        service.bus().on_update(
            pty,
            Box::new(move |update| {
                let rows = update
                    .full
                    .as_ref()
                    .map(|f| f.row_data.clone())
                    .unwrap_or_else(|| update.dirty_rows.iter().map(|(_, r)| r.clone()).collect());
                if rows.iter().any(|r| r.text().contains("capture_me_9")) {
                    *sink.borrow_mut() = true;
                }
            }),
        );
        assert!(pump_until(&mut service, |_, _| *seen.borrow()));

        let request = service.capture(pty).unwrap();
        let mut captured = None;
        assert!(pump_until(&mut service, |_, events| {
            for event in events {
                if let ServiceEvent::Captured { request: r, result, .. } = event {
                    if r == request {
                        captured = result.ok();
                        return true;
                    }
                }
            }
            false
        }));
        assert!(captured.unwrap().contains("capture_me_9"));
        service.destroy(pty);
    }

    #[test]
    fn suspend_gates_updates_and_resume_restores_them() {
        let (mut service, _dir) = service();
        let pty = service
            .create(&CreateOptions {
                cols: 40,
                rows: 5,
                shell: Some("sh".into()),
                ..CreateOptions::default()
            })
            .unwrap();
        service.bind_pane(pty, "pane-1", "sess-a");
        assert_eq!(service.pane_of(pty), Some("pane-1"));

        assert!(service.suspend(pty));
        assert!(service.pane_of(pty).is_none());
        // Child and emulator stay alive across suspension.
        assert!(service.is_live(pty));

        assert!(service.resume(pty, "pane-2"));
        assert_eq!(service.pane_of(pty), Some("pane-2"));
        service.destroy(pty);
    }

    #[test]
    fn destroy_cancels_requests_still_in_flight() {
        let (mut service, _dir) = service();
        let pty = service
            .create(&CreateOptions {
                cols: 40,
                rows: 5,
                shell: Some("sh".into()),
                ..CreateOptions::default()
            })
            .unwrap();

        let request = service.get_scrollback_line(pty, 0).unwrap();
        service.destroy(pty);

        let events = service.pump();
        let cancelled = events.iter().any(|event| {
            matches!(
                event,
                ServiceEvent::ScrollbackLine { request: r, result: Err(Error::Cancelled), .. }
                if *r == request
            )
        });
        assert!(cancelled);
    }

    #[test]
    fn unknown_ids_are_soft_failures() {
        let (mut service, _dir) = service();
        assert!(!service.write(404, b"x"));
        assert!(!service.destroy(404));
        assert!(!service.suspend(404));
        assert!(service.get_scroll_state(404).is_none());
        assert!(matches!(
            service.resize(404, 10, 10),
            Err(Error::PtyNotFound(404))
        ));
        assert!(matches!(
            service.search(404, "x", 1),
            Err(Error::PtyNotFound(404))
        ));
    }

    #[test]
    fn resize_rejects_degenerate_dimensions() {
        let (mut service, _dir) = service();
        assert!(matches!(
            service.resize(1, 0, 10),
            Err(Error::ResizeRejected { .. })
        ));
    }
}

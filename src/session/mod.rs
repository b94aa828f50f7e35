//! Session lifecycle: named bundles of workspaces, switched without
//! destroying the PTYs they own.
//!
//! Switching away suspends every PTY bound to the outgoing session
//! (detached from panes, fan-out dropped, child untouched); switching
//! back rebinds them through the stored pane-to-PTY map and prunes panes
//! whose PTY died in the meantime. Saves are debounced on layout-version
//! changes and retried on the autosave tick after a failure.

pub mod store;

pub use store::{
    instantiate_template, FileSessionStore, PersistedSession, SessionId, SessionMeta,
    SessionStore, SplitOrientation, Template, TemplateWorkspace,
};

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;

use crate::bus::EngineNotice;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::layout::{Action, LayoutEngine, LoadedLayout, PaneId};
use crate::pty::PtyService;

/// What a session switch had to leave behind.
#[derive(Debug, Default)]
pub struct SwitchOutcome {
    /// Panes whose stored PTY was no longer live; they were pruned.
    pub missing_panes: Vec<PaneId>,
}

pub struct SessionManager {
    store: Box<dyn SessionStore>,
    metas: HashMap<SessionId, SessionMeta>,
    active: Option<SessionId>,
    session_counter: u64,
    // Persistence triggers.
    last_saved_version: u64,
    last_seen_version: u64,
    last_change_at: Option<Instant>,
    last_autosave: Instant,
    save_failed: bool,
    // Stashed maps from the last load, for lazy PTY creation.
    pending_cwds: HashMap<PaneId, String>,
    pending_commands: HashMap<PaneId, String>,
    autosave_interval: std::time::Duration,
    save_debounce: std::time::Duration,
}

impl SessionManager {
    pub fn new(store: Box<dyn SessionStore>, config: &Config) -> Self {
        let metas = match store.list() {
            Ok(list) => list.into_iter().map(|m| (m.id.clone(), m)).collect(),
            Err(err) => {
                log::warn!("could not list sessions: {err}");
                HashMap::new()
            }
        };
        Self {
            store,
            metas,
            active: None,
            session_counter: 0,
            last_saved_version: 0,
            last_seen_version: 0,
            last_change_at: None,
            last_autosave: Instant::now(),
            save_failed: false,
            pending_cwds: HashMap::new(),
            pending_commands: HashMap::new(),
            autosave_interval: config.autosave_interval,
            save_debounce: config.save_debounce,
        }
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Known sessions, most recently switched first.
    pub fn sessions(&self) -> Vec<&SessionMeta> {
        let mut metas: Vec<&SessionMeta> = self.metas.values().collect();
        metas.sort_by(|a, b| b.last_switched_at.cmp(&a.last_switched_at));
        metas
    }

    /// The best jump target: the most recently used session other than
    /// the given one.
    pub fn most_recent_other(&self, id: &str) -> Option<&SessionMeta> {
        self.sessions().into_iter().find(|m| m.id != id)
    }

    /// Working directory stashed for a pane awaiting lazy PTY creation.
    pub fn take_pending_cwd(&mut self, pane: &str) -> Option<String> {
        self.pending_cwds.remove(pane)
    }

    /// Last command stashed for a pane awaiting lazy PTY creation.
    pub fn take_pending_command(&mut self, pane: &str) -> Option<String> {
        self.pending_commands.remove(pane)
    }

    fn generate_id(&mut self) -> SessionId {
        self.session_counter += 1;
        format!(
            "sess-{}-{}",
            Utc::now().timestamp_millis(),
            self.session_counter
        )
    }

    /// Create a new empty session record. Saves the current session first
    /// so nothing is lost, but does not switch into the new one.
    pub fn create_session(
        &mut self,
        name: Option<&str>,
        layout: &LayoutEngine,
        ptys: &PtyService,
    ) -> Result<SessionId> {
        if let Some(name) = name {
            if self.metas.values().any(|m| m.name == name) {
                return Err(Error::DuplicateSession(name.to_string()));
            }
        }
        if self.active.is_some() {
            self.save_active(layout, ptys)?;
        }

        let id = self.generate_id();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("session {}", self.metas.len() + 1));
        let meta = SessionMeta {
            id: id.clone(),
            name,
            created_at: Utc::now(),
            last_switched_at: Utc::now(),
        };
        let record = PersistedSession {
            metadata: meta.clone(),
            layout: LoadedLayout::default(),
            cwd_map: HashMap::new(),
            command_map: HashMap::new(),
        };
        self.store
            .save(&record)
            .map_err(|e| Error::SessionPersistFailed(e.to_string()))?;
        self.metas.insert(id.clone(), meta);
        Ok(id)
    }

    /// Switch to a session: save and suspend the current one, load the
    /// target, rebind surviving PTYs, and prune panes whose PTY is gone.
    pub fn switch_session(
        &mut self,
        id: &str,
        layout: &mut LayoutEngine,
        ptys: &mut PtyService,
    ) -> Result<SwitchOutcome> {
        let mut record = self
            .store
            .load(id)
            .map_err(|e| Error::SessionPersistFailed(e.to_string()))?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        if let Some(active) = self.active.clone() {
            if active == id {
                return Ok(SwitchOutcome::default());
            }
            self.save_active(layout, ptys)?;
            for pty in ptys.ptys_of_session(&active) {
                ptys.suspend(pty);
            }
        }

        // Rebind stored pane-to-PTY pairs; anything dead is reported and
        // pruned so the layout doesn't show ghost panes.
        let mut outcome = SwitchOutcome::default();
        for ws in record.layout.workspaces.values_mut() {
            let mut dead: Vec<PaneId> = Vec::new();
            for pane in ws.main.iter_mut().chain(ws.stack.iter_mut()) {
                if let Some(pty) = pane.pty {
                    if ptys.is_live(pty) {
                        ptys.resume(pty, &pane.id);
                        ptys.bind_pane(pty, &pane.id, id);
                    } else {
                        pane.pty = None;
                        dead.push(pane.id.clone());
                    }
                }
            }
            for pane_id in dead {
                remove_pane(ws, &pane_id);
                outcome.missing_panes.push(pane_id);
            }
        }

        self.pending_cwds = record.cwd_map;
        self.pending_commands = record.command_map;
        layout.apply(Action::LoadSession(record.layout));
        self.last_saved_version = layout.layout_version();
        self.last_seen_version = layout.layout_version();

        if let Some(meta) = self.metas.get_mut(id) {
            meta.last_switched_at = Utc::now();
        } else {
            let mut meta = record.metadata;
            meta.last_switched_at = Utc::now();
            self.metas.insert(id.to_string(), meta);
        }
        self.active = Some(id.to_string());
        if let Err(err) = self.store.set_active(id) {
            log::warn!("could not record active session: {err}");
        }
        Ok(outcome)
    }

    /// Destroy a session: kill its PTYs, remove the record, and fall back
    /// to the most recently used remaining session (or a fresh default)
    /// when the active one was deleted.
    pub fn delete_session(
        &mut self,
        id: &str,
        layout: &mut LayoutEngine,
        ptys: &mut PtyService,
    ) -> Result<()> {
        if !self.metas.contains_key(id) && self.store.load(id).ok().flatten().is_none() {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        for pty in ptys.ptys_of_session(id) {
            ptys.destroy(pty);
        }
        self.store
            .delete(id)
            .map_err(|e| Error::SessionPersistFailed(e.to_string()))?;
        self.metas.remove(id);

        if self.active.as_deref() == Some(id) {
            self.active = None;
            let next = self.sessions().first().map(|m| m.id.clone());
            match next {
                Some(next) => {
                    self.switch_session(&next, layout, ptys)?;
                }
                None => {
                    layout.apply(Action::ClearAll);
                    let fresh = self.create_session(None, layout, ptys)?;
                    self.switch_session(&fresh, layout, ptys)?;
                }
            }
        }
        Ok(())
    }

    /// Restore the session the store marks active, if any.
    pub fn restore_last(
        &mut self,
        layout: &mut LayoutEngine,
        ptys: &mut PtyService,
    ) -> Result<Option<SessionId>> {
        let id = match self.store.get_active() {
            Ok(Some(id)) => id,
            _ => return Ok(None),
        };
        match self.switch_session(&id, layout, ptys) {
            Ok(_) => Ok(Some(id)),
            Err(Error::SessionNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Persist the active session now.
    pub fn save_active(&mut self, layout: &LayoutEngine, ptys: &PtyService) -> Result<()> {
        let Some(id) = self.active.clone() else {
            return Ok(());
        };
        let Some(meta) = self.metas.get(&id).cloned() else {
            return Ok(());
        };

        // Record each bound pane's tracked cwd so dead panes can respawn
        // where they were.
        let mut cwd_map = self.pending_cwds.clone();
        let snapshot = layout.snapshot();
        for ws in snapshot.workspaces.values() {
            for pane in ws.panes() {
                if let Some(pty) = pane.pty {
                    if let Some(cwd) = ptys.cwd(pty) {
                        cwd_map.insert(pane.id.clone(), cwd.to_string());
                    }
                }
            }
        }

        let record = PersistedSession {
            metadata: meta,
            layout: snapshot,
            cwd_map,
            command_map: self.pending_commands.clone(),
        };
        self.store
            .save(&record)
            .map_err(|e| Error::SessionPersistFailed(e.to_string()))?;
        self.last_saved_version = layout.layout_version();
        self.save_failed = false;
        Ok(())
    }

    /// Persistence tick: debounced save on layout changes plus a periodic
    /// autosave; failed saves retry on the next tick and surface once on
    /// the bus.
    pub fn maybe_save(&mut self, now: Instant, layout: &LayoutEngine, ptys: &mut PtyService) {
        let version = layout.layout_version();
        if version != self.last_seen_version {
            self.last_seen_version = version;
            self.last_change_at = Some(now);
        }

        let dirty = version != self.last_saved_version;
        if !dirty && !self.save_failed {
            return;
        }

        let debounce_ready = self
            .last_change_at
            .map(|at| now.duration_since(at) >= self.save_debounce)
            .unwrap_or(false);
        let autosave_ready = now.duration_since(self.last_autosave) >= self.autosave_interval;

        if debounce_ready || autosave_ready {
            self.last_autosave = now;
            if let Err(err) = self.save_active(layout, ptys) {
                let was_failed = self.save_failed;
                self.save_failed = true;
                log::warn!("session save failed: {err}");
                if !was_failed {
                    if let Some(id) = self.active.clone() {
                        ptys.bus().emit_notice(&EngineNotice::SessionPersistFailed {
                            session_id: id,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
    }
}

fn remove_pane(ws: &mut crate::layout::Workspace, pane_id: &str) {
    if ws.main.as_ref().map(|p| p.id == pane_id).unwrap_or(false) {
        ws.main = None;
        if !ws.stack.is_empty() {
            ws.main = Some(ws.stack.remove(0));
        }
    } else if let Some(index) = ws.stack.iter().position(|p| p.id == pane_id) {
        ws.stack.remove(index);
        if index <= ws.active_stack_index {
            ws.active_stack_index = ws.active_stack_index.saturating_sub(1);
        }
    }
    if ws.focused.as_deref() == Some(pane_id) {
        ws.focused = ws.main.as_ref().map(|p| p.id.clone());
    }
    if !ws.stack.is_empty() {
        ws.active_stack_index = ws.active_stack_index.min(ws.stack.len() - 1);
    } else {
        ws.active_stack_index = 0;
    }
}

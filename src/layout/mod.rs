//! Workspace and pane data model plus the action reducer.
//!
//! The engine owns up to nine workspaces, each a master-stack layout.
//! Every action is applied atomically through [`LayoutEngine::apply`];
//! save-worthy mutations bump `layout_version`, which the session manager
//! watches for persistence triggers.

pub mod geometry;

pub use geometry::{LayoutMode, Rect};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Pane id, unique within the process (`pane-N`).
pub type PaneId = String;
/// Workspace slot, 1 through 9.
pub type WorkspaceId = u8;

pub const WORKSPACE_MIN: WorkspaceId = 1;
pub const WORKSPACE_MAX: WorkspaceId = 9;

/// A pane: a rectangle that may be bound to a PTY. The PTY's lifetime is
/// independent; the binding is a weak reference by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pane {
    pub id: PaneId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pty: Option<u64>,
    #[serde(default)]
    pub title: String,
    /// Computed geometry; `None` while hidden (zoom, stacked mode).
    #[serde(skip)]
    pub rect: Option<Rect>,
}

impl Pane {
    fn new(id: PaneId, title: Option<String>) -> Self {
        Self {
            id,
            pty: None,
            title: title.unwrap_or_default(),
            rect: None,
        }
    }
}

/// One master-stack workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<Pane>,
    #[serde(default)]
    pub stack: Vec<Pane>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focused: Option<PaneId>,
    #[serde(default)]
    pub active_stack_index: usize,
    #[serde(default)]
    pub mode: LayoutMode,
    #[serde(default)]
    pub zoomed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Workspace {
    pub fn is_empty(&self) -> bool {
        self.main.is_none() && self.stack.is_empty()
    }

    pub fn pane_count(&self) -> usize {
        usize::from(self.main.is_some()) + self.stack.len()
    }

    pub fn panes(&self) -> impl Iterator<Item = &Pane> {
        self.main.iter().chain(self.stack.iter())
    }

    pub fn pane(&self, id: &str) -> Option<&Pane> {
        self.panes().find(|p| p.id == id)
    }

    fn pane_mut(&mut self, id: &str) -> Option<&mut Pane> {
        self.main
            .iter_mut()
            .chain(self.stack.iter_mut())
            .find(|p| p.id == id)
    }

    pub fn focused_pane(&self) -> Option<&Pane> {
        self.focused.as_deref().and_then(|id| self.pane(id))
    }

    /// Position of the focused pane: `None` = main, `Some(i)` = stack.
    fn focus_position(&self) -> Option<Option<usize>> {
        let focused = self.focused.as_deref()?;
        if self.main.as_ref().map(|p| p.id == focused).unwrap_or(false) {
            return Some(None);
        }
        self.stack
            .iter()
            .position(|p| p.id == focused)
            .map(Some)
    }

    fn clamp_stack_index(&mut self) {
        if self.stack.is_empty() {
            self.active_stack_index = 0;
        } else {
            self.active_stack_index = self.active_stack_index.min(self.stack.len() - 1);
        }
    }
}

/// Navigation directions used by [`Action::Navigate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

/// Layout state loaded from a session file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadedLayout {
    pub workspaces: BTreeMap<WorkspaceId, Workspace>,
    pub active_workspace_id: WorkspaceId,
}

/// All mutations, as a sum type so callers can queue and batch them.
#[derive(Debug, Clone)]
pub enum Action {
    FocusPane(PaneId),
    Navigate(Direction),
    NewPane(Option<String>),
    ClosePane,
    ClosePaneById(PaneId),
    SetViewport(Rect),
    SwitchWorkspace(WorkspaceId),
    SetLayoutMode(LayoutMode),
    SetPanePty(PaneId, u64),
    SetPaneTitle(PaneId, String),
    SetWorkspaceLabel(WorkspaceId, Option<String>),
    SwapMain,
    ToggleZoom,
    LoadSession(LoadedLayout),
    ClearAll,
}

/// What a close action removed, so the caller can release the PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedPane {
    pub id: PaneId,
    pub pty: Option<u64>,
}

pub struct LayoutEngine {
    workspaces: BTreeMap<WorkspaceId, Workspace>,
    active: WorkspaceId,
    viewport: Rect,
    split_ratio: f32,
    version: u64,
    next_pane: u64,
    /// Panes removed by the most recent close action(s).
    closed: Vec<ClosedPane>,
}

impl LayoutEngine {
    pub fn new(viewport: Rect, split_ratio: f32) -> Self {
        let mut workspaces = BTreeMap::new();
        workspaces.insert(WORKSPACE_MIN, Workspace::default());
        Self {
            workspaces,
            active: WORKSPACE_MIN,
            viewport,
            split_ratio,
            version: 0,
            next_pane: 0,
            closed: Vec::new(),
        }
    }

    pub fn layout_version(&self) -> u64 {
        self.version
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    pub fn active_workspace_id(&self) -> WorkspaceId {
        self.active
    }

    pub fn active_workspace(&self) -> &Workspace {
        &self.workspaces[&self.active]
    }

    pub fn workspaces(&self) -> &BTreeMap<WorkspaceId, Workspace> {
        &self.workspaces
    }

    pub fn workspace(&self, id: WorkspaceId) -> Option<&Workspace> {
        self.workspaces.get(&id)
    }

    pub fn focused_pane_id(&self) -> Option<&str> {
        self.active_workspace().focused.as_deref()
    }

    /// The rectangle computed for a pane in the active workspace.
    pub fn pane_rect(&self, pane_id: &str) -> Option<Rect> {
        self.active_workspace().pane(pane_id).and_then(|p| p.rect)
    }

    /// Panes removed by close actions since the last call.
    pub fn take_closed(&mut self) -> Vec<ClosedPane> {
        std::mem::take(&mut self.closed)
    }

    /// Apply one action atomically. Returns true when the action changed
    /// anything.
    pub fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::FocusPane(id) => self.focus_pane(&id),
            Action::Navigate(direction) => self.navigate(direction),
            Action::NewPane(title) => {
                self.new_pane(title);
                true
            }
            Action::ClosePane => self.close_focused(),
            Action::ClosePaneById(id) => self.close_pane_by_id(&id),
            Action::SetViewport(rect) => {
                self.viewport = rect;
                self.recompute_all();
                true
            }
            Action::SwitchWorkspace(id) => self.switch_workspace(id),
            Action::SetLayoutMode(mode) => {
                let ws = self.workspaces.get_mut(&self.active).unwrap();
                if ws.mode == mode {
                    return false;
                }
                ws.mode = mode;
                self.recompute(self.active);
                self.bump();
                true
            }
            Action::SetPanePty(pane_id, pty) => {
                // Binding a PTY is not persistence-worthy on its own.
                for ws in self.workspaces.values_mut() {
                    if let Some(pane) = ws.pane_mut(&pane_id) {
                        pane.pty = Some(pty);
                        return true;
                    }
                }
                false
            }
            Action::SetPaneTitle(pane_id, title) => {
                for ws in self.workspaces.values_mut() {
                    if let Some(pane) = ws.pane_mut(&pane_id) {
                        pane.title = title;
                        self.bump();
                        return true;
                    }
                }
                false
            }
            Action::SetWorkspaceLabel(id, label) => {
                match self.workspaces.get_mut(&id) {
                    Some(ws) => {
                        ws.label = label;
                        self.bump();
                        true
                    }
                    None => false,
                }
            }
            Action::SwapMain => self.swap_main(),
            Action::ToggleZoom => {
                let active = self.active;
                // At most one workspace may be zoomed at a time.
                let entering = !self.workspaces[&active].zoomed;
                if entering {
                    for ws in self.workspaces.values_mut() {
                        ws.zoomed = false;
                    }
                }
                self.workspaces.get_mut(&active).unwrap().zoomed = entering;
                self.recompute(active);
                self.bump();
                true
            }
            Action::LoadSession(layout) => {
                self.load_session(layout);
                true
            }
            Action::ClearAll => {
                self.workspaces.clear();
                self.workspaces.insert(WORKSPACE_MIN, Workspace::default());
                self.active = WORKSPACE_MIN;
                self.bump();
                true
            }
        }
    }

    /// Apply a batch in order; close actions queued together coalesce
    /// into one recompute.
    pub fn apply_batch(&mut self, actions: Vec<Action>) {
        for action in actions {
            self.apply(action);
        }
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    // ==== individual actions ==========================================

    fn focus_pane(&mut self, pane_id: &str) -> bool {
        let active = self.active;
        let ws = self.workspaces.get_mut(&active).unwrap();
        if ws.pane(pane_id).is_none() {
            return false;
        }
        ws.focused = Some(pane_id.to_string());
        if let Some(index) = ws.stack.iter().position(|p| p.id == pane_id) {
            ws.active_stack_index = index;
        }
        if ws.zoomed || ws.mode == LayoutMode::Stacked {
            self.recompute(active);
        }
        self.bump();
        true
    }

    fn navigate(&mut self, direction: Direction) -> bool {
        let ws = self.workspaces.get_mut(&self.active).unwrap();
        let Some(position) = ws.focus_position() else {
            // Nothing focused yet: adopt the main pane if there is one.
            if let Some(main) = &ws.main {
                let id = main.id.clone();
                return self.focus_pane(&id);
            }
            return false;
        };

        let mode = ws.mode;
        let stack_len = ws.stack.len();
        use Direction::*;
        let target: Option<Option<usize>> = match (mode, position, direction) {
            // Vertical/stacked: main on the left, stack on the right.
            (LayoutMode::Vertical | LayoutMode::Stacked, None, East) if stack_len > 0 => {
                Some(Some(ws.active_stack_index.min(stack_len - 1)))
            }
            (LayoutMode::Vertical | LayoutMode::Stacked, Some(_), West) => Some(None),
            (LayoutMode::Vertical | LayoutMode::Stacked, Some(i), South) if i + 1 < stack_len => {
                Some(Some(i + 1))
            }
            (LayoutMode::Vertical | LayoutMode::Stacked, Some(i), North) if i > 0 => {
                Some(Some(i - 1))
            }
            // Horizontal: main on top, stack along the bottom.
            (LayoutMode::Horizontal, None, South) if stack_len > 0 => {
                Some(Some(ws.active_stack_index.min(stack_len - 1)))
            }
            (LayoutMode::Horizontal, Some(_), North) => Some(None),
            (LayoutMode::Horizontal, Some(i), East) if i + 1 < stack_len => Some(Some(i + 1)),
            (LayoutMode::Horizontal, Some(i), West) if i > 0 => Some(Some(i - 1)),
            _ => None,
        };

        let Some(target) = target else {
            return false;
        };
        let id = match target {
            None => ws.main.as_ref().map(|p| p.id.clone()),
            Some(i) => ws.stack.get(i).map(|p| p.id.clone()),
        };
        match id {
            Some(id) => self.focus_pane(&id),
            None => false,
        }
    }

    /// Create a pane in the active workspace and focus it. Returns its id.
    pub fn new_pane(&mut self, title: Option<String>) -> PaneId {
        self.next_pane += 1;
        let id = format!("pane-{}", self.next_pane);
        let active = self.active;
        let ws = self.workspaces.get_mut(&active).unwrap();
        let pane = Pane::new(id.clone(), title);
        if ws.main.is_none() {
            ws.main = Some(pane);
        } else {
            ws.stack.push(pane);
            ws.active_stack_index = ws.stack.len() - 1;
        }
        ws.focused = Some(id.clone());
        self.recompute(active);
        self.bump();
        id
    }

    fn close_focused(&mut self) -> bool {
        let focused = match self.active_workspace().focused.clone() {
            Some(id) => id,
            None => return false,
        };
        self.close_pane_by_id(&focused)
    }

    fn close_pane_by_id(&mut self, pane_id: &str) -> bool {
        let Some((ws_id, _)) = self
            .workspaces
            .iter()
            .find(|(_, ws)| ws.pane(pane_id).is_some())
            .map(|(id, ws)| (*id, ws.pane_count()))
        else {
            return false;
        };

        let ws = self.workspaces.get_mut(&ws_id).unwrap();
        let removed = if ws.main.as_ref().map(|p| p.id == pane_id).unwrap_or(false) {
            let removed = ws.main.take().unwrap();
            // Promote the top of the stack to main.
            if !ws.stack.is_empty() {
                ws.main = Some(ws.stack.remove(0));
                ws.active_stack_index = ws.active_stack_index.saturating_sub(1);
            }
            removed
        } else {
            let index = ws.stack.iter().position(|p| p.id == pane_id).unwrap();
            let removed = ws.stack.remove(index);
            if index <= ws.active_stack_index {
                ws.active_stack_index = ws.active_stack_index.saturating_sub(1);
            }
            removed
        };
        ws.clamp_stack_index();

        if ws.focused.as_deref() == Some(pane_id) {
            ws.focused = ws
                .stack
                .get(ws.active_stack_index)
                .map(|p| p.id.clone())
                .or_else(|| ws.main.as_ref().map(|p| p.id.clone()));
        }

        self.closed.push(ClosedPane {
            id: removed.id,
            pty: removed.pty,
        });

        if self.workspaces[&ws_id].is_empty() {
            self.workspaces.remove(&ws_id);
            if ws_id == self.active {
                // The active slot always resolves to a workspace.
                self.workspaces.insert(ws_id, Workspace::default());
            }
        } else {
            self.recompute(ws_id);
        }
        self.bump();
        true
    }

    fn switch_workspace(&mut self, id: WorkspaceId) -> bool {
        if !(WORKSPACE_MIN..=WORKSPACE_MAX).contains(&id) {
            return false;
        }
        self.workspaces.entry(id).or_default();
        if self.active == id {
            return false;
        }
        self.active = id;
        self.recompute(id);
        self.bump();
        true
    }

    fn swap_main(&mut self) -> bool {
        let active = self.active;
        let ws = self.workspaces.get_mut(&active).unwrap();
        let Some(Some(stack_index)) = ws.focus_position() else {
            return false;
        };
        let Some(main) = ws.main.take() else {
            return false;
        };
        let stack_pane = std::mem::replace(&mut ws.stack[stack_index], main);
        ws.main = Some(stack_pane);
        ws.focused = ws.main.as_ref().map(|p| p.id.clone());
        self.recompute(active);
        self.bump();
        true
    }

    fn load_session(&mut self, layout: LoadedLayout) {
        let mut workspaces = layout.workspaces;
        workspaces.retain(|id, _| (WORKSPACE_MIN..=WORKSPACE_MAX).contains(id));
        if workspaces.is_empty() {
            workspaces.insert(WORKSPACE_MIN, Workspace::default());
        }

        // Advance the pane counter past every incoming id so new panes
        // cannot collide with loaded ones.
        let max_seen = workspaces
            .values()
            .flat_map(Workspace::panes)
            .filter_map(|pane| pane.id.strip_prefix("pane-"))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        self.next_pane = self.next_pane.max(max_seen);

        for ws in workspaces.values_mut() {
            ws.clamp_stack_index();
            // Drop dangling focus references.
            if let Some(focused) = ws.focused.clone() {
                if ws.pane(&focused).is_none() {
                    ws.focused = ws.main.as_ref().map(|p| p.id.clone());
                }
            }
        }

        self.active = if workspaces.contains_key(&layout.active_workspace_id) {
            layout.active_workspace_id
        } else {
            *workspaces.keys().next().unwrap()
        };
        self.workspaces = workspaces;
        self.recompute_all();
        self.bump();
    }

    /// Serializable view of the current layout.
    pub fn snapshot(&self) -> LoadedLayout {
        LoadedLayout {
            workspaces: self.workspaces.clone(),
            active_workspace_id: self.active,
        }
    }

    // ==== geometry ====================================================

    fn recompute(&mut self, id: WorkspaceId) {
        let viewport = self.viewport;
        let ratio = self.split_ratio;
        let Some(ws) = self.workspaces.get_mut(&id) else {
            return;
        };
        let zoom_focus = if ws.zoomed { ws.focus_position() } else { None };
        let rects = geometry::compute(
            viewport,
            ws.mode,
            ratio,
            ws.main.is_some(),
            ws.stack.len(),
            ws.active_stack_index,
            zoom_focus,
        );
        if let Some(main) = &mut ws.main {
            main.rect = rects.main;
        }
        for (pane, rect) in ws.stack.iter_mut().zip(rects.stack) {
            pane.rect = rect;
        }
    }

    fn recompute_all(&mut self) {
        let ids: Vec<WorkspaceId> = self.workspaces.keys().copied().collect();
        for id in ids {
            self.recompute(id);
        }
    }
}

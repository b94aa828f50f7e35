//! Session persistence: the `SessionStore` interface, its file-backed
//! implementation, and layout templates.
//!
//! On disk, each session is one `<id>.session` JSON file next to a
//! `.active` pointer file naming the most recent session. Templates live
//! under `templates/<id>.template` and describe a recursive split tree
//! that instantiation flattens into master-stack workspaces.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::layout::{LoadedLayout, Pane, PaneId, Workspace, WorkspaceId};

/// Session id, unique per store.
pub type SessionId = String;

/// Descriptive metadata for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: SessionId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_switched_at: DateTime<Utc>,
}

/// Everything a session file records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub metadata: SessionMeta,
    pub layout: LoadedLayout,
    /// Working directory per pane, for lazy PTY creation after restore.
    #[serde(default)]
    pub cwd_map: HashMap<PaneId, String>,
    /// Last command per pane, restored into the prompt on respawn.
    #[serde(default)]
    pub command_map: HashMap<PaneId, String>,
}

/// Opaque persistence interface the session manager binds to.
pub trait SessionStore {
    fn list(&self) -> Result<Vec<SessionMeta>>;
    fn save(&self, session: &PersistedSession) -> Result<()>;
    fn load(&self, id: &str) -> Result<Option<PersistedSession>>;
    fn delete(&self, id: &str) -> Result<()>;
    fn set_active(&self, id: &str) -> Result<()>;
    fn get_active(&self) -> Result<Option<SessionId>>;
}

/// File-per-session store rooted at a directory.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Store under the platform data directory
    /// (`.../openmux/sessions`).
    pub fn default_location() -> Result<Self> {
        let dir = dirs::data_dir()
            .context("Could not find data directory")?
            .join("openmux")
            .join("sessions");
        Ok(Self::at(dir))
    }

    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.session"))
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(".active")
    }

    fn templates_dir(&self) -> PathBuf {
        self.dir.join("templates")
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create session directory: {}", self.dir.display()))
    }

    // ==== templates ===================================================

    pub fn list_templates(&self) -> Result<Vec<Template>> {
        let dir = self.templates_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut templates = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "template").unwrap_or(false) {
                let contents = fs::read_to_string(&path)?;
                match serde_json::from_str(&contents) {
                    Ok(template) => templates.push(template),
                    Err(err) => log::warn!("skipping bad template {}: {err}", path.display()),
                }
            }
        }
        templates.sort_by(|a: &Template, b: &Template| a.metadata.name.cmp(&b.metadata.name));
        Ok(templates)
    }

    pub fn save_template(&self, template: &Template) -> Result<()> {
        let dir = self.templates_dir();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.template", template.metadata.id));
        let contents = serde_json::to_string_pretty(template)?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write template: {}", path.display()))
    }

    pub fn load_template(&self, id: &str) -> Result<Option<Template>> {
        let path = self.templates_dir().join(format!("{id}.template"));
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

impl SessionStore for FileSessionStore {
    fn list(&self) -> Result<Vec<SessionMeta>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut metas = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "session").unwrap_or(false) {
                let contents = fs::read_to_string(&path)?;
                match serde_json::from_str::<PersistedSession>(&contents) {
                    Ok(session) => metas.push(session.metadata),
                    Err(err) => log::warn!("skipping bad session {}: {err}", path.display()),
                }
            }
        }
        metas.sort_by(|a, b| b.last_switched_at.cmp(&a.last_switched_at));
        Ok(metas)
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        self.ensure_dir()?;
        let path = self.session_path(&session.metadata.id);
        let contents =
            serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        // Write-then-rename keeps a crash from corrupting the record.
        let tmp = path.with_extension("session.tmp");
        fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write session file: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move session file into place: {}", path.display()))
    }

    fn load(&self, id: &str) -> Result<Option<PersistedSession>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;
        let session = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
        Ok(Some(session))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.session_path(id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete session file: {}", path.display()))?;
        }
        if self.get_active()?.as_deref() == Some(id) {
            let _ = fs::remove_file(self.active_path());
        }
        Ok(())
    }

    fn set_active(&self, id: &str) -> Result<()> {
        self.ensure_dir()?;
        fs::write(self.active_path(), id).context("Failed to write active-session pointer")
    }

    fn get_active(&self) -> Result<Option<SessionId>> {
        let path = self.active_path();
        if !path.exists() {
            return Ok(None);
        }
        let id = fs::read_to_string(&path)?.trim().to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }
}

// ==== templates =======================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// A saved layout shape: per workspace, a recursive split tree whose
/// leaves become panes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub metadata: TemplateMeta,
    #[serde(default)]
    pub defaults: TemplateDefaults,
    pub workspaces: Vec<TemplateWorkspace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitOrientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TemplateWorkspace {
    Split {
        orientation: SplitOrientation,
        ratio: f32,
        first: Box<TemplateWorkspace>,
        second: Box<TemplateWorkspace>,
    },
    Leaf {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
}

impl TemplateWorkspace {
    /// Leaves in tree order (first subtree before second).
    fn leaves(&self) -> Vec<(&Option<String>, &Option<String>)> {
        match self {
            TemplateWorkspace::Leaf { title, cwd } => vec![(title, cwd)],
            TemplateWorkspace::Split { first, second, .. } => {
                let mut leaves = first.leaves();
                leaves.extend(second.leaves());
                leaves
            }
        }
    }
}

/// Instantiate a template into a loadable layout plus the cwd map for
/// lazy PTY creation. The first leaf of each tree becomes the main pane,
/// the rest the stack in order.
pub fn instantiate_template(template: &Template) -> (LoadedLayout, HashMap<PaneId, String>) {
    let mut layout = LoadedLayout::default();
    let mut cwd_map = HashMap::new();
    let mut pane_counter = 0u64;

    for (i, tree) in template.workspaces.iter().enumerate() {
        let ws_id = (i + 1).min(9) as WorkspaceId;
        let mut workspace = Workspace::default();
        for (title, cwd) in tree.leaves() {
            pane_counter += 1;
            let pane = Pane {
                id: format!("pane-{pane_counter}"),
                pty: None,
                title: title.clone().unwrap_or_default(),
                rect: None,
            };
            let cwd = cwd.clone().or_else(|| template.defaults.cwd.clone());
            if let Some(cwd) = cwd {
                cwd_map.insert(pane.id.clone(), cwd);
            }
            if workspace.main.is_none() {
                workspace.main = Some(pane);
            } else {
                workspace.stack.push(pane);
            }
        }
        workspace.focused = workspace.main.as_ref().map(|p| p.id.clone());
        layout.workspaces.insert(ws_id, workspace);
    }

    layout.active_workspace_id = *layout.workspaces.keys().next().unwrap_or(&1);
    (layout, cwd_map)
}

//! Cross-session index of every live PTY, for the fullscreen jump view.
//!
//! Entries combine registry facts (cwd, shell, foreground process) with
//! git metadata that arrives asynchronously from the collector; a git
//! update tagged with a repo key fans out to every PTY sharing that
//! repository.

use std::collections::HashMap;
use std::path::Path;

use crate::git::{GitDiffStats, GitStatus};
use crate::pty::PtyId;
use crate::session::SessionId;

/// Git facts attached to a PTY's working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitMeta {
    pub repo_key: String,
    pub branch: Option<String>,
    pub dirty: Option<bool>,
    pub ahead: Option<u32>,
    pub behind: Option<u32>,
    pub stash_count: Option<u32>,
    pub diff_stats: Option<GitDiffStats>,
}

/// One PTY as the aggregate view sees it.
#[derive(Debug, Clone, Default)]
pub struct PtyEntry {
    pub pty_id: PtyId,
    pub session_id: Option<SessionId>,
    pub pane_id: Option<String>,
    pub cwd: String,
    pub shell: String,
    pub foreground_process: Option<String>,
    pub git: Option<GitMeta>,
}

#[derive(Default)]
pub struct AggregateIndex {
    entries: HashMap<PtyId, PtyEntry>,
}

impl AggregateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an entry. Git metadata carried by an existing
    /// entry survives the refresh.
    pub fn upsert(&mut self, mut entry: PtyEntry) {
        if let Some(existing) = self.entries.get(&entry.pty_id) {
            if entry.git.is_none() {
                entry.git = existing.git.clone();
            }
        }
        self.entries.insert(entry.pty_id, entry);
    }

    pub fn remove(&mut self, pty_id: PtyId) {
        self.entries.remove(&pty_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, pty_id: PtyId) -> Option<&PtyEntry> {
        self.entries.get(&pty_id)
    }

    /// Every entry, ordered by PTY id for stable display.
    pub fn list(&self) -> Vec<&PtyEntry> {
        let mut entries: Vec<&PtyEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.pty_id);
        entries
    }

    /// Whitespace-separated terms, OR across terms, matched
    /// case-insensitively against cwd, git branch, and foreground process.
    pub fn filter(&self, query: &str) -> Vec<&PtyEntry> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() {
            return self.list();
        }
        self.list()
            .into_iter()
            .filter(|entry| {
                let cwd = entry.cwd.to_lowercase();
                let branch = entry
                    .git
                    .as_ref()
                    .and_then(|g| g.branch.as_deref())
                    .unwrap_or("")
                    .to_lowercase();
                let foreground = entry
                    .foreground_process
                    .as_deref()
                    .unwrap_or("")
                    .to_lowercase();
                terms.iter().any(|term| {
                    cwd.contains(term) || branch.contains(term) || foreground.contains(term)
                })
            })
            .collect()
    }

    /// Entries whose foreground process is something other than the bare
    /// shell (a command is running).
    pub fn active(&self) -> Vec<&PtyEntry> {
        self.list()
            .into_iter()
            .filter(|entry| {
                let Some(foreground) = entry.foreground_process.as_deref() else {
                    return false;
                };
                let shell = basename(&entry.shell);
                !foreground.eq_ignore_ascii_case(shell)
            })
            .collect()
    }

    /// Broadcast a git status to every PTY under the repo key.
    pub fn apply_git_status(&mut self, repo_key: &str, status: &GitStatus) {
        for entry in self.entries.values_mut() {
            let meta = match &mut entry.git {
                Some(meta) if meta.repo_key == repo_key => meta,
                _ => continue,
            };
            meta.branch = Some(status.branch.clone());
            meta.dirty = Some(status.dirty);
            meta.ahead = Some(status.ahead);
            meta.behind = Some(status.behind);
            meta.stash_count = Some(status.stash_count);
        }
    }

    /// Broadcast diff stats to every PTY under the repo key.
    pub fn apply_git_diff_stats(&mut self, repo_key: &str, stats: &GitDiffStats) {
        for entry in self.entries.values_mut() {
            if let Some(meta) = &mut entry.git {
                if meta.repo_key == repo_key {
                    meta.diff_stats = Some(stats.clone());
                }
            }
        }
    }

    /// Refresh the index from the PTY registry: live PTYs are upserted
    /// (keeping collected git facts), dead ones dropped.
    pub fn sync_ptys(&mut self, ptys: &crate::pty::PtyService) {
        let live = ptys.pty_ids();
        self.entries.retain(|id, _| live.contains(id));
        for id in live {
            self.upsert(PtyEntry {
                pty_id: id,
                session_id: ptys.owner_session_of(id).map(str::to_string),
                pane_id: ptys.pane_of(id).map(str::to_string),
                cwd: ptys.cwd(id).unwrap_or_default().to_string(),
                shell: ptys.shell(id).unwrap_or_default().to_string(),
                foreground_process: ptys.foreground_process(id),
                git: None,
            });
        }
    }

    /// Associate a PTY with a repository so later git broadcasts reach it.
    pub fn set_repo_key(&mut self, pty_id: PtyId, repo_key: &str) {
        if let Some(entry) = self.entries.get_mut(&pty_id) {
            match &mut entry.git {
                Some(meta) => meta.repo_key = repo_key.to_string(),
                None => {
                    entry.git = Some(GitMeta {
                        repo_key: repo_key.to_string(),
                        ..GitMeta::default()
                    });
                }
            }
        }
    }
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

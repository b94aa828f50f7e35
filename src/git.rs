//! Out-of-band git status collection.
//!
//! A background thread runs `git` against requested working directories;
//! callers hold an opaque handle and poll for the outcome, then feed the
//! result into the aggregate index. Request pools are bounded per kind so
//! a wedged repository cannot queue unbounded work.

use std::collections::HashMap;
use std::process::Command;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

/// Branch/dirty/ahead/behind/stash summary for one working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitStatus {
    pub branch: String,
    pub dirty: bool,
    pub ahead: u32,
    pub behind: u32,
    pub stash_count: u32,
}

/// Working-tree diff totals (staged + unstaged).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitDiffStats {
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

/// Poll outcome for an async request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitPoll<T> {
    Pending,
    Ready(T),
    Error(String),
    Cancelled,
}

/// Opaque request handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(u64);

/// Per-kind in-flight limit.
const MAX_IN_FLIGHT: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Status,
    DiffStats,
}

enum Slot {
    Pending(Kind),
    Status(GitStatus),
    Diff(GitDiffStats),
    Error(String),
    Cancelled,
}

struct Job {
    id: u64,
    kind: Kind,
    cwd: String,
}

pub struct GitCollector {
    jobs: Option<Sender<Job>>,
    slots: Arc<Mutex<HashMap<u64, Slot>>>,
    next_id: u64,
    max_in_flight: usize,
}

impl GitCollector {
    pub fn new() -> Self {
        let slots: Arc<Mutex<HashMap<u64, Slot>>> = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel::<Job>();
        let worker_slots = Arc::clone(&slots);
        let _ = thread::Builder::new()
            .name("openmux-git".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    // Skip work the caller already cancelled.
                    let still_wanted = matches!(
                        worker_slots.lock().unwrap().get(&job.id),
                        Some(Slot::Pending(_))
                    );
                    if !still_wanted {
                        continue;
                    }
                    let slot = match job.kind {
                        Kind::Status => match collect_status(&job.cwd) {
                            Ok(status) => Slot::Status(status),
                            Err(message) => Slot::Error(message),
                        },
                        Kind::DiffStats => match collect_diff_stats(&job.cwd) {
                            Ok(stats) => Slot::Diff(stats),
                            Err(message) => Slot::Error(message),
                        },
                    };
                    let mut slots = worker_slots.lock().unwrap();
                    // A cancellation may have raced the work; keep it.
                    if matches!(slots.get(&job.id), Some(Slot::Pending(_))) {
                        slots.insert(job.id, slot);
                    }
                }
            });

        Self {
            jobs: Some(tx),
            slots,
            next_id: 0,
            max_in_flight: MAX_IN_FLIGHT,
        }
    }

    /// A collector whose worker never runs, for exercising pool limits.
    #[cfg(test)]
    fn paused(max_in_flight: usize) -> Self {
        Self {
            jobs: None,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: 0,
            max_in_flight,
        }
    }

    fn submit(&mut self, kind: Kind, cwd: &str) -> RequestHandle {
        self.next_id += 1;
        let id = self.next_id;
        let mut slots = self.slots.lock().unwrap();
        let in_flight = slots
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(k) if *k == kind))
            .count();
        if in_flight >= self.max_in_flight {
            slots.insert(id, Slot::Error("git request pool exhausted".into()));
            return RequestHandle(id);
        }
        slots.insert(id, Slot::Pending(kind));
        drop(slots);
        if let Some(jobs) = &self.jobs {
            let _ = jobs.send(Job {
                id,
                kind,
                cwd: cwd.to_string(),
            });
        }
        RequestHandle(id)
    }

    /// Request branch/dirty/ahead/behind/stash for a working directory.
    pub fn status_async(&mut self, cwd: &str) -> RequestHandle {
        self.submit(Kind::Status, cwd)
    }

    /// Request diff totals for a working directory.
    pub fn diff_stats_async(&mut self, cwd: &str) -> RequestHandle {
        self.submit(Kind::DiffStats, cwd)
    }

    /// Poll a status request. Terminal outcomes consume the slot.
    pub fn poll_status(&mut self, handle: RequestHandle) -> GitPoll<GitStatus> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&handle.0) {
            Some(Slot::Pending(_)) => GitPoll::Pending,
            Some(Slot::Status(_)) => match slots.remove(&handle.0) {
                Some(Slot::Status(status)) => GitPoll::Ready(status),
                _ => GitPoll::Cancelled,
            },
            Some(Slot::Error(_)) => match slots.remove(&handle.0) {
                Some(Slot::Error(message)) => GitPoll::Error(message),
                _ => GitPoll::Cancelled,
            },
            Some(Slot::Cancelled) | Some(Slot::Diff(_)) | None => {
                slots.remove(&handle.0);
                GitPoll::Cancelled
            }
        }
    }

    /// Poll a diff-stats request. Terminal outcomes consume the slot.
    pub fn poll_diff_stats(&mut self, handle: RequestHandle) -> GitPoll<GitDiffStats> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(&handle.0) {
            Some(Slot::Pending(_)) => GitPoll::Pending,
            Some(Slot::Diff(_)) => match slots.remove(&handle.0) {
                Some(Slot::Diff(stats)) => GitPoll::Ready(stats),
                _ => GitPoll::Cancelled,
            },
            Some(Slot::Error(_)) => match slots.remove(&handle.0) {
                Some(Slot::Error(message)) => GitPoll::Error(message),
                _ => GitPoll::Cancelled,
            },
            Some(Slot::Cancelled) | Some(Slot::Status(_)) | None => {
                slots.remove(&handle.0);
                GitPoll::Cancelled
            }
        }
    }

    /// Cancel an outstanding request; later polls return `Cancelled`.
    pub fn cancel(&mut self, handle: RequestHandle) {
        let mut slots = self.slots.lock().unwrap();
        if matches!(slots.get(&handle.0), Some(Slot::Pending(_))) {
            slots.insert(handle.0, Slot::Cancelled);
        }
    }
}

impl Default for GitCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Repository identity for a working directory (its toplevel path), used
/// to group PTYs that share a repo. One fast probe at PTY registration.
pub fn repo_key(cwd: &str) -> Option<String> {
    let output = git(cwd, &["rev-parse", "--show-toplevel"]).ok()?;
    let key = output.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

fn git(cwd: &str, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| format!("failed to run git: {e}"))?;
    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn collect_status(cwd: &str) -> Result<GitStatus, String> {
    git(cwd, &["rev-parse", "--is-inside-work-tree"])
        .map_err(|_| "not a git repository".to_string())?;

    let branch = git(cwd, &["branch", "--show-current"])
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let dirty = git(cwd, &["status", "--porcelain"])
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);

    // "ahead<TAB>behind" relative to the upstream; repos without an
    // upstream read as 0/0.
    let (ahead, behind) = git(cwd, &["rev-list", "--left-right", "--count", "HEAD...@{upstream}"])
        .ok()
        .and_then(|s| {
            let mut parts = s.split_whitespace();
            let ahead = parts.next()?.parse().ok()?;
            let behind = parts.next()?.parse().ok()?;
            Some((ahead, behind))
        })
        .unwrap_or((0, 0));

    let stash_count = git(cwd, &["stash", "list"])
        .map(|s| s.lines().count() as u32)
        .unwrap_or(0);

    Ok(GitStatus {
        branch,
        dirty,
        ahead,
        behind,
        stash_count,
    })
}

fn collect_diff_stats(cwd: &str) -> Result<GitDiffStats, String> {
    git(cwd, &["rev-parse", "--is-inside-work-tree"])
        .map_err(|_| "not a git repository".to_string())?;

    let mut stats = GitDiffStats::default();
    for args in [
        ["diff", "--numstat"].as_slice(),
        ["diff", "--cached", "--numstat"].as_slice(),
    ] {
        let Ok(output) = git(cwd, args) else { continue };
        for line in output.lines() {
            let mut parts = line.split('\t');
            let insertions: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let deletions: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            if parts.next().is_some() {
                stats.files_changed += 1;
                stats.insertions += insertions;
                stats.deletions += deletions;
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn init_repo(dir: &std::path::Path) {
        let run = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(dir)
                .status()
                .expect("git available");
            assert!(status.success(), "git {args:?} failed");
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.join("file.txt"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "initial"]);
    }

    fn wait_status(collector: &mut GitCollector, handle: RequestHandle) -> GitPoll<GitStatus> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match collector.poll_status(handle) {
                GitPoll::Pending => {
                    if Instant::now() > deadline {
                        panic!("status request never completed");
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                done => return done,
            }
        }
    }

    #[test]
    fn status_reports_branch_and_dirtiness() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let mut collector = GitCollector::new();

        let handle = collector.status_async(dir.path().to_str().unwrap());
        let status = match wait_status(&mut collector, handle) {
            GitPoll::Ready(status) => status,
            other => panic!("expected status, got {other:?}"),
        };
        assert_eq!(status.branch, "main");
        assert!(!status.dirty);
        assert_eq!(status.stash_count, 0);

        // Touch the tree and ask again.
        std::fs::write(dir.path().join("file.txt"), "changed\n").unwrap();
        let handle = collector.status_async(dir.path().to_str().unwrap());
        match wait_status(&mut collector, handle) {
            GitPoll::Ready(status) => assert!(status.dirty),
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[test]
    fn diff_stats_count_changed_lines() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("file.txt"), "hello\nworld\n").unwrap();

        let mut collector = GitCollector::new();
        let handle = collector.diff_stats_async(dir.path().to_str().unwrap());
        let deadline = Instant::now() + Duration::from_secs(10);
        let stats = loop {
            match collector.poll_diff_stats(handle) {
                GitPoll::Pending => {
                    assert!(Instant::now() < deadline);
                    std::thread::sleep(Duration::from_millis(10));
                }
                GitPoll::Ready(stats) => break stats,
                other => panic!("expected stats, got {other:?}"),
            }
        };
        assert_eq!(stats.files_changed, 1);
        assert!(stats.insertions >= 1);
    }

    #[test]
    fn non_repo_directories_report_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = GitCollector::new();
        let handle = collector.status_async(dir.path().to_str().unwrap());
        match wait_status(&mut collector, handle) {
            GitPoll::Error(_) => {}
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn exhausted_pool_rejects_new_requests() {
        let mut collector = GitCollector::paused(2);
        let a = collector.status_async("/tmp");
        let b = collector.status_async("/tmp");
        let c = collector.status_async("/tmp");

        assert_eq!(collector.poll_status(a), GitPoll::Pending);
        assert_eq!(collector.poll_status(b), GitPoll::Pending);
        assert!(matches!(collector.poll_status(c), GitPoll::Error(_)));

        // Diff requests have their own pool.
        let d = collector.diff_stats_async("/tmp");
        assert_eq!(collector.poll_diff_stats(d), GitPoll::Pending);
    }

    #[test]
    fn cancelled_requests_poll_as_cancelled() {
        let mut collector = GitCollector::paused(8);
        let handle = collector.status_async("/tmp");
        collector.cancel(handle);
        assert_eq!(collector.poll_status(handle), GitPoll::Cancelled);
        // The slot is consumed; a later poll stays cancelled.
        assert_eq!(collector.poll_status(handle), GitPoll::Cancelled);
    }

    #[test]
    fn repo_key_identifies_the_toplevel() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let sub = dir.path().join("nested");
        std::fs::create_dir(&sub).unwrap();

        let root_key = repo_key(dir.path().to_str().unwrap()).unwrap();
        let sub_key = repo_key(sub.to_str().unwrap()).unwrap();
        assert_eq!(root_key, sub_key);
        assert!(repo_key("/").is_none());
    }
}

//! Two-tier scrollback: an in-memory hot ring of the newest lines plus a
//! per-PTY on-disk archive for everything older.
//!
//! Lines are addressed by absolute index, where 0 is the oldest line the
//! PTY ever emitted. Indices are stable across hot-ring eviction and
//! archive spills; a reader holding an index can always re-fetch the same
//! line (or learn it was evicted). Rows are never re-wrapped on resize, so
//! fetched rows may be narrower or wider than the current viewport.

mod archive;

pub use archive::{ArchiveBudget, DiskArchive};

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use crate::term::cell::Row;

/// Configuration for one PTY's scrollback store.
#[derive(Clone)]
pub struct ScrollbackConfig {
    /// Hot ring capacity in lines.
    pub hot_limit: usize,
    /// Lines per archive chunk file.
    pub chunk_lines: usize,
    /// Disk archive; `None` keeps scrollback hot-only (lines beyond the
    /// ring are dropped).
    pub archive: Option<ArchiveSlot>,
}

/// Where a PTY's archive lives and how much it may use.
#[derive(Clone)]
pub struct ArchiveSlot {
    pub pty_id: u64,
    pub dir: PathBuf,
    pub per_pty_max_bytes: u64,
    pub budget: Arc<ArchiveBudget>,
}

impl ScrollbackConfig {
    /// Hot-only store, used for alternate screens and tests.
    pub fn memory_only(hot_limit: usize) -> Self {
        Self {
            hot_limit: hot_limit.max(1),
            chunk_lines: hot_limit.max(1),
            archive: None,
        }
    }
}

/// One-shot conditions a store reports upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollbackEvent {
    /// The archive failed or is absent and evicted lines were dropped.
    Truncated,
}

pub struct ScrollbackStore {
    hot: VecDeque<Row>,
    /// Absolute index of `hot[0]`.
    base: u64,
    hot_limit: usize,
    /// Lines moved out of the ring per spill (half the ring).
    spill: usize,
    chunk_lines: usize,
    archive: Option<DiskArchive>,
    /// The ring has reached capacity at least once.
    filled_once: bool,
    truncated_reported: bool,
    events: Vec<ScrollbackEvent>,
}

impl ScrollbackStore {
    pub fn new(config: ScrollbackConfig) -> Self {
        let hot_limit = config.hot_limit.max(1);
        let archive = config.archive.as_ref().and_then(|slot| {
            match DiskArchive::create(
                slot.pty_id,
                slot.dir.clone(),
                slot.per_pty_max_bytes,
                Arc::clone(&slot.budget),
            ) {
                Ok(archive) => Some(archive),
                Err(err) => {
                    log::warn!("scrollback archive unavailable for pty {}: {err}", slot.pty_id);
                    None
                }
            }
        });
        Self {
            hot: VecDeque::with_capacity(hot_limit),
            base: 0,
            hot_limit,
            spill: (hot_limit / 2).max(1),
            chunk_lines: config.chunk_lines.max(1),
            archive,
            filled_once: false,
            truncated_reported: false,
            events: Vec::new(),
        }
    }

    /// Total lines ever retained: archived (or dropped) plus hot.
    pub fn len(&self) -> u64 {
        self.base + self.hot.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the hot ring has filled; pairs with
    /// `ScrollState::is_at_scrollback_limit`.
    pub fn at_limit(&self) -> bool {
        self.filled_once
    }

    /// Whether disk writes have been disabled after an archive failure.
    pub fn truncated(&self) -> bool {
        self.truncated_reported
    }

    /// Push one line that scrolled off the top of the live grid.
    pub fn push(&mut self, row: Row) {
        self.hot.push_back(row);
        if self.hot.len() > self.hot_limit {
            self.filled_once = true;
            self.spill_oldest();
        }
    }

    /// Push a batch of scrolled-off lines in order.
    pub fn extend(&mut self, rows: impl IntoIterator<Item = Row>) {
        for row in rows {
            self.push(row);
        }
    }

    fn spill_oldest(&mut self) {
        let spill = self.spill.min(self.hot.len());
        let rows: Vec<Row> = self.hot.drain(..spill).collect();
        let start = self.base;
        self.base += rows.len() as u64;

        if let Some(archive) = self.archive.as_mut() {
            let mut offset = 0usize;
            let mut failed = None;
            for chunk in rows.chunks(self.chunk_lines) {
                if let Err(err) = archive.append_chunk(start + offset as u64, chunk) {
                    failed = Some(err);
                    break;
                }
                offset += chunk.len();
            }
            if let Some(err) = failed {
                // Disk trouble is non-fatal: stop archiving, keep the ring.
                log::warn!("scrollback archive write failed, downgrading to hot-only: {err}");
                self.archive = None;
            } else {
                return;
            }
        }

        if !self.truncated_reported {
            self.truncated_reported = true;
            self.events.push(ScrollbackEvent::Truncated);
        }
    }

    /// Fetch a line by absolute index. `None` when the index is beyond the
    /// live range or its archive chunk was evicted or dropped.
    pub fn get_line(&mut self, index: u64) -> Option<Row> {
        if index >= self.base {
            let offset = (index - self.base) as usize;
            return self.hot.get(offset).cloned();
        }
        let archive = self.archive.as_mut()?;
        match archive.get_line(index) {
            Ok(row) => row,
            Err(err) => {
                log::warn!("scrollback archive read failed: {err}");
                None
            }
        }
    }

    /// The last `n` lines, oldest first, substituting `None` for evicted
    /// lines. Used by capture.
    pub fn tail(&mut self, n: u64) -> Vec<Option<Row>> {
        let len = self.len();
        let start = len.saturating_sub(n);
        (start..len).map(|i| self.get_line(i)).collect()
    }

    /// Drop the archive's decoded-line cache, keeping chunks. Called on
    /// alternate-screen entry so stale selection text cannot be served.
    pub fn clear_archive_cache(&mut self) {
        if let Some(archive) = self.archive.as_mut() {
            archive.clear_cache();
        }
    }

    /// Drop all scrollback and the archive contents (full reset).
    pub fn clear(&mut self) {
        self.hot.clear();
        self.base = 0;
        self.filled_once = false;
        if let Some(archive) = self.archive.as_mut() {
            archive.dispose();
        }
        self.archive = None;
    }

    /// Release disk resources. The store stays usable hot-only.
    pub fn dispose(&mut self) {
        if let Some(archive) = self.archive.as_mut() {
            archive.dispose();
        }
        self.archive = None;
    }

    /// Drain one-shot events (archive truncation) for the subscription bus.
    pub fn take_events(&mut self) -> Vec<ScrollbackEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::cell::{Cell, Row};

    fn row_of(text: &str) -> Row {
        let mut cells = vec![Cell::default(); 8];
        for (i, ch) in text.chars().take(8).enumerate() {
            cells[i].ch = ch;
        }
        Row::from_cells(cells)
    }

    fn archived_store(dir: &std::path::Path, hot_limit: usize) -> ScrollbackStore {
        ScrollbackStore::new(ScrollbackConfig {
            hot_limit,
            chunk_lines: hot_limit,
            archive: Some(ArchiveSlot {
                pty_id: 1,
                dir: dir.join("pty-1"),
                per_pty_max_bytes: u64::MAX,
                budget: ArchiveBudget::new(u64::MAX),
            }),
        })
    }

    #[test]
    fn absolute_indices_stay_stable_across_spills() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = archived_store(dir.path(), 10);

        for i in 0..20 {
            store.push(row_of(&format!("line{i}")));
        }
        assert_eq!(store.len(), 20);
        assert!(store.at_limit());

        let line5 = store.get_line(5).unwrap();
        assert_eq!(line5.text().trim_end(), "line5");

        // Ten more lines force more spills; index 5 still answers the same.
        for i in 20..30 {
            store.push(row_of(&format!("line{i}")));
        }
        let again = store.get_line(5).unwrap();
        assert_eq!(again.text().trim_end(), "line5");
        assert_eq!(store.len(), 30);
    }

    #[test]
    fn memory_only_store_drops_spilled_lines_and_reports_once() {
        let mut store = ScrollbackStore::new(ScrollbackConfig::memory_only(4));
        for i in 0..10 {
            store.push(row_of(&format!("l{i}")));
        }
        // Old lines are gone but the indices did not shift.
        assert!(store.get_line(0).is_none());
        assert_eq!(store.len(), 10);
        let newest = store.get_line(9).unwrap();
        assert_eq!(newest.text().trim_end(), "l9");

        assert_eq!(store.take_events(), vec![ScrollbackEvent::Truncated]);
        // Only reported once.
        for i in 10..20 {
            store.push(row_of(&format!("l{i}")));
        }
        assert!(store.take_events().is_empty());
        assert!(store.truncated());
    }

    #[test]
    fn hot_lines_serve_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = archived_store(dir.path(), 100);
        for i in 0..5 {
            store.push(row_of(&format!("hot{i}")));
        }
        assert!(!store.at_limit());
        assert_eq!(store.get_line(3).unwrap().text().trim_end(), "hot3");
        assert!(store.get_line(5).is_none());
    }

    #[test]
    fn tail_returns_newest_lines_oldest_first() {
        let mut store = ScrollbackStore::new(ScrollbackConfig::memory_only(50));
        for i in 0..10 {
            store.push(row_of(&format!("t{i}")));
        }
        let tail: Vec<String> = store
            .tail(3)
            .into_iter()
            .map(|r| r.unwrap().text().trim_end().to_string())
            .collect();
        assert_eq!(tail, vec!["t7", "t8", "t9"]);
    }

    #[test]
    fn clear_resets_indices_and_limit_flag() {
        let mut store = ScrollbackStore::new(ScrollbackConfig::memory_only(2));
        store.push(row_of("a"));
        store.push(row_of("b"));
        store.push(row_of("c"));
        assert!(store.at_limit());

        store.clear();
        assert_eq!(store.len(), 0);
        assert!(!store.at_limit());
        store.push(row_of("d"));
        assert_eq!(store.get_line(0).unwrap().text().trim_end(), "d");
    }
}

//! Main-thread mirror of a worker-owned emulator.
//!
//! The view folds incoming dirty updates into a local copy of the screen
//! (keeping the structural-sharing contract: untouched rows keep their
//! reference) and caches scrollback lines fetched from the worker.
//!
//! Cache policy: entries are invalidated when the scrollback length
//! shrinks, or when it stalls while the hot ring is at its limit (the
//! store may be dropping lines). Growth never invalidates, and neither do
//! same-length updates below the limit, so spinner-style animations keep
//! the cache warm.

use std::collections::HashMap;

use crate::term::cell::Row;
use crate::term::{Cursor, DirtyUpdate, ModeSnapshot, ScrollState};

/// Cached scrollback entries above this count are dropped wholesale; the
/// visible window refetches cheaply.
const SCROLLBACK_CACHE_CAP: usize = 4096;

#[derive(Default)]
pub struct TerminalView {
    cols: u16,
    rows: u16,
    row_data: Vec<Row>,
    cursor: Cursor,
    modes: ModeSnapshot,
    scroll: ScrollState,
    last_scrollback_len: u64,
    scrollback_cache: HashMap<u64, Row>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn modes(&self) -> ModeSnapshot {
        self.modes
    }

    pub fn scroll(&self) -> ScrollState {
        self.scroll
    }

    /// Viewport row `y`, if the view has received any state yet.
    pub fn row(&self, y: usize) -> Option<&Row> {
        self.row_data.get(y)
    }

    pub fn row_count(&self) -> usize {
        self.row_data.len()
    }

    /// Fold one update into the mirror and apply the scrollback-cache
    /// invalidation rule.
    pub fn apply_update(&mut self, update: &DirtyUpdate) {
        let new_len = update.scroll.scrollback_len;
        let shrunk = new_len < self.last_scrollback_len;
        let stalled_at_limit = new_len == self.last_scrollback_len
            && update.scroll.is_at_scrollback_limit
            && self.last_scrollback_len > 0;
        if shrunk || stalled_at_limit {
            self.scrollback_cache.clear();
        }
        self.last_scrollback_len = new_len;

        if let Some(full) = &update.full {
            self.cols = full.cols;
            self.rows = full.rows;
        }
        update.apply_to(&mut self.row_data);
        self.cursor = update.cursor;
        self.modes = update.modes;
        self.scroll = update.scroll;
    }

    /// Remember a fetched scrollback line by absolute index.
    pub fn cache_scrollback_line(&mut self, index: u64, row: Row) {
        if self.scrollback_cache.len() >= SCROLLBACK_CACHE_CAP {
            self.scrollback_cache.clear();
        }
        self.scrollback_cache.insert(index, row);
    }

    pub fn cached_scrollback_line(&self, index: u64) -> Option<&Row> {
        self.scrollback_cache.get(&index)
    }

    pub fn cached_scrollback_lines(&self) -> usize {
        self.scrollback_cache.len()
    }
}

//! Per-PTY terminal emulator: drives the VT parser over the screen,
//! maintains scrollback and stable row identities, and produces dirty
//! updates for consumers.

use crate::scrollback::{ScrollbackConfig, ScrollbackEvent, ScrollbackStore};
use crate::term::cell::{Row, RowVersionTracker};
use crate::term::kitty::KittyGraphics;
use crate::term::screen::{Screen, ScreenEvent};
use crate::term::{Cursor, CursorKeyMode, DirtyUpdate, ModeSnapshot, ScrollState, TerminalState};

/// Construction parameters for one emulator.
#[derive(Clone)]
pub struct EmulatorConfig {
    pub cols: u16,
    pub rows: u16,
    pub scrollback: ScrollbackConfig,
}

/// One search hit. `line_index < scrollback_len` addresses scrollback;
/// larger values address live row `line_index - scrollback_len`. Columns
/// are character offsets into the row text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub line_index: u64,
    pub start_col: usize,
    pub end_col: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub matches: Vec<SearchMatch>,
    pub has_more: bool,
}

type UpdateCallback = Box<dyn FnMut() + Send>;
type TitleCallback = Box<dyn FnMut(&str) + Send>;
type ModeCallback = Box<dyn FnMut(&ModeSnapshot) + Send>;

pub struct Emulator {
    screen: Screen,
    parser: vte::Parser,
    scrollback: ScrollbackStore,
    kitty: KittyGraphics,
    stable_rows: Vec<Row>,
    versions: RowVersionTracker,
    needs_full: bool,
    last_alt: bool,
    disposed: bool,
    update_enabled: bool,
    cwd: Option<String>,
    cwd_changed: Option<String>,
    bell_pending: bool,
    kitty_responses: Vec<Vec<u8>>,
    update_subs: Vec<(u64, UpdateCallback)>,
    title_subs: Vec<(u64, TitleCallback)>,
    mode_subs: Vec<(u64, ModeCallback)>,
    next_sub: u64,
}

impl Emulator {
    pub fn new(config: EmulatorConfig) -> Self {
        let cols = config.cols.max(1);
        let rows = config.rows.max(1);
        Self {
            screen: Screen::new(cols, rows),
            parser: vte::Parser::new(),
            scrollback: ScrollbackStore::new(config.scrollback),
            kitty: KittyGraphics::default(),
            stable_rows: Vec::new(),
            versions: RowVersionTracker::new(rows as usize),
            needs_full: true,
            last_alt: false,
            disposed: false,
            update_enabled: true,
            cwd: None,
            cwd_changed: None,
            bell_pending: false,
            kitty_responses: Vec::new(),
            update_subs: Vec::new(),
            title_subs: Vec::new(),
            mode_subs: Vec::new(),
            next_sub: 0,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // ==== input =======================================================

    /// Feed raw child output through the parser. Fires `on_update`
    /// subscribers at most once per call.
    pub fn write(&mut self, data: &[u8]) {
        if self.disposed || data.is_empty() {
            return;
        }

        let on_alt = self.screen.modes.alt_screen;
        let replies = self.kitty.scan(data, on_alt);
        self.kitty_responses.extend(replies);

        for byte in data {
            self.parser.advance(&mut self.screen, *byte);
        }
        self.after_parse();
        self.notify_update();
    }

    fn after_parse(&mut self) {
        let scrolled = self.screen.take_scrolled_off();
        self.scrollback.extend(scrolled);

        for event in self.screen.take_events() {
            match event {
                ScreenEvent::TitleChanged(title) => {
                    for (_, cb) in &mut self.title_subs {
                        cb(&title);
                    }
                }
                ScreenEvent::ModeChanged => {
                    let snapshot = self.screen.mode_snapshot();
                    for (_, cb) in &mut self.mode_subs {
                        cb(&snapshot);
                    }
                }
                ScreenEvent::AltScreenToggled => {
                    // Cached archive lines could leak stale selection text
                    // into the alt screen's lifetime.
                    self.scrollback.clear_archive_cache();
                    self.needs_full = true;
                }
                ScreenEvent::CwdChanged(path) => {
                    self.cwd = Some(path.clone());
                    self.cwd_changed = Some(path);
                }
                ScreenEvent::ScrollbackCleared => self.scrollback.clear(),
                ScreenEvent::Bell => self.bell_pending = true,
            }
        }
    }

    /// Resize the grid. Rejects zero dimensions; the next dirty update is
    /// a full refresh.
    pub fn resize(&mut self, cols: u16, rows: u16) -> crate::error::Result<()> {
        if cols == 0 || rows == 0 {
            return Err(crate::error::Error::ResizeRejected { cols, rows });
        }
        if self.disposed {
            return Ok(());
        }
        self.screen.resize(cols, rows);
        self.after_parse();
        self.needs_full = true;
        self.notify_update();
        Ok(())
    }

    /// Full reset: clears grids, modes, and title but keeps dimensions and
    /// scrollback history.
    pub fn reset(&mut self) {
        if self.disposed {
            return;
        }
        self.screen.reset();
        self.scrollback.clear_archive_cache();
        self.after_parse();
        self.needs_full = true;
        self.notify_update();
    }

    /// Idempotent teardown. Every operation afterwards is a no-op
    /// returning safe defaults.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.scrollback.dispose();
        self.update_subs.clear();
        self.title_subs.clear();
        self.mode_subs.clear();
    }

    // ==== updates =====================================================

    /// Build the delta since the previous call. Emits a full refresh when
    /// dimensions or the active screen changed, or on the first call.
    pub fn get_dirty_update(&mut self, scroll: ScrollState) -> DirtyUpdate {
        if self.disposed {
            return DirtyUpdate {
                is_full: false,
                full: None,
                dirty_rows: Vec::new(),
                cursor: Cursor::default(),
                modes: ModeSnapshot::default(),
                scroll: ScrollState::default(),
            };
        }

        let cursor = self.screen.cursor();
        let modes = self.screen.mode_snapshot();
        let rows = self.screen.rows() as usize;
        let alt = self.screen.modes.alt_screen;

        let full_needed = self.needs_full
            || alt != self.last_alt
            || self.stable_rows.len() != rows;

        if full_needed {
            self.screen.take_dirty();
            self.stable_rows = (0..rows).map(|y| self.screen.row(y)).collect();
            self.versions.reset(rows);
            self.needs_full = false;
            self.last_alt = alt;

            let full = TerminalState {
                cols: self.screen.cols(),
                rows: self.screen.rows(),
                row_data: self.stable_rows.clone(),
                cursor,
                modes,
            };
            return DirtyUpdate {
                is_full: true,
                full: Some(full),
                dirty_rows: Vec::new(),
                cursor,
                modes,
                scroll,
            };
        }

        let mut dirty_rows = Vec::new();
        for y in self.screen.take_dirty() {
            if y >= rows {
                continue;
            }
            let row = self.screen.row(y);
            self.stable_rows[y] = row.clone();
            self.versions.bump(y);
            dirty_rows.push((y as u16, row));
        }

        DirtyUpdate {
            is_full: false,
            full: None,
            dirty_rows,
            cursor,
            modes,
            scroll,
        }
    }

    /// Make the next dirty update a full refresh regardless of what
    /// changed. Used when a consumer fell behind and deltas would be
    /// wasted work.
    pub fn force_full_refresh(&mut self) {
        self.needs_full = true;
    }

    /// The current stable row reference for viewport line `y`. Unchanged
    /// rows keep their reference between updates.
    pub fn stable_row(&self, y: usize) -> Option<&Row> {
        self.stable_rows.get(y)
    }

    /// Monotone version of viewport line `y`.
    pub fn row_version(&self, y: usize) -> u64 {
        self.versions.version(y)
    }

    /// Gate update notification for hidden panes. Re-enabling fires one
    /// synthetic notification so the consumer re-reads.
    pub fn set_update_enabled(&mut self, enabled: bool) {
        let was = self.update_enabled;
        self.update_enabled = enabled;
        if enabled && !was {
            self.needs_full = true;
            self.notify_update_forced();
        }
    }

    fn notify_update(&mut self) {
        if self.update_enabled {
            self.notify_update_forced();
        }
    }

    fn notify_update_forced(&mut self) {
        for (_, cb) in &mut self.update_subs {
            cb();
        }
    }

    // ==== subscriptions ==============================================

    pub fn on_update(&mut self, cb: UpdateCallback) -> u64 {
        self.next_sub += 1;
        self.update_subs.push((self.next_sub, cb));
        self.next_sub
    }

    pub fn on_title_change(&mut self, cb: TitleCallback) -> u64 {
        self.next_sub += 1;
        self.title_subs.push((self.next_sub, cb));
        self.next_sub
    }

    pub fn on_mode_change(&mut self, cb: ModeCallback) -> u64 {
        self.next_sub += 1;
        self.mode_subs.push((self.next_sub, cb));
        self.next_sub
    }

    pub fn unsubscribe(&mut self, id: u64) {
        self.update_subs.retain(|(sub, _)| *sub != id);
        self.title_subs.retain(|(sub, _)| *sub != id);
        self.mode_subs.retain(|(sub, _)| *sub != id);
    }

    // ==== scrollback ==================================================

    pub fn scrollback_len(&self) -> u64 {
        if self.disposed {
            return 0;
        }
        self.scrollback.len()
    }

    pub fn scrollback_at_limit(&self) -> bool {
        !self.disposed && self.scrollback.at_limit()
    }

    pub fn get_scrollback_line(&mut self, index: u64) -> Option<Row> {
        if self.disposed {
            return None;
        }
        self.scrollback.get_line(index)
    }

    pub fn take_scrollback_events(&mut self) -> Vec<ScrollbackEvent> {
        self.scrollback.take_events()
    }

    // ==== queries =====================================================

    pub fn get_cursor(&self) -> Cursor {
        if self.disposed {
            return Cursor::default();
        }
        self.screen.cursor()
    }

    pub fn get_cursor_key_mode(&self) -> CursorKeyMode {
        if self.disposed {
            return CursorKeyMode::Normal;
        }
        self.screen.mode_snapshot().cursor_key_mode
    }

    pub fn is_mouse_tracking_enabled(&self) -> bool {
        !self.disposed && self.screen.modes.mouse_tracking()
    }

    pub fn is_alternate_screen(&self) -> bool {
        !self.disposed && self.screen.modes.alt_screen
    }

    pub fn get_mode(&self, mode: u16) -> bool {
        !self.disposed && self.screen.get_mode(mode)
    }

    pub fn get_kitty_keyboard_flags(&self) -> u8 {
        if self.disposed {
            return 0;
        }
        self.screen.mode_snapshot().kitty_keyboard_flags
    }

    pub fn mode_snapshot(&self) -> ModeSnapshot {
        if self.disposed {
            return ModeSnapshot::default();
        }
        self.screen.mode_snapshot()
    }

    pub fn title(&self) -> Option<&str> {
        self.screen.title()
    }

    /// OSC 7-reported working directory, if the shell advertises one.
    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }

    pub fn take_cwd_change(&mut self) -> Option<String> {
        self.cwd_changed.take()
    }

    pub fn take_bell(&mut self) -> bool {
        std::mem::take(&mut self.bell_pending)
    }

    pub fn graphics(&self) -> &KittyGraphics {
        &self.kitty
    }

    /// Replies owed to the child: kitty graphics acks first (protocol
    /// ordering), then device reports from the screen.
    pub fn drain_responses(&mut self) -> Vec<Vec<u8>> {
        if self.disposed {
            return Vec::new();
        }
        let mut out = std::mem::take(&mut self.kitty_responses);
        out.extend(self.screen.take_responses());
        out
    }

    // ==== search and capture ==========================================

    /// Case-insensitive substring search from the oldest scrollback line
    /// through the live viewport. Overlapping matches are reported.
    pub fn search(&mut self, query: &str, limit: usize) -> SearchOutcome {
        let mut outcome = SearchOutcome::default();
        if self.disposed || query.is_empty() {
            return outcome;
        }
        let needle: Vec<char> = query.to_lowercase().chars().collect();
        let sb_len = self.scrollback.len();
        let rows = self.screen.rows() as usize;

        'scan: for line_index in 0..sb_len + rows as u64 {
            let text = if line_index < sb_len {
                match self.scrollback.get_line(line_index) {
                    Some(row) => row.text(),
                    None => continue,
                }
            } else {
                self.screen.row_text((line_index - sb_len) as usize)
            };
            let haystack: Vec<char> = text.to_lowercase().chars().collect();
            if haystack.len() < needle.len() {
                continue;
            }
            for start in 0..=haystack.len() - needle.len() {
                if haystack[start..start + needle.len()] == needle[..] {
                    if outcome.matches.len() >= limit {
                        outcome.has_more = true;
                        break 'scan;
                    }
                    outcome.matches.push(SearchMatch {
                        line_index,
                        start_col: start,
                        end_col: start + needle.len(),
                    });
                }
            }
        }
        outcome
    }

    /// Extract the text of an inclusive line range across scrollback and
    /// the live viewport. Evicted scrollback lines read as empty.
    pub fn extract_text(&mut self, first_line: u64, last_line: u64) -> String {
        if self.disposed {
            return String::new();
        }
        let sb_len = self.scrollback.len();
        let rows = self.screen.rows() as u64;
        let last = last_line.min(sb_len + rows - 1);
        let mut out = Vec::new();
        for line in first_line..=last {
            let text = if line < sb_len {
                self.scrollback
                    .get_line(line)
                    .map(|row| row.text())
                    .unwrap_or_default()
            } else {
                self.screen.row_text((line - sb_len) as usize)
            };
            out.push(text.trim_end().to_string());
        }
        out.join("\n")
    }

    /// Snapshot of the live screen plus up to `scrollback_lines` of recent
    /// history, for external tools.
    pub fn capture(&mut self, scrollback_lines: u64) -> String {
        if self.disposed {
            return String::new();
        }
        let mut lines = Vec::new();
        for row in self.scrollback.tail(scrollback_lines) {
            lines.push(
                row.map(|r| r.text().trim_end().to_string())
                    .unwrap_or_default(),
            );
        }
        for y in 0..self.screen.rows() as usize {
            lines.push(self.screen.row_text(y).trim_end().to_string());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn emulator(cols: u16, rows: u16) -> Emulator {
        Emulator::new(EmulatorConfig {
            cols,
            rows,
            scrollback: ScrollbackConfig::memory_only(100),
        })
    }

    fn at_bottom(emulator: &Emulator) -> ScrollState {
        ScrollState::at_bottom(emulator.scrollback_len(), emulator.scrollback_at_limit())
    }

    #[test]
    fn first_update_is_full_then_deltas_follow() {
        let mut emu = emulator(80, 2);
        emu.write(b"AB\r\n");

        let first = emu.get_dirty_update(at_bottom(&emu));
        assert!(first.is_full);
        let full = first.full.as_ref().unwrap();
        assert_eq!(full.row_data[0].text().trim_end(), "AB");

        emu.write(b"CD\r\n");
        let second = emu.get_dirty_update(at_bottom(&emu));
        assert!(!second.is_full);
        let dirty: std::collections::HashMap<u16, String> = second
            .dirty_rows
            .iter()
            .map(|(y, row)| (*y, row.text().trim_end().to_string()))
            .collect();
        assert_eq!(dirty.get(&0).map(String::as_str), Some("CD"));
        assert_eq!(dirty.get(&1).map(String::as_str), Some(""));
        assert_eq!((second.cursor.x, second.cursor.y), (0, 1));
        assert_eq!(emu.scrollback_len(), 1);
    }

    #[test]
    fn unchanged_rows_keep_their_reference() {
        let mut emu = emulator(20, 3);
        emu.write(b"top\r\nmid\r\nbot");
        let first = emu.get_dirty_update(at_bottom(&emu));
        let row0 = first.full.as_ref().unwrap().row_data[0].clone();

        // Touch only row 2.
        emu.write(b"\x1b[3;4H!");
        let second = emu.get_dirty_update(at_bottom(&emu));
        assert!(!second.is_full);
        assert_eq!(second.dirty_rows.len(), 1);
        assert_eq!(second.dirty_rows[0].0, 2);
        assert!(Row::same_buffer(emu.stable_row(0).unwrap(), &row0));
        assert!(!Row::same_buffer(
            emu.stable_row(2).unwrap(),
            &first.full.as_ref().unwrap().row_data[2]
        ));
    }

    #[test]
    fn row_versions_bump_only_for_changed_rows() {
        let mut emu = emulator(10, 2);
        emu.write(b"a");
        emu.get_dirty_update(at_bottom(&emu));
        let v0 = emu.row_version(0);
        let v1 = emu.row_version(1);
        emu.write(b"b");
        emu.get_dirty_update(at_bottom(&emu));
        assert!(emu.row_version(0) > v0);
        assert_eq!(emu.row_version(1), v1);
    }

    #[test]
    fn resize_forces_full_refresh() {
        let mut emu = emulator(10, 2);
        emu.write(b"x");
        emu.get_dirty_update(at_bottom(&emu));
        emu.resize(12, 3).unwrap();
        let update = emu.get_dirty_update(at_bottom(&emu));
        assert!(update.is_full);
        assert_eq!(update.full.as_ref().unwrap().cols, 12);
    }

    #[test]
    fn resize_rejects_zero_dimensions() {
        let mut emu = emulator(10, 2);
        assert!(matches!(
            emu.resize(0, 5),
            Err(crate::error::Error::ResizeRejected { .. })
        ));
    }

    #[test]
    fn alt_screen_toggle_forces_full_refresh() {
        let mut emu = emulator(10, 2);
        emu.write(b"x");
        emu.get_dirty_update(at_bottom(&emu));
        emu.write(b"\x1b[?1049h");
        let update = emu.get_dirty_update(at_bottom(&emu));
        assert!(update.is_full);
        assert!(update.modes.alt_screen);
    }

    #[test]
    fn update_subscribers_fire_once_per_write_batch() {
        let mut emu = emulator(10, 2);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        emu.on_update(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        emu.write(b"several bytes at once");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disabled_updates_suppress_then_resync() {
        let mut emu = emulator(10, 2);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        emu.on_update(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        emu.set_update_enabled(false);
        emu.write(b"hidden");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        emu.set_update_enabled(true);
        // The synthetic notification fires and the next update is full.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(emu.get_dirty_update(at_bottom(&emu)).is_full);
    }

    #[test]
    fn title_subscribers_observe_osc_titles() {
        let mut emu = emulator(10, 2);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        emu.on_title_change(Box::new(move |title| {
            sink.lock().unwrap().push(title.to_string());
        }));
        emu.write(b"\x1b]0;first\x07\x1b]2;second\x07");
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(emu.title(), Some("second"));
    }

    #[test]
    fn search_covers_scrollback_and_live_with_overlaps() {
        let mut emu = emulator(10, 2);
        emu.write(b"aaa\r\nxyz\r\nAAa");
        // One line scrolled off: "aaa" is scrollback line 0.
        assert_eq!(emu.scrollback_len(), 1);
        let outcome = emu.search("aa", 10);
        let positions: Vec<(u64, usize)> = outcome
            .matches
            .iter()
            .map(|m| (m.line_index, m.start_col))
            .collect();
        // "aaa" matches at 0 and 1 (overlapping), live "AAa" at line 2.
        assert_eq!(positions, vec![(0, 0), (0, 1), (2, 0), (2, 1)]);
        assert!(!outcome.has_more);
    }

    #[test]
    fn search_limit_reports_more_available() {
        let mut emu = emulator(10, 2);
        emu.write(b"match match match");
        let outcome = emu.search("match", 1);
        assert_eq!(outcome.matches.len(), 1);
        assert!(outcome.has_more);
    }

    #[test]
    fn search_matches_satisfy_the_slice_property() {
        let mut emu = emulator(20, 2);
        emu.write(b"Hello World");
        let outcome = emu.search("WORLD", 10);
        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        let text = emu.extract_text(m.line_index, m.line_index).to_lowercase();
        assert_eq!(&text[m.start_col..m.end_col], "world");
    }

    #[test]
    fn extract_text_spans_scrollback_and_live() {
        let mut emu = emulator(10, 2);
        emu.write(b"one\r\ntwo\r\nthree\r\nfour");
        assert_eq!(emu.scrollback_len(), 2);
        let text = emu.extract_text(0, 3);
        assert_eq!(text, "one\ntwo\nthree\nfour");
    }

    #[test]
    fn capture_includes_recent_history() {
        let mut emu = emulator(10, 2);
        emu.write(b"h1\r\nh2\r\nl1\r\nl2");
        let captured = emu.capture(2);
        assert_eq!(captured, "h1\nh2\nl1\nl2");
    }

    #[test]
    fn disposed_emulator_returns_safe_defaults() {
        let mut emu = emulator(10, 2);
        emu.write(b"data");
        emu.dispose();
        emu.dispose(); // idempotent

        emu.write(b"ignored");
        assert_eq!(emu.scrollback_len(), 0);
        assert!(emu.get_scrollback_line(0).is_none());
        assert_eq!(emu.get_cursor(), Cursor::default());
        assert!(emu.drain_responses().is_empty());
        let update = emu.get_dirty_update(ScrollState::default());
        assert!(!update.is_full && update.dirty_rows.is_empty());
        assert!(emu.search("data", 10).matches.is_empty());
    }

    #[test]
    fn kitty_acks_drain_before_device_reports() {
        let mut emu = emulator(10, 2);
        // DSR arrives first in the stream, but the kitty ack still drains
        // first per the protocol ordering contract.
        emu.write(b"\x1b[6n\x1b_Ga=T,i=4;AA\x1b\\");
        let responses = emu.drain_responses();
        assert_eq!(responses.len(), 2);
        assert!(responses[0].starts_with(b"\x1b_G"));
        assert!(responses[1].starts_with(b"\x1b["));
    }

    #[test]
    fn dirty_updates_applied_in_sequence_converge() {
        let mut emu = emulator(12, 3);
        let mut mirror: Vec<Row> = Vec::new();

        for chunk in [
            b"first\r\n".as_slice(),
            b"second line wraps\r\n",
            b"\x1b[1;1Hoverwrite",
            b"\x1b[2Jcleared",
        ] {
            emu.write(chunk);
            let update = emu.get_dirty_update(at_bottom(&emu));
            update.apply_to(&mut mirror);
        }

        for y in 0..3 {
            assert_eq!(
                mirror[y].cells(),
                emu.stable_row(y).unwrap().cells(),
                "row {y} diverged"
            );
        }
    }

    #[test]
    fn ed3_drops_scrollback_history() {
        let mut emu = emulator(10, 2);
        emu.write(b"a\r\nb\r\nc\r\nd");
        assert_eq!(emu.scrollback_len(), 2);
        emu.write(b"\x1b[3J");
        assert_eq!(emu.scrollback_len(), 0);
    }

    #[test]
    fn extraction_is_stable_across_a_widening_resize() {
        let mut emu = emulator(12, 2);
        emu.write(b"alpha beta\r\ngamma\r\ndelta\r\ntail");
        let before = emu.extract_text(0, 3);

        // Rows are not re-wrapped on resize, so archived and live text
        // reads identically afterwards.
        emu.resize(40, 2).unwrap();
        let after = emu.extract_text(0, 3);
        assert_eq!(before, after);
    }

    #[test]
    fn cwd_tracks_osc7() {
        let mut emu = emulator(10, 2);
        emu.write(b"\x1b]7;file:///home/user/project\x1b\\");
        assert_eq!(emu.cwd(), Some("/home/user/project"));
        assert_eq!(emu.take_cwd_change().as_deref(), Some("/home/user/project"));
        assert!(emu.take_cwd_change().is_none());
    }
}

//! Terminal emulation: cells, the VT screen, the emulator, and the binary
//! codec used for cross-thread update transport.

pub mod cell;
pub mod codec;
pub mod emulator;
pub mod kitty;
pub mod screen;
pub mod view;

pub use cell::{Cell, Rgb, Row, RowVersionTracker};
pub use emulator::{Emulator, EmulatorConfig, SearchMatch, SearchOutcome};
pub use view::TerminalView;

/// Cursor shape requested via `CSI Ps SP q`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum CursorStyle {
    #[default]
    Block,
    Underline,
    Bar,
}

/// Cursor position and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub x: u16,
    pub y: u16,
    pub visible: bool,
    pub style: CursorStyle,
}

/// DECCKM cursor-key encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorKeyMode {
    #[default]
    Normal,
    Application,
}

/// Snapshot of the mode flags a consumer needs to route input correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeSnapshot {
    pub alt_screen: bool,
    pub mouse_tracking: bool,
    pub cursor_key_mode: CursorKeyMode,
    pub bracketed_paste: bool,
    pub focus_reporting: bool,
    pub in_band_resize: bool,
    pub kitty_keyboard_flags: u8,
}

/// Where the viewport sits relative to scrollback.
///
/// Invariants: `viewport_offset <= scrollback_len`; `is_at_bottom` iff
/// `viewport_offset == 0`; `is_at_scrollback_limit` once the hot ring has
/// filled for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollState {
    pub viewport_offset: u64,
    pub scrollback_len: u64,
    pub is_at_bottom: bool,
    pub is_at_scrollback_limit: bool,
}

impl ScrollState {
    pub fn at_bottom(scrollback_len: u64, at_limit: bool) -> Self {
        Self {
            viewport_offset: 0,
            scrollback_len,
            is_at_bottom: true,
            is_at_scrollback_limit: at_limit,
        }
    }
}

/// Full snapshot of a PTY's visible terminal at one instant.
#[derive(Debug, Clone)]
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    pub row_data: Vec<Row>,
    pub cursor: Cursor,
    pub modes: ModeSnapshot,
}

/// Incremental delta against a previously delivered state.
///
/// `is_full` updates carry a complete [`TerminalState`]; deltas carry only
/// the rows whose contents changed. Every update carries the cursor, the
/// mode snapshot, and the current scroll state.
#[derive(Debug, Clone)]
pub struct DirtyUpdate {
    pub is_full: bool,
    pub full: Option<TerminalState>,
    pub dirty_rows: Vec<(u16, Row)>,
    pub cursor: Cursor,
    pub modes: ModeSnapshot,
    pub scroll: ScrollState,
}

impl DirtyUpdate {
    /// Apply this update on top of `rows`, resizing as needed. Used by
    /// consumers that fold deltas into a local copy of the screen.
    pub fn apply_to(&self, rows: &mut Vec<Row>) {
        if let Some(full) = &self.full {
            *rows = full.row_data.clone();
            return;
        }
        for (y, row) in &self.dirty_rows {
            let y = *y as usize;
            if y >= rows.len() {
                rows.resize(y + 1, Row::blank(row.len()));
            }
            rows[y] = row.clone();
        }
    }
}

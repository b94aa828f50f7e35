//! VT screen state: grid, cursor, modes, charsets, and the raw
//! `vte::Perform` implementation that mutates them.
//!
//! The screen is driven by a `vte::Parser` owned by the emulator. It keeps
//! both the primary and alternate grids, collects lines that scroll off the
//! primary grid for the scrollback store, queues device replies for the
//! PTY writer, and records which rows changed since the last drain.

use vte::{Params, Perform};

use crate::term::cell::{attrs, char_width, indexed_color, Cell, Rgb, Row, DEFAULT_BG, DEFAULT_FG};
use crate::term::kitty::KittyKeyboardStack;
use crate::term::{Cursor, CursorKeyMode, CursorStyle, ModeSnapshot};

/// Current drawing attributes.
#[derive(Debug, Clone, Copy)]
struct Pen {
    fg: Rgb,
    bg: Rgb,
    attrs: u8,
    link: u16,
}

impl Default for Pen {
    fn default() -> Self {
        Self {
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
            attrs: 0,
            link: 0,
        }
    }
}

impl Pen {
    fn blank_cell(&self) -> Cell {
        // Erased cells take the pen background but no attributes or link.
        Cell::blank(DEFAULT_FG, self.bg)
    }
}

/// DECSET/DECRST-controlled flags.
#[derive(Debug, Clone, Copy)]
pub struct Modes {
    pub cursor_keys_app: bool,
    pub origin: bool,
    pub autowrap: bool,
    pub insert: bool,
    pub cursor_visible: bool,
    pub alt_screen: bool,
    pub mouse_press: bool,
    pub mouse_drag: bool,
    pub mouse_motion: bool,
    pub mouse_sgr: bool,
    pub focus_reporting: bool,
    pub bracketed_paste: bool,
    pub synchronized: bool,
    pub in_band_resize: bool,
}

impl Default for Modes {
    fn default() -> Self {
        Self {
            cursor_keys_app: false,
            origin: false,
            autowrap: true,
            insert: false,
            cursor_visible: true,
            alt_screen: false,
            mouse_press: false,
            mouse_drag: false,
            mouse_motion: false,
            mouse_sgr: false,
            focus_reporting: false,
            bracketed_paste: false,
            synchronized: false,
            in_band_resize: false,
        }
    }
}

impl Modes {
    pub fn mouse_tracking(&self) -> bool {
        self.mouse_press || self.mouse_drag || self.mouse_motion
    }
}

/// Things the emulator must react to after a parse batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenEvent {
    TitleChanged(String),
    CwdChanged(String),
    ModeChanged,
    Bell,
    /// The alternate screen was entered or left.
    AltScreenToggled,
    /// ED 3 asked for scrollback history to be dropped.
    ScrollbackCleared,
}

#[derive(Debug, Clone, Copy)]
struct SavedCursor {
    x: usize,
    y: usize,
    pen: Pen,
    origin: bool,
    pending_wrap: bool,
}

/// The grid-and-state half of the emulator.
pub struct Screen {
    cols: usize,
    rows: usize,
    grid: Vec<Vec<Cell>>,
    /// The other screen's grid (alt while primary is active, and vice
    /// versa), kept so placements and content survive toggles.
    inactive_grid: Vec<Vec<Cell>>,
    cursor_x: usize,
    cursor_y: usize,
    pending_wrap: bool,
    pen: Pen,
    saved_cursor: Option<SavedCursor>,
    inactive_saved_cursor: Option<SavedCursor>,
    scroll_top: usize,
    /// Inclusive.
    scroll_bottom: usize,
    tab_stops: Vec<bool>,
    pub modes: Modes,
    cursor_style: CursorStyle,
    title: Option<String>,
    title_stack: Vec<String>,
    /// G0/G1 designate DEC special graphics; SO/SI select between them.
    g0_special: bool,
    g1_special: bool,
    use_g1: bool,
    /// Interned OSC 8 targets; a cell's link id is an index + 1.
    hyperlinks: Vec<String>,
    pub kitty_keyboard: KittyKeyboardStack,
    dirty: Vec<bool>,
    scrolled_off: Vec<Row>,
    responses: Vec<Vec<u8>>,
    events: Vec<ScreenEvent>,
}

impl Screen {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1) as usize;
        let rows = rows.max(1) as usize;
        Self {
            cols,
            rows,
            grid: blank_grid(cols, rows),
            inactive_grid: blank_grid(cols, rows),
            cursor_x: 0,
            cursor_y: 0,
            pending_wrap: false,
            pen: Pen::default(),
            saved_cursor: None,
            inactive_saved_cursor: None,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            tab_stops: default_tab_stops(cols),
            modes: Modes::default(),
            cursor_style: CursorStyle::Block,
            title: None,
            title_stack: Vec::new(),
            g0_special: false,
            g1_special: false,
            use_g1: false,
            hyperlinks: Vec::new(),
            kitty_keyboard: KittyKeyboardStack::default(),
            dirty: vec![true; rows],
            scrolled_off: Vec::new(),
            responses: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols as u16
    }

    pub fn rows(&self) -> u16 {
        self.rows as u16
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            x: self.cursor_x.min(self.cols - 1) as u16,
            y: self.cursor_y.min(self.rows - 1) as u16,
            visible: self.modes.cursor_visible,
            style: self.cursor_style,
        }
    }

    pub fn mode_snapshot(&self) -> ModeSnapshot {
        ModeSnapshot {
            alt_screen: self.modes.alt_screen,
            mouse_tracking: self.modes.mouse_tracking(),
            cursor_key_mode: if self.modes.cursor_keys_app {
                CursorKeyMode::Application
            } else {
                CursorKeyMode::Normal
            },
            bracketed_paste: self.modes.bracketed_paste,
            focus_reporting: self.modes.focus_reporting,
            in_band_resize: self.modes.in_band_resize,
            kitty_keyboard_flags: self.kitty_keyboard.flags(),
        }
    }

    /// Query an individual DEC private mode by number.
    pub fn get_mode(&self, mode: u16) -> bool {
        match mode {
            1 => self.modes.cursor_keys_app,
            6 => self.modes.origin,
            7 => self.modes.autowrap,
            25 => self.modes.cursor_visible,
            1000 => self.modes.mouse_press,
            1002 => self.modes.mouse_drag,
            1003 => self.modes.mouse_motion,
            1004 => self.modes.focus_reporting,
            1006 => self.modes.mouse_sgr,
            1049 | 1047 | 47 => self.modes.alt_screen,
            2004 => self.modes.bracketed_paste,
            2026 => self.modes.synchronized,
            2048 => self.modes.in_band_resize,
            _ => false,
        }
    }

    /// The URI interned for a cell's link id, if any.
    pub fn hyperlink(&self, link: u16) -> Option<&str> {
        link.checked_sub(1)
            .and_then(|idx| self.hyperlinks.get(idx as usize))
            .map(String::as_str)
    }

    /// Build a shareable row snapshot for viewport line `y`.
    pub fn row(&self, y: usize) -> Row {
        Row::from_cells(self.grid.get(y).cloned().unwrap_or_default())
    }

    /// Plain text of viewport line `y` (placeholders skipped).
    pub fn row_text(&self, y: usize) -> String {
        self.grid
            .get(y)
            .map(|cells| {
                cells
                    .iter()
                    .filter(|c| !c.is_placeholder())
                    .map(|c| c.ch)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Row indices dirtied since the last call; clears the flags.
    pub fn take_dirty(&mut self) -> Vec<usize> {
        let mut out = Vec::new();
        for (y, flag) in self.dirty.iter_mut().enumerate() {
            if *flag {
                out.push(y);
                *flag = false;
            }
        }
        out
    }

    pub fn mark_all_dirty(&mut self) {
        for flag in &mut self.dirty {
            *flag = true;
        }
    }

    /// Lines that scrolled off the top of the primary grid since the last
    /// drain, oldest first.
    pub fn take_scrolled_off(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.scrolled_off)
    }

    /// Device replies queued for the PTY writer, in order.
    pub fn take_responses(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.responses)
    }

    pub fn take_events(&mut self) -> Vec<ScreenEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn queue_response(&mut self, bytes: Vec<u8>) {
        self.responses.push(bytes);
    }

    fn mark_dirty(&mut self, y: usize) {
        if let Some(flag) = self.dirty.get_mut(y) {
            *flag = true;
        }
    }

    fn mark_dirty_range(&mut self, from: usize, to_inclusive: usize) {
        for y in from..=to_inclusive.min(self.rows - 1) {
            self.mark_dirty(y);
        }
    }

    // ==== geometry ====================================================

    /// Adjust the grid to new dimensions. Columns pad with blanks on
    /// growth and truncate from the right on shrink; rows pad at the
    /// bottom on growth, and on shrink the excess top rows of the primary
    /// grid move to scrollback so the cursor line survives.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(1) as usize;
        let rows = rows.max(1) as usize;
        if cols == self.cols && rows == self.rows {
            return;
        }

        for row in &mut self.grid {
            row.resize(cols, Cell::default());
        }
        for row in &mut self.inactive_grid {
            row.resize(cols, Cell::default());
        }

        if rows < self.rows {
            let keep_from = self.cursor_y.saturating_sub(rows - 1);
            if keep_from > 0 && !self.modes.alt_screen {
                for row in self.grid.drain(..keep_from) {
                    self.scrolled_off.push(Row::from_cells(row));
                }
                self.cursor_y -= keep_from;
            } else if keep_from > 0 {
                self.grid.drain(..keep_from);
                self.cursor_y -= keep_from;
            }
            self.grid.truncate(rows);
            self.inactive_grid.truncate(rows);
        } else {
            self.grid.resize_with(rows, || vec![Cell::default(); cols]);
            self.inactive_grid
                .resize_with(rows, || vec![Cell::default(); cols]);
        }

        self.cols = cols;
        self.rows = rows;
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.cursor_x = self.cursor_x.min(cols - 1);
        self.cursor_y = self.cursor_y.min(rows - 1);
        self.pending_wrap = false;
        self.tab_stops = default_tab_stops(cols);
        self.dirty = vec![true; rows];

        if self.modes.in_band_resize {
            let reply = format!("\x1b[48;{rows};{cols};0;0t");
            self.responses.push(reply.into_bytes());
        }
    }

    /// Full reset (RIS): clear both grids, modes, pen, title. Dimensions
    /// are preserved.
    pub fn reset(&mut self) {
        let cols = self.cols;
        let rows = self.rows;
        self.grid = blank_grid(cols, rows);
        self.inactive_grid = blank_grid(cols, rows);
        self.cursor_x = 0;
        self.cursor_y = 0;
        self.pending_wrap = false;
        self.pen = Pen::default();
        self.saved_cursor = None;
        self.inactive_saved_cursor = None;
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.tab_stops = default_tab_stops(cols);
        let was_alt = self.modes.alt_screen;
        self.modes = Modes::default();
        self.cursor_style = CursorStyle::Block;
        if self.title.take().is_some() {
            self.events.push(ScreenEvent::TitleChanged(String::new()));
        }
        self.title_stack.clear();
        self.g0_special = false;
        self.g1_special = false;
        self.use_g1 = false;
        self.hyperlinks.clear();
        self.kitty_keyboard = KittyKeyboardStack::default();
        self.dirty = vec![true; rows];
        if was_alt {
            self.events.push(ScreenEvent::AltScreenToggled);
        }
        self.events.push(ScreenEvent::ModeChanged);
    }

    // ==== scrolling ===================================================

    fn scroll_up(&mut self, n: usize) {
        let n = n.min(self.scroll_bottom - self.scroll_top + 1);
        if n == 0 {
            return;
        }
        let full_screen = self.scroll_top == 0 && self.scroll_bottom == self.rows - 1;
        for _ in 0..n {
            let row = std::mem::replace(
                &mut self.grid[self.scroll_top],
                vec![self.pen.blank_cell(); self.cols],
            );
            if full_screen && !self.modes.alt_screen {
                self.scrolled_off.push(Row::from_cells(row));
            }
            self.grid[self.scroll_top..=self.scroll_bottom].rotate_left(1);
        }
        self.mark_dirty_range(self.scroll_top, self.scroll_bottom);
    }

    fn scroll_down(&mut self, n: usize) {
        let n = n.min(self.scroll_bottom - self.scroll_top + 1);
        if n == 0 {
            return;
        }
        for _ in 0..n {
            self.grid[self.scroll_bottom] = vec![self.pen.blank_cell(); self.cols];
            self.grid[self.scroll_top..=self.scroll_bottom].rotate_right(1);
        }
        self.mark_dirty_range(self.scroll_top, self.scroll_bottom);
    }

    fn linefeed(&mut self) {
        self.pending_wrap = false;
        if self.cursor_y == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor_y + 1 < self.rows {
            self.cursor_y += 1;
        }
    }

    fn reverse_index(&mut self) {
        self.pending_wrap = false;
        if self.cursor_y == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
        }
    }

    // ==== cursor movement =============================================

    fn move_cursor(&mut self, x: usize, y: usize) {
        let (min_y, max_y) = if self.modes.origin {
            (self.scroll_top, self.scroll_bottom)
        } else {
            (0, self.rows - 1)
        };
        self.cursor_x = x.min(self.cols - 1);
        self.cursor_y = (min_y + y).min(max_y);
        self.pending_wrap = false;
    }

    fn save_cursor(&mut self) {
        self.saved_cursor = Some(SavedCursor {
            x: self.cursor_x,
            y: self.cursor_y,
            pen: self.pen,
            origin: self.modes.origin,
            pending_wrap: self.pending_wrap,
        });
    }

    fn restore_cursor(&mut self) {
        if let Some(saved) = self.saved_cursor {
            self.cursor_x = saved.x.min(self.cols - 1);
            self.cursor_y = saved.y.min(self.rows - 1);
            self.pen = saved.pen;
            self.modes.origin = saved.origin;
            self.pending_wrap = saved.pending_wrap;
        } else {
            self.cursor_x = 0;
            self.cursor_y = 0;
            self.pending_wrap = false;
        }
    }

    // ==== editing =====================================================

    fn erase_in_display(&mut self, mode: u16) {
        let blank = self.pen.blank_cell();
        match mode {
            0 => {
                self.erase_in_line(0);
                for y in self.cursor_y + 1..self.rows {
                    self.grid[y] = vec![blank; self.cols];
                    self.mark_dirty(y);
                }
            }
            1 => {
                self.erase_in_line(1);
                for y in 0..self.cursor_y {
                    self.grid[y] = vec![blank; self.cols];
                    self.mark_dirty(y);
                }
            }
            2 => {
                for y in 0..self.rows {
                    self.grid[y] = vec![blank; self.cols];
                }
                self.mark_dirty_range(0, self.rows - 1);
            }
            // ED 3 clears history, not the grid; the scrollback store
            // owner reacts to the event.
            3 => self.events.push(ScreenEvent::ScrollbackCleared),
            _ => {}
        }
    }

    fn erase_in_line(&mut self, mode: u16) {
        let blank = self.pen.blank_cell();
        let y = self.cursor_y;
        let x = self.cursor_x.min(self.cols - 1);
        let range = match mode {
            0 => x..self.cols,
            1 => 0..x + 1,
            2 => 0..self.cols,
            _ => return,
        };
        for cell in &mut self.grid[y][range] {
            *cell = blank;
        }
        self.mark_dirty(y);
    }

    fn insert_lines(&mut self, n: usize) {
        if self.cursor_y < self.scroll_top || self.cursor_y > self.scroll_bottom {
            return;
        }
        let n = n.min(self.scroll_bottom - self.cursor_y + 1);
        for _ in 0..n {
            self.grid[self.scroll_bottom] = vec![self.pen.blank_cell(); self.cols];
            self.grid[self.cursor_y..=self.scroll_bottom].rotate_right(1);
        }
        self.mark_dirty_range(self.cursor_y, self.scroll_bottom);
    }

    fn delete_lines(&mut self, n: usize) {
        if self.cursor_y < self.scroll_top || self.cursor_y > self.scroll_bottom {
            return;
        }
        let n = n.min(self.scroll_bottom - self.cursor_y + 1);
        for _ in 0..n {
            self.grid[self.cursor_y] = vec![self.pen.blank_cell(); self.cols];
            self.grid[self.cursor_y..=self.scroll_bottom].rotate_left(1);
        }
        self.mark_dirty_range(self.cursor_y, self.scroll_bottom);
    }

    fn insert_chars(&mut self, n: usize) {
        let y = self.cursor_y;
        let x = self.cursor_x.min(self.cols - 1);
        let n = n.min(self.cols - x);
        let blank = self.pen.blank_cell();
        let row = &mut self.grid[y];
        row[x..].rotate_right(n);
        for cell in &mut row[x..x + n] {
            *cell = blank;
        }
        self.mark_dirty(y);
    }

    fn delete_chars(&mut self, n: usize) {
        let y = self.cursor_y;
        let x = self.cursor_x.min(self.cols - 1);
        let n = n.min(self.cols - x);
        let blank = self.pen.blank_cell();
        let row = &mut self.grid[y];
        row[x..].rotate_left(n);
        let len = row.len();
        for cell in &mut row[len - n..] {
            *cell = blank;
        }
        self.mark_dirty(y);
    }

    fn erase_chars(&mut self, n: usize) {
        let y = self.cursor_y;
        let x = self.cursor_x.min(self.cols - 1);
        let n = n.min(self.cols - x);
        let blank = self.pen.blank_cell();
        for cell in &mut self.grid[y][x..x + n] {
            *cell = blank;
        }
        self.mark_dirty(y);
    }

    // ==== alternate screen ============================================

    fn set_alt_screen(&mut self, enter: bool, save_cursor: bool, clear: bool) {
        if enter == self.modes.alt_screen {
            return;
        }
        if enter && save_cursor {
            self.save_cursor();
        }

        std::mem::swap(&mut self.grid, &mut self.inactive_grid);
        std::mem::swap(&mut self.saved_cursor, &mut self.inactive_saved_cursor);
        self.kitty_keyboard.swap_screen();
        self.modes.alt_screen = enter;

        if enter && clear {
            let blank = vec![Cell::default(); self.cols];
            for row in &mut self.grid {
                *row = blank.clone();
            }
            self.cursor_x = 0;
            self.cursor_y = 0;
        }
        if !enter && save_cursor {
            self.restore_cursor();
        }
        self.pending_wrap = false;
        self.mark_all_dirty();
        self.events.push(ScreenEvent::AltScreenToggled);
        self.events.push(ScreenEvent::ModeChanged);
    }

    // ==== modes =======================================================

    fn set_dec_mode(&mut self, mode: u16, enable: bool) {
        let mut changed = true;
        match mode {
            1 => self.modes.cursor_keys_app = enable,
            6 => {
                self.modes.origin = enable;
                self.move_cursor(0, 0);
            }
            7 => self.modes.autowrap = enable,
            25 => self.modes.cursor_visible = enable,
            47 => self.set_alt_screen(enable, false, false),
            1000 => self.modes.mouse_press = enable,
            1002 => self.modes.mouse_drag = enable,
            1003 => self.modes.mouse_motion = enable,
            1004 => self.modes.focus_reporting = enable,
            1006 => self.modes.mouse_sgr = enable,
            1047 => self.set_alt_screen(enable, false, true),
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
                changed = false;
            }
            1049 => self.set_alt_screen(enable, true, true),
            2004 => self.modes.bracketed_paste = enable,
            2026 => self.modes.synchronized = enable,
            2048 => {
                self.modes.in_band_resize = enable;
                if enable {
                    // Mode 2048 reports the current size immediately.
                    let reply = format!("\x1b[48;{};{};0;0t", self.rows, self.cols);
                    self.responses.push(reply.into_bytes());
                }
            }
            _ => changed = false,
        }
        if changed {
            self.events.push(ScreenEvent::ModeChanged);
        }
    }

    fn report_dec_mode(&mut self, mode: u16) {
        // DECRQM: 1 = set, 2 = reset, 0 = unrecognized.
        let value = match mode {
            1 | 6 | 7 | 25 | 47 | 1000 | 1002 | 1003 | 1004 | 1006 | 1047 | 1049 | 2004 | 2026
            | 2048 => {
                if self.get_mode(mode) {
                    1
                } else {
                    2
                }
            }
            _ => 0,
        };
        let reply = format!("\x1b[?{mode};{value}$y");
        self.responses.push(reply.into_bytes());
    }

    // ==== SGR =========================================================

    fn apply_sgr(&mut self, params: &Params) {
        if params.is_empty() {
            self.pen.fg = DEFAULT_FG;
            self.pen.bg = DEFAULT_BG;
            self.pen.attrs = 0;
            return;
        }

        let flat: Vec<Vec<u16>> = params.iter().map(<[u16]>::to_vec).collect();
        let mut i = 0;
        while i < flat.len() {
            let param = &flat[i];
            let code = param.first().copied().unwrap_or(0);
            match code {
                0 => {
                    self.pen.fg = DEFAULT_FG;
                    self.pen.bg = DEFAULT_BG;
                    self.pen.attrs = 0;
                }
                1 => self.pen.attrs |= attrs::BOLD,
                2 => self.pen.attrs |= attrs::DIM,
                3 => self.pen.attrs |= attrs::ITALIC,
                4 => self.pen.attrs |= attrs::UNDERLINE,
                5 | 6 => self.pen.attrs |= attrs::BLINK,
                7 => self.pen.attrs |= attrs::INVERSE,
                9 => self.pen.attrs |= attrs::STRIKETHROUGH,
                22 => self.pen.attrs &= !(attrs::BOLD | attrs::DIM),
                23 => self.pen.attrs &= !attrs::ITALIC,
                24 => self.pen.attrs &= !attrs::UNDERLINE,
                25 => self.pen.attrs &= !attrs::BLINK,
                27 => self.pen.attrs &= !attrs::INVERSE,
                29 => self.pen.attrs &= !attrs::STRIKETHROUGH,
                30..=37 => self.pen.fg = indexed_color((code - 30) as u8),
                38 => {
                    if let Some((color, consumed)) = parse_extended_color(&flat, i) {
                        self.pen.fg = color;
                        i += consumed;
                    }
                }
                39 => self.pen.fg = DEFAULT_FG,
                40..=47 => self.pen.bg = indexed_color((code - 40) as u8),
                48 => {
                    if let Some((color, consumed)) = parse_extended_color(&flat, i) {
                        self.pen.bg = color;
                        i += consumed;
                    }
                }
                49 => self.pen.bg = DEFAULT_BG,
                90..=97 => self.pen.fg = indexed_color((code - 90 + 8) as u8),
                100..=107 => self.pen.bg = indexed_color((code - 100 + 8) as u8),
                _ => {}
            }
            i += 1;
        }
    }
}

/// Parse SGR 38/48 extended colors in either `;5;n` / `;2;r;g;b` split form
/// or `:5:n` / `:2:r:g:b` colon form. Returns the color and how many extra
/// top-level params were consumed.
fn parse_extended_color(flat: &[Vec<u16>], i: usize) -> Option<(Rgb, usize)> {
    let param = &flat[i];
    if param.len() > 1 {
        // Colon form: everything is subparams of one param.
        match *param.get(1)? {
            5 => {
                let idx = *param.get(2)? as u8;
                Some((indexed_color(idx), 0))
            }
            2 => {
                // Either 38:2:r:g:b or 38:2:colorspace:r:g:b.
                let tail = &param[2..];
                let (r, g, b) = match tail.len() {
                    3 => (tail[0], tail[1], tail[2]),
                    n if n >= 4 => (tail[1], tail[2], tail[3]),
                    _ => return None,
                };
                Some((Rgb::new(r as u8, g as u8, b as u8), 0))
            }
            _ => None,
        }
    } else {
        // Split form: mode and components are separate params.
        match *flat.get(i + 1)?.first()? {
            5 => {
                let idx = *flat.get(i + 2)?.first()? as u8;
                Some((indexed_color(idx), 2))
            }
            2 => {
                let r = *flat.get(i + 2)?.first()? as u8;
                let g = *flat.get(i + 3)?.first()? as u8;
                let b = *flat.get(i + 4)?.first()? as u8;
                Some((Rgb::new(r, g, b), 4))
            }
            _ => None,
        }
    }
}

fn blank_grid(cols: usize, rows: usize) -> Vec<Vec<Cell>> {
    vec![vec![Cell::default(); cols]; rows]
}

fn default_tab_stops(cols: usize) -> Vec<bool> {
    (0..cols).map(|x| x % 8 == 0).collect()
}

/// Map a character through DEC special graphics when designated (the
/// line-drawing charset used by ncurses apps).
fn map_special_graphics(ch: char) -> char {
    match ch {
        '`' => '◆',
        'a' => '▒',
        'f' => '°',
        'g' => '±',
        'j' => '┘',
        'k' => '┐',
        'l' => '┌',
        'm' => '└',
        'n' => '┼',
        'o' => '⎺',
        'p' => '⎻',
        'q' => '─',
        'r' => '⎼',
        's' => '⎽',
        't' => '├',
        'u' => '┤',
        'v' => '┴',
        'w' => '┬',
        'x' => '│',
        'y' => '≤',
        'z' => '≥',
        '{' => 'π',
        '|' => '≠',
        '}' => '£',
        '~' => '·',
        _ => ch,
    }
}

fn param(params: &Params, index: usize, default: u16) -> u16 {
    params
        .iter()
        .nth(index)
        .and_then(|p| p.first().copied())
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

fn param_or_zero(params: &Params, index: usize) -> u16 {
    params
        .iter()
        .nth(index)
        .and_then(|p| p.first().copied())
        .unwrap_or(0)
}

impl Perform for Screen {
    fn print(&mut self, ch: char) {
        let special = if self.use_g1 {
            self.g1_special
        } else {
            self.g0_special
        };
        let ch = if special { map_special_graphics(ch) } else { ch };
        let width = char_width(ch) as usize;

        if self.pending_wrap && self.modes.autowrap {
            self.cursor_x = 0;
            self.linefeed();
        }
        self.pending_wrap = false;

        // A wide glyph that doesn't fit on the line wraps early.
        if width == 2 && self.cursor_x + 1 >= self.cols {
            if self.modes.autowrap {
                let blank = self.pen.blank_cell();
                self.grid[self.cursor_y][self.cols - 1] = blank;
                self.cursor_x = 0;
                self.linefeed();
            } else {
                self.cursor_x = self.cols.saturating_sub(2);
            }
        }

        let x = self.cursor_x.min(self.cols - 1);
        let y = self.cursor_y;

        if self.modes.insert {
            self.insert_chars(width);
        }

        // Overwriting half of an existing wide glyph blanks the other half.
        if self.grid[y][x].is_placeholder() && x > 0 {
            self.grid[y][x - 1] = self.pen.blank_cell();
        }
        if self.grid[y][x].is_wide() && x + 1 < self.cols {
            self.grid[y][x + 1] = self.pen.blank_cell();
        }

        self.grid[y][x] = Cell {
            ch,
            fg: self.pen.fg,
            bg: self.pen.bg,
            attrs: self.pen.attrs,
            width: width as u8,
            link: self.pen.link,
        };
        if width == 2 && x + 1 < self.cols {
            self.grid[y][x + 1] = Cell {
                ch: ' ',
                fg: self.pen.fg,
                bg: self.pen.bg,
                attrs: self.pen.attrs,
                width: crate::term::cell::WIDTH_PLACEHOLDER,
                link: self.pen.link,
            };
        }
        self.mark_dirty(y);

        if x + width >= self.cols {
            self.cursor_x = self.cols - 1;
            self.pending_wrap = true;
        } else {
            self.cursor_x = x + width;
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x07 => self.events.push(ScreenEvent::Bell),
            0x08 => {
                self.cursor_x = self.cursor_x.saturating_sub(1);
                self.pending_wrap = false;
            }
            0x09 => {
                let mut x = self.cursor_x + 1;
                while x < self.cols && !self.tab_stops[x] {
                    x += 1;
                }
                self.cursor_x = x.min(self.cols - 1);
            }
            0x0a | 0x0b | 0x0c => self.linefeed(),
            0x0d => {
                self.cursor_x = 0;
                self.pending_wrap = false;
            }
            0x0e => self.use_g1 = true,
            0x0f => self.use_g1 = false,
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        if params.is_empty() {
            return;
        }
        match params[0] {
            b"0" | b"2" => {
                if let Some(title) = params.get(1) {
                    let title = String::from_utf8_lossy(title).into_owned();
                    self.title = Some(title.clone());
                    self.events.push(ScreenEvent::TitleChanged(title));
                }
            }
            // OSC 7: current working directory as a file:// URI.
            b"7" => {
                if let Some(uri) = params.get(1) {
                    let uri = String::from_utf8_lossy(uri);
                    let path = uri.strip_prefix("file://").map_or_else(
                        || uri.to_string(),
                        |rest| match rest.find('/') {
                            Some(slash) => rest[slash..].to_string(),
                            None => rest.to_string(),
                        },
                    );
                    if !path.is_empty() {
                        self.events.push(ScreenEvent::CwdChanged(path));
                    }
                }
            }
            // OSC 8: hyperlink open/close: OSC 8 ; params ; uri ST.
            b"8" => {
                let uri = params
                    .get(2)
                    .map(|u| String::from_utf8_lossy(u).into_owned())
                    .unwrap_or_default();
                if uri.is_empty() {
                    self.pen.link = 0;
                } else {
                    let id = match self.hyperlinks.iter().position(|u| *u == uri) {
                        Some(idx) => idx + 1,
                        None => {
                            self.hyperlinks.push(uri);
                            self.hyperlinks.len()
                        }
                    };
                    self.pen.link = id.min(u16::MAX as usize) as u16;
                }
            }
            // OSC 10/11: default color query.
            b"10" | b"11" => {
                if params.get(1).map(|p| *p == b"?").unwrap_or(false) {
                    let (code, color) = if params[0] == b"10" {
                        ("10", DEFAULT_FG)
                    } else {
                        ("11", DEFAULT_BG)
                    };
                    let reply = format!(
                        "\x1b]{code};rgb:{:02x}{:02x}/{:02x}{:02x}/{:02x}{:02x}\x1b\\",
                        color.r, color.r, color.g, color.g, color.b, color.b
                    );
                    self.responses.push(reply.into_bytes());
                }
            }
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, action: char) {
        match (action, intermediates) {
            ('A', []) => {
                let n = param(params, 0, 1) as usize;
                self.cursor_y = self
                    .cursor_y
                    .saturating_sub(n)
                    .max(if self.cursor_y >= self.scroll_top {
                        self.scroll_top
                    } else {
                        0
                    });
                self.pending_wrap = false;
            }
            ('B', []) => {
                let n = param(params, 0, 1) as usize;
                let limit = if self.cursor_y <= self.scroll_bottom {
                    self.scroll_bottom
                } else {
                    self.rows - 1
                };
                self.cursor_y = (self.cursor_y + n).min(limit);
                self.pending_wrap = false;
            }
            ('C', []) => {
                let n = param(params, 0, 1) as usize;
                self.cursor_x = (self.cursor_x + n).min(self.cols - 1);
                self.pending_wrap = false;
            }
            ('D', []) => {
                let n = param(params, 0, 1) as usize;
                self.cursor_x = self.cursor_x.saturating_sub(n);
                self.pending_wrap = false;
            }
            ('E', []) => {
                let n = param(params, 0, 1) as usize;
                self.cursor_x = 0;
                self.cursor_y = (self.cursor_y + n).min(self.scroll_bottom);
                self.pending_wrap = false;
            }
            ('F', []) => {
                let n = param(params, 0, 1) as usize;
                self.cursor_x = 0;
                self.cursor_y = self.cursor_y.saturating_sub(n).max(self.scroll_top);
                self.pending_wrap = false;
            }
            ('G', []) => {
                let n = param(params, 0, 1) as usize;
                self.cursor_x = (n - 1).min(self.cols - 1);
                self.pending_wrap = false;
            }
            ('H' | 'f', []) => {
                let y = param(params, 0, 1) as usize;
                let x = param(params, 1, 1) as usize;
                self.move_cursor(x - 1, y - 1);
            }
            ('J', []) => self.erase_in_display(param_or_zero(params, 0)),
            ('K', []) => self.erase_in_line(param_or_zero(params, 0)),
            ('L', []) => self.insert_lines(param(params, 0, 1) as usize),
            ('M', []) => self.delete_lines(param(params, 0, 1) as usize),
            ('P', []) => self.delete_chars(param(params, 0, 1) as usize),
            ('S', []) => self.scroll_up(param(params, 0, 1) as usize),
            ('T', []) => self.scroll_down(param(params, 0, 1) as usize),
            ('X', []) => self.erase_chars(param(params, 0, 1) as usize),
            ('@', []) => self.insert_chars(param(params, 0, 1) as usize),
            ('b', []) => {
                // REP: repeat the previous graphic character.
                let n = param(params, 0, 1) as usize;
                let prev = self
                    .cursor_x
                    .checked_sub(1)
                    .map(|x| self.grid[self.cursor_y][x].ch);
                if let Some(ch) = prev {
                    for _ in 0..n {
                        self.print(ch);
                    }
                }
            }
            ('d', []) => {
                let n = param(params, 0, 1) as usize;
                self.cursor_y = (n - 1).min(self.rows - 1);
                self.pending_wrap = false;
            }
            ('g', []) => match param_or_zero(params, 0) {
                0 => {
                    if let Some(stop) = self.tab_stops.get_mut(self.cursor_x) {
                        *stop = false;
                    }
                }
                3 => self.tab_stops.iter_mut().for_each(|s| *s = false),
                _ => {}
            },
            ('h', []) => {
                if param_or_zero(params, 0) == 4 {
                    self.modes.insert = true;
                }
            }
            ('l', []) => {
                if param_or_zero(params, 0) == 4 {
                    self.modes.insert = false;
                }
            }
            ('h', [b'?']) => {
                for p in params.iter() {
                    if let Some(&mode) = p.first() {
                        self.set_dec_mode(mode, true);
                    }
                }
            }
            ('l', [b'?']) => {
                for p in params.iter() {
                    if let Some(&mode) = p.first() {
                        self.set_dec_mode(mode, false);
                    }
                }
            }
            ('m', []) => self.apply_sgr(params),
            ('n', []) => match param_or_zero(params, 0) {
                5 => self.responses.push(b"\x1b[0n".to_vec()),
                6 => {
                    let y = if self.modes.origin {
                        self.cursor_y - self.scroll_top + 1
                    } else {
                        self.cursor_y + 1
                    };
                    let reply = format!("\x1b[{};{}R", y, self.cursor_x + 1);
                    self.responses.push(reply.into_bytes());
                }
                _ => {}
            },
            ('p', [b'?', b'$']) => self.report_dec_mode(param_or_zero(params, 0)),
            ('q', [b' ']) => {
                self.cursor_style = match param_or_zero(params, 0) {
                    3 | 4 => CursorStyle::Underline,
                    5 | 6 => CursorStyle::Bar,
                    _ => CursorStyle::Block,
                };
            }
            ('r', []) => {
                let top = param(params, 0, 1) as usize;
                let bottom = param(params, 1, self.rows as u16) as usize;
                if top < bottom && bottom <= self.rows {
                    self.scroll_top = top - 1;
                    self.scroll_bottom = bottom - 1;
                    self.move_cursor(0, 0);
                }
            }
            ('s', []) => self.save_cursor(),
            ('u', []) => self.restore_cursor(),
            ('t', []) => match param_or_zero(params, 0) {
                // XTWINOPS title stack.
                22 => {
                    let title = self.title.clone().unwrap_or_default();
                    self.title_stack.push(title);
                }
                23 => {
                    if let Some(title) = self.title_stack.pop() {
                        self.title = Some(title.clone());
                        self.events.push(ScreenEvent::TitleChanged(title));
                    }
                }
                _ => {}
            },
            // Kitty keyboard protocol.
            ('u', [b'?']) => {
                let reply = format!("\x1b[?{}u", self.kitty_keyboard.flags());
                self.responses.push(reply.into_bytes());
            }
            ('u', [b'>']) => {
                let flags = param_or_zero(params, 0) as u8;
                self.kitty_keyboard.push(flags);
                self.events.push(ScreenEvent::ModeChanged);
            }
            ('u', [b'<']) => {
                let n = param(params, 0, 1) as usize;
                self.kitty_keyboard.pop(n);
                self.events.push(ScreenEvent::ModeChanged);
            }
            ('u', [b'=']) => {
                let flags = param_or_zero(params, 0) as u8;
                let mode = param(params, 1, 1);
                self.kitty_keyboard.set(flags, mode);
                self.events.push(ScreenEvent::ModeChanged);
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        match (intermediates, byte) {
            ([], b'7') => self.save_cursor(),
            ([], b'8') => self.restore_cursor(),
            ([], b'D') => self.linefeed(),
            ([], b'E') => {
                self.cursor_x = 0;
                self.linefeed();
            }
            ([], b'H') => {
                if let Some(stop) = self.tab_stops.get_mut(self.cursor_x) {
                    *stop = true;
                }
            }
            ([], b'M') => self.reverse_index(),
            ([], b'c') => self.reset(),
            ([b'('], b'0') => self.g0_special = true,
            ([b'('], b'B') => self.g0_special = false,
            ([b')'], b'0') => self.g1_special = true,
            ([b')'], b'B') => self.g1_special = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(screen: &mut Screen, bytes: &[u8]) {
        let mut parser = vte::Parser::new();
        for byte in bytes {
            parser.advance(screen, *byte);
        }
    }

    fn screen_with(cols: u16, rows: u16, bytes: &[u8]) -> Screen {
        let mut screen = Screen::new(cols, rows);
        feed(&mut screen, bytes);
        screen
    }

    #[test]
    fn plain_text_lands_on_the_first_row() {
        let screen = screen_with(10, 3, b"hi");
        assert_eq!(screen.row_text(0).trim_end(), "hi");
        let cursor = screen.cursor();
        assert_eq!((cursor.x, cursor.y), (2, 0));
    }

    #[test]
    fn crlf_moves_to_next_line() {
        let screen = screen_with(10, 3, b"ab\r\ncd");
        assert_eq!(screen.row_text(0).trim_end(), "ab");
        assert_eq!(screen.row_text(1).trim_end(), "cd");
    }

    #[test]
    fn autowrap_defers_until_next_print() {
        let mut screen = Screen::new(3, 2);
        feed(&mut screen, b"abc");
        // Cursor parks on the last column until one more character arrives.
        assert_eq!(screen.cursor().x, 2);
        feed(&mut screen, b"d");
        assert_eq!(screen.row_text(1).trim_end(), "d");
    }

    #[test]
    fn scrolling_off_primary_top_collects_scrollback() {
        let mut screen = screen_with(5, 2, b"one\r\ntwo\r\nthree");
        let off = screen.take_scrolled_off();
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].text().trim_end(), "one");
        assert_eq!(screen.row_text(0).trim_end(), "two");
        assert_eq!(screen.row_text(1).trim_end(), "three");
    }

    #[test]
    fn alt_screen_preserves_primary_contents() {
        let mut screen = screen_with(10, 2, b"keep");
        feed(&mut screen, b"\x1b[?1049h");
        assert!(screen.modes.alt_screen);
        assert_eq!(screen.row_text(0).trim_end(), "");
        feed(&mut screen, b"alt");
        feed(&mut screen, b"\x1b[?1049l");
        assert!(!screen.modes.alt_screen);
        assert_eq!(screen.row_text(0).trim_end(), "keep");
    }

    #[test]
    fn alt_screen_scrolling_never_reaches_scrollback() {
        let mut screen = screen_with(5, 2, b"\x1b[?1049h");
        screen.take_scrolled_off();
        feed(&mut screen, b"a\r\nb\r\nc\r\nd");
        assert!(screen.take_scrolled_off().is_empty());
    }

    #[test]
    fn cursor_position_honors_one_based_addressing() {
        let screen = screen_with(10, 5, b"\x1b[3;4Hx");
        assert_eq!(screen.row_text(2).trim_end(), "   x");
    }

    #[test]
    fn erase_in_line_to_end() {
        let mut screen = screen_with(10, 2, b"abcdef");
        feed(&mut screen, b"\x1b[4G\x1b[K");
        assert_eq!(screen.row_text(0).trim_end(), "abc");
    }

    #[test]
    fn sgr_truecolor_and_reset() {
        let mut screen = screen_with(10, 2, b"\x1b[38;2;10;20;30mx\x1b[0my");
        let row = screen.row(0);
        assert_eq!(row.cells()[0].fg, Rgb::new(10, 20, 30));
        assert_eq!(row.cells()[1].fg, DEFAULT_FG);
        feed(&mut screen, b"\x1b[38:5:196mz");
        let row = screen.row(0);
        assert_eq!(row.cells()[2].fg, indexed_color(196));
    }

    #[test]
    fn bold_and_underline_attrs_accumulate() {
        let screen = screen_with(10, 1, b"\x1b[1;4mx");
        let cell = screen.row(0).cells()[0];
        assert_ne!(cell.attrs & attrs::BOLD, 0);
        assert_ne!(cell.attrs & attrs::UNDERLINE, 0);
    }

    #[test]
    fn wide_glyph_writes_placeholder() {
        let screen = screen_with(10, 1, "中".as_bytes());
        let row = screen.row(0);
        assert!(row.cells()[0].is_wide());
        assert!(row.cells()[1].is_placeholder());
        assert_eq!(screen.cursor().x, 2);
    }

    #[test]
    fn dec_special_graphics_map_when_designated() {
        let screen = screen_with(10, 1, b"\x1b(0qx\x1b(Bq");
        let text = screen.row_text(0);
        assert!(text.starts_with("─│q"));
    }

    #[test]
    fn dsr_six_reports_cursor_position() {
        let mut screen = screen_with(10, 5, b"\x1b[2;3H");
        feed(&mut screen, b"\x1b[6n");
        let responses = screen.take_responses();
        assert_eq!(responses, vec![b"\x1b[2;3R".to_vec()]);
    }

    #[test]
    fn decrqm_reports_synchronized_mode_support() {
        let mut screen = screen_with(10, 2, b"\x1b[?2026$p");
        assert_eq!(screen.take_responses(), vec![b"\x1b[?2026;2$y".to_vec()]);
        feed(&mut screen, b"\x1b[?2026h\x1b[?2026$p");
        assert_eq!(screen.take_responses(), vec![b"\x1b[?2026;1$y".to_vec()]);
    }

    #[test]
    fn osc_title_fires_event() {
        let mut screen = screen_with(10, 2, b"\x1b]2;hello\x07");
        assert_eq!(screen.title(), Some("hello"));
        assert!(screen
            .take_events()
            .contains(&ScreenEvent::TitleChanged("hello".into())));
    }

    #[test]
    fn osc7_reports_cwd_change() {
        let mut screen = screen_with(10, 2, b"\x1b]7;file://host/tmp/work\x1b\\");
        assert!(screen
            .take_events()
            .contains(&ScreenEvent::CwdChanged("/tmp/work".into())));
    }

    #[test]
    fn osc8_assigns_and_clears_link_ids() {
        let screen = screen_with(20, 1, b"\x1b]8;;https://example.com\x1b\\ab\x1b]8;;\x1b\\c");
        let row = screen.row(0);
        assert_ne!(row.cells()[0].link, 0);
        assert_eq!(row.cells()[0].link, row.cells()[1].link);
        assert_eq!(row.cells()[2].link, 0);
        assert_eq!(
            screen.hyperlink(row.cells()[0].link),
            Some("https://example.com")
        );
    }

    #[test]
    fn scroll_region_contains_scrolling() {
        let mut screen = screen_with(5, 4, b"a\r\nb\r\nc\r\nd");
        // Region rows 2-3 (1-based), cursor to bottom of region, then LF.
        feed(&mut screen, b"\x1b[2;3r\x1b[3;1H\x1b[1Se");
        assert_eq!(screen.row_text(0).trim_end(), "a");
        assert_eq!(screen.row_text(3).trim_end(), "d");
    }

    #[test]
    fn resize_narrower_truncates_from_the_right() {
        let mut screen = screen_with(8, 2, b"abcdefgh");
        screen.resize(4, 2);
        assert_eq!(screen.row_text(0), "abcd");
        assert_eq!(screen.cols(), 4);
    }

    #[test]
    fn resize_shorter_moves_top_rows_to_scrollback() {
        let mut screen = screen_with(5, 4, b"a\r\nb\r\nc\r\nd");
        screen.take_scrolled_off();
        screen.resize(5, 2);
        let off = screen.take_scrolled_off();
        assert_eq!(off.len(), 2);
        assert_eq!(off[0].text().trim_end(), "a");
        assert_eq!(screen.row_text(0).trim_end(), "c");
        assert_eq!(screen.cursor().y, 1);
    }

    #[test]
    fn resize_reports_in_band_when_enabled() {
        let mut screen = screen_with(10, 5, b"\x1b[?2048h");
        screen.take_responses();
        screen.resize(20, 6);
        let responses = screen.take_responses();
        assert_eq!(responses, vec![b"\x1b[48;6;20;0;0t".to_vec()]);
    }

    #[test]
    fn kitty_keyboard_stack_push_query_pop() {
        let mut screen = screen_with(10, 2, b"\x1b[>5u\x1b[?u");
        assert_eq!(screen.take_responses(), vec![b"\x1b[?5u".to_vec()]);
        feed(&mut screen, b"\x1b[<u\x1b[?u");
        assert_eq!(screen.take_responses(), vec![b"\x1b[?0u".to_vec()]);
    }

    #[test]
    fn kitty_keyboard_flags_are_per_screen() {
        let mut screen = screen_with(10, 2, b"\x1b[>3u");
        assert_eq!(screen.mode_snapshot().kitty_keyboard_flags, 3);
        feed(&mut screen, b"\x1b[?1049h");
        assert_eq!(screen.mode_snapshot().kitty_keyboard_flags, 0);
        feed(&mut screen, b"\x1b[?1049l");
        assert_eq!(screen.mode_snapshot().kitty_keyboard_flags, 3);
    }

    #[test]
    fn dirty_tracking_clears_on_take() {
        let mut screen = screen_with(10, 3, b"x");
        let dirty = screen.take_dirty();
        assert!(dirty.contains(&0));
        assert!(screen.take_dirty().is_empty());
        feed(&mut screen, b"\x1b[2;1Hy");
        assert_eq!(screen.take_dirty(), vec![1]);
    }

    #[test]
    fn insert_and_delete_lines_respect_region() {
        let mut screen = screen_with(5, 4, b"a\r\nb\r\nc\r\nd");
        feed(&mut screen, b"\x1b[2;1H\x1b[1L");
        assert_eq!(screen.row_text(1).trim_end(), "");
        assert_eq!(screen.row_text(2).trim_end(), "b");
        feed(&mut screen, b"\x1b[2;1H\x1b[1M");
        assert_eq!(screen.row_text(1).trim_end(), "b");
    }

    #[test]
    fn full_reset_clears_title_and_modes() {
        let mut screen = screen_with(10, 3, b"\x1b]2;t\x07\x1b[?25l\x1b[?1000h");
        screen.take_events();
        feed(&mut screen, b"\x1bc");
        assert_eq!(screen.title(), None);
        assert!(screen.modes.cursor_visible);
        assert!(!screen.modes.mouse_tracking());
    }

    #[test]
    fn rep_repeats_last_printed_character() {
        let screen = screen_with(10, 1, b"a\x1b[3b");
        assert_eq!(screen.row_text(0).trim_end(), "aaaa");
    }
}

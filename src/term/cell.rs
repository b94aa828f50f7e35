//! Cell and row primitives for the terminal grid.
//!
//! Rows are reference-counted so that unchanged rows keep their identity
//! between snapshots; consumers compare with [`Row::same_buffer`] to skip
//! re-diffing (the structural-sharing contract).

use std::ops::Deref;
use std::sync::Arc;

use unicode_width::UnicodeWidthChar;

/// A 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Default foreground when the child hasn't set one.
pub const DEFAULT_FG: Rgb = Rgb::new(0xe5, 0xe5, 0xe5);
/// Default background when the child hasn't set one.
pub const DEFAULT_BG: Rgb = Rgb::new(0x00, 0x00, 0x00);

/// Attribute bitfield flags carried by each cell.
pub mod attrs {
    pub const BOLD: u8 = 1 << 0;
    pub const ITALIC: u8 = 1 << 1;
    pub const UNDERLINE: u8 = 1 << 2;
    pub const STRIKETHROUGH: u8 = 1 << 3;
    pub const INVERSE: u8 = 1 << 4;
    pub const BLINK: u8 = 1 << 5;
    pub const DIM: u8 = 1 << 6;
}

/// Width byte for the invisible cell to the right of a wide glyph.
pub const WIDTH_PLACEHOLDER: u8 = 0;

/// A single terminal position.
///
/// `width` is 1 for normal glyphs, 2 for a wide glyph occupying this column
/// plus the next, and [`WIDTH_PLACEHOLDER`] for the column shadowed by a
/// wide glyph to its left. `link` is a per-screen hyperlink id; 0 means no
/// link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub fg: Rgb,
    pub bg: Rgb,
    pub attrs: u8,
    pub width: u8,
    pub link: u16,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
            attrs: 0,
            width: 1,
            link: 0,
        }
    }
}

impl Cell {
    /// A blank cell painted with the given colors (EL/ED fill).
    pub fn blank(fg: Rgb, bg: Rgb) -> Self {
        Self {
            fg,
            bg,
            ..Self::default()
        }
    }

    pub fn is_wide(&self) -> bool {
        self.width == 2
    }

    pub fn is_placeholder(&self) -> bool {
        self.width == WIDTH_PLACEHOLDER
    }
}

/// Display width of a character as the grid sees it (1 or 2; zero-width
/// combining marks count as 1 because the grid has no zero-width slots).
pub fn char_width(ch: char) -> u8 {
    match UnicodeWidthChar::width(ch) {
        Some(2) => 2,
        _ => 1,
    }
}

/// An immutable, shareable row of cells.
#[derive(Debug, Clone)]
pub struct Row(Arc<Vec<Cell>>);

impl Row {
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        Self(Arc::new(cells))
    }

    /// A row of `cols` default blank cells.
    pub fn blank(cols: usize) -> Self {
        Self(Arc::new(vec![Cell::default(); cols]))
    }

    pub fn cells(&self) -> &[Cell] {
        &self.0
    }

    /// True when both rows share the same underlying buffer. This is the
    /// O(1) "unchanged" check consumers rely on.
    pub fn same_buffer(a: &Row, b: &Row) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Plain text of the row, skipping wide-glyph placeholder columns.
    pub fn text(&self) -> String {
        self.0
            .iter()
            .filter(|c| !c.is_placeholder())
            .map(|c| c.ch)
            .collect()
    }
}

impl Deref for Row {
    type Target = [Cell];

    fn deref(&self) -> &[Cell] {
        &self.0
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Row {}

/// Per-row monotone version counter, the O(1) alternative to reference
/// comparison for dirty checks.
#[derive(Debug, Default)]
pub struct RowVersionTracker {
    versions: Vec<u64>,
    counter: u64,
}

impl RowVersionTracker {
    pub fn new(rows: usize) -> Self {
        Self {
            versions: vec![0; rows],
            counter: 0,
        }
    }

    /// Bump the version of row `y`, returning the new value.
    pub fn bump(&mut self, y: usize) -> u64 {
        self.counter += 1;
        if let Some(slot) = self.versions.get_mut(y) {
            *slot = self.counter;
        }
        self.counter
    }

    pub fn version(&self, y: usize) -> u64 {
        self.versions.get(y).copied().unwrap_or(0)
    }

    /// Resize to `rows` slots; every row is considered changed afterwards.
    pub fn reset(&mut self, rows: usize) {
        self.counter += 1;
        self.versions.clear();
        self.versions.resize(rows, self.counter);
    }
}

/// Resolve a 256-color palette index to RGB (16 ANSI + 6x6x6 cube + grays).
pub fn indexed_color(idx: u8) -> Rgb {
    const ANSI: [Rgb; 16] = [
        Rgb::new(0x00, 0x00, 0x00),
        Rgb::new(0xcd, 0x00, 0x00),
        Rgb::new(0x00, 0xcd, 0x00),
        Rgb::new(0xcd, 0xcd, 0x00),
        Rgb::new(0x00, 0x00, 0xee),
        Rgb::new(0xcd, 0x00, 0xcd),
        Rgb::new(0x00, 0xcd, 0xcd),
        Rgb::new(0xe5, 0xe5, 0xe5),
        Rgb::new(0x7f, 0x7f, 0x7f),
        Rgb::new(0xff, 0x00, 0x00),
        Rgb::new(0x00, 0xff, 0x00),
        Rgb::new(0xff, 0xff, 0x00),
        Rgb::new(0x5c, 0x5c, 0xff),
        Rgb::new(0xff, 0x00, 0xff),
        Rgb::new(0x00, 0xff, 0xff),
        Rgb::new(0xff, 0xff, 0xff),
    ];

    match idx {
        0..=15 => ANSI[idx as usize],
        16..=231 => {
            let idx = idx - 16;
            let r = idx / 36;
            let g = (idx % 36) / 6;
            let b = idx % 6;
            let level = |c: u8| if c == 0 { 0 } else { 55 + c * 40 };
            Rgb::new(level(r), level(g), level(b))
        }
        232..=255 => {
            let level = 8 + (idx - 232) * 10;
            Rgb::new(level, level, level)
        }
    }
}

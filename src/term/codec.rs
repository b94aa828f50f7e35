//! Binary packing of rows and dirty updates for cross-thread transport.
//!
//! Cells are fixed-stride so a row packs to `cols * CELL_STRIDE` bytes with
//! no per-cell branching on the hot path. The layout per cell:
//!
//! ```text
//! u32: character scalar value (little-endian)
//! u8 x 3: foreground RGB
//! u8 x 3: background RGB
//! u8: attribute bitfield
//! u8: width (1, 2, or 0 for a wide-glyph placeholder)
//! u16: hyperlink id (0 = no link)
//! ```
//!
//! Pack/unpack is the identity for every valid input; length mismatches are
//! programmer errors and surface as [`Error::BadLength`].

use crate::error::{Error, Result};
use crate::term::cell::{Cell, Rgb, Row};
use crate::term::{
    Cursor, CursorKeyMode, CursorStyle, DirtyUpdate, ModeSnapshot, ScrollState, TerminalState,
};

/// Bytes per packed cell.
pub const CELL_STRIDE: usize = 14;

/// Pack a row into a fixed-stride byte buffer. A zero-length row packs to
/// an empty buffer.
pub fn pack_row(row: &Row) -> Vec<u8> {
    let mut buf = Vec::with_capacity(row.len() * CELL_STRIDE);
    for cell in row.cells() {
        buf.extend_from_slice(&(cell.ch as u32).to_le_bytes());
        buf.extend_from_slice(&[cell.fg.r, cell.fg.g, cell.fg.b]);
        buf.extend_from_slice(&[cell.bg.r, cell.bg.g, cell.bg.b]);
        buf.push(cell.attrs);
        buf.push(cell.width);
        buf.extend_from_slice(&cell.link.to_le_bytes());
    }
    buf
}

/// Unpack a row of exactly `cols` cells.
pub fn unpack_row(bytes: &[u8], cols: usize) -> Result<Row> {
    if bytes.len() % CELL_STRIDE != 0 {
        return Err(Error::BadLength(format!(
            "row blob of {} bytes is not a multiple of the {CELL_STRIDE}-byte cell stride",
            bytes.len()
        )));
    }
    let count = bytes.len() / CELL_STRIDE;
    if count != cols {
        return Err(Error::BadLength(format!(
            "row blob holds {count} cells, expected {cols}"
        )));
    }

    let mut cells = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(CELL_STRIDE) {
        let scalar = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let ch = char::from_u32(scalar)
            .ok_or_else(|| Error::BadLength(format!("invalid scalar value {scalar:#x}")))?;
        cells.push(Cell {
            ch,
            fg: Rgb::new(chunk[4], chunk[5], chunk[6]),
            bg: Rgb::new(chunk[7], chunk[8], chunk[9]),
            attrs: chunk[10],
            width: chunk[11],
            link: u16::from_le_bytes([chunk[12], chunk[13]]),
        });
    }
    Ok(Row::from_cells(cells))
}

const FLAG_FULL: u8 = 1 << 0;
const FLAG_CURSOR_VISIBLE: u8 = 1 << 1;
const FLAG_ALT_SCREEN: u8 = 1 << 2;
const FLAG_MOUSE: u8 = 1 << 3;
const FLAG_APP_CURSOR: u8 = 1 << 4;
const FLAG_IN_BAND_RESIZE: u8 = 1 << 5;
const FLAG_AT_BOTTOM: u8 = 1 << 6;
const FLAG_AT_LIMIT: u8 = 1 << 7;

const FLAG2_BRACKETED_PASTE: u8 = 1 << 0;
const FLAG2_FOCUS_REPORTING: u8 = 1 << 1;

/// Pack a dirty update into one transferable buffer.
///
/// Header, then `count` `u16` row indices, then per-row `u32`-length-prefixed
/// row blobs. A full update encodes every viewport row with indices
/// `0..rows`.
pub fn pack_dirty_update(update: &DirtyUpdate) -> Vec<u8> {
    let (cols, rows): (u16, u16) = match &update.full {
        Some(full) => (full.cols, full.rows),
        None => (0, 0),
    };

    let mut flags = 0u8;
    if update.is_full {
        flags |= FLAG_FULL;
    }
    if update.cursor.visible {
        flags |= FLAG_CURSOR_VISIBLE;
    }
    if update.modes.alt_screen {
        flags |= FLAG_ALT_SCREEN;
    }
    if update.modes.mouse_tracking {
        flags |= FLAG_MOUSE;
    }
    if update.modes.cursor_key_mode == CursorKeyMode::Application {
        flags |= FLAG_APP_CURSOR;
    }
    if update.modes.in_band_resize {
        flags |= FLAG_IN_BAND_RESIZE;
    }
    if update.scroll.is_at_bottom {
        flags |= FLAG_AT_BOTTOM;
    }
    if update.scroll.is_at_scrollback_limit {
        flags |= FLAG_AT_LIMIT;
    }
    let mut flags2 = 0u8;
    if update.modes.bracketed_paste {
        flags2 |= FLAG2_BRACKETED_PASTE;
    }
    if update.modes.focus_reporting {
        flags2 |= FLAG2_FOCUS_REPORTING;
    }

    let mut buf = Vec::with_capacity(64);
    buf.push(flags);
    buf.push(flags2);
    buf.push(update.modes.kitty_keyboard_flags);
    buf.push(cursor_style_byte(update.cursor.style));
    buf.extend_from_slice(&cols.to_le_bytes());
    buf.extend_from_slice(&rows.to_le_bytes());
    buf.extend_from_slice(&update.cursor.x.to_le_bytes());
    buf.extend_from_slice(&update.cursor.y.to_le_bytes());
    buf.extend_from_slice(&update.scroll.viewport_offset.to_le_bytes());
    buf.extend_from_slice(&update.scroll.scrollback_len.to_le_bytes());

    let rows_to_pack: Vec<(u16, &Row)> = if update.is_full {
        update
            .full
            .as_ref()
            .map(|full| {
                full.row_data
                    .iter()
                    .enumerate()
                    .map(|(y, row)| (y as u16, row))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        update.dirty_rows.iter().map(|(y, row)| (*y, row)).collect()
    };

    buf.extend_from_slice(&(rows_to_pack.len() as u16).to_le_bytes());
    for (y, _) in &rows_to_pack {
        buf.extend_from_slice(&y.to_le_bytes());
    }
    for (_, row) in &rows_to_pack {
        let blob = pack_row(row);
        buf.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        buf.extend_from_slice(&blob);
    }
    buf
}

/// Inverse of [`pack_dirty_update`].
pub fn unpack_dirty_update(bytes: &[u8]) -> Result<DirtyUpdate> {
    let mut r = Reader::new(bytes);
    let flags = r.u8()?;
    let flags2 = r.u8()?;
    let kitty_keyboard_flags = r.u8()?;
    let cursor_style = byte_cursor_style(r.u8()?);
    let cols = r.u16()?;
    let rows = r.u16()?;
    let cursor_x = r.u16()?;
    let cursor_y = r.u16()?;
    let viewport_offset = r.u64()?;
    let scrollback_len = r.u64()?;
    let count = r.u16()? as usize;

    let mut indices = Vec::with_capacity(count);
    for _ in 0..count {
        indices.push(r.u16()?);
    }

    let mut packed_rows = Vec::with_capacity(count);
    for &y in &indices {
        let len = r.u32()? as usize;
        let blob = r.take(len)?;
        if blob.len() % CELL_STRIDE != 0 {
            return Err(Error::BadLength(format!(
                "row {y} blob of {} bytes is not cell-aligned",
                blob.len()
            )));
        }
        let row = unpack_row(blob, blob.len() / CELL_STRIDE)?;
        packed_rows.push((y, row));
    }

    let is_full = flags & FLAG_FULL != 0;
    let cursor = Cursor {
        x: cursor_x,
        y: cursor_y,
        visible: flags & FLAG_CURSOR_VISIBLE != 0,
        style: cursor_style,
    };
    let modes = ModeSnapshot {
        alt_screen: flags & FLAG_ALT_SCREEN != 0,
        mouse_tracking: flags & FLAG_MOUSE != 0,
        cursor_key_mode: if flags & FLAG_APP_CURSOR != 0 {
            CursorKeyMode::Application
        } else {
            CursorKeyMode::Normal
        },
        bracketed_paste: flags2 & FLAG2_BRACKETED_PASTE != 0,
        focus_reporting: flags2 & FLAG2_FOCUS_REPORTING != 0,
        in_band_resize: flags & FLAG_IN_BAND_RESIZE != 0,
        kitty_keyboard_flags,
    };
    let scroll = ScrollState {
        viewport_offset,
        scrollback_len,
        is_at_bottom: flags & FLAG_AT_BOTTOM != 0,
        is_at_scrollback_limit: flags & FLAG_AT_LIMIT != 0,
    };

    let (full, dirty_rows) = if is_full {
        let row_data = packed_rows.into_iter().map(|(_, row)| row).collect();
        (
            Some(TerminalState {
                cols,
                rows,
                row_data,
                cursor,
                modes,
            }),
            Vec::new(),
        )
    } else {
        (None, packed_rows)
    };

    Ok(DirtyUpdate {
        is_full,
        full,
        dirty_rows,
        cursor,
        modes,
        scroll,
    })
}

fn cursor_style_byte(style: CursorStyle) -> u8 {
    match style {
        CursorStyle::Block => 0,
        CursorStyle::Underline => 1,
        CursorStyle::Bar => 2,
    }
}

fn byte_cursor_style(byte: u8) -> CursorStyle {
    match byte {
        1 => CursorStyle::Underline,
        2 => CursorStyle::Bar,
        _ => CursorStyle::Block,
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::BadLength("update blob truncated".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

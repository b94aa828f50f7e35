//! Master-stack rectangle computation.
//!
//! One main pane plus an ordered stack, arranged by layout mode. All
//! arithmetic is integer; where the split ratio leaves a remainder column
//! or row, it attaches to the larger side (the stack when the ratio favors
//! the stack, the main pane otherwise), and uneven stack division gives
//! the remainder to the last pane.

use serde::{Deserialize, Serialize};

/// A pane rectangle in terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Rect {
    pub const fn new(x: u16, y: u16, w: u16, h: u16) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u32 {
        u32::from(self.w) * u32::from(self.h)
    }
}

/// How a workspace arranges its stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Vertical,
    Horizontal,
    Stacked,
}

/// Height of the tab bar the front-end draws above the active pane in
/// stacked mode.
const TAB_BAR_ROWS: u16 = 1;

/// Size of the main pane along the split axis, honoring the remainder
/// tie-break.
fn main_extent(total: u16, ratio: f32) -> u16 {
    let main = if ratio >= 0.5 {
        // Remainder goes to the larger (main) side.
        total - ((f32::from(total)) * (1.0 - ratio)).floor() as u16
    } else {
        ((f32::from(total)) * ratio).floor() as u16
    };
    main.min(total)
}

/// Computed geometry: the main pane's rectangle plus one entry per stack
/// pane (`None` when the pane is hidden in the current mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rects {
    pub main: Option<Rect>,
    pub stack: Vec<Option<Rect>>,
}

/// Compute rectangles for a workspace's panes.
///
/// `zoom_focus` carries the focused pane's position when the workspace is
/// zoomed: `None` for main, `Some(i)` for stack pane `i`. A zoomed
/// workspace gives the focused pane the whole viewport and hides the rest.
pub fn compute(
    viewport: Rect,
    mode: LayoutMode,
    ratio: f32,
    has_main: bool,
    stack_len: usize,
    active_stack_index: usize,
    zoom_focus: Option<Option<usize>>,
) -> Rects {
    let mut rects = Rects {
        main: None,
        stack: vec![None; stack_len],
    };
    if !has_main && stack_len == 0 {
        return rects;
    }

    if let Some(focus) = zoom_focus {
        match focus {
            None if has_main => rects.main = Some(viewport),
            Some(i) => {
                if let Some(slot) = rects.stack.get_mut(i) {
                    *slot = Some(viewport);
                }
            }
            None => {}
        }
        return rects;
    }

    if stack_len == 0 {
        rects.main = Some(viewport);
        return rects;
    }
    if !has_main {
        // No main yet (mid-close): the stack takes the whole viewport.
        split_stack(&mut rects.stack, viewport, mode, active_stack_index);
        return rects;
    }

    match mode {
        LayoutMode::Vertical | LayoutMode::Stacked => {
            let main_w = main_extent(viewport.w, ratio);
            rects.main = Some(Rect::new(viewport.x, viewport.y, main_w, viewport.h));
            let stack_area = Rect::new(
                viewport.x + main_w,
                viewport.y,
                viewport.w - main_w,
                viewport.h,
            );
            if mode == LayoutMode::Stacked {
                stacked_stack(&mut rects.stack, stack_area, active_stack_index);
            } else {
                vertical_stack(&mut rects.stack, stack_area);
            }
        }
        LayoutMode::Horizontal => {
            let main_h = main_extent(viewport.h, ratio);
            rects.main = Some(Rect::new(viewport.x, viewport.y, viewport.w, main_h));
            let stack_area = Rect::new(
                viewport.x,
                viewport.y + main_h,
                viewport.w,
                viewport.h - main_h,
            );
            horizontal_stack(&mut rects.stack, stack_area);
        }
    }
    rects
}

fn split_stack(slots: &mut [Option<Rect>], area: Rect, mode: LayoutMode, active: usize) {
    match mode {
        LayoutMode::Vertical => vertical_stack(slots, area),
        LayoutMode::Horizontal => horizontal_stack(slots, area),
        LayoutMode::Stacked => stacked_stack(slots, area, active),
    }
}

/// Stack panes share the area as equal rows; the remainder goes to the
/// last pane.
fn vertical_stack(slots: &mut [Option<Rect>], area: Rect) {
    let n = slots.len() as u16;
    if n == 0 || area.w == 0 || area.h == 0 {
        return;
    }
    let each = area.h / n;
    let mut y = area.y;
    for (i, slot) in slots.iter_mut().enumerate() {
        let h = if i as u16 == n - 1 {
            area.y + area.h - y
        } else {
            each
        };
        *slot = Some(Rect::new(area.x, y, area.w, h));
        y += h;
    }
}

/// Stack panes share the area as equal columns; the remainder goes to the
/// last pane.
fn horizontal_stack(slots: &mut [Option<Rect>], area: Rect) {
    let n = slots.len() as u16;
    if n == 0 || area.w == 0 || area.h == 0 {
        return;
    }
    let each = area.w / n;
    let mut x = area.x;
    for (i, slot) in slots.iter_mut().enumerate() {
        let w = if i as u16 == n - 1 {
            area.x + area.w - x
        } else {
            each
        };
        *slot = Some(Rect::new(x, area.y, w, area.h));
        x += w;
    }
}

/// Only the active stack pane is visible, below a one-row tab bar.
fn stacked_stack(slots: &mut [Option<Rect>], area: Rect, active: usize) {
    if area.w == 0 || area.h <= TAB_BAR_ROWS {
        return;
    }
    if let Some(slot) = slots.get_mut(active) {
        *slot = Some(Rect::new(
            area.x,
            area.y + TAB_BAR_ROWS,
            area.w,
            area.h - TAB_BAR_ROWS,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: Rect = Rect::new(0, 0, 100, 30);

    #[test]
    fn lone_main_fills_the_viewport() {
        let rects = compute(VIEWPORT, LayoutMode::Vertical, 0.5, true, 0, 0, None);
        assert_eq!(rects.main, Some(VIEWPORT));
    }

    #[test]
    fn vertical_half_split_with_three_stack_panes() {
        let rects = compute(VIEWPORT, LayoutMode::Vertical, 0.5, true, 3, 0, None);
        assert_eq!(rects.main, Some(Rect::new(0, 0, 50, 30)));
        assert_eq!(rects.stack[0], Some(Rect::new(50, 0, 50, 10)));
        assert_eq!(rects.stack[1], Some(Rect::new(50, 10, 50, 10)));
        assert_eq!(rects.stack[2], Some(Rect::new(50, 20, 50, 10)));
    }

    #[test]
    fn remainder_attaches_to_the_larger_side() {
        // 101 wide at ratio 0.5: main is the larger side and gets 51.
        let viewport = Rect::new(0, 0, 101, 30);
        let rects = compute(viewport, LayoutMode::Vertical, 0.5, true, 1, 0, None);
        assert_eq!(rects.main.unwrap().w, 51);
        assert_eq!(rects.stack[0].unwrap().w, 50);

        // At ratio 0.3 the stack is larger and keeps the remainder.
        let rects = compute(viewport, LayoutMode::Vertical, 0.3, true, 1, 0, None);
        assert_eq!(rects.main.unwrap().w, 30);
        assert_eq!(rects.stack[0].unwrap().w, 71);
    }

    #[test]
    fn uneven_stack_division_gives_remainder_to_last() {
        let viewport = Rect::new(0, 0, 100, 31);
        let rects = compute(viewport, LayoutMode::Vertical, 0.5, true, 3, 0, None);
        let heights: Vec<u16> = rects.stack.iter().map(|r| r.unwrap().h).collect();
        assert_eq!(heights, vec![10, 10, 11]);
    }

    #[test]
    fn horizontal_mode_stacks_along_the_bottom() {
        let rects = compute(VIEWPORT, LayoutMode::Horizontal, 0.5, true, 2, 0, None);
        assert_eq!(rects.main, Some(Rect::new(0, 0, 100, 15)));
        assert_eq!(rects.stack[0], Some(Rect::new(0, 15, 50, 15)));
        assert_eq!(rects.stack[1], Some(Rect::new(50, 15, 50, 15)));
    }

    #[test]
    fn stacked_mode_shows_only_the_active_pane_under_a_tab_bar() {
        let rects = compute(VIEWPORT, LayoutMode::Stacked, 0.5, true, 3, 1, None);
        assert_eq!(rects.main, Some(Rect::new(0, 0, 50, 30)));
        assert_eq!(rects.stack[0], None);
        assert_eq!(rects.stack[1], Some(Rect::new(50, 1, 50, 29)));
        assert_eq!(rects.stack[2], None);
    }

    #[test]
    fn zoomed_focus_takes_everything() {
        let rects = compute(VIEWPORT, LayoutMode::Vertical, 0.5, true, 2, 0, Some(Some(1)));
        assert_eq!(rects.main, None);
        assert_eq!(rects.stack[0], None);
        assert_eq!(rects.stack[1], Some(VIEWPORT));

        let rects = compute(VIEWPORT, LayoutMode::Vertical, 0.5, true, 2, 0, Some(None));
        assert_eq!(rects.main, Some(VIEWPORT));
        assert_eq!(rects.stack, vec![None, None]);
    }

    #[test]
    fn non_stacked_geometry_tiles_the_viewport_exactly() {
        for mode in [LayoutMode::Vertical, LayoutMode::Horizontal] {
            for stack_len in 0..5 {
                let rects = compute(VIEWPORT, mode, 0.5, true, stack_len, 0, None);
                let mut area: u32 = rects.main.map(|r| r.area()).unwrap_or(0);
                for rect in rects.stack.iter().flatten() {
                    area += rect.area();
                    // No pane leaks outside the viewport.
                    assert!(rect.x + rect.w <= VIEWPORT.x + VIEWPORT.w);
                    assert!(rect.y + rect.h <= VIEWPORT.y + VIEWPORT.h);
                }
                assert_eq!(area, VIEWPORT.area(), "mode {mode:?} stack {stack_len}");
            }
        }
    }
}

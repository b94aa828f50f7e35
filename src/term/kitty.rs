//! Kitty protocol state: the keyboard-enhancement flag stacks and the
//! graphics placement ledger.
//!
//! Graphics commands travel in APC strings (`ESC _ G ... ESC \`) which the
//! VT parser ignores, so the emulator scans raw bytes for them before
//! parsing. The engine does not decode image data; it records placements,
//! answers queries, and leaves pixel work to the front-end image broker.

use std::collections::HashMap;

/// Kitty keyboard-enhancement flag stacks, one per screen. Pushes and pops
/// act on the active screen's stack; toggling the alternate screen swaps
/// the stacks so each screen keeps its own enhancement state.
#[derive(Debug, Default)]
pub struct KittyKeyboardStack {
    active: Vec<u8>,
    inactive: Vec<u8>,
}

impl KittyKeyboardStack {
    /// Flags currently in effect (top of the active stack).
    pub fn flags(&self) -> u8 {
        self.active.last().copied().unwrap_or(0)
    }

    /// `CSI > flags u`.
    pub fn push(&mut self, flags: u8) {
        self.active.push(flags);
    }

    /// `CSI < n u`.
    pub fn pop(&mut self, n: usize) {
        for _ in 0..n {
            if self.active.pop().is_none() {
                break;
            }
        }
    }

    /// `CSI = flags ; mode u`: 1 replaces, 2 sets bits, 3 clears bits.
    pub fn set(&mut self, flags: u8, mode: u16) {
        if self.active.is_empty() {
            self.active.push(0);
        }
        let top = self.active.last_mut().unwrap();
        match mode {
            2 => *top |= flags,
            3 => *top &= !flags,
            _ => *top = flags,
        }
    }

    pub fn swap_screen(&mut self) {
        std::mem::swap(&mut self.active, &mut self.inactive);
    }
}

/// One recorded graphics placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub image_id: u32,
    pub placement_id: u32,
    /// Screen active when the placement was created.
    pub on_alt_screen: bool,
}

/// Graphics command ledger and APC scanner.
#[derive(Debug, Default)]
pub struct KittyGraphics {
    placements: Vec<Placement>,
    /// Transmitted image ids we have acknowledged.
    images: HashMap<u32, ()>,
    /// Partial APC sequence carried between scan calls.
    carry: Vec<u8>,
}

const APC_START: &[u8] = b"\x1b_G";
const ST: &[u8] = b"\x1b\\";

/// True when the buffer contains a kitty graphics query (`q=` control key)
/// that expects an answer. Sync-mode buffering flushes on these.
pub fn contains_kitty_query(data: &[u8]) -> bool {
    let mut rest = data;
    while let Some(start) = find(rest, APC_START) {
        let body = &rest[start + APC_START.len()..];
        let end = find(body, ST).unwrap_or(body.len());
        let control = &body[..end];
        let control = control.split(|&b| b == b';').next().unwrap_or(control);
        if control_has_query(control) {
            return true;
        }
        rest = &body[end.min(body.len())..];
        if rest.is_empty() {
            break;
        }
    }
    false
}

fn control_has_query(control: &[u8]) -> bool {
    control
        .split(|&b| b == b',')
        .any(|kv| kv.starts_with(b"q=") || kv == b"a=q")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl KittyGraphics {
    /// Scan a raw output chunk for APC graphics commands, recording state
    /// and returning the responses owed to the child, in order. Partial
    /// sequences are carried to the next call.
    pub fn scan(&mut self, data: &[u8], on_alt_screen: bool) -> Vec<Vec<u8>> {
        let mut responses = Vec::new();
        let mut buf;
        let data = if self.carry.is_empty() {
            data
        } else {
            buf = std::mem::take(&mut self.carry);
            buf.extend_from_slice(data);
            &buf[..]
        };

        let mut rest = data;
        while let Some(start) = find(rest, APC_START) {
            let body = &rest[start + APC_START.len()..];
            match find(body, ST) {
                Some(end) => {
                    if let Some(reply) = self.handle_command(&body[..end], on_alt_screen) {
                        responses.push(reply);
                    }
                    rest = &body[end + ST.len()..];
                }
                None => {
                    // Unterminated command: keep from the APC start.
                    self.carry = rest[start..].to_vec();
                    return responses;
                }
            }
        }
        responses
    }

    fn handle_command(&mut self, payload: &[u8], on_alt_screen: bool) -> Option<Vec<u8>> {
        let control = payload.split(|&b| b == b';').next().unwrap_or(payload);
        let mut action = b't';
        let mut image_id = 0u32;
        let mut placement_id = 0u32;
        let mut quiet = 0u32;
        let mut delete_target = b'a';
        let mut more_chunks = false;

        for kv in control.split(|&b| b == b',') {
            let mut parts = kv.splitn(2, |&b| b == b'=');
            let key = parts.next().unwrap_or(b"");
            let value = parts.next().unwrap_or(b"");
            match key {
                b"a" => action = value.first().copied().unwrap_or(b't'),
                b"i" => image_id = ascii_u32(value),
                b"p" => placement_id = ascii_u32(value),
                b"q" => quiet = ascii_u32(value),
                b"d" => delete_target = value.first().copied().unwrap_or(b'a'),
                b"m" => more_chunks = ascii_u32(value) == 1,
                _ => {}
            }
        }

        match action {
            b't' | b'T' | b'p' | b'f' => {
                if action != b'p' {
                    self.images.insert(image_id, ());
                }
                if action != b't' && image_id != 0 {
                    self.placements.push(Placement {
                        image_id,
                        placement_id,
                        on_alt_screen,
                    });
                }
                // Every chunk except continuations gets an OK unless the
                // client asked for quiet.
                if image_id != 0 && quiet == 0 && !more_chunks {
                    return Some(format!("\x1b_Gi={image_id};OK\x1b\\").into_bytes());
                }
                None
            }
            b'q' => {
                if image_id != 0 && quiet < 2 {
                    return Some(format!("\x1b_Gi={image_id};OK\x1b\\").into_bytes());
                }
                None
            }
            b'd' => {
                match delete_target {
                    b'a' | b'A' => self.placements.clear(),
                    b'i' | b'I' => self
                        .placements
                        .retain(|p| p.image_id != image_id || (placement_id != 0 && p.placement_id != placement_id)),
                    _ => {}
                }
                None
            }
            _ => None,
        }
    }

    /// Placements created while the given screen was active.
    pub fn placements_for(&self, on_alt_screen: bool) -> Vec<&Placement> {
        self.placements
            .iter()
            .filter(|p| p.on_alt_screen == on_alt_screen)
            .collect()
    }

    pub fn clear(&mut self) {
        self.placements.clear();
        self.images.clear();
        self.carry.clear();
    }
}

fn ascii_u32(bytes: &[u8]) -> u32 {
    let mut value = 0u32;
    for &b in bytes {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add(u32::from(b - b'0'));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_stack_tracks_push_pop() {
        let mut stack = KittyKeyboardStack::default();
        assert_eq!(stack.flags(), 0);
        stack.push(0b1);
        stack.push(0b101);
        assert_eq!(stack.flags(), 0b101);
        stack.pop(1);
        assert_eq!(stack.flags(), 0b1);
        stack.pop(5);
        assert_eq!(stack.flags(), 0);
    }

    #[test]
    fn keyboard_set_modes_replace_or_mask() {
        let mut stack = KittyKeyboardStack::default();
        stack.set(0b11, 1);
        assert_eq!(stack.flags(), 0b11);
        stack.set(0b100, 2);
        assert_eq!(stack.flags(), 0b111);
        stack.set(0b010, 3);
        assert_eq!(stack.flags(), 0b101);
    }

    #[test]
    fn keyboard_stacks_swap_with_screen() {
        let mut stack = KittyKeyboardStack::default();
        stack.push(7);
        stack.swap_screen();
        assert_eq!(stack.flags(), 0);
        stack.swap_screen();
        assert_eq!(stack.flags(), 7);
    }

    #[test]
    fn transmit_and_display_records_placement_and_acks() {
        let mut gfx = KittyGraphics::default();
        let replies = gfx.scan(b"\x1b_Ga=T,i=31,f=100;AAAA\x1b\\", false);
        assert_eq!(replies, vec![b"\x1b_Gi=31;OK\x1b\\".to_vec()]);
        assert_eq!(gfx.placements_for(false).len(), 1);
        assert!(gfx.placements_for(true).is_empty());
    }

    #[test]
    fn quiet_commands_get_no_reply() {
        let mut gfx = KittyGraphics::default();
        let replies = gfx.scan(b"\x1b_Ga=t,i=5,q=2;AAAA\x1b\\", false);
        assert!(replies.is_empty());
    }

    #[test]
    fn partial_sequence_carries_across_chunks() {
        let mut gfx = KittyGraphics::default();
        let replies = gfx.scan(b"before\x1b_Ga=T,i=9;AA", false);
        assert!(replies.is_empty());
        let replies = gfx.scan(b"AA\x1b\\after", false);
        assert_eq!(replies, vec![b"\x1b_Gi=9;OK\x1b\\".to_vec()]);
    }

    #[test]
    fn placements_are_tagged_with_the_creating_screen() {
        let mut gfx = KittyGraphics::default();
        gfx.scan(b"\x1b_Ga=T,i=1,q=1;A\x1b\\", false);
        gfx.scan(b"\x1b_Ga=T,i=2,q=1;A\x1b\\", true);
        assert_eq!(gfx.placements_for(false).len(), 1);
        assert_eq!(gfx.placements_for(true).len(), 1);
        assert_eq!(gfx.placements_for(true)[0].image_id, 2);
    }

    #[test]
    fn delete_all_clears_placements() {
        let mut gfx = KittyGraphics::default();
        gfx.scan(b"\x1b_Ga=T,i=1,q=1;A\x1b\\", false);
        gfx.scan(b"\x1b_Ga=d\x1b\\", false);
        assert!(gfx.placements_for(false).is_empty());
    }

    #[test]
    fn query_detection_sees_q_key_only_in_graphics_apc() {
        assert!(contains_kitty_query(b"text\x1b_Gi=1,s=1,v=1,q=1;AA\x1b\\"));
        assert!(contains_kitty_query(b"\x1b_Ga=q,i=3\x1b\\"));
        assert!(!contains_kitty_query(b"\x1b_Ga=T,i=3;data\x1b\\"));
        assert!(!contains_kitty_query(b"plain q= text"));
    }
}

//! DECSET 2026 synchronized-output buffering.
//!
//! Between the begin marker (`CSI ? 2026 h`) and the end marker
//! (`CSI ? 2026 l`) child output is held so subscribers never observe a
//! half-drawn frame. The hold ends on the end marker, after a timeout, or
//! immediately when a kitty graphics query shows up inside the window
//! (the child is blocked waiting for the reply).
//!
//! Markers split across read chunks are handled by carrying the longest
//! trailing prefix of a marker to the next feed.

use std::time::{Duration, Instant};

use crate::term::kitty::contains_kitty_query;

const BEGIN: &[u8] = b"\x1b[?2026h";
const END: &[u8] = b"\x1b[?2026l";

enum State {
    Idle,
    Buffering { since: Instant, buf: Vec<u8> },
}

pub struct SyncModeParser {
    state: State,
    timeout: Duration,
    carry: Vec<u8>,
    carry_since: Option<Instant>,
}

impl SyncModeParser {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: State::Idle,
            timeout,
            carry: Vec::new(),
            carry_since: None,
        }
    }

    pub fn is_buffering(&self) -> bool {
        matches!(self.state, State::Buffering { .. })
    }

    /// Feed a chunk of child output; returns the bytes releasable now.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Vec<u8> {
        let mut input = std::mem::take(&mut self.carry);
        self.carry_since = None;
        input.extend_from_slice(data);

        let mut out = Vec::new();
        let mut pos = 0;

        while pos < input.len() {
            match &mut self.state {
                State::Idle => match find(&input[pos..], BEGIN) {
                    Some(i) => {
                        let marker_end = pos + i + BEGIN.len();
                        // The marker itself flows through so the emulator's
                        // mode state stays truthful.
                        out.extend_from_slice(&input[pos..marker_end]);
                        pos = marker_end;
                        self.state = State::Buffering {
                            since: now,
                            buf: Vec::new(),
                        };
                    }
                    None => {
                        let hold = marker_prefix_len(&input[pos..]);
                        let release_end = input.len() - hold;
                        out.extend_from_slice(&input[pos..release_end]);
                        if hold > 0 {
                            self.carry = input[release_end..].to_vec();
                            self.carry_since = Some(now);
                        }
                        pos = input.len();
                    }
                },
                State::Buffering { buf, .. } => match find(&input[pos..], END) {
                    Some(i) => {
                        let marker_end = pos + i + END.len();
                        buf.extend_from_slice(&input[pos..marker_end]);
                        out.append(buf);
                        self.state = State::Idle;
                        pos = marker_end;
                    }
                    None => {
                        let hold = marker_prefix_len(&input[pos..]);
                        let release_end = input.len() - hold;
                        buf.extend_from_slice(&input[pos..release_end]);
                        if hold > 0 {
                            self.carry = input[release_end..].to_vec();
                            self.carry_since = Some(now);
                        }
                        // A kitty query inside the window must not wait for
                        // the frame to finish.
                        if contains_kitty_query(buf) {
                            out.append(buf);
                        }
                        pos = input.len();
                    }
                },
            }
        }
        out
    }

    /// Release held bytes whose window expired. Call on every tick.
    pub fn poll(&mut self, now: Instant) -> Vec<u8> {
        let mut out = Vec::new();
        if let State::Buffering { since, buf } = &mut self.state {
            if now.duration_since(*since) >= self.timeout {
                out.append(buf);
                self.state = State::Idle;
            }
        }
        if let Some(since) = self.carry_since {
            if now.duration_since(since) >= self.timeout {
                out.extend_from_slice(&self.carry);
                self.carry.clear();
                self.carry_since = None;
            }
        }
        out
    }
}

/// Longest suffix of `data` that is a proper prefix of a sync marker.
fn marker_prefix_len(data: &[u8]) -> usize {
    // Both markers share every byte except the last, so prefixes of BEGIN
    // cover both.
    let max = (BEGIN.len() - 1).min(data.len());
    for len in (1..=max).rev() {
        if data[data.len() - len..] == BEGIN[..len] {
            return len;
        }
    }
    0
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

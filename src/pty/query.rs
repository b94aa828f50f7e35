//! Interception of device queries the host must answer.
//!
//! Child applications probe their terminal with DA1 (`CSI c`), DA2
//! (`CSI > c`), and XTVERSION (`CSI > q`). Those questions are about the
//! hosting terminal, not the emulated pane, so they are answered here and
//! stripped from the stream before the emulator sees them. Everything
//! else passes through untouched.

const CARRY_LIMIT: usize = 64;

/// Result of scanning one chunk.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Bytes for the emulator, with answered queries removed.
    pub text: Vec<u8>,
    /// Replies owed to the child, in stream order.
    pub responses: Vec<Vec<u8>>,
}

/// Incremental scanner with carry for sequences split across reads.
#[derive(Default)]
pub struct QueryPassthrough {
    carry: Vec<u8>,
}

const DA1_REPLY: &[u8] = b"\x1b[?62;22c";
const DA2_REPLY: &[u8] = b"\x1b[>1;10;0c";

fn xtversion_reply() -> Vec<u8> {
    format!("\x1bP>|openmux {}\x1b\\", env!("CARGO_PKG_VERSION")).into_bytes()
}

impl QueryPassthrough {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) -> ScanOutcome {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(data);

        let mut outcome = ScanOutcome::default();
        let mut pos = 0;

        while pos < input.len() {
            let Some(esc) = input[pos..].iter().position(|&b| b == 0x1b) else {
                outcome.text.extend_from_slice(&input[pos..]);
                break;
            };
            let esc = pos + esc;
            outcome.text.extend_from_slice(&input[pos..esc]);

            match classify(&input[esc..]) {
                Classification::Query(len, reply) => {
                    outcome.responses.push(reply);
                    pos = esc + len;
                }
                Classification::NotAQuery(len) => {
                    outcome.text.extend_from_slice(&input[esc..esc + len]);
                    pos = esc + len;
                }
                Classification::Incomplete => {
                    let tail = &input[esc..];
                    if tail.len() > CARRY_LIMIT {
                        // Too long to be one of ours; give up and pass it on.
                        outcome.text.extend_from_slice(tail);
                    } else {
                        self.carry = tail.to_vec();
                    }
                    pos = input.len();
                }
            }
        }
        outcome
    }

    /// Release any held partial sequence as plain text (stream ended).
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.carry)
    }
}

enum Classification {
    /// A query we answer: consumed length and the reply.
    Query(usize, Vec<u8>),
    /// An escape sequence (or lone ESC) that is not ours; forward `len`
    /// bytes.
    NotAQuery(usize),
    /// Sequence continues past the end of the buffer.
    Incomplete,
}

/// Classify the escape sequence starting at `data[0] == ESC`.
fn classify(data: &[u8]) -> Classification {
    if data.len() < 2 {
        return Classification::Incomplete;
    }
    if data[1] != b'[' {
        // Only CSI sequences can be our queries; anything else moves on.
        return Classification::NotAQuery(1);
    }

    // Walk the CSI body: parameters and intermediates, then a final byte.
    let mut i = 2;
    while i < data.len() {
        let b = data[i];
        match b {
            0x30..=0x3f | 0x20..=0x2f => i += 1,
            0x40..=0x7e => {
                let body = &data[2..i];
                let len = i + 1;
                return match (b, body) {
                    (b'c', b"" | b"0") => Classification::Query(len, DA1_REPLY.to_vec()),
                    (b'c', b">" | b">0") => Classification::Query(len, DA2_REPLY.to_vec()),
                    (b'q', b">" | b">0") => Classification::Query(len, xtversion_reply()),
                    _ => Classification::NotAQuery(len),
                };
            }
            _ => return Classification::NotAQuery(i),
        }
    }
    Classification::Incomplete
}

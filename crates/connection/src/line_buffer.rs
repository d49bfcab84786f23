//! Bounded reassembly of newline-terminated lines.

/// Result of feeding bytes into a [`LineBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutput {
    /// A complete line, terminator and trailing `\r` removed.
    Line(String),
    /// The current line grew past capacity; `discarded` bytes were dropped.
    Overflow { discarded: usize },
}

/// Accumulates bytes of the in-progress line.
///
/// The accumulated length never exceeds `capacity`; a trailing `\r` is held
/// aside and does not count. When a line would grow
/// past it, the buffer reports one [`LineOutput::Overflow`], empties itself
/// and ignores the rest of that line up to its terminator, so an endless
/// unterminated stream yields a single overflow, not one per read.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    capacity: usize,
    discarding: bool,
    pending_cr: bool,
    high_watermark: usize,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity: capacity.max(1),
            discarding: false,
            pending_cr: false,
            high_watermark: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held for the in-progress line.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Largest in-progress line seen so far.
    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    /// True while the remainder of an overflowed line is being skipped.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Drops any partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
        self.pending_cr = false;
    }

    /// Feeds raw bytes and returns completed lines and overflow reports in
    /// arrival order.
    pub fn push(&mut self, data: &[u8]) -> Vec<LineOutput> {
        let mut out = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            match rest.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.append(&rest[..pos], &mut out);
                    if self.discarding {
                        self.discarding = false;
                    } else {
                        out.push(LineOutput::Line(self.take_line()));
                    }
                    rest = &rest[pos + 1..];
                }
                None => {
                    self.append(rest, &mut out);
                    rest = &[];
                }
            }
        }
        out
    }

    fn append(&mut self, segment: &[u8], out: &mut Vec<LineOutput>) {
        if self.discarding || segment.is_empty() {
            return;
        }
        let (body, cr) = match segment.split_last() {
            Some((b'\r', body)) => (body, true),
            _ => (segment, false),
        };
        let len = self.buf.len() + usize::from(self.pending_cr) + body.len();
        if len > self.capacity {
            out.push(LineOutput::Overflow {
                discarded: len + usize::from(cr),
            });
            self.buf.clear();
            self.pending_cr = false;
            self.discarding = true;
            return;
        }
        if self.pending_cr {
            self.buf.push(b'\r');
        }
        self.buf.extend_from_slice(body);
        self.pending_cr = cr;
        self.high_watermark = self.high_watermark.max(len);
    }

    fn take_line(&mut self) -> String {
        self.pending_cr = false;
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

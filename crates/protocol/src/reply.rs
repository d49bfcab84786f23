//! Classification of lines received from the board.

use crate::constants::{
    CTRL_D, FRIENDLY_BANNER, RAW_MODE_BANNER, STATEMENT_ACCEPTED, TRACEBACK_HEADER,
};

/// Acknowledgement tag printed by a [`Statement`](crate::Statement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// `:d 1` / `:d 0`
    Dir { created: bool },
    /// `:o`
    Opened,
    /// `:w <offset> <count>`
    Wrote { offset: u64, count: u64 },
    /// `:c`
    Closed,
}

impl Ack {
    /// Parses a normalized line into an acknowledgement.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let ack = match parts.next()? {
            ":o" => Self::Opened,
            ":c" => Self::Closed,
            ":d" => match parts.next()? {
                "1" => Self::Dir { created: true },
                "0" => Self::Dir { created: false },
                _ => return None,
            },
            ":w" => Self::Wrote {
                offset: parts.next()?.parse().ok()?,
                count: parts.next()?.parse().ok()?,
            },
            _ => return None,
        };
        parts.next().is_none().then_some(ack)
    }
}

/// What a received line means to the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// The board entered raw mode.
    RawMode,
    /// The board is back at the friendly prompt.
    Friendly,
    /// A statement acknowledged its work.
    Ack(Ack),
    /// A statement raised; carries the exception line, e.g. `OSError: 30`.
    DeviceError(String),
}

/// Strips raw-mode framing residue from a received line.
///
/// The board frames each statement result as `OK<stdout>\x04<stderr>\x04>`,
/// and the trailing `\x04>` never ends in a newline, so it shows up at the
/// start of the next line instead.
///
/// Statements whose output had no newline leave several such frames
/// stacked in front of one line; all of them are removed.
pub fn normalize(line: &str) -> &str {
    let ctrl_d = CTRL_D as char;
    let mut line = line;
    loop {
        let stripped = line.trim_start_matches(|c: char| c == ctrl_d || c == '>');
        let stripped = stripped.strip_prefix(STATEMENT_ACCEPTED).unwrap_or(stripped);
        if stripped.len() == line.len() {
            return line.trim_end();
        }
        line = stripped;
    }
}

/// Stateful line classifier.
///
/// Tracks tracebacks across lines: the header is followed by indented
/// frames and then the unindented exception line.
#[derive(Debug, Default)]
pub struct ReplyParser {
    in_traceback: bool,
}

impl ReplyParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets any partially seen traceback.
    pub fn reset(&mut self) {
        self.in_traceback = false;
    }

    /// Feeds one received line; returns an event if the line completes one.
    pub fn feed(&mut self, raw_line: &str) -> Option<ReplyEvent> {
        let line = normalize(raw_line);
        if line.is_empty() {
            return None;
        }

        if self.in_traceback {
            if line.starts_with(char::is_whitespace) {
                return None;
            }
            self.in_traceback = false;
            return Some(ReplyEvent::DeviceError(line.to_string()));
        }

        if line.starts_with(TRACEBACK_HEADER) {
            self.in_traceback = true;
            return None;
        }
        if line.contains(RAW_MODE_BANNER) {
            return Some(ReplyEvent::RawMode);
        }
        if line.contains(FRIENDLY_BANNER) {
            return Some(ReplyEvent::Friendly);
        }
        Ack::parse(line).map(ReplyEvent::Ack)
    }
}

//! Python source "smashing": removing blank lines and comments to shrink
//! what has to be pushed over a slow serial link.
//!
//! The scanner tracks string literals across lines (single, double and
//! triple quoted, with escapes), so a `#` inside a string is never taken
//! for a comment and lines inside a multi-line string are left untouched.
//! Line terminators of the kept lines are preserved as found.

use std::fmt;

/// How aggressively to strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SmashLevel {
    /// Leave the text unchanged.
    Off,
    /// Remove blank lines and trailing whitespace.
    BlankLines,
    /// Also remove lines that only hold a comment.
    #[default]
    FullLineComments,
    /// Also remove comments trailing code.
    InlineComments,
}

/// Error returned for a numeric level outside `0..=3`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("smash level must be 0-3, got {0}")]
pub struct InvalidLevel(pub u8);

impl TryFrom<u8> for SmashLevel {
    type Error = InvalidLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::BlankLines),
            2 => Ok(Self::FullLineComments),
            3 => Ok(Self::InlineComments),
            other => Err(InvalidLevel(other)),
        }
    }
}

impl From<SmashLevel> for u8 {
    fn from(level: SmashLevel) -> u8 {
        level as u8
    }
}

impl fmt::Display for SmashLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Applies `level` to `text`.
///
/// Idempotent: `transform(&transform(x, l), l) == transform(x, l)`.
pub fn transform(text: &str, level: SmashLevel) -> String {
    if level == SmashLevel::Off {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut lexer = Lexer::default();

    for raw in text.split_inclusive('\n') {
        let (content, terminator) = split_terminator(raw);
        let starts_in_string = lexer.in_string();
        let scan = lexer.scan(content);

        if !starts_in_string {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                continue;
            }
            if level >= SmashLevel::FullLineComments && trimmed.starts_with('#') {
                continue;
            }
        }

        let mut kept = content;
        if level >= SmashLevel::InlineComments {
            if let Some(pos) = scan.comment {
                kept = &kept[..pos];
            }
        }
        if !lexer.in_string() {
            kept = kept.trim_end();
        }

        out.push_str(kept);
        out.push_str(terminator);
    }
    out
}

fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(content) = line.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = line.strip_suffix('\n') {
        (content, "\n")
    } else {
        (line, "")
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StringState {
    quote: u8,
    triple: bool,
}

#[derive(Debug, Default)]
struct Lexer {
    string: Option<StringState>,
}

struct LineScan {
    /// Byte offset of a `#` that starts a comment outside any string.
    comment: Option<usize>,
}

impl Lexer {
    fn in_string(&self) -> bool {
        self.string.is_some()
    }

    /// Scans one line's content (no terminator), updating the string state
    /// carried to the next line.
    fn scan(&mut self, content: &str) -> LineScan {
        let bytes = content.as_bytes();
        let mut i = 0;
        let mut escape_at_end = false;

        while i < bytes.len() {
            let b = bytes[i];
            match self.string {
                None => match b {
                    b'#' => return LineScan { comment: Some(i) },
                    b'\'' | b'"' => {
                        let triple = bytes.get(i + 1) == Some(&b) && bytes.get(i + 2) == Some(&b);
                        self.string = Some(StringState { quote: b, triple });
                        i += if triple { 3 } else { 1 };
                    }
                    _ => i += 1,
                },
                Some(state) => {
                    if b == b'\\' {
                        // An escaped character never closes the string, in
                        // raw strings too.
                        if i + 1 >= bytes.len() {
                            escape_at_end = true;
                        }
                        i += 2;
                    } else if b == state.quote {
                        if !state.triple {
                            self.string = None;
                            i += 1;
                        } else if bytes.get(i + 1) == Some(&b) && bytes.get(i + 2) == Some(&b) {
                            self.string = None;
                            i += 3;
                        } else {
                            i += 1;
                        }
                    } else {
                        i += 1;
                    }
                }
            }
        }

        // A single-quoted string only continues past the line end through a
        // trailing backslash; anything else is unterminated and ends here.
        if let Some(state) = self.string {
            if !state.triple && !escape_at_end {
                self.string = None;
            }
        }
        LineScan { comment: None }
    }
}

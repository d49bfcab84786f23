//! Python literal encoding for payloads and remote paths.
//!
//! Payload bytes travel as `b'...'` literals so any binary content survives
//! the line-oriented REPL. Only printable ASCII is sent verbatim.

use std::fmt::Write;

/// Error returned when a literal cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiteralError {
    #[error("literal is not quoted: {0}")]
    Unquoted(String),

    #[error("unterminated escape at byte {0}")]
    UnterminatedEscape(usize),

    #[error("invalid escape `\\{0}`")]
    InvalidEscape(char),

    #[error("unescaped quote at byte {0}")]
    StrayQuote(usize),

    #[error("string literal is not valid UTF-8")]
    Utf8,
}

/// Encodes `data` as a Python bytes literal.
pub fn bytes_literal(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() + 3);
    out.push_str("b'");
    for &b in data {
        push_escaped(&mut out, b);
    }
    out.push('\'');
    out
}

/// Encodes `text` as a single-quoted Python string literal.
///
/// Non-ASCII characters are kept as-is; the board parses UTF-8 source.
pub fn str_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        if ch.is_ascii() {
            push_escaped(&mut out, ch as u8);
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

fn push_escaped(out: &mut String, b: u8) {
    match b {
        b'\\' => out.push_str("\\\\"),
        b'\'' => out.push_str("\\'"),
        b'\n' => out.push_str("\\n"),
        b'\r' => out.push_str("\\r"),
        b'\t' => out.push_str("\\t"),
        0x20..=0x7e => out.push(b as char),
        _ => {
            let _ = write!(out, "\\x{b:02x}");
        }
    }
}

/// Decodes a `b'...'` literal produced by [`bytes_literal`].
pub fn decode_bytes_literal(literal: &str) -> Result<Vec<u8>, LiteralError> {
    let body = literal
        .strip_prefix("b'")
        .and_then(|s| s.strip_suffix('\''))
        .ok_or_else(|| LiteralError::Unquoted(literal.to_string()))?;
    unescape(body)
}

/// Decodes a `'...'` literal produced by [`str_literal`].
pub fn decode_str_literal(literal: &str) -> Result<String, LiteralError> {
    let body = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .ok_or_else(|| LiteralError::Unquoted(literal.to_string()))?;
    String::from_utf8(unescape(body)?).map_err(|_| LiteralError::Utf8)
}

fn unescape(body: &str) -> Result<Vec<u8>, LiteralError> {
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let esc = *bytes
                    .get(i + 1)
                    .ok_or(LiteralError::UnterminatedEscape(i))?;
                match esc {
                    b'\\' => out.push(b'\\'),
                    b'\'' => out.push(b'\''),
                    b'"' => out.push(b'"'),
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'0' => out.push(0),
                    b'x' => {
                        let hex = body
                            .get(i + 2..i + 4)
                            .ok_or(LiteralError::UnterminatedEscape(i))?;
                        let value = u8::from_str_radix(hex, 16)
                            .map_err(|_| LiteralError::InvalidEscape('x'))?;
                        out.push(value);
                        i += 2;
                    }
                    other => return Err(LiteralError::InvalidEscape(other as char)),
                }
                i += 2;
            }
            b'\'' => return Err(LiteralError::StrayQuote(i)),
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_ascii_is_verbatim() {
        assert_eq!(bytes_literal(b"print(1)"), "b'print(1)'");
    }

    #[test]
    fn quotes_and_backslashes_are_escaped() {
        assert_eq!(bytes_literal(b"it's a\\b"), "b'it\\'s a\\\\b'");
    }

    #[test]
    fn control_and_high_bytes_use_hex() {
        assert_eq!(bytes_literal(&[0x00, 0x7f, 0xff]), "b'\\x00\\x7f\\xff'");
        assert_eq!(bytes_literal(b"a\r\n\t"), "b'a\\r\\n\\t'");
    }

    #[test]
    fn binary_payload_survives_decoding() {
        let data: Vec<u8> = (0..=255).collect();
        let decoded = decode_bytes_literal(&bytes_literal(&data)).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn str_literal_keeps_unicode() {
        let lit = str_literal("lib/café's.py");
        assert_eq!(lit, "'lib/café\\'s.py'");
        assert_eq!(decode_str_literal(&lit).unwrap(), "lib/café's.py");
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(matches!(
            decode_bytes_literal("'abc'"),
            Err(LiteralError::Unquoted(_))
        ));
        assert_eq!(
            decode_bytes_literal("b'ab\\'"),
            Err(LiteralError::UnterminatedEscape(2))
        );
        assert_eq!(
            decode_bytes_literal("b'\\q'"),
            Err(LiteralError::InvalidEscape('q'))
        );
        assert_eq!(decode_bytes_literal("b'a'b'"), Err(LiteralError::StrayQuote(1)));
    }
}

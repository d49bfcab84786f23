//! Statements executed on the board in raw mode.
//!
//! Every statement ends by printing a short acknowledgement tag (`:o`,
//! `:w`, `:c`, `:d`) so its reply is a complete line. Raw mode answers with
//! a bare `>` that never carries a line terminator, which makes the tag the
//! only reliable synchronization point.

use crate::constants::CTRL_D;
use crate::literal::{bytes_literal, decode_bytes_literal, decode_str_literal, str_literal};

const MKDIR_HEAD: &str = "import os\ntry:\n os.mkdir(";
const MKDIR_TAIL: &str = ")\n print(':d',1)\nexcept OSError:\n print(':d',0)";
const OPEN_HEAD: &str = "f=open(";
const OPEN_TAIL: &str = ",'wb')\nprint(':o')";
const CLOSE: &str = "f.close()\nprint(':c')";

/// A statement the uploader knows how to render and verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Create one directory; acknowledged with `:d 1` or `:d 0` if it existed.
    MakeDir { path: String },
    /// Open a remote file for binary writing; acknowledged with `:o`.
    Open { path: String },
    /// Seek to `offset` and write `data`; acknowledged with `:w <offset> <count>`.
    ///
    /// Seeking first makes a repeated write of the same chunk idempotent.
    Write { offset: u64, data: Vec<u8> },
    /// Close the open remote file; acknowledged with `:c`.
    Close,
}

impl Statement {
    /// Renders the statement source text.
    pub fn render(&self) -> String {
        match self {
            Self::MakeDir { path } => format!("{MKDIR_HEAD}{}{MKDIR_TAIL}", str_literal(path)),
            Self::Open { path } => format!("{OPEN_HEAD}{}{OPEN_TAIL}", str_literal(path)),
            Self::Write { offset, data } => format!(
                "f.seek({offset})\nprint(':w',{offset},f.write({}))",
                bytes_literal(data)
            ),
            Self::Close => CLOSE.to_string(),
        }
    }

    /// Bytes to put on the wire: the source followed by Ctrl-D.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = self.render().into_bytes();
        wire.push(CTRL_D);
        wire
    }

    /// Recognizes statement source produced by [`Statement::render`].
    pub fn parse(source: &str) -> Option<Self> {
        if let Some(lit) = source
            .strip_prefix(MKDIR_HEAD)
            .and_then(|s| s.strip_suffix(MKDIR_TAIL))
        {
            return decode_str_literal(lit)
                .ok()
                .map(|path| Self::MakeDir { path });
        }
        if let Some(lit) = source
            .strip_prefix(OPEN_HEAD)
            .and_then(|s| s.strip_suffix(OPEN_TAIL))
        {
            return decode_str_literal(lit).ok().map(|path| Self::Open { path });
        }
        if source == CLOSE {
            return Some(Self::Close);
        }

        let rest = source.strip_prefix("f.seek(")?;
        let (offset, rest) = rest.split_once(")\nprint(':w',")?;
        let offset: u64 = offset.parse().ok()?;
        let (tagged, rest) = rest.split_once(",f.write(")?;
        if tagged.parse::<u64>().ok()? != offset {
            return None;
        }
        let lit = rest.strip_suffix("))")?;
        let data = decode_bytes_literal(lit).ok()?;
        Some(Self::Write { offset, data })
    }
}

/// Parent directories of `remote_path`, shallowest first.
///
/// `"lib/net/http.py"` yields `["lib", "lib/net"]`.
pub fn parent_dirs(remote_path: &str) -> Vec<String> {
    let segments: Vec<&str> = remote_path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((_, parents)) = segments.split_last() else {
        return Vec::new();
    };
    let mut dirs = Vec::with_capacity(parents.len());
    let mut current = String::new();
    for segment in parents {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        dirs.push(current.clone());
    }
    dirs
}

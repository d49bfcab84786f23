//! Data types for the upload flow.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use replup_protocol::constants::{
    DEFAULT_CHUNK_ATTEMPTS, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_TIMEOUT, DEFAULT_PROMPT_TIMEOUT,
    DEFAULT_SEND_TIMEOUT,
};
use replup_smash::SmashLevel;

/// Step of the per-file transfer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    EnterRawMode,
    EnsureDirs,
    OpenRemoteFile,
    WriteChunk,
    CloseRemoteFile,
    ExitRawMode,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EnterRawMode => "enter raw mode",
            Self::EnsureDirs => "ensure directories",
            Self::OpenRemoteFile => "open remote file",
            Self::WriteChunk => "write chunk",
            Self::CloseRemoteFile => "close remote file",
            Self::ExitRawMode => "exit raw mode",
        })
    }
}

/// A local file and where it goes on the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub local: PathBuf,
    /// `/`-separated path relative to the board's filesystem root.
    pub remote: String,
}

/// One file ready to be written.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub local: PathBuf,
    pub remote: String,
    pub payload: Vec<u8>,
    pub chunk_size: usize,
}

/// A slice of a task's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub offset: u64,
    pub data: &'a [u8],
}

impl TransferTask {
    /// Splits the payload into `chunk_size` pieces. An empty payload has no
    /// chunks; the file is still created.
    pub fn chunks(&self) -> impl Iterator<Item = Chunk<'_>> {
        self.payload
            .chunks(self.chunk_size.max(1))
            .enumerate()
            .map(move |(index, data)| Chunk {
                index,
                offset: (index * self.chunk_size.max(1)) as u64,
                data,
            })
    }

    pub fn chunk_count(&self) -> usize {
        self.payload.len().div_ceil(self.chunk_size.max(1))
    }
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: usize,
    /// Attempts per chunk, including the first.
    pub chunk_attempts: u32,
    /// Wait for banners and open/close/mkdir acknowledgements.
    pub prompt_timeout: Duration,
    /// Wait for one chunk acknowledgement.
    pub chunk_timeout: Duration,
    pub send_timeout: Duration,
    /// `None` disables smashing.
    pub smash: Option<SmashLevel>,
    pub dry_run: bool,
    /// Stop at the first failed file.
    pub fail_fast: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_attempts: DEFAULT_CHUNK_ATTEMPTS,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            smash: Some(SmashLevel::default()),
            dry_run: false,
            fail_fast: false,
        }
    }
}

/// Running totals for a session. In a dry run these are the would-be
/// totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub files: u64,
    pub directories: u64,
    /// Payload bytes acknowledged by the board.
    pub bytes: u64,
}

/// How one file ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum FileStatus {
    Uploaded,
    WouldUpload,
    Failed(String),
    /// Not attempted because the session was aborted first.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub local: String,
    pub remote: String,
    pub bytes: u64,
    #[serde(flatten)]
    pub status: FileStatus,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, FileStatus::Uploaded | FileStatus::WouldUpload)
    }
}

/// Everything known about a finished session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub success: bool,
    pub dry_run: bool,
    pub stats: UploadStats,
    /// Chunks that had to be sent more than once.
    pub chunk_retries: u64,
    pub files: Vec<FileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl UploadReport {
    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| !f.succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(len: usize, chunk_size: usize) -> TransferTask {
        TransferTask {
            local: PathBuf::from("x"),
            remote: "x".into(),
            payload: (0..len).map(|i| i as u8).collect(),
            chunk_size,
        }
    }

    #[test]
    fn chunks_cover_payload_with_offsets() {
        let t = task(600, 256);
        let chunks: Vec<_> = t.chunks().collect();
        assert_eq!(t.chunk_count(), 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].offset, 256);
        assert_eq!(chunks[2].data.len(), 88);
        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        assert_eq!(total, 600);
    }

    #[test]
    fn empty_payload_has_no_chunks() {
        let t = task(0, 256);
        assert_eq!(t.chunks().count(), 0);
        assert_eq!(t.chunk_count(), 0);
    }

    #[test]
    fn outcome_serializes_status_inline() {
        let outcome = FileOutcome {
            local: "src/main.py".into(),
            remote: "main.py".into(),
            bytes: 10,
            status: FileStatus::Failed("board raised OSError".into()),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "board raised OSError");
        assert_eq!(json["remote"], "main.py");
    }
}

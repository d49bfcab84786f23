//! Upload engine: pushes a local file tree onto a board over its raw REPL.
//!
//! The engine drives an already-connected
//! [`Connection`](replup_connection::Connection); it never opens or closes
//! the transport itself.
//!
//! # Pipeline
//!
//! 1. **Scan**: walk the local tree, apply include/exclude names
//! 2. **Prepare**: smash Python sources, split into chunks
//! 3. **Enter raw mode**: per file, wait for the raw REPL banner
//! 4. **Ensure dirs**: create missing parent directories once per session
//! 5. **Open / write / close**: one acknowledged statement at a time,
//!    retrying unacknowledged chunks
//! 6. **Exit raw mode**: wait for the friendly banner before the next file

pub mod error;
pub mod preparer;
pub mod retry;
pub mod scanner;
pub mod session;
pub mod types;

pub use error::UploadError;
pub use preparer::Preparer;
pub use retry::{ChunkRetry, RetryDecision};
pub use scanner::{ScanFilter, scan};
pub use session::Uploader;
pub use types::{
    Candidate, Chunk, FileOutcome, FileStatus, Phase, TransferTask, UploadOptions, UploadReport,
    UploadStats,
};

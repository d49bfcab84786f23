//! The upload protocol engine.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use replup_connection::{Connection, Event, EventBus, Signal, SubscriptionId};
use replup_protocol::constants::{CTRL_C, ENTER_RAW_MODE, EXIT_RAW_MODE};
use replup_protocol::statements::parent_dirs;
use replup_protocol::{Ack, ReplyEvent, ReplyParser, Statement};

use crate::error::UploadError;
use crate::preparer::Preparer;
use crate::retry::{ChunkRetry, RetryDecision};
use crate::types::{
    Candidate, Chunk, FileOutcome, FileStatus, Phase, TransferTask, UploadOptions, UploadReport,
    UploadStats,
};

/// Longest single wait on the inbox before re-checking the connection.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// What the reader thread forwards to the engine.
enum Inbound {
    Line(String),
    Error(String),
}

/// Subscriptions feeding the engine's inbox; removed on drop.
struct Tap<'a> {
    bus: &'a EventBus,
    subscriptions: [(Signal, SubscriptionId); 2],
}

impl<'a> Tap<'a> {
    fn attach(bus: &'a EventBus) -> (Self, Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel();
        let err_tx = tx.clone();
        let lines = bus.connect(Signal::DataLine, move |event| {
            if let Event::DataLine(line) = event {
                let _ = tx.send(Inbound::Line(line.clone()));
            }
        });
        let errors = bus.connect(Signal::Error, move |event| {
            if let Event::Error(message) = event {
                let _ = err_tx.send(Inbound::Error(message.clone()));
            }
        });
        let tap = Self {
            bus,
            subscriptions: [(Signal::DataLine, lines), (Signal::Error, errors)],
        };
        (tap, rx)
    }
}

impl Drop for Tap<'_> {
    fn drop(&mut self) {
        for (signal, id) in self.subscriptions {
            self.bus.disconnect(signal, id);
        }
    }
}

/// Per-file state machine steps.
#[derive(Debug)]
enum Step {
    EnterRawMode,
    EnsureDirs,
    OpenRemoteFile,
    WriteChunk { index: usize, retry: ChunkRetry },
    CloseRemoteFile,
    ExitRawMode,
    Done,
}

/// What must be undone if a transfer fails midway.
#[derive(Debug, Default)]
struct Cursor {
    raw_mode: bool,
    file_open: bool,
}

/// Drives upload sessions over a connected [`Connection`].
///
/// All session state (statistics, outcomes, the set of directories already
/// ensured) lives here and is only touched by the thread calling
/// [`Uploader::upload`].
pub struct Uploader<'a> {
    conn: &'a Connection,
    options: UploadOptions,
    preparer: Preparer,
    parser: ReplyParser,
    inbox: Option<Receiver<Inbound>>,
    ensured: HashSet<String>,
    report: UploadReport,
}

impl<'a> Uploader<'a> {
    pub fn new(conn: &'a Connection, options: UploadOptions) -> Self {
        let preparer = Preparer::new(options.smash, options.chunk_size);
        Self {
            conn,
            options,
            preparer,
            parser: ReplyParser::new(),
            inbox: None,
            ensured: HashSet::new(),
            report: UploadReport::default(),
        }
    }

    /// Totals of the last session.
    pub fn stats(&self) -> UploadStats {
        self.report.stats
    }

    pub fn report(&self) -> &UploadReport {
        &self.report
    }

    pub fn into_report(self) -> UploadReport {
        self.report
    }

    /// Uploads every candidate in order.
    ///
    /// Returns true only if every file was written, verified and closed
    /// (or, in a dry run, prepared). Per-file results are in
    /// [`Uploader::report`].
    pub fn upload<I>(&mut self, candidates: I) -> bool
    where
        I: IntoIterator<Item = Candidate>,
    {
        self.report = UploadReport {
            dry_run: self.options.dry_run,
            ..UploadReport::default()
        };
        self.ensured.clear();

        info!(
            port = %self.conn.port(),
            dry_run = self.options.dry_run,
            smash = ?self.options.smash.map(u8::from),
            chunk_size = self.options.chunk_size,
            "upload started"
        );

        let conn = self.conn;
        let tap = if self.options.dry_run {
            None
        } else {
            let (tap, rx) = Tap::attach(conn.events());
            self.inbox = Some(rx);
            Some(tap)
        };

        for candidate in candidates {
            if let Some(reason) = self.report.aborted.clone() {
                debug!(path = %candidate.remote, "skipped");
                self.record(&candidate, 0, FileStatus::Skipped(reason));
                continue;
            }
            self.upload_file(&candidate);
        }

        self.inbox = None;
        drop(tap);

        self.report.success =
            self.report.aborted.is_none() && self.report.files.iter().all(FileOutcome::succeeded);
        let stats = self.report.stats;
        info!(
            files = stats.files,
            directories = stats.directories,
            bytes = stats.bytes,
            failed = self.report.failed().count(),
            retries = self.report.chunk_retries,
            dry_run = self.options.dry_run,
            "upload finished"
        );
        self.report.success
    }

    fn upload_file(&mut self, candidate: &Candidate) {
        let content = match std::fs::read(&candidate.local) {
            Ok(content) => content,
            Err(err) => {
                self.fail(candidate, 0, UploadError::from(err));
                return;
            }
        };
        let task = self.preparer.prepare(candidate, content);
        let size = task.payload.len() as u64;

        if self.options.dry_run {
            self.preview(&task);
            self.report.stats.files += 1;
            self.report.stats.bytes += size;
            self.record(candidate, size, FileStatus::WouldUpload);
            return;
        }

        info!(path = %task.remote, bytes = size, chunks = task.chunk_count(), "uploading");
        match self.transfer(&task) {
            Ok(written) => {
                self.report.stats.files += 1;
                self.report.stats.bytes += written;
                info!(path = %task.remote, bytes = written, "uploaded");
                self.record(candidate, written, FileStatus::Uploaded);
            }
            Err(err) => self.fail(candidate, size, err),
        }
    }

    fn fail(&mut self, candidate: &Candidate, bytes: u64, err: UploadError) {
        error!(path = %candidate.remote, %err, "upload failed");
        if err.is_session_fatal() {
            self.report.aborted = Some(err.to_string());
        } else if self.options.fail_fast {
            self.report.aborted = Some(format!("stopped after {} failed", candidate.remote));
        }
        self.record(candidate, bytes, FileStatus::Failed(err.to_string()));
    }

    fn record(&mut self, candidate: &Candidate, bytes: u64, status: FileStatus) {
        self.report.files.push(FileOutcome {
            local: candidate.local.display().to_string(),
            remote: candidate.remote.clone(),
            bytes,
            status,
        });
    }

    /// Logs what a real run would send, updating the would-be totals.
    fn preview(&mut self, task: &TransferTask) {
        for dir in parent_dirs(&task.remote) {
            if self.ensured.insert(dir.clone()) {
                self.report.stats.directories += 1;
                debug!(path = %dir, "dry run: would create directory");
            }
        }
        let open = Statement::Open {
            path: task.remote.clone(),
        };
        debug!(statement = %open.render(), "dry run: would send");
        for chunk in task.chunks() {
            let write = write_statement(&chunk);
            debug!(
                path = %task.remote,
                offset = chunk.offset,
                bytes = chunk.data.len(),
                wire_bytes = write.to_wire().len(),
                "dry run: would write chunk"
            );
        }
        info!(
            path = %task.remote,
            bytes = task.payload.len(),
            chunks = task.chunk_count(),
            "dry run: would upload"
        );
    }

    // -----------------------------------------------------------------------
    // Transfer state machine
    // -----------------------------------------------------------------------

    fn transfer(&mut self, task: &TransferTask) -> Result<u64, UploadError> {
        let mut cursor = Cursor::default();
        let result = self.run_steps(task, &mut cursor);
        if result.is_err() {
            self.recover(&cursor);
        }
        result
    }

    fn run_steps(&mut self, task: &TransferTask, cursor: &mut Cursor) -> Result<u64, UploadError> {
        let chunks: Vec<Chunk<'_>> = task.chunks().collect();
        let mut written = 0u64;
        let mut step = Step::EnterRawMode;

        loop {
            debug!(path = %task.remote, ?step, "step");
            step = match step {
                Step::EnterRawMode => {
                    self.enter_raw_mode()?;
                    cursor.raw_mode = true;
                    Step::EnsureDirs
                }
                Step::EnsureDirs => {
                    self.ensure_dirs(&task.remote)?;
                    Step::OpenRemoteFile
                }
                Step::OpenRemoteFile => {
                    let open = Statement::Open {
                        path: task.remote.clone(),
                    };
                    self.execute(&open, Phase::OpenRemoteFile, |event| {
                        matches!(event, ReplyEvent::Ack(Ack::Opened)).then_some(())
                    })?;
                    cursor.file_open = true;
                    Step::WriteChunk {
                        index: 0,
                        retry: ChunkRetry::new(self.options.chunk_attempts),
                    }
                }
                Step::WriteChunk { index, mut retry } => match chunks.get(index) {
                    None => Step::CloseRemoteFile,
                    Some(chunk) => match self.write_chunk(&task.remote, chunk, &retry) {
                        Ok(count) => {
                            written += count;
                            Step::WriteChunk {
                                index: index + 1,
                                retry: ChunkRetry::new(self.options.chunk_attempts),
                            }
                        }
                        Err(err) if err.is_retryable() => match retry.on_failure() {
                            RetryDecision::Retry { attempt } => {
                                warn!(
                                    path = %task.remote,
                                    offset = chunk.offset,
                                    attempt,
                                    %err,
                                    "chunk not acknowledged, retrying"
                                );
                                self.report.chunk_retries += 1;
                                Step::WriteChunk { index, retry }
                            }
                            RetryDecision::GiveUp { attempts } => {
                                return Err(UploadError::Transfer {
                                    path: task.remote.clone(),
                                    reason: format!(
                                        "chunk at offset {} not acknowledged after {attempts} attempts",
                                        chunk.offset
                                    ),
                                });
                            }
                        },
                        Err(err) => return Err(err),
                    },
                },
                Step::CloseRemoteFile => {
                    self.execute(&Statement::Close, Phase::CloseRemoteFile, |event| {
                        matches!(event, ReplyEvent::Ack(Ack::Closed)).then_some(())
                    })?;
                    cursor.file_open = false;
                    Step::ExitRawMode
                }
                Step::ExitRawMode => {
                    self.exit_raw_mode()?;
                    cursor.raw_mode = false;
                    Step::Done
                }
                Step::Done => return Ok(written),
            };
        }
    }

    fn enter_raw_mode(&mut self) -> Result<(), UploadError> {
        self.drain_inbox();
        self.conn.send(ENTER_RAW_MODE, self.options.send_timeout)?;
        let timeout = self.options.prompt_timeout;
        self.await_reply(Phase::EnterRawMode, timeout, |event| {
            (*event == ReplyEvent::RawMode).then_some(())
        })
    }

    fn exit_raw_mode(&mut self) -> Result<(), UploadError> {
        self.conn.send(EXIT_RAW_MODE, self.options.send_timeout)?;
        let timeout = self.options.prompt_timeout;
        self.await_reply(Phase::ExitRawMode, timeout, |event| {
            (*event == ReplyEvent::Friendly).then_some(())
        })
    }

    fn ensure_dirs(&mut self, remote: &str) -> Result<(), UploadError> {
        for dir in parent_dirs(remote) {
            if self.ensured.contains(&dir) {
                continue;
            }
            let mkdir = Statement::MakeDir { path: dir.clone() };
            let created = self.execute(&mkdir, Phase::EnsureDirs, |event| match event {
                ReplyEvent::Ack(Ack::Dir { created }) => Some(*created),
                _ => None,
            })?;
            if created {
                self.report.stats.directories += 1;
                info!(path = %dir, "created directory");
            } else {
                debug!(path = %dir, "directory exists");
            }
            self.ensured.insert(dir);
        }
        Ok(())
    }

    fn write_chunk(
        &mut self,
        remote: &str,
        chunk: &Chunk<'_>,
        retry: &ChunkRetry,
    ) -> Result<u64, UploadError> {
        if retry.attempt() > 1 {
            // A timed-out send can leave part of the statement in the board's
            // raw input buffer. Ctrl-C discards it.
            self.conn.send(&[CTRL_C], self.options.send_timeout)?;
            self.drain_inbox();
        }
        let statement = write_statement(chunk);
        self.conn
            .send(&statement.to_wire(), self.options.send_timeout)?;

        let offset = chunk.offset;
        let timeout = self.options.chunk_timeout;
        // Acknowledgements for other offsets are late replies to earlier
        // attempts and are skipped.
        let count = self.await_reply(Phase::WriteChunk, timeout, |event| match event {
            ReplyEvent::Ack(Ack::Wrote { offset: o, count }) if *o == offset => Some(*count),
            _ => None,
        })?;

        let expected = chunk.data.len() as u64;
        if count != expected {
            return Err(UploadError::Transfer {
                path: remote.to_string(),
                reason: format!("board wrote {count} of {expected} bytes at offset {offset}"),
            });
        }
        Ok(count)
    }

    /// Sends a statement and waits for the reply `accept` picks out.
    fn execute<T>(
        &mut self,
        statement: &Statement,
        phase: Phase,
        accept: impl FnMut(&ReplyEvent) -> Option<T>,
    ) -> Result<T, UploadError> {
        debug!(%phase, statement = %statement.render(), "execute");
        self.conn
            .send(&statement.to_wire(), self.options.send_timeout)?;
        let timeout = self.options.prompt_timeout;
        self.await_reply(phase, timeout, accept)
    }

    fn await_reply<T>(
        &mut self,
        phase: Phase,
        timeout: Duration,
        mut accept: impl FnMut(&ReplyEvent) -> Option<T>,
    ) -> Result<T, UploadError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(UploadError::ProtocolTimeout { phase });
            }
            let inbox = self.inbox.as_ref().ok_or(UploadError::ConnectionLost)?;
            match inbox.recv_timeout(remaining.min(WAIT_SLICE)) {
                Ok(Inbound::Line(line)) => {
                    let Some(event) = self.parser.feed(&line) else {
                        continue;
                    };
                    if let ReplyEvent::DeviceError(message) = event {
                        return Err(UploadError::Device { message });
                    }
                    match accept(&event) {
                        Some(value) => return Ok(value),
                        None => debug!(%phase, ?event, "ignoring reply"),
                    }
                }
                Ok(Inbound::Error(message)) => {
                    warn!(%phase, %message, "connection reported an error");
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.conn.is_connected() {
                        return Err(UploadError::ConnectionLost);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(UploadError::ConnectionLost),
            }
        }
    }

    fn drain_inbox(&mut self) {
        if let Some(inbox) = &self.inbox {
            while inbox.try_recv().is_ok() {}
        }
        self.parser.reset();
    }

    /// Best effort: close the remote file and leave raw mode so the next
    /// file starts from a known state.
    fn recover(&mut self, cursor: &Cursor) {
        if !self.conn.is_connected() {
            return;
        }
        if cursor.file_open {
            let closed = self.execute(&Statement::Close, Phase::CloseRemoteFile, |event| {
                matches!(event, ReplyEvent::Ack(Ack::Closed)).then_some(())
            });
            if let Err(err) = closed {
                debug!(%err, "close during recovery failed");
            }
        }
        if cursor.raw_mode {
            if let Err(err) = self.exit_raw_mode() {
                debug!(%err, "leaving raw mode during recovery failed");
            }
        }
    }
}

fn write_statement(chunk: &Chunk<'_>) -> Statement {
    Statement::Write {
        offset: chunk.offset,
        data: chunk.data.to_vec(),
    }
}

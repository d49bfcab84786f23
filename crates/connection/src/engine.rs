//! The connection engine: transport ownership, reader thread, send lock.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use replup_protocol::constants::{INTERRUPT, MACHINE_RESET, SOFT_RESET};
use replup_transport::{Transport, TransportError, TransportRead, TransportWrite};

use crate::bus::{Event, EventBus};
use crate::error::ConnectionError;
use crate::line_buffer::{LineBuffer, LineOutput};
use crate::types::{ConnectionConfig, ConnectionState, ResetMode};

const READ_CHUNK: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Budget for the parting interrupt sent by `disconnect`.
const PARTING_INTERRUPT_TIMEOUT: Duration = Duration::from_millis(100);

struct WriterSlot {
    writer: Box<dyn TransportWrite>,
    session: CancellationToken,
}

struct ReaderHandle {
    session: CancellationToken,
    thread: JoinHandle<()>,
}

/// A connection to one board.
///
/// `connect`, `send`, `flush` and `disconnect` may be called from any
/// thread. Only the reader thread reads from the transport; writes go
/// through one mutex so concurrent `send`s never interleave on the wire.
pub struct Connection {
    port: String,
    config: ConnectionConfig,
    transport: Mutex<Box<dyn Transport>>,
    bus: Arc<EventBus>,
    state: Arc<watch::Sender<ConnectionState>>,
    writer: Mutex<Option<WriterSlot>>,
    reader: Mutex<Option<ReaderHandle>>,
    last_rx: Arc<Mutex<Instant>>,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            port: transport.name().to_string(),
            config,
            transport: Mutex::new(transport),
            bus: Arc::new(EventBus::new()),
            state: Arc::new(state),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            last_rx: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Subscriber registry for this connection's events.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens the transport, starts the reader, optionally resets the board
    /// and waits for boot output to go quiet.
    ///
    /// Emits `Connected` on success. On failure the state becomes `Error`,
    /// `Error` is emitted and the error is returned.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        let started = self.state.send_if_modified(|state| match state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                *state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Connecting | ConnectionState::Connected => false,
        });
        if !started {
            return Err(ConnectionError::AlreadyOpen {
                port: self.port.clone(),
            });
        }

        // Leftovers from a reader that stopped on its own.
        self.teardown();

        info!(port = %self.port, reset = %self.config.reset, "connecting");
        if let Err(err) = self.establish() {
            self.teardown();
            self.state.send_replace(ConnectionState::Error);
            error!(port = %self.port, %err, "connect failed");
            self.bus.emit(&Event::Error(err.to_string()));
            return Err(err);
        }

        let ready = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !ready {
            // Disconnected or failed while draining boot output.
            debug!(port = %self.port, state = ?self.state(), "connect interrupted");
            self.teardown();
            return Err(ConnectionError::NotConnected);
        }

        info!(port = %self.port, "connected");
        self.bus.emit(&Event::Connected);
        Ok(())
    }

    fn establish(&self) -> Result<(), ConnectionError> {
        let (reader, writer) = self
            .transport
            .lock()
            .unwrap()
            .open()
            .map_err(|err| match err {
                TransportError::Open { port, reason } => ConnectionError::Port { port, reason },
                other => ConnectionError::Port {
                    port: self.port.clone(),
                    reason: other.to_string(),
                },
            })?;

        let session = CancellationToken::new();
        *self.last_rx.lock().unwrap() = Instant::now();
        *self.writer.lock().unwrap() = Some(WriterSlot {
            writer,
            session: session.clone(),
        });

        let ctx = ReaderContext {
            port: self.port.clone(),
            bus: self.bus.clone(),
            state: self.state.clone(),
            session: session.clone(),
            last_rx: self.last_rx.clone(),
            capacity: self.config.line_capacity,
            read_timeout: self.config.read_timeout,
        };
        let thread = thread::Builder::new()
            .name("replup-reader".into())
            .spawn(move || read_loop(reader, ctx))
            .map_err(|err| ConnectionError::Port {
                port: self.port.clone(),
                reason: format!("cannot start reader thread: {err}"),
            })?;
        *self.reader.lock().unwrap() = Some(ReaderHandle { session, thread });

        if self.config.interrupt_on_connect {
            self.write_all(INTERRUPT, self.config.write_timeout)?;
        }
        match self.config.reset {
            ResetMode::None => {}
            ResetMode::Soft => self.write_all(SOFT_RESET, self.config.write_timeout)?,
            ResetMode::Machine => self.write_all(MACHINE_RESET, self.config.write_timeout)?,
        }
        self.drain_boot_output();
        Ok(())
    }

    /// Waits until nothing has arrived for `boot_quiet`, bounded by
    /// `boot_timeout`. Lines received meanwhile are still delivered.
    fn drain_boot_output(&self) {
        let started = Instant::now();
        loop {
            let idle = self.last_rx.lock().unwrap().elapsed();
            if idle >= self.config.boot_quiet {
                break;
            }
            if started.elapsed() >= self.config.boot_timeout {
                debug!(port = %self.port, "board still talking after boot timeout");
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Writes all of `data`, holding the send lock for the whole call.
    ///
    /// Fails with `NotConnected` unless the state is `Connected`, and with
    /// `SendTimeout` if the transport does not take every byte in time.
    /// Failures are also emitted as `Error` events.
    pub fn send(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        trace!(port = %self.port, bytes = data.len(), "send");
        let result = self.write_all(data, timeout);
        if let Err(err) = &result {
            warn!(port = %self.port, %err, "send failed");
            self.bus.emit(&Event::Error(err.to_string()));
        }
        result
    }

    fn write_all(&self, data: &[u8], timeout: Duration) -> Result<(), ConnectionError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.writer.lock().unwrap();
        let slot = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        let mut written = 0;
        while written < data.len() {
            if slot.session.is_cancelled() {
                return Err(ConnectionError::NotConnected);
            }
            if Instant::now() >= deadline {
                return Err(ConnectionError::SendTimeout {
                    written,
                    total: data.len(),
                });
            }
            match slot.writer.write(&data[written..])? {
                0 => thread::yield_now(),
                n => written += n,
            }
        }
        Ok(())
    }

    /// Discards buffered transport input and output.
    pub fn flush(&self) -> Result<(), ConnectionError> {
        let mut guard = self.writer.lock().unwrap();
        let slot = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        slot.writer.discard_buffers()?;
        Ok(())
    }

    /// Stops the reader, closes the transport and emits `Disconnected`.
    ///
    /// Idempotent, and safe to call from a subscriber running on the reader
    /// thread: the reader is then left to exit on its own instead of joined.
    pub fn disconnect(&self) {
        if self.config.interrupt_on_connect && self.is_connected() && !self.on_reader_thread() {
            if let Err(err) = self.write_all(INTERRUPT, PARTING_INTERRUPT_TIMEOUT) {
                debug!(port = %self.port, %err, "parting interrupt not sent");
            }
        }
        self.teardown();
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!(port = %self.port, "disconnected");
            self.bus.emit(&Event::Disconnected);
        }
    }

    fn on_reader_thread(&self) -> bool {
        self.reader
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|handle| handle.thread.thread().id() == thread::current().id())
    }

    fn teardown(&self) {
        let reader = self.reader.lock().unwrap().take();
        if let Some(handle) = &reader {
            // Wakes a sender waiting on a stalled transport.
            handle.session.cancel();
        }

        if let Some(mut slot) = self.writer.lock().unwrap().take() {
            slot.session.cancel();
            if let Err(err) = slot.writer.close() {
                warn!(port = %self.port, %err, "close failed");
            }
        }

        if let Some(handle) = reader {
            self.join_reader(handle);
        }
    }

    fn join_reader(&self, handle: ReaderHandle) {
        if handle.thread.thread().id() == thread::current().id() {
            debug!(port = %self.port, "disconnect from reader thread, not joining");
            return;
        }
        let deadline = Instant::now() + self.config.join_timeout;
        while !handle.thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(port = %self.port, "reader did not stop in time, detaching");
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        if handle.thread.join().is_err() {
            warn!(port = %self.port, "reader thread panicked");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
        self.bus.clear();
    }
}

// ---------------------------------------------------------------------------
// Reader thread
// ---------------------------------------------------------------------------

struct ReaderContext {
    port: String,
    bus: Arc<EventBus>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: CancellationToken,
    last_rx: Arc<Mutex<Instant>>,
    capacity: usize,
    read_timeout: Duration,
}

fn read_loop(mut reader: Box<dyn TransportRead>, ctx: ReaderContext) {
    debug!(port = %ctx.port, "reader started");
    let mut lines = LineBuffer::new(ctx.capacity);
    let mut buf = [0u8; READ_CHUNK];

    while !ctx.session.is_cancelled() {
        let n = match reader.read(&mut buf, ctx.read_timeout) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(err) => {
                if ctx.session.is_cancelled() {
                    break;
                }
                error!(port = %ctx.port, %err, "read failed");
                ctx.state.send_if_modified(|state| match state {
                    ConnectionState::Connecting | ConnectionState::Connected => {
                        *state = ConnectionState::Error;
                        true
                    }
                    _ => false,
                });
                ctx.bus
                    .emit(&Event::Error(format!("read from {} failed: {err}", ctx.port)));
                break;
            }
        };
        *ctx.last_rx.lock().unwrap() = Instant::now();

        for output in lines.push(&buf[..n]) {
            if ctx.session.is_cancelled() {
                break;
            }
            match output {
                LineOutput::Line(line) => {
                    trace!(port = %ctx.port, %line, "rx");
                    ctx.bus.emit(&Event::DataLine(line));
                }
                LineOutput::Overflow { discarded } => {
                    let err = ConnectionError::Overflow {
                        capacity: ctx.capacity,
                    };
                    warn!(port = %ctx.port, discarded, "{err}");
                    ctx.bus.emit(&Event::Error(err.to_string()));
                }
            }
        }
    }
    debug!(port = %ctx.port, "reader stopped");
}

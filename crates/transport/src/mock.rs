//! In-memory transport for tests and simulations.
//!
//! Every byte written is recorded. Inbound bytes come from
//! [`MockTransport::push_inbound`] or from a responder closure that sees
//! each accepted write, which is how a simulated board is attached.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::{Transport, TransportError, TransportRead, TransportWrite};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct MockState {
    open: bool,
    opens: u32,
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    write_calls: usize,
    responder: Option<Responder>,
    fail_open: Option<String>,
    fail_read: Option<String>,
    stall_writes: bool,
    stall_until: Option<Instant>,
    truncate: Option<Truncate>,
    max_write: Option<usize>,
}

/// One-shot fault: a write starting with `prefix` is cut after `accept`
/// bytes and the line then stays blocked for `stall`.
struct Truncate {
    prefix: Vec<u8>,
    accept: usize,
    stall: Duration,
}

#[derive(Default)]
struct Shared {
    state: Mutex<MockState>,
    readable: Condvar,
}

/// Cloneable handle to one in-memory channel. Clones observe the same state.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock whose inbound side is driven by `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mock = Self::new();
        mock.state().responder = Some(Box::new(responder));
        mock
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.shared.state.lock().unwrap()
    }

    /// Makes bytes available to the reader.
    pub fn push_inbound(&self, data: &[u8]) {
        self.state().inbound.extend(data);
        self.shared.readable.notify_all();
    }

    /// All bytes accepted so far, in order.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Number of `write` calls that accepted at least one byte.
    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }

    pub fn clear_written(&self) {
        let mut state = self.state();
        state.written.clear();
        state.write_calls = 0;
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// How many times the channel was opened.
    pub fn open_count(&self) -> u32 {
        self.state().opens
    }

    /// Makes every subsequent `open` fail with `reason`.
    pub fn fail_open(&self, reason: impl Into<String>) {
        self.state().fail_open = Some(reason.into());
    }

    /// Makes the next read fail with `reason`.
    pub fn fail_next_read(&self, reason: impl Into<String>) {
        self.state().fail_read = Some(reason.into());
        self.shared.readable.notify_all();
    }

    /// While set, writes accept nothing.
    pub fn stall_writes(&self, stall: bool) {
        self.state().stall_writes = stall;
    }

    /// Arms a one-shot fault for the next write whose data starts with
    /// `prefix`: only `accept` bytes of it get through, then every write
    /// accepts nothing until `stall` has elapsed.
    pub fn truncate_next_write_matching(&self, prefix: &[u8], accept: usize, stall: Duration) {
        self.state().truncate = Some(Truncate {
            prefix: prefix.to_vec(),
            accept,
            stall,
        });
    }

    /// Caps the bytes accepted by one `write` call.
    pub fn set_max_write(&self, max: usize) {
        self.state().max_write = Some(max.max(1));
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&mut self) -> Result<(Box<dyn TransportRead>, Box<dyn TransportWrite>), TransportError> {
        let mut state = self.state();
        if let Some(reason) = state.fail_open.clone() {
            return Err(TransportError::Open {
                port: "mock".into(),
                reason,
            });
        }
        state.open = true;
        state.opens += 1;
        drop(state);
        Ok((
            Box::new(MockReader {
                shared: self.shared.clone(),
            }),
            Box::new(MockWriter {
                shared: self.shared.clone(),
            }),
        ))
    }
}

struct MockReader {
    shared: Arc<Shared>,
}

impl TransportRead for MockReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(reason) = state.fail_read.take() {
                return Err(TransportError::Other(reason));
            }
            if !state.open {
                return Err(TransportError::Closed);
            }
            if !state.inbound.is_empty() {
                let n = buf.len().min(state.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(0);
            }
            state = self
                .shared
                .readable
                .wait_timeout(state, remaining)
                .unwrap()
                .0;
        }
    }
}

struct MockWriter {
    shared: Arc<Shared>,
}

impl TransportWrite for MockWriter {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.open {
            return Err(TransportError::Closed);
        }
        if state.stall_until.is_some_and(|until| Instant::now() >= until) {
            state.stall_until = None;
        }
        if state.stall_writes || state.stall_until.is_some() || data.is_empty() {
            drop(state);
            std::thread::sleep(Duration::from_millis(1));
            return Ok(0);
        }
        let mut n = state.max_write.map_or(data.len(), |max| max.min(data.len()));
        if state
            .truncate
            .as_ref()
            .is_some_and(|t| data.starts_with(&t.prefix))
        {
            if let Some(fault) = state.truncate.take() {
                n = n.min(fault.accept.max(1));
                state.stall_until = Some(Instant::now() + fault.stall);
            }
        }
        let accepted = &data[..n];
        state.written.extend_from_slice(accepted);
        state.write_calls += 1;
        if let Some(responder) = state.responder.as_mut() {
            let reply = responder(accepted);
            if !reply.is_empty() {
                state.inbound.extend(reply);
                self.shared.readable.notify_all();
            }
        }
        Ok(n)
    }

    fn discard_buffers(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.open {
            return Err(TransportError::Closed);
        }
        state.inbound.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.shared.state.lock().unwrap().open = false;
        self.shared.readable.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_times_out_with_zero() {
        let mut mock = MockTransport::new();
        let (mut reader, _writer) = mock.open().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf, Duration::from_millis(10)).unwrap(), 0);
    }

    #[test]
    fn responder_output_becomes_readable() {
        let mut mock = MockTransport::with_responder(|data| data.to_ascii_uppercase());
        let (mut reader, mut writer) = mock.open().unwrap();
        assert_eq!(writer.write(b"hi").unwrap(), 2);
        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(&buf[..n], b"HI");
        assert_eq!(mock.written(), b"hi");
    }

    #[test]
    fn max_write_splits_calls() {
        let mut mock = MockTransport::new();
        mock.set_max_write(3);
        let (_reader, mut writer) = mock.open().unwrap();
        assert_eq!(writer.write(b"abcdef").unwrap(), 3);
        assert_eq!(mock.write_calls(), 1);
    }

    #[test]
    fn truncated_write_stalls_then_recovers() {
        let mut mock = MockTransport::new();
        mock.truncate_next_write_matching(b"f.seek", 3, Duration::from_millis(30));
        let (_reader, mut writer) = mock.open().unwrap();
        assert_eq!(writer.write(b"print()").unwrap(), 7);
        assert_eq!(writer.write(b"f.seek(0)").unwrap(), 3);
        assert_eq!(writer.write(b"k(0)").unwrap(), 0);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(writer.write(b"f.seek(0)").unwrap(), 9);
        assert_eq!(mock.written(), b"print()f.sf.seek(0)");
    }

    #[test]
    fn clear_written_resets_the_record() {
        let mut mock = MockTransport::new();
        let (_reader, mut writer) = mock.open().unwrap();
        writer.write(b"abc").unwrap();
        mock.clear_written();
        assert!(mock.written().is_empty());
        assert_eq!(mock.write_calls(), 0);
        writer.write(b"d").unwrap();
        assert_eq!(mock.written(), b"d");
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let mut mock = MockTransport::new();
        let (mut reader, mut writer) = mock.open().unwrap();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf, Duration::from_secs(5))
        });
        std::thread::sleep(Duration::from_millis(20));
        writer.close().unwrap();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(!mock.is_open());
    }

    #[test]
    fn open_failure_is_reported() {
        let mut mock = MockTransport::new();
        mock.fail_open("busy");
        assert!(matches!(mock.open(), Err(TransportError::Open { .. })));
    }
}

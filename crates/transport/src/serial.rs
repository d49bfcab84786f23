//! Serial port transport backed by the `serialport` crate.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::debug;

use crate::{Transport, TransportError, TransportRead, TransportWrite};

/// Timeout the port is opened with; each read overrides it.
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// A serial device at a fixed baud rate, 8N1, no flow control.
#[derive(Debug, Clone)]
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
        }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn open_error(&self, err: impl std::fmt::Display) -> TransportError {
        TransportError::Open {
            port: self.port_name.clone(),
            reason: err.to_string(),
        }
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn open(&mut self) -> Result<(Box<dyn TransportRead>, Box<dyn TransportWrite>), TransportError> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(|e| self.open_error(e))?;
        let reader = port.try_clone().map_err(|e| self.open_error(e))?;

        debug!(port = %self.port_name, baud = self.baud_rate, "serial port opened");

        let closed = Arc::new(AtomicBool::new(false));
        Ok((
            Box::new(SerialReader {
                port: reader,
                timeout: OPEN_TIMEOUT,
                closed: closed.clone(),
            }),
            Box::new(SerialWriter {
                port: Some(port),
                closed,
            }),
        ))
    }
}

struct SerialReader {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl TransportRead for SerialReader {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let timeout = timeout.max(Duration::from_millis(1));
        if timeout != self.timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| TransportError::Other(e.to_string()))?;
            self.timeout = timeout;
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_transient(e.kind()) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

struct SerialWriter {
    port: Option<Box<dyn SerialPort>>,
    closed: Arc<AtomicBool>,
}

impl TransportWrite for SerialWriter {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        match port.write(data) {
            Ok(n) => Ok(n),
            Err(e) if is_transient(e.kind()) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn discard_buffers(&mut self) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.flush()?;
        port.clear(ClearBuffer::All)
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        if let Some(mut port) = self.port.take() {
            let _ = port.flush();
            debug!(port = ?port.name(), "serial port closed");
        }
        Ok(())
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

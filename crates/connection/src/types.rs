//! Public types for the connection engine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use replup_protocol::constants::{
    DEFAULT_BOOT_QUIET, DEFAULT_BOOT_TIMEOUT, DEFAULT_LINE_CAPACITY, DEFAULT_READ_TIMEOUT,
    DEFAULT_SEND_TIMEOUT,
};

/// Phase of the transport relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport open. Initial state.
    Disconnected,
    /// Transport opening, reset and boot drain in progress.
    Connecting,
    /// Reader running and transport open.
    Connected,
    /// Open failed or the transport broke while reading.
    Error,
}

/// How the board is reset after the port opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResetMode {
    #[default]
    None,
    /// Ctrl-C Ctrl-C Ctrl-D at the friendly prompt.
    Soft,
    /// `machine.reset()`.
    Machine,
}

impl fmt::Display for ResetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Soft => "soft",
            Self::Machine => "machine",
        })
    }
}

impl FromStr for ResetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "soft" => Ok(Self::Soft),
            "machine" | "hard" => Ok(Self::Machine),
            other => Err(format!("unknown reset mode `{other}` (none, soft, machine)")),
        }
    }
}

/// Tunables for a [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound for one transport read in the reader loop.
    pub read_timeout: Duration,
    /// Line buffer capacity in bytes.
    pub line_capacity: usize,
    /// Send timeout for the interrupt and reset sequences written by
    /// `connect`.
    pub write_timeout: Duration,
    /// Interrupt any running program right after opening, and once more
    /// before closing so the board is left idle.
    pub interrupt_on_connect: bool,
    pub reset: ResetMode,
    /// Silence that ends the boot drain.
    pub boot_quiet: Duration,
    /// Upper bound on the boot drain.
    pub boot_timeout: Duration,
    /// How long `disconnect` waits for the reader thread to finish.
    pub join_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            line_capacity: DEFAULT_LINE_CAPACITY,
            write_timeout: DEFAULT_SEND_TIMEOUT,
            interrupt_on_connect: true,
            reset: ResetMode::None,
            boot_quiet: DEFAULT_BOOT_QUIET,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            join_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_mode_parses_case_insensitively() {
        assert_eq!("SOFT".parse::<ResetMode>().unwrap(), ResetMode::Soft);
        assert_eq!("hard".parse::<ResetMode>().unwrap(), ResetMode::Machine);
        assert!("sideways".parse::<ResetMode>().is_err());
        assert_eq!(ResetMode::Machine.to_string(), "machine");
    }
}

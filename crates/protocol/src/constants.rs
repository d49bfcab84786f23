use std::time::Duration;

/// Ctrl-A: enter raw REPL.
pub const CTRL_A: u8 = 0x01;
/// Ctrl-B: leave raw REPL, back to the friendly prompt.
pub const CTRL_B: u8 = 0x02;
/// Ctrl-C: keyboard interrupt.
pub const CTRL_C: u8 = 0x03;
/// Ctrl-D: execute the buffered statement (raw) or soft reboot (friendly).
pub const CTRL_D: u8 = 0x04;

/// Sent to switch the board into raw mode.
///
/// The leading carriage return and double interrupt stop whatever program
/// is running so the Ctrl-A lands on an idle prompt.
pub const ENTER_RAW_MODE: &[u8] = &[b'\r', CTRL_C, CTRL_C, CTRL_A];

/// Sent to leave raw mode.
pub const EXIT_RAW_MODE: &[u8] = &[CTRL_B];

/// Interrupts a running program without leaving the current mode.
pub const INTERRUPT: &[u8] = &[CTRL_C, CTRL_C];

/// Soft reboot from the friendly prompt.
pub const SOFT_RESET: &[u8] = &[CTRL_C, CTRL_C, CTRL_D];

/// Hard reset through the `machine` module, typed at the friendly prompt.
pub const MACHINE_RESET: &[u8] = b"\r\nimport machine\r\nmachine.reset()\r\n";

/// Line printed by the board once raw mode is active.
pub const RAW_MODE_BANNER: &str = "raw REPL; CTRL-B to exit";

/// Line printed by the board when the friendly REPL is (re)started.
pub const FRIENDLY_BANNER: &str = "Type \"help()\" for more information.";

/// Prefix the board sends when it accepted a raw statement.
pub const STATEMENT_ACCEPTED: &str = "OK";

/// First line of every uncaught exception report.
pub const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";

/// Default serial speed of the supported boards.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Payload bytes carried by a single write statement.
///
/// The escaped literal can be up to four times larger on the wire, which
/// keeps each statement well inside the board's receive buffer.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Attempts made for a single chunk before the file is given up.
pub const DEFAULT_CHUNK_ATTEMPTS: u32 = 3;

/// Maximum bytes accumulated for one received line.
pub const DEFAULT_LINE_CAPACITY: usize = 100_000;

/// Upper bound for a single transport read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Time allowed for one `send` to be fully accepted by the transport.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Time to wait for a banner or a statement acknowledgement.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time to wait for the acknowledgement of one chunk.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(5);

/// Silence that marks the end of boot output after connecting.
pub const DEFAULT_BOOT_QUIET: Duration = Duration::from_millis(300);

/// Upper bound on the boot drain, for boards that never go quiet.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(3);

//! Connection engine for line-oriented boards.
//!
//! A [`Connection`] owns a transport, runs one background reader thread that
//! frames incoming bytes into lines, and delivers them through an
//! [`EventBus`]. Writes from any number of threads are serialized by a single
//! send lock.
//!
//! # Events
//!
//! - `DataLine(line)` for every completed line, in arrival order
//! - `Connected` / `Disconnected` on lifecycle transitions
//! - `Error(message)` for open failures, read failures and line overflow

pub mod bus;
pub mod engine;
pub mod error;
pub mod guard;
pub mod line_buffer;
pub mod types;

pub use bus::{Event, EventBus, Signal, SubscriptionId};
pub use engine::Connection;
pub use error::ConnectionError;
pub use guard::ConnectionGuard;
pub use line_buffer::{LineBuffer, LineOutput};
pub use types::{ConnectionConfig, ConnectionState, ResetMode};

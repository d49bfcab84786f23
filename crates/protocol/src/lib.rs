//! Raw REPL wire conventions for MicroPython-style boards.
//!
//! Everything here is pure: control sequences, the statements the uploader
//! executes on the board, classification of the lines the board prints back,
//! and a simulated board used by tests across the workspace.

pub mod constants;
pub mod literal;
pub mod reply;
pub mod sim;
pub mod statements;

pub use literal::LiteralError;
pub use reply::{Ack, ReplyEvent, ReplyParser};
pub use statements::Statement;

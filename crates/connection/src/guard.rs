//! Scoped connection acquisition.

use std::ops::Deref;

use crate::engine::Connection;
use crate::error::ConnectionError;

/// A connected [`Connection`] that disconnects when dropped, on every exit
/// path of the scope holding it, including `?` returns and panics.
pub struct ConnectionGuard<'a> {
    connection: &'a Connection,
}

impl Connection {
    /// Connects and returns a guard that disconnects on drop.
    pub fn acquire(&self) -> Result<ConnectionGuard<'_>, ConnectionError> {
        self.connect()?;
        Ok(ConnectionGuard { connection: self })
    }
}

impl Deref for ConnectionGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

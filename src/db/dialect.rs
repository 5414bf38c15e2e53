//! Driver-facing seam of the factory.
//!
//! A [`Dialect`] knows how to turn a connection string into a physical
//! [`Connection`]. The factory never talks to a driver any other way.

use crate::error::DbResult;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Shared handle to a dialect. One dialect may back several registry entries.
pub type DialectHandle = Arc<dyn Dialect>;

/// Capability for opening physical connections to one database engine.
pub trait Dialect: Debug + Send + Sync {
    /// Short engine name used in logs.
    fn name(&self) -> &str;

    /// Open a new physical connection.
    ///
    /// Failures are reported as [`DbError::ConnectionOpen`](crate::DbError::ConnectionOpen)
    /// and are never retried by the factory.
    fn open_connection(&self, connection_string: &str) -> DbResult<Box<dyn Connection>>;
}

/// A physical connection owned by the factory.
///
/// Connections are not required to be `Send`; the factory keeps each one on the
/// thread that opened it.
pub trait Connection: Any {
    /// Close the connection. Called at most once by the factory.
    fn close(&mut self) -> DbResult<()>;

    fn is_closed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

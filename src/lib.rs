//! db-scope Library
//!
//! A multi-database connection factory. Connections are registered by name,
//! each with its own dialect, and opened as nestable scopes: opening a name
//! that is already open on the current thread shares its physical connection,
//! and the factory's policy decides whether a connection closes when its
//! outermost scope ends or stays cached for the next one.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, FactoryConfig, NamedConnection};
pub use db::{Connection, ConnectionFactory, ConnectionHandle, Dialect, DialectHandle, SlotPolicy};
pub use error::{DbError, DbResult};

//! Connection management.
//!
//! This module provides the factory and its collaborators:
//! - Dialect and physical connection traits (the driver seam)
//! - Named connection registry
//! - Per-thread scope stack and slots
//! - The connection factory and its scoped handles
//! - A sqlx-backed dialect for SQLite, PostgreSQL and MySQL
//! - Database dispatch macros for reducing code duplication

pub mod dialect;
pub mod factory;
#[macro_use]
pub mod macros;
pub mod registry;
pub mod scope;
pub mod sqlx_dialect;

pub use dialect::{Connection, Dialect, DialectHandle};
pub use factory::{ConnectionFactory, ConnectionHandle};
pub use registry::{ConnectionRegistry, RegistryEntry};
pub use scope::{ScopeStack, SlotPolicy, SlotState};
pub use sqlx_dialect::{DbConnection, SqlxConnection, SqlxDialect};

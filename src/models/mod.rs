//! Data models for the connection factory.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;

// Re-export commonly used types
pub use connection::{
    DEFAULT_CONNECTION_NAME, DatabaseType, is_default_name, mask_connection_string,
    validate_connection_name,
};

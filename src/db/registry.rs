//! Named connection registry.
//!
//! Maps logical connection names to a connection string and the dialect that
//! opens it. Populated at startup, read concurrently afterwards.

use crate::db::dialect::DialectHandle;
use crate::error::{DbError, DbResult};
use crate::models::{
    DEFAULT_CONNECTION_NAME, is_default_name, mask_connection_string, validate_connection_name,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// An immutable registry entry.
pub struct RegistryEntry {
    pub name: String,
    /// Contains sensitive data - never log, use [`RegistryEntry::masked_connection_string`]
    pub connection_string: String,
    pub dialect: DialectHandle,
}

impl RegistryEntry {
    pub fn masked_connection_string(&self) -> String {
        mask_connection_string(&self.connection_string)
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("connection_string", &self.masked_connection_string())
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, Arc<RegistryEntry>>>,
}

impl ConnectionRegistry {
    /// Create a registry holding only the default entry.
    pub fn new(default_connection_string: impl Into<String>, default_dialect: DialectHandle) -> Self {
        let entry = RegistryEntry {
            name: DEFAULT_CONNECTION_NAME.to_string(),
            connection_string: default_connection_string.into(),
            dialect: default_dialect,
        };
        let mut entries = HashMap::new();
        entries.insert(DEFAULT_CONNECTION_NAME.to_string(), Arc::new(entry));
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Register a named connection.
    ///
    /// The existence check and the insert happen under one write lock, so of
    /// several concurrent registrations of the same name exactly one succeeds.
    pub fn register(
        &self,
        name: &str,
        connection_string: impl Into<String>,
        dialect: DialectHandle,
    ) -> DbResult<()> {
        if is_default_name(name) {
            return Err(DbError::duplicate_name(DEFAULT_CONNECTION_NAME));
        }
        validate_connection_name(name).map_err(DbError::invalid_input)?;

        let entry = RegistryEntry {
            name: name.to_string(),
            connection_string: connection_string.into(),
            dialect,
        };

        let mut entries = self
            .entries
            .write()
            .map_err(|_| DbError::internal("Connection registry lock poisoned"))?;
        if entries.contains_key(name) {
            return Err(DbError::duplicate_name(name));
        }

        info!(
            name = %name,
            dialect = %entry.dialect.name(),
            connection = %entry.masked_connection_string(),
            "Registered connection"
        );
        entries.insert(name.to_string(), Arc::new(entry));
        Ok(())
    }

    /// Look up an entry. The empty name resolves to the default entry.
    pub fn resolve(&self, name: &str) -> DbResult<Arc<RegistryEntry>> {
        let key = if name.is_empty() {
            DEFAULT_CONNECTION_NAME
        } else {
            name
        };
        let entries = self
            .entries
            .read()
            .map_err(|_| DbError::internal("Connection registry lock poisoned"))?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| DbError::unknown_connection(name))
    }

    /// Check if a connection name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of registered connections, the default included.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }
}

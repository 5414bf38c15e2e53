//! Connection-related data models.
//!
//! This module defines the database engine detection and the naming rules shared
//! by the registry and the configuration layer.

/// Name under which the construction-time connection is registered.
pub const DEFAULT_CONNECTION_NAME: &str = "default";

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Detect the database type from a connection string scheme.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Query returning the engine version string.
    pub fn version_query(&self) -> &'static str {
        match self {
            Self::PostgreSQL | Self::MySQL => "SELECT version()",
            Self::SQLite => "SELECT sqlite_version()",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Returns true for the names that address the default connection.
pub fn is_default_name(name: &str) -> bool {
    name.is_empty() || name == DEFAULT_CONNECTION_NAME
}

/// Check that a connection name is usable as a registry key.
pub fn validate_connection_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Connection name cannot be empty".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(format!("Connection name contains invalid characters: {}", name));
    }
    Ok(())
}

/// Get a display-safe version of a connection string (credentials masked).
pub fn mask_connection_string(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.find('@') {
        if let Some(colon_pos) = connection_string[..at_pos].rfind(':') {
            // "scheme://user" has its colon before the authority; nothing to mask then
            if !connection_string[colon_pos..].starts_with("://") && colon_pos + 1 < at_pos {
                let prefix = &connection_string[..colon_pos + 1];
                let suffix = &connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
    }
    connection_string.to_string()
}

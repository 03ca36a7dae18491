//! Driver kind enumeration and backend descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResolverError;

/// The database engine a backend is served by.
///
/// The driver selects dialect-specific connection setup; the canonical
/// database identifier (a file path for SQLite, a connection string for the
/// network engines) is interpreted by the chosen driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Embedded file-based engine (SQLite).
    Sqlite,
    /// MySQL-compatible network engine.
    MySql,
    /// PostgreSQL network engine.
    Postgres,
}

impl FromStr for DriverKind {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" | "sqlite3" => Ok(DriverKind::Sqlite),
            "mysql" => Ok(DriverKind::MySql),
            "postgres" | "postgresql" => Ok(DriverKind::Postgres),
            other => Err(ResolverError::UnsupportedDriver {
                driver: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Sqlite => write!(f, "sqlite"),
            DriverKind::MySql => write!(f, "mysql"),
            DriverKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// One distinct physical database target derived from configuration.
///
/// There is exactly one descriptor per distinct canonical database
/// identifier, even when several tenants reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// The engine used to open the connection.
    pub driver: DriverKind,
    /// The canonical database identifier (file path or connection string).
    pub database: String,
}

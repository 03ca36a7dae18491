//! Bulk schema operations across all registered backends.
//!
//! A [`SchemaMigration`] is a caller-supplied schema-sync operation applied
//! to every backend in the registry. Per-backend failures are filtered
//! through a caller-supplied policy: tolerable failures are recorded and the
//! run continues with the next backend; a non-tolerable failure stops the
//! run and is returned to the caller as a fatal error. The operator never
//! terminates the process.

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::DbHandle;

/// A failure reported by a schema migration against one backend.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct MigrationError {
    message: String,
}

impl MigrationError {
    /// Creates a migration error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A schema-sync operation applied per backend.
///
/// Implementations dispatch on the handle's engine to issue the appropriate
/// dialect-specific statements.
#[async_trait]
pub trait SchemaMigration: Send + Sync {
    /// A short name used in logs and reports.
    fn name(&self) -> &str;

    /// Applies the migration to one backend.
    async fn apply(&self, db: &DbHandle) -> Result<(), MigrationError>;
}

/// Outcome of a bulk schema run.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Number of backends on which every migration succeeded.
    pub applied: usize,
    /// Backends skipped after a tolerable failure.
    pub skipped: Vec<SkippedBackend>,
}

/// One backend skipped by the failure policy during a bulk schema run.
#[derive(Debug)]
pub struct SkippedBackend {
    /// The canonical database identifier.
    pub database: String,
    /// The migration that failed.
    pub migration: String,
    /// The tolerated failure.
    pub error: MigrationError,
}

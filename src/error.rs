//! Error types for the database resolver.
//!
//! This module defines all error types used throughout the crate, split into
//! configuration-time errors ([`ConfigError`]) and resolution/runtime errors
//! ([`ResolverError`]).
//!
//! # Error Mapping
//!
//! Every resolver error that reaches the request-scope binder is converted to
//! an HTTP 500 response carrying the error message, so a misconfigured or
//! unknown tenant never crashes the process:
//!
//! | Error | When |
//! |-------|------|
//! | `UnsupportedDriver` | Initialization with an unknown driver kind |
//! | `Connection` | A backend could not be opened at startup |
//! | `UnknownTenant` | Request API key has no configuration entry |
//! | `MissingDatabaseKey` | Tenant entry lacks the `database` key |
//! | `NoConnection` | No open handle for a resolved identifier (internal inconsistency) |
//! | `NotBound` | Scope accessor called before the binder ran |
//! | `MigrationAborted` | Bulk schema run hit a non-tolerable failure |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::migrate::MigrationError;

/// Convenience alias for results produced by this crate.
pub type ResolveResult<T> = Result<T, ResolverError>;

/// The primary error type for resolver operations.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The configuration named a driver kind this build does not support.
    #[error("unsupported database driver: {driver}")]
    UnsupportedDriver {
        /// The driver name as it appeared in the configuration.
        driver: String,
    },

    /// Opening a backend connection failed during initialization.
    #[error("failed to open database {database:?}: {message}")]
    Connection {
        /// The canonical database identifier that failed to open.
        database: String,
        /// The underlying driver error message.
        message: String,
    },

    /// The API key has no configuration entry.
    #[error("no database configuration found for API key {api_key:?}")]
    UnknownTenant {
        /// The API key presented by the request.
        api_key: String,
    },

    /// The tenant's configuration entry lacks the `database` key.
    #[error("no database specified for API key {api_key:?}")]
    MissingDatabaseKey {
        /// The API key whose entry is incomplete.
        api_key: String,
    },

    /// A resolved identifier has no open handle in the registry.
    ///
    /// This cannot happen for a configuration that initialized successfully;
    /// seeing it signals an internal inconsistency.
    #[error("no open connection for database {database:?}")]
    NoConnection {
        /// The canonical database identifier that had no handle.
        database: String,
    },

    /// A scope accessor was called before the binder ran for this request.
    #[error("no database bound to the current request")]
    NotBound,

    /// A bulk schema run failed and the caller's policy marked the failure
    /// non-tolerable.
    #[error("schema migration aborted on database {database:?}: {source}")]
    MigrationAborted {
        /// The backend on which the run stopped.
        database: String,
        /// The migration failure that triggered the abort.
        #[source]
        source: MigrationError,
    },

    /// Configuration loading or validation errors.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors produced while loading or validating tenant configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document is not valid YAML.
    #[error("failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A tenant entry is missing one of its required keys.
    #[error("tenant {tenant:?} is missing required key {key:?}")]
    MissingKey {
        /// The tenant whose entry is incomplete.
        tenant: String,
        /// The missing key (`driver` or `database`).
        key: &'static str,
    },

    /// The configuration maps an empty string as a tenant key.
    #[error("configuration contains an empty tenant key")]
    EmptyTenantKey,
}

impl IntoResponse for ResolverError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

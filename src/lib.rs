//! # dbrouter - Per-request database routing for multi-tenant servers
//!
//! This crate routes incoming HTTP requests to one of several backing
//! database connections based on a per-request API key carried in a header
//! or query parameter, so a single application server can serve multiple
//! tenants, each with its own isolated database, without duplicating
//! application logic.
//!
//! ## How It Works
//!
//! 1. A [`DatabaseConfig`] maps each API key to a driver kind and a
//!    canonical database identifier (a file path or connection string).
//! 2. [`DbResolver::initialize`] opens exactly one pooled connection per
//!    distinct identifier at startup. Tenants sharing an identifier share
//!    one handle; any open failure aborts initialization.
//! 3. The [`middleware::resolve_db`] binder runs per request: it extracts
//!    the API key, resolves it, and attaches a [`RequestDb`] to the request
//!    scope. Unknown or misconfigured tenants get a server error before the
//!    downstream handler runs.
//! 4. Handlers read the bound connection through the [`RequestDb`]
//!    extractor or the [`DbResolver`] accessors.
//! 5. [`DbResolver::apply_to_all`] applies schema migrations across every
//!    backend with a caller-supplied failure policy.
//!
//! ## Driver Support
//!
//! Backends are selected through feature flags:
//!
//! - `sqlite` - embedded file-based engine (default)
//! - `mysql` - MySQL-compatible network engine
//! - `postgres` - PostgreSQL network engine
//! - `full` - all of the above
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{Router, middleware as axum_middleware, routing::get};
//! use dbrouter::{DatabaseConfig, DbResolver, RequestDb, middleware::resolve_db};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DatabaseConfig::from_yaml_file("dbrouter.yaml")?;
//!     let resolver = Arc::new(
//!         DbResolver::builder(config)
//!             .api_key_source("apikey")
//!             .build()
//!             .await?,
//!     );
//!
//!     let app = Router::new()
//!         .route("/", get(|db: RequestDb| async move { db.database().to_string() }))
//!         .layer(axum_middleware::from_fn_with_state(
//!             Arc::clone(&resolver),
//!             resolve_db,
//!         ))
//!         .with_state(resolver);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! The tenant map and the backend registry are built once before request
//! serving begins and are read-only afterwards, so resolution needs no
//! locking. Every connection handle wraps a pool that supports concurrent
//! use; the request scope is request-local and never crosses request
//! boundaries.

// Enforce documentation
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod driver;
pub mod error;
pub mod middleware;
pub mod migrate;
pub mod registry;
pub mod resolver;
pub mod scope;

// Re-export commonly used types
pub use config::{DatabaseConfig, TenantEntry};
pub use driver::{BackendDescriptor, DriverKind};
pub use error::{ConfigError, ResolveResult, ResolverError};
pub use migrate::{MigrationError, MigrationReport, SchemaMigration, SkippedBackend};
pub use registry::{BackendRegistry, DbHandle, EngineOptions};
pub use resolver::{DEFAULT_API_KEY_SOURCE, DbResolver, DbResolverBuilder};
pub use scope::RequestDb;

/// Initializes the tracing subscriber for logging.
///
/// This should be called once at application startup.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dbrouter={},tower_http=debug", level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

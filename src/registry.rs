//! Backend registry: one pooled connection handle per distinct database.
//!
//! The registry is built once at startup from the resolved configuration and
//! is read-only afterwards; handles live for the process's lifetime and are
//! shared by all concurrently executing requests resolved to them. Each
//! handle wraps a connection pool that is concurrency-safe by design, so the
//! registry itself needs no locking.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "sqlite")]
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::driver::{BackendDescriptor, DriverKind};
use crate::error::{ResolveResult, ResolverError};

#[cfg(not(any(feature = "sqlite", feature = "mysql", feature = "postgres")))]
compile_error!("at least one database backend feature must be enabled: sqlite, mysql, postgres");

/// Connection-open parameters shared by all backends.
///
/// Passed at resolver construction time to override the defaults; the same
/// options apply to every backend the registry opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Maximum number of connections per pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections per pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Timeout for establishing a connection, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl EngineOptions {
    /// Sets the maximum pool size.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of idle connections.
    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connect timeout in seconds.
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }
}

/// A pooled connection handle for one physical database.
///
/// The variant selects the engine; all variants are internally pooled and
/// safe for concurrent use from many requests at once.
pub enum DbHandle {
    /// SQLite connection pool.
    #[cfg(feature = "sqlite")]
    Sqlite(r2d2::Pool<SqliteConnectionManager>),
    /// MySQL connection pool.
    #[cfg(feature = "mysql")]
    MySql(mysql_async::Pool),
    /// PostgreSQL connection pool.
    #[cfg(feature = "postgres")]
    Postgres(deadpool_postgres::Pool),
}

impl Debug for DbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbHandle")
            .field("driver", &self.driver())
            .finish_non_exhaustive()
    }
}

impl DbHandle {
    /// Returns the engine this handle connects to.
    pub fn driver(&self) -> DriverKind {
        match self {
            #[cfg(feature = "sqlite")]
            DbHandle::Sqlite(_) => DriverKind::Sqlite,
            #[cfg(feature = "mysql")]
            DbHandle::MySql(_) => DriverKind::MySql,
            #[cfg(feature = "postgres")]
            DbHandle::Postgres(_) => DriverKind::Postgres,
        }
    }

    /// Returns the SQLite pool if this handle is a SQLite backend.
    #[cfg(feature = "sqlite")]
    pub fn as_sqlite(&self) -> Option<&r2d2::Pool<SqliteConnectionManager>> {
        match self {
            DbHandle::Sqlite(pool) => Some(pool),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Returns the MySQL pool if this handle is a MySQL backend.
    #[cfg(feature = "mysql")]
    pub fn as_mysql(&self) -> Option<&mysql_async::Pool> {
        match self {
            DbHandle::MySql(pool) => Some(pool),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Returns the PostgreSQL pool if this handle is a PostgreSQL backend.
    #[cfg(feature = "postgres")]
    pub fn as_postgres(&self) -> Option<&deadpool_postgres::Pool> {
        match self {
            DbHandle::Postgres(pool) => Some(pool),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Opens a pooled handle for one backend descriptor.
    pub(crate) async fn open(
        descriptor: &BackendDescriptor,
        options: &EngineOptions,
    ) -> ResolveResult<Self> {
        match descriptor.driver {
            #[cfg(feature = "sqlite")]
            DriverKind::Sqlite => Self::open_sqlite(&descriptor.database, options),
            #[cfg(feature = "mysql")]
            DriverKind::MySql => Self::open_mysql(&descriptor.database, options).await,
            #[cfg(feature = "postgres")]
            DriverKind::Postgres => Self::open_postgres(&descriptor.database, options).await,
            #[allow(unreachable_patterns)]
            other => Err(ResolverError::UnsupportedDriver {
                driver: other.to_string(),
            }),
        }
    }

    #[cfg(feature = "sqlite")]
    fn open_sqlite(database: &str, options: &EngineOptions) -> ResolveResult<Self> {
        let manager = if database == ":memory:" {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(database)
        };

        let pool = r2d2::Pool::builder()
            .max_size(options.max_connections)
            .min_idle(Some(options.min_connections))
            .connection_timeout(Duration::from_secs(options.connect_timeout_secs))
            .build(manager)
            .map_err(|e| ResolverError::Connection {
                database: database.to_string(),
                message: e.to_string(),
            })?;

        Ok(DbHandle::Sqlite(pool))
    }

    #[cfg(feature = "mysql")]
    async fn open_mysql(database: &str, options: &EngineOptions) -> ResolveResult<Self> {
        let conn_err = |message: String| ResolverError::Connection {
            database: database.to_string(),
            message,
        };

        let opts = mysql_async::Opts::from_url(database).map_err(|e| conn_err(e.to_string()))?;
        let mut builder = mysql_async::OptsBuilder::from_opts(opts);
        if let Some(constraints) = mysql_async::PoolConstraints::new(
            options.min_connections as usize,
            options.max_connections as usize,
        ) {
            builder =
                builder.pool_opts(mysql_async::PoolOpts::default().with_constraints(constraints));
        }

        let pool = mysql_async::Pool::new(builder);

        // The pool is lazy; take one connection so credential and host
        // failures abort initialization.
        let conn = pool
            .get_conn()
            .await
            .map_err(|e| conn_err(e.to_string()))?;
        drop(conn);

        Ok(DbHandle::MySql(pool))
    }

    #[cfg(feature = "postgres")]
    async fn open_postgres(database: &str, options: &EngineOptions) -> ResolveResult<Self> {
        let conn_err = |message: String| ResolverError::Connection {
            database: database.to_string(),
            message,
        };

        let pg_config = database
            .parse::<tokio_postgres::Config>()
            .map_err(|e| conn_err(e.to_string()))?;
        let manager = deadpool_postgres::Manager::from_config(
            pg_config,
            tokio_postgres::NoTls,
            deadpool_postgres::ManagerConfig {
                recycling_method: deadpool_postgres::RecyclingMethod::Fast,
            },
        );
        let pool = deadpool_postgres::Pool::builder(manager)
            .max_size(options.max_connections as usize)
            .create_timeout(Some(Duration::from_secs(options.connect_timeout_secs)))
            .build()
            .map_err(|e| conn_err(e.to_string()))?;

        // Verify connectivity; deadpool connects lazily.
        let client = pool.get().await.map_err(|e| conn_err(e.to_string()))?;
        drop(client);

        Ok(DbHandle::Postgres(pool))
    }
}

/// Registry of open connection handles, keyed by canonical database
/// identifier.
pub struct BackendRegistry {
    handles: HashMap<String, Arc<DbHandle>>,
}

impl Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("databases", &self.databases())
            .finish()
    }
}

impl BackendRegistry {
    /// Opens one connection per distinct database referenced by the
    /// configuration.
    ///
    /// Any single open failure aborts the whole initialization; no partial
    /// registry is returned.
    pub async fn initialize(
        config: &DatabaseConfig,
        options: &EngineOptions,
    ) -> ResolveResult<Self> {
        let mut handles = HashMap::new();

        for descriptor in config.descriptors()? {
            let handle = DbHandle::open(&descriptor, options).await?;
            info!(
                database = %descriptor.database,
                driver = %descriptor.driver,
                "opened database backend"
            );
            handles.insert(descriptor.database, Arc::new(handle));
        }

        Ok(Self { handles })
    }

    /// Returns the handle for a canonical database identifier.
    pub fn get(&self, database: &str) -> Option<Arc<DbHandle>> {
        self.handles.get(database).map(Arc::clone)
    }

    /// Iterates over `(database, handle)` pairs in unspecified order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Arc<DbHandle>)> {
        self.handles.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the registered database identifiers, sorted.
    pub fn databases(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of distinct backends.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if the registry holds no backends.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_in_memory() {
        let config = DatabaseConfig::new().with_tenant("k1", "sqlite", ":memory:");
        let registry = BackendRegistry::initialize(&config, &EngineOptions::default())
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.databases(), vec![":memory:"]);
        assert_eq!(
            registry.get(":memory:").unwrap().driver(),
            DriverKind::Sqlite
        );
    }

    #[tokio::test]
    async fn test_shared_database_one_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db").display().to_string();
        let config = DatabaseConfig::new()
            .with_tenant("k1", "sqlite", &path)
            .with_tenant("k2", "sqlite", &path);
        let registry = BackendRegistry::initialize(&config, &EngineOptions::default())
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_driver_aborts() {
        let config = DatabaseConfig::new()
            .with_tenant("k1", "sqlite", ":memory:")
            .with_tenant("k2", "oracle", "whatever");
        let err = BackendRegistry::initialize(&config, &EngineOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::UnsupportedDriver { .. }));
    }

    #[tokio::test]
    async fn test_open_failure_aborts() {
        // A path inside a directory that does not exist cannot be created.
        let config =
            DatabaseConfig::new().with_tenant("k1", "sqlite", "/no/such/directory/tenant.db");
        let options = EngineOptions::default().with_connect_timeout_secs(1);
        let err = BackendRegistry::initialize(&config, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Connection { .. }));
    }

    #[test]
    fn test_engine_options_builder() {
        let options = EngineOptions::default()
            .with_max_connections(4)
            .with_min_connections(2)
            .with_connect_timeout_secs(5);
        assert_eq!(options.max_connections, 4);
        assert_eq!(options.min_connections, 2);
        assert_eq!(options.connect_timeout_secs, 5);
    }
}

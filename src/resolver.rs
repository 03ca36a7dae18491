//! Tenant-to-database resolution.
//!
//! [`DbResolver`] owns the tenant map and the backend registry. Resolution
//! is two deterministic in-memory lookups: API key to canonical database
//! identifier, then identifier to open handle. Both structures are built
//! once at startup and read-only afterwards, so resolution needs no locking
//! and performs no retries.

use std::sync::Arc;

use http::Extensions;
use tracing::warn;

use crate::config::DatabaseConfig;
use crate::error::{ResolveResult, ResolverError};
use crate::migrate::{MigrationError, MigrationReport, SchemaMigration, SkippedBackend};
use crate::registry::{BackendRegistry, DbHandle, EngineOptions};
use crate::scope::RequestDb;

/// Default name of the header and query parameter carrying the API key.
pub const DEFAULT_API_KEY_SOURCE: &str = "x-api-key";

/// Routes API keys to pooled database connection handles.
#[derive(Debug)]
pub struct DbResolver {
    config: DatabaseConfig,
    registry: BackendRegistry,
    api_key_source: String,
}

/// Builder for [`DbResolver`].
///
/// The API key source name and engine options are fixed at construction
/// time, so several resolvers with different settings can coexist in one
/// process.
#[derive(Debug)]
pub struct DbResolverBuilder {
    config: DatabaseConfig,
    api_key_source: String,
    engine_options: EngineOptions,
}

impl DbResolverBuilder {
    /// Changes the header/query-parameter name the binder reads the API key
    /// from. Defaults to `x-api-key`.
    pub fn api_key_source(mut self, name: impl Into<String>) -> Self {
        self.api_key_source = name.into();
        self
    }

    /// Overrides the default connection-open parameters for all backends.
    pub fn engine_options(mut self, options: EngineOptions) -> Self {
        self.engine_options = options;
        self
    }

    /// Opens every configured backend and returns the resolver.
    ///
    /// Fails without a partial registry if any backend cannot be opened or a
    /// configuration entry is invalid.
    pub async fn build(self) -> ResolveResult<DbResolver> {
        let registry = BackendRegistry::initialize(&self.config, &self.engine_options).await?;
        Ok(DbResolver {
            config: self.config,
            registry,
            api_key_source: self.api_key_source,
        })
    }
}

impl DbResolver {
    /// Starts building a resolver for the given configuration.
    pub fn builder(config: DatabaseConfig) -> DbResolverBuilder {
        DbResolverBuilder {
            config,
            api_key_source: DEFAULT_API_KEY_SOURCE.to_string(),
            engine_options: EngineOptions::default(),
        }
    }

    /// Builds a resolver with default options.
    pub async fn initialize(config: DatabaseConfig) -> ResolveResult<Self> {
        Self::builder(config).build().await
    }

    /// Returns the configured API key source name.
    pub fn api_key_source(&self) -> &str {
        &self.api_key_source
    }

    /// Returns the backend registry.
    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Resolves an API key to its tenant's connection handle.
    ///
    /// Every call for the same key returns the same handle; two tenants
    /// configured with the same canonical identifier share one handle.
    pub fn resolve_connection(&self, api_key: &str) -> ResolveResult<Arc<DbHandle>> {
        let database = self.resolve_database_name(api_key)?;
        self.registry
            .get(database)
            .ok_or_else(|| ResolverError::NoConnection {
                database: database.to_string(),
            })
    }

    /// Resolves an API key to its tenant's canonical database identifier.
    pub fn resolve_database_name(&self, api_key: &str) -> ResolveResult<&str> {
        let entry = self
            .config
            .get(api_key)
            .ok_or_else(|| ResolverError::UnknownTenant {
                api_key: api_key.to_string(),
            })?;
        entry
            .database
            .as_deref()
            .ok_or_else(|| ResolverError::MissingDatabaseKey {
                api_key: api_key.to_string(),
            })
    }

    /// Reads the connection handle bound to the current request.
    ///
    /// Returns [`ResolverError::NotBound`] when the request-scope binder has
    /// not run for this request.
    pub fn current_connection(&self, extensions: &Extensions) -> ResolveResult<Arc<DbHandle>> {
        extensions
            .get::<RequestDb>()
            .map(|db| Arc::clone(db.handle()))
            .ok_or(ResolverError::NotBound)
    }

    /// Reads the database identifier bound to the current request.
    pub fn current_database_name(&self, extensions: &Extensions) -> ResolveResult<String> {
        extensions
            .get::<RequestDb>()
            .map(|db| db.database().to_string())
            .ok_or(ResolverError::NotBound)
    }

    /// Applies the given migrations to every backend in the registry.
    ///
    /// Iteration order across backends is unspecified. On a per-backend
    /// failure the policy decides: `true` tolerates the failure (the backend
    /// is recorded as skipped and the run continues), `false` stops the run
    /// immediately with [`ResolverError::MigrationAborted`].
    pub async fn apply_to_all<P>(
        &self,
        migrations: &[&dyn SchemaMigration],
        mut policy: P,
    ) -> ResolveResult<MigrationReport>
    where
        P: FnMut(&MigrationError) -> bool,
    {
        let mut report = MigrationReport::default();

        'backends: for (database, handle) in self.registry.iter() {
            for migration in migrations {
                if let Err(err) = migration.apply(handle).await {
                    if policy(&err) {
                        warn!(
                            database,
                            migration = migration.name(),
                            error = %err,
                            "schema migration skipped"
                        );
                        report.skipped.push(SkippedBackend {
                            database: database.to_string(),
                            migration: migration.name().to_string(),
                            error: err,
                        });
                        continue 'backends;
                    }
                    return Err(ResolverError::MigrationAborted {
                        database: database.to_string(),
                        source: err,
                    });
                }
            }
            report.applied += 1;
        }

        Ok(report)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::TenantEntry;

    async fn resolver_for(config: DatabaseConfig) -> DbResolver {
        DbResolver::initialize(config).await.unwrap()
    }

    fn shared_config(dir: &tempfile::TempDir) -> (DatabaseConfig, String, String) {
        let a = dir.path().join("a.db").display().to_string();
        let b = dir.path().join("b.db").display().to_string();
        let config = DatabaseConfig::new()
            .with_tenant("k1", "sqlite", &a)
            .with_tenant("k2", "sqlite", &a)
            .with_tenant("k3", "sqlite", &b);
        (config, a, b)
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (config, a, _) = shared_config(&dir);
        let resolver = resolver_for(config).await;

        let first = resolver.resolve_connection("k1").unwrap();
        let second = resolver.resolve_connection("k1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.resolve_database_name("k1").unwrap(), a);
    }

    #[tokio::test]
    async fn test_shared_database_shares_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _, _) = shared_config(&dir);
        let resolver = resolver_for(config).await;

        let h1 = resolver.resolve_connection("k1").unwrap();
        let h2 = resolver.resolve_connection("k2").unwrap();
        let h3 = resolver.resolve_connection("k3").unwrap();
        assert!(Arc::ptr_eq(&h1, &h2));
        assert!(!Arc::ptr_eq(&h1, &h3));
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let config = DatabaseConfig::new().with_tenant("k1", "sqlite", ":memory:");
        let resolver = resolver_for(config).await;

        let err = resolver.resolve_connection("nobody").unwrap_err();
        assert!(matches!(err, ResolverError::UnknownTenant { .. }));

        // The empty key never resolves either.
        let err = resolver.resolve_connection("").unwrap_err();
        assert!(matches!(err, ResolverError::UnknownTenant { .. }));
    }

    #[tokio::test]
    async fn test_missing_database_key_and_no_connection() {
        // Hand-assemble a resolver whose config disagrees with its registry
        // to exercise the defensive paths that a successful initialization
        // rules out.
        let seed = resolver_for(DatabaseConfig::new().with_tenant("k1", "sqlite", ":memory:"))
            .await;

        let mut config = DatabaseConfig::new().with_tenant("ghost", "sqlite", "ghost.db");
        config.insert(
            "broken",
            TenantEntry {
                driver: Some("sqlite".to_string()),
                database: None,
                extra: Default::default(),
            },
        );
        let resolver = DbResolver {
            config,
            registry: seed.registry,
            api_key_source: DEFAULT_API_KEY_SOURCE.to_string(),
        };

        // "broken" has no database key.
        let err = resolver.resolve_connection("broken").unwrap_err();
        assert!(matches!(err, ResolverError::MissingDatabaseKey { .. }));

        // "ghost" maps to a database the registry never opened.
        let err = resolver.resolve_connection("ghost").unwrap_err();
        assert!(matches!(err, ResolverError::NoConnection { .. }));
    }

    #[tokio::test]
    async fn test_api_key_source_configuration() {
        let config = DatabaseConfig::new().with_tenant("k1", "sqlite", ":memory:");
        let resolver = DbResolver::builder(config)
            .api_key_source("apikey")
            .build()
            .await
            .unwrap();
        assert_eq!(resolver.api_key_source(), "apikey");
    }

    #[tokio::test]
    async fn test_default_api_key_source() {
        let config = DatabaseConfig::new().with_tenant("k1", "sqlite", ":memory:");
        let resolver = resolver_for(config).await;
        assert_eq!(resolver.api_key_source(), DEFAULT_API_KEY_SOURCE);
    }

    #[tokio::test]
    async fn test_current_accessors_unbound() {
        let config = DatabaseConfig::new().with_tenant("k1", "sqlite", ":memory:");
        let resolver = resolver_for(config).await;
        let extensions = Extensions::new();

        assert!(matches!(
            resolver.current_connection(&extensions).unwrap_err(),
            ResolverError::NotBound
        ));
        assert!(matches!(
            resolver.current_database_name(&extensions).unwrap_err(),
            ResolverError::NotBound
        ));
    }

    struct FailingMigration {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SchemaMigration for FailingMigration {
        fn name(&self) -> &str {
            "always fails"
        }

        async fn apply(&self, _db: &DbHandle) -> Result<(), MigrationError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(MigrationError::new("boom"))
        }
    }

    fn three_backend_config(dir: &tempfile::TempDir) -> DatabaseConfig {
        let mut config = DatabaseConfig::new();
        for name in ["a", "b", "c"] {
            let path = dir.path().join(format!("{name}.db")).display().to_string();
            config = config.with_tenant(format!("key-{name}"), "sqlite", path);
        }
        config
    }

    #[tokio::test]
    async fn test_apply_to_all_tolerant_policy_visits_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_for(three_backend_config(&dir)).await;
        let migration = FailingMigration {
            attempts: AtomicUsize::new(0),
        };

        let report = resolver
            .apply_to_all(&[&migration], |_| true)
            .await
            .unwrap();
        assert_eq!(migration.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped.len(), 3);
    }

    #[tokio::test]
    async fn test_apply_to_all_fatal_policy_stops_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_for(three_backend_config(&dir)).await;
        let migration = FailingMigration {
            attempts: AtomicUsize::new(0),
        };

        let err = resolver
            .apply_to_all(&[&migration], |_| false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::MigrationAborted { .. }));
        assert_eq!(migration.attempts.load(Ordering::SeqCst), 1);
    }

    struct CreateMarker;

    #[async_trait]
    impl SchemaMigration for CreateMarker {
        fn name(&self) -> &str {
            "create marker table"
        }

        async fn apply(&self, db: &DbHandle) -> Result<(), MigrationError> {
            match db {
                DbHandle::Sqlite(pool) => {
                    let conn = pool.get().map_err(|e| MigrationError::new(e.to_string()))?;
                    conn.execute("CREATE TABLE IF NOT EXISTS marker (id INTEGER)", [])
                        .map_err(|e| MigrationError::new(e.to_string()))?;
                    Ok(())
                }
                #[allow(unreachable_patterns)]
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_apply_to_all_success_counts_backends() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_for(three_backend_config(&dir)).await;

        let report = resolver.apply_to_all(&[&CreateMarker], |_| false).await.unwrap();
        assert_eq!(report.applied, 3);
        assert!(report.skipped.is_empty());
    }
}

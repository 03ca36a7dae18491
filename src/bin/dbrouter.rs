//! Demo HTTP server routing each request to its tenant's database.
//!
//! Reads a YAML tenant configuration, opens every backend at startup, syncs
//! a small `todos` schema across all of them, and serves two endpoints:
//!
//! - `GET /` - the database identifier and driver bound to the request
//! - `GET /todos` - the rows of the tenant's `todos` table
//!
//! The API key is read from the configured header, falling back to the
//! query parameter of the same name.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    http::StatusCode,
    middleware as axum_middleware,
    routing::get,
};
use clap::Parser;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use dbrouter::{
    DatabaseConfig, DbHandle, DbResolver, MigrationError, RequestDb, SchemaMigration,
    middleware::resolve_db,
};

#[cfg(feature = "mysql")]
use mysql_async::prelude::Queryable;

/// Server configuration, from command line arguments or environment.
#[derive(Debug, Parser)]
#[command(name = "dbrouter")]
#[command(about = "Multi-tenant database routing demo server")]
struct ServerConfig {
    /// Port to listen on.
    #[arg(short, long, env = "DBROUTER_PORT", default_value = "8080")]
    port: u16,

    /// Host address to bind to.
    #[arg(long, env = "DBROUTER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Path to the YAML tenant configuration.
    #[arg(short, long, env = "DBROUTER_CONFIG", default_value = "dbrouter.yaml")]
    config: PathBuf,

    /// Name of the header and query parameter carrying the API key.
    #[arg(long, env = "DBROUTER_API_KEY_SOURCE", default_value = "x-api-key")]
    api_key_source: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "DBROUTER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable CORS.
    #[arg(long, env = "DBROUTER_ENABLE_CORS", default_value = "false")]
    enable_cors: bool,
}

#[derive(Debug, Serialize)]
struct Todo {
    id: i64,
    name: String,
    completed: bool,
}

#[derive(Debug, Serialize)]
struct BoundDatabase {
    database: String,
    driver: String,
}

/// Creates the `todos` table on every backend.
struct CreateTodos;

#[async_trait]
impl SchemaMigration for CreateTodos {
    fn name(&self) -> &str {
        "create todos table"
    }

    async fn apply(&self, db: &DbHandle) -> Result<(), MigrationError> {
        match db {
            #[cfg(feature = "sqlite")]
            DbHandle::Sqlite(pool) => {
                let conn = pool.get().map_err(|e| MigrationError::new(e.to_string()))?;
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS todos (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        name TEXT NOT NULL,
                        completed INTEGER NOT NULL DEFAULT 0
                    )",
                    [],
                )
                .map_err(|e| MigrationError::new(e.to_string()))?;
                Ok(())
            }
            #[cfg(feature = "mysql")]
            DbHandle::MySql(pool) => {
                let mut conn = pool
                    .get_conn()
                    .await
                    .map_err(|e| MigrationError::new(e.to_string()))?;
                conn.query_drop(
                    "CREATE TABLE IF NOT EXISTS todos (
                        id BIGINT AUTO_INCREMENT PRIMARY KEY,
                        name VARCHAR(255) NOT NULL,
                        completed BOOLEAN NOT NULL DEFAULT FALSE
                    )",
                )
                .await
                .map_err(|e| MigrationError::new(e.to_string()))?;
                Ok(())
            }
            #[cfg(feature = "postgres")]
            DbHandle::Postgres(pool) => {
                let client = pool
                    .get()
                    .await
                    .map_err(|e| MigrationError::new(e.to_string()))?;
                client
                    .execute(
                        "CREATE TABLE IF NOT EXISTS todos (
                            id BIGSERIAL PRIMARY KEY,
                            name TEXT NOT NULL,
                            completed BOOLEAN NOT NULL DEFAULT FALSE
                        )",
                        &[],
                    )
                    .await
                    .map_err(|e| MigrationError::new(e.to_string()))?;
                Ok(())
            }
        }
    }
}

fn internal_error(err: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

async fn current_database(db: RequestDb) -> Json<BoundDatabase> {
    Json(BoundDatabase {
        database: db.database().to_string(),
        driver: db.handle().driver().to_string(),
    })
}

async fn list_todos(db: RequestDb) -> Result<Json<Vec<Todo>>, (StatusCode, String)> {
    let todos = match db.handle().as_ref() {
        #[cfg(feature = "sqlite")]
        DbHandle::Sqlite(pool) => {
            let pool = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<Vec<Todo>, anyhow::Error> {
                let conn = pool.get()?;
                let mut stmt =
                    conn.prepare("SELECT id, name, completed FROM todos ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(Todo {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        completed: row.get(2)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(internal_error)?
            .map_err(internal_error)?
        }
        #[cfg(feature = "mysql")]
        DbHandle::MySql(pool) => {
            let mut conn = pool.get_conn().await.map_err(internal_error)?;
            conn.query_map(
                "SELECT id, name, completed FROM todos ORDER BY id",
                |(id, name, completed): (i64, String, bool)| Todo {
                    id,
                    name,
                    completed,
                },
            )
            .await
            .map_err(internal_error)?
        }
        #[cfg(feature = "postgres")]
        DbHandle::Postgres(pool) => {
            let client = pool.get().await.map_err(internal_error)?;
            let rows = client
                .query("SELECT id, name, completed FROM todos ORDER BY id", &[])
                .await
                .map_err(internal_error)?;
            rows.iter()
                .map(|row| Todo {
                    id: row.get(0),
                    name: row.get(1),
                    completed: row.get(2),
                })
                .collect()
        }
    };

    Ok(Json(todos))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerConfig::parse();
    dbrouter::init_logging(&args.log_level);

    let config = DatabaseConfig::from_yaml_file(&args.config)?;
    info!(tenants = config.len(), config = %args.config.display(), "loaded tenant configuration");

    let resolver = Arc::new(
        DbResolver::builder(config)
            .api_key_source(&args.api_key_source)
            .build()
            .await?,
    );

    // Duplicate-object errors are tolerable on restart; anything else is
    // fatal for startup.
    let report = resolver
        .apply_to_all(&[&CreateTodos], |err| {
            err.message().contains("already exists")
        })
        .await?;
    info!(
        applied = report.applied,
        skipped = report.skipped.len(),
        "schema sync complete"
    );

    let router = Router::new()
        .route("/", get(current_database))
        .route("/todos", get(list_todos))
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&resolver),
            resolve_db,
        ))
        .with_state(Arc::clone(&resolver));

    let router = if args.enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    let app = router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, api_key_source = %args.api_key_source, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

//! Request-scope binder middleware.
//!
//! For every inbound request the binder reads the API key from the
//! configured header, falling back to the query parameter of the same name
//! when the header is absent or empty, resolves it to a connection handle,
//! and attaches a [`RequestDb`] to the request before invoking the
//! downstream handler. Resolution failures short-circuit the request with a
//! server error response carrying the failure message.
//!
//! Hook the binder into a router with `from_fn_with_state`:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{Router, middleware, routing::get};
//! use dbrouter::{DbResolver, middleware::resolve_db};
//!
//! let resolver: Arc<DbResolver> = /* built at startup */;
//! let app: Router = Router::new()
//!     .route("/", get(handler))
//!     .layer(middleware::from_fn_with_state(Arc::clone(&resolver), resolve_db))
//!     .with_state(resolver);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::resolver::DbResolver;
use crate::scope::RequestDb;

/// Binds the resolved connection handle and database identifier to the
/// request, or rejects the request with a server error.
pub async fn resolve_db(
    State(resolver): State<Arc<DbResolver>>,
    Query(query): Query<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Response {
    let source = resolver.api_key_source();

    let api_key = request
        .headers()
        .get(source)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .or_else(|| query.get(source).filter(|s| !s.is_empty()).cloned())
        .unwrap_or_default();

    let bound = resolver
        .resolve_database_name(&api_key)
        .map(str::to_owned)
        .and_then(|database| {
            let handle = resolver.resolve_connection(&api_key)?;
            Ok(RequestDb::new(handle, database))
        });

    match bound {
        Ok(db) => {
            debug!(database = db.database(), "bound request to tenant database");
            request.extensions_mut().insert(db);
            next.run(request).await
        }
        Err(err) => {
            warn!(api_key_source = source, error = %err, "failed to bind tenant database");
            err.into_response()
        }
    }
}

//! Request-scoped database binding.
//!
//! The request-scope binder attaches a [`RequestDb`] to each successfully
//! resolved request. Downstream handlers read it either through the
//! [`crate::DbResolver`] accessors or by taking `RequestDb` as an axum
//! extractor. The scope is created at request entry and discarded at request
//! exit; it is never shared across requests.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};

use crate::registry::DbHandle;

/// The connection handle and database identifier bound to one request.
#[derive(Debug, Clone)]
pub struct RequestDb {
    handle: Arc<DbHandle>,
    database: String,
}

impl RequestDb {
    pub(crate) fn new(handle: Arc<DbHandle>, database: String) -> Self {
        Self { handle, database }
    }

    /// Returns the bound connection handle.
    pub fn handle(&self) -> &Arc<DbHandle> {
        &self.handle
    }

    /// Returns the canonical database identifier for this request's tenant.
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl<S> FromRequestParts<S> for RequestDb
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestDb>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "no database bound to the current request",
        ))
    }
}

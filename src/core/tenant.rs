//! Tenant resolution.
//!
//! A tenant can arrive as a `/t/{tenant}` path prefix, an `x-tenant-id`
//! header, or a `tenant` query parameter, checked in that order. Requests
//! naming none of them use the configured default tenant.

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, uri::PathAndQuery, Request, Uri},
};
use log::debug;
use std::sync::Arc;

use crate::core::shared::error::ApiError;
use crate::core::shared::state::AppState;
use crate::security::sql_guard::{validate_tenant, SqlGuardError};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const TENANT_QUERY_PARAM: &str = "tenant";
pub const TENANT_PATH_PREFIX: &str = "/t/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    Path,
    Header,
    Query,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    schema: String,
    pub source: TenantSource,
}

impl TenantContext {
    pub fn new(raw: &str, source: TenantSource) -> Result<Self, SqlGuardError> {
        Ok(Self {
            schema: validate_tenant(raw)?,
            source,
        })
    }

    /// Validated, lower-cased schema name.
    pub fn schema(&self) -> &str {
        &self.schema
    }
}

impl std::fmt::Display for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.schema)
    }
}

/// Tenant captured from a `/t/{tenant}` prefix before routing.
#[derive(Debug, Clone)]
pub struct PathTenant(pub String);

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn resolve_tenant(
    path: Option<&str>,
    header: Option<&str>,
    query: Option<&str>,
    default_tenant: &str,
) -> Result<TenantContext, SqlGuardError> {
    if let Some(t) = non_blank(path) {
        return TenantContext::new(t, TenantSource::Path);
    }
    if let Some(t) = non_blank(header) {
        return TenantContext::new(t, TenantSource::Header);
    }
    if let Some(t) = non_blank(query) {
        return TenantContext::new(t, TenantSource::Query);
    }
    TenantContext::new(default_tenant, TenantSource::Default)
}

/// The `tenant` query parameter. A query that cannot be decoded, or that
/// repeats `tenant`, is rejected instead of falling back to the default.
fn query_tenant(uri: &Uri) -> Result<Option<String>, SqlGuardError> {
    let Some(raw) = uri.query() else {
        return Ok(None);
    };
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map_err(|_| SqlGuardError::InvalidTenant(raw.to_string()))?;
    let mut values = pairs
        .into_iter()
        .filter(|(key, _)| key == TENANT_QUERY_PARAM)
        .map(|(_, value)| value);
    let first = values.next();
    if values.next().is_some() {
        return Err(SqlGuardError::InvalidTenant(raw.to_string()));
    }
    Ok(first)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let path = parts.extensions.get::<PathTenant>().map(|p| p.0.clone());
        let header = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let query = query_tenant(&parts.uri)?;

        let tenant = resolve_tenant(
            path.as_deref(),
            header.as_deref(),
            query.as_deref(),
            &state.config.default_tenant,
        )?;
        debug!("[TENANT] {} resolved from {:?}", tenant, tenant.source);
        Ok(tenant)
    }
}

/// Strips a leading `/t/{tenant}` segment from the request URI and records
/// the tenant in the request extensions. Must run before routing.
pub fn rewrite_tenant_path<B>(mut req: Request<B>) -> Request<B> {
    let Some(rest) = req.uri().path().strip_prefix(TENANT_PATH_PREFIX) else {
        return req;
    };
    let (tenant, remainder) = match rest.split_once('/') {
        Some((tenant, remainder)) => (tenant.to_string(), format!("/{remainder}")),
        None => (rest.to_string(), "/".to_string()),
    };
    if tenant.is_empty() {
        return req;
    }

    let new_path_and_query = match req.uri().query() {
        Some(q) => format!("{remainder}?{q}"),
        None => remainder,
    };
    let mut uri_parts = req.uri().clone().into_parts();
    let Ok(pq) = new_path_and_query.parse::<PathAndQuery>() else {
        return req;
    };
    uri_parts.path_and_query = Some(pq);
    let Ok(uri) = Uri::from_parts(uri_parts) else {
        return req;
    };

    *req.uri_mut() = uri;
    req.extensions_mut().insert(PathTenant(tenant));
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_default_tenant() {
        let t = resolve_tenant(None, None, None, "public").unwrap();
        assert_eq!(t.schema(), "public");
        assert_eq!(t.source, TenantSource::Default);
    }

    #[test]
    fn test_precedence() {
        let t = resolve_tenant(Some("alpha"), Some("beta"), Some("gamma"), "public").unwrap();
        assert_eq!(t.schema(), "alpha");
        assert_eq!(t.source, TenantSource::Path);

        let t = resolve_tenant(None, Some("Beta"), Some("gamma"), "public").unwrap();
        assert_eq!(t.schema(), "beta");
        assert_eq!(t.source, TenantSource::Header);

        let t = resolve_tenant(None, None, Some("gamma"), "public").unwrap();
        assert_eq!(t.source, TenantSource::Query);
    }

    #[test]
    fn test_blank_values_fall_through() {
        let t = resolve_tenant(Some(""), Some("  "), Some("gamma"), "public").unwrap();
        assert_eq!(t.schema(), "gamma");
    }

    #[test]
    fn test_invalid_tenant_rejected() {
        assert!(resolve_tenant(None, Some("acme;drop"), None, "public").is_err());
    }

    #[test]
    fn test_query_tenant() {
        let uri: Uri = "/api/tickets?status=open&tenant=acme".parse().unwrap();
        assert_eq!(query_tenant(&uri).unwrap().as_deref(), Some("acme"));

        let uri: Uri = "/api/tickets?status=open".parse().unwrap();
        assert_eq!(query_tenant(&uri).unwrap(), None);

        let uri: Uri = "/api/tickets".parse().unwrap();
        assert_eq!(query_tenant(&uri).unwrap(), None);
    }

    #[test]
    fn test_repeated_query_tenant_rejected() {
        let uri: Uri = "/api/tickets?tenant=acme&tenant=acme".parse().unwrap();
        assert!(query_tenant(&uri).is_err());

        let uri: Uri = "/api/tickets?tenant=acme&tenant=".parse().unwrap();
        assert!(query_tenant(&uri).is_err());
    }

    #[test]
    fn test_rewrite_tenant_path() {
        let req = Request::builder()
            .uri("/t/acme/api/tickets?status=open")
            .body(Body::empty())
            .unwrap();
        let req = rewrite_tenant_path(req);
        assert_eq!(req.uri().path(), "/api/tickets");
        assert_eq!(req.uri().query(), Some("status=open"));
        assert_eq!(req.extensions().get::<PathTenant>().unwrap().0, "acme");
    }

    #[test]
    fn test_rewrite_leaves_other_paths() {
        let req = Request::builder()
            .uri("/api/tickets")
            .body(Body::empty())
            .unwrap();
        let req = rewrite_tenant_path(req);
        assert_eq!(req.uri().path(), "/api/tickets");
        assert!(req.extensions().get::<PathTenant>().is_none());
    }
}

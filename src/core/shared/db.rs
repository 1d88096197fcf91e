//! Tenant-scoped database access.
//!
//! Every query runs inside a transaction whose `search_path` is pinned to the
//! tenant's schema, so handler SQL names tables without qualification.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Integer, Text};
use diesel::PgConnection;
use log::{info, warn};

use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::utils::DbPool;
use crate::core::tenant::TenantContext;
use crate::security::sql_guard::quote_identifier;

const TENANT_SCHEMA_SQL: &str = include_str!("schema.sql");

#[derive(Debug, QueryableByName)]
pub struct ExistsRow {
    #[diesel(sql_type = Bool)]
    pub found: bool,
}

#[derive(Debug, QueryableByName)]
pub struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

#[derive(Debug, QueryableByName)]
pub struct IdRow {
    #[diesel(sql_type = Integer)]
    pub id: i32,
}

#[derive(Clone)]
pub struct TenantDb {
    pool: DbPool,
}

impl TenantDb {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Runs `f` on a blocking thread inside one transaction scoped to `tenant`.
    pub async fn run<T, F>(&self, tenant: &TenantContext, f: F) -> ApiResult<T>
    where
        F: FnOnce(&mut PgConnection) -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let schema = tenant.schema().to_string();

        tokio::task::spawn_blocking(move || {
            let mut pooled = pool.get()?;
            let conn: &mut PgConnection = &mut pooled;
            conn.transaction::<T, ApiError, _>(|conn| {
                pin_search_path(conn, &schema)?;
                f(conn)
            })
        })
        .await?
    }

    /// Creates the tenant schema and its tables. Safe to run repeatedly.
    pub async fn provision(&self, tenant: &TenantContext) -> ApiResult<()> {
        let pool = self.pool.clone();
        let schema = tenant.schema().to_string();

        tokio::task::spawn_blocking(move || {
            let mut pooled = pool.get()?;
            let conn: &mut PgConnection = &mut pooled;
            conn.transaction::<(), ApiError, _>(|conn| {
                let quoted = quote_identifier(&schema);
                conn.batch_execute(&format!(
                    "CREATE SCHEMA IF NOT EXISTS {quoted}; SET LOCAL search_path TO {quoted};"
                ))?;
                conn.batch_execute(TENANT_SCHEMA_SQL)?;
                Ok(())
            })?;
            info!("[TENANT] Provisioned schema {schema}");
            Ok(())
        })
        .await?
    }
}

fn pin_search_path(conn: &mut PgConnection, schema: &str) -> ApiResult<()> {
    let found = diesel::sql_query(
        "SELECT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = $1) AS found",
    )
    .bind::<Text, _>(schema)
    .get_result::<ExistsRow>(conn)?;
    if !found.found {
        return Err(ApiError::NotFound(format!("Tenant not found: {schema}")));
    }
    diesel::sql_query(format!(
        "SET LOCAL search_path TO {}",
        quote_identifier(schema)
    ))
    .execute(conn)?;
    Ok(())
}

/// Fails with 404 unless a live (not soft-deleted) row with `id` exists.
/// `table` must be a compile-time table name.
pub fn ensure_live(
    conn: &mut PgConnection,
    table: &'static str,
    id: i32,
    entity: &str,
) -> ApiResult<()> {
    let row = diesel::sql_query(format!(
        "SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1 AND is_deleted = false) AS found"
    ))
    .bind::<Integer, _>(id)
    .get_result::<ExistsRow>(conn)?;
    if row.found {
        Ok(())
    } else {
        Err(ApiError::not_found(entity))
    }
}

/// Substitutes `mock()` for server-side failures when the fallback policy is on.
/// Client errors (400/404) are always returned unchanged.
pub fn with_mock_fallback<T, F>(
    result: ApiResult<T>,
    enabled: bool,
    label: &str,
    mock: F,
) -> ApiResult<T>
where
    F: FnOnce() -> T,
{
    match result {
        Err(e) if enabled && e.is_server_failure() => {
            warn!("[{label}] Query failed, serving mock data: {e}");
            Ok(mock())
        }
        other => other,
    }
}

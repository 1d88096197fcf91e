use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz};
use diesel::PgConnection;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::shared::db::{ensure_live, IdRow};
use crate::core::shared::error::{require_text, ApiError, ApiResult};
use crate::core::shared::models::DeletedResponse;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{blank_to_none, like_pattern, page};
use crate::core::tenant::TenantContext;
use crate::security::sql_guard::order_clause;

use super::{Contact, CONTACT_SELECT};

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub document: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub email: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub phone: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub external_id: Option<String>,
    #[diesel(sql_type = BigInt)]
    pub contact_count: i64,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    pub updated_at: DateTime<Utc>,
}

const COMPANY_SELECT: &str = "SELECT co.id, co.name, co.document, co.email, co.phone, \
     co.external_id, \
     (SELECT COUNT(*) FROM contacts ct WHERE ct.company_id = co.id AND ct.is_deleted = false) \
     AS contact_count, co.created_at, co.updated_at \
     FROM companies co";

const COMPANY_SORT_COLUMNS: &[&str] = &[
    "id",
    "name",
    "document",
    "email",
    "created_at",
    "updated_at",
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCompaniesQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRequest {
    pub name: Option<String>,
    pub document: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub(crate) fn fetch_company(conn: &mut PgConnection, id: i32) -> ApiResult<Company> {
    diesel::sql_query(format!(
        "{COMPANY_SELECT} WHERE co.id = $1 AND co.is_deleted = false"
    ))
    .bind::<Integer, _>(id)
    .get_result::<Company>(conn)
    .optional()?
    .ok_or_else(|| ApiError::not_found("Company"))
}

pub async fn list_companies(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<ListCompaniesQuery>,
) -> ApiResult<Json<Vec<Company>>> {
    let search = blank_to_none(query.search).map(|s| like_pattern(&s));
    let order = order_clause(
        query.sort.as_deref(),
        query.order.as_deref(),
        COMPANY_SORT_COLUMNS,
        "co.",
        "co.name ASC, co.id ASC",
    )?;
    let (limit, offset) = page(query.limit, query.offset);

    let sql = format!(
        "{COMPANY_SELECT} WHERE co.is_deleted = false \
         AND ($1::text IS NULL OR co.name ILIKE $1 OR co.document ILIKE $1 OR co.email ILIKE $1) \
         {order} LIMIT $2 OFFSET $3"
    );

    let companies = state
        .db
        .run(&tenant, move |conn| {
            Ok(diesel::sql_query(sql)
                .bind::<Nullable<Text>, _>(search)
                .bind::<BigInt, _>(limit)
                .bind::<BigInt, _>(offset)
                .load::<Company>(conn)?)
        })
        .await?;
    Ok(Json(companies))
}

pub async fn get_company(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<Company>> {
    let company = state.db.run(&tenant, move |conn| fetch_company(conn, id)).await?;
    Ok(Json(company))
}

pub async fn create_company(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<CompanyRequest>,
) -> ApiResult<(StatusCode, Json<Company>)> {
    let name = require_text(req.name, "name")?;
    let document = blank_to_none(req.document);
    let email = blank_to_none(req.email);
    let phone = blank_to_none(req.phone);

    let company = state
        .db
        .run(&tenant, move |conn| {
            let created = diesel::sql_query(
                "INSERT INTO companies (name, document, email, phone) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind::<Text, _>(name)
            .bind::<Nullable<Text>, _>(document)
            .bind::<Nullable<Text>, _>(email)
            .bind::<Nullable<Text>, _>(phone)
            .get_result::<IdRow>(conn)?;
            fetch_company(conn, created.id)
        })
        .await?;

    info!("[COMPANIES] Created company {} for tenant {}", company.id, tenant);
    Ok((StatusCode::CREATED, Json(company)))
}

pub async fn update_company(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
    Json(req): Json<CompanyRequest>,
) -> ApiResult<Json<Company>> {
    if matches!(&req.name, Some(n) if n.trim().is_empty()) {
        return Err(ApiError::BadRequest("name cannot be blank".to_string()));
    }

    let company = state
        .db
        .run(&tenant, move |conn| {
            let updated = diesel::sql_query(
                "UPDATE companies SET \
                 name = COALESCE($1, name), \
                 document = COALESCE($2, document), \
                 email = COALESCE($3, email), \
                 phone = COALESCE($4, phone), \
                 updated_at = now() \
                 WHERE id = $5 AND is_deleted = false",
            )
            .bind::<Nullable<Text>, _>(req.name.map(|n| n.trim().to_string()))
            .bind::<Nullable<Text>, _>(req.document)
            .bind::<Nullable<Text>, _>(req.email)
            .bind::<Nullable<Text>, _>(req.phone)
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if updated == 0 {
                return Err(ApiError::not_found("Company"));
            }
            fetch_company(conn, id)
        })
        .await?;
    Ok(Json(company))
}

/// Soft-deletes the company and, in the same transaction, all of its contacts.
pub async fn delete_company(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<DeletedResponse>> {
    let response = state
        .db
        .run(&tenant, move |conn| {
            let deleted = diesel::sql_query(
                "UPDATE companies SET is_deleted = true, updated_at = now() \
                 WHERE id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if deleted == 0 {
                return Err(ApiError::not_found("Company"));
            }
            let cascaded = diesel::sql_query(
                "UPDATE contacts SET is_deleted = true, updated_at = now() \
                 WHERE company_id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            Ok(DeletedResponse::new(id, cascaded))
        })
        .await?;

    info!(
        "[COMPANIES] Soft-deleted company {} ({} contacts) for tenant {}",
        id, response.cascaded, tenant
    );
    Ok(Json(response))
}

pub async fn list_company_contacts(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<Vec<Contact>>> {
    let contacts = state
        .db
        .run(&tenant, move |conn| {
            ensure_live(conn, "companies", id, "Company")?;
            Ok(diesel::sql_query(format!(
                "{CONTACT_SELECT} WHERE ct.company_id = $1 AND ct.is_deleted = false \
                 ORDER BY ct.name ASC, ct.id ASC"
            ))
            .bind::<Integer, _>(id)
            .load::<Contact>(conn)?)
        })
        .await?;
    Ok(Json(contacts))
}

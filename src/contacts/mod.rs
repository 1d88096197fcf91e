pub mod companies;
#[cfg(feature = "crm")]
pub mod crm_directory;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz};
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::shared::db::{ensure_live, IdRow};
use crate::core::shared::error::{require, require_text, ApiError, ApiResult};
use crate::core::shared::models::DeletedResponse;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{blank_to_none, like_pattern, page};
use crate::core::tenant::TenantContext;
use crate::core::urls::ApiUrls;

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Integer)]
    pub company_id: i32,
    #[diesel(sql_type = Nullable<Text>)]
    pub company_name: Option<String>,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub email: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub phone: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub position: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    pub updated_at: DateTime<Utc>,
}

pub(crate) const CONTACT_SELECT: &str = "SELECT ct.id, ct.company_id, co.name AS company_name, \
     ct.name, ct.email, ct.phone, ct.position, ct.created_at, ct.updated_at \
     FROM contacts ct \
     LEFT JOIN companies co ON co.id = ct.company_id AND co.is_deleted = false";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListContactsQuery {
    pub company_id: Option<i32>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    pub company_id: Option<i32>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
}

fn fetch_contact(conn: &mut PgConnection, id: i32) -> ApiResult<Contact> {
    diesel::sql_query(format!(
        "{CONTACT_SELECT} WHERE ct.id = $1 AND ct.is_deleted = false"
    ))
    .bind::<Integer, _>(id)
    .get_result::<Contact>(conn)
    .optional()?
    .ok_or_else(|| ApiError::not_found("Contact"))
}

pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<ListContactsQuery>,
) -> ApiResult<Json<Vec<Contact>>> {
    let search = blank_to_none(query.search).map(|s| like_pattern(&s));
    let (limit, offset) = page(query.limit, query.offset);

    let contacts = state
        .db
        .run(&tenant, move |conn| {
            Ok(diesel::sql_query(format!(
                "{CONTACT_SELECT} WHERE ct.is_deleted = false \
                 AND ($1::int IS NULL OR ct.company_id = $1) \
                 AND ($2::text IS NULL OR ct.name ILIKE $2 OR ct.email ILIKE $2 \
                      OR ct.phone ILIKE $2) \
                 ORDER BY ct.name ASC, ct.id ASC LIMIT $3 OFFSET $4"
            ))
            .bind::<Nullable<Integer>, _>(query.company_id)
            .bind::<Nullable<Text>, _>(search)
            .bind::<BigInt, _>(limit)
            .bind::<BigInt, _>(offset)
            .load::<Contact>(conn)?)
        })
        .await?;
    Ok(Json(contacts))
}

pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<Contact>> {
    let contact = state.db.run(&tenant, move |conn| fetch_contact(conn, id)).await?;
    Ok(Json(contact))
}

pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<ContactRequest>,
) -> ApiResult<(StatusCode, Json<Contact>)> {
    let name = require_text(req.name, "name")?;
    let company_id = require(req.company_id, "companyId")?;
    let email = blank_to_none(req.email);
    let phone = blank_to_none(req.phone);
    let position = blank_to_none(req.position);

    let contact = state
        .db
        .run(&tenant, move |conn| {
            ensure_live(conn, "companies", company_id, "Company")?;
            let created = diesel::sql_query(
                "INSERT INTO contacts (company_id, name, email, phone, position) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind::<Integer, _>(company_id)
            .bind::<Text, _>(name)
            .bind::<Nullable<Text>, _>(email)
            .bind::<Nullable<Text>, _>(phone)
            .bind::<Nullable<Text>, _>(position)
            .get_result::<IdRow>(conn)?;
            fetch_contact(conn, created.id)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
    Json(req): Json<ContactRequest>,
) -> ApiResult<Json<Contact>> {
    if matches!(&req.name, Some(n) if n.trim().is_empty()) {
        return Err(ApiError::BadRequest("name cannot be blank".to_string()));
    }

    let contact = state
        .db
        .run(&tenant, move |conn| {
            if let Some(company_id) = req.company_id {
                ensure_live(conn, "companies", company_id, "Company")?;
            }
            let updated = diesel::sql_query(
                "UPDATE contacts SET \
                 company_id = COALESCE($1, company_id), \
                 name = COALESCE($2, name), \
                 email = COALESCE($3, email), \
                 phone = COALESCE($4, phone), \
                 position = COALESCE($5, position), \
                 updated_at = now() \
                 WHERE id = $6 AND is_deleted = false",
            )
            .bind::<Nullable<Integer>, _>(req.company_id)
            .bind::<Nullable<Text>, _>(req.name.map(|n| n.trim().to_string()))
            .bind::<Nullable<Text>, _>(req.email)
            .bind::<Nullable<Text>, _>(req.phone)
            .bind::<Nullable<Text>, _>(req.position)
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if updated == 0 {
                return Err(ApiError::not_found("Contact"));
            }
            fetch_contact(conn, id)
        })
        .await?;
    Ok(Json(contact))
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<DeletedResponse>> {
    let response = state
        .db
        .run(&tenant, move |conn| {
            let deleted = diesel::sql_query(
                "UPDATE contacts SET is_deleted = true, updated_at = now() \
                 WHERE id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if deleted == 0 {
                return Err(ApiError::not_found("Contact"));
            }
            Ok(DeletedResponse::new(id, 0))
        })
        .await?;
    Ok(Json(response))
}

pub fn configure_contacts_routes() -> Router<Arc<AppState>> {
    let router = Router::new()
        .route(
            ApiUrls::COMPANIES,
            get(companies::list_companies).post(companies::create_company),
        )
        .route(
            ApiUrls::COMPANY_BY_ID,
            get(companies::get_company)
                .put(companies::update_company)
                .delete(companies::delete_company),
        )
        .route(
            ApiUrls::COMPANY_CONTACTS,
            get(companies::list_company_contacts),
        )
        .route(ApiUrls::CONTACTS, get(list_contacts).post(create_contact))
        .route(
            ApiUrls::CONTACT_BY_ID,
            get(get_contact).put(update_contact).delete(delete_contact),
        );

    #[cfg(feature = "crm")]
    let router = router.merge(crm_directory::configure_crm_routes());

    router
}

use axum::{
    extract::{Path, State},
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

use crate::core::shared::db::IdRow;
use crate::core::shared::error::{require_text, ApiError, ApiResult};
use crate::core::shared::models::DeletedResponse;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::blank_to_none;
use crate::core::tenant::TenantContext;

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub description: Option<String>,
    #[diesel(sql_type = BigInt)]
    pub member_count: i64,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
}

const GROUP_SELECT: &str = "SELECT g.id, g.name, g.description, \
     (SELECT COUNT(*) FROM users u WHERE u.group_id = g.id AND u.is_deleted = false) AS member_count, \
     g.created_at FROM groups g";

#[derive(Debug, Default, Deserialize)]
pub struct GroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

fn fetch_group(conn: &mut PgConnection, id: i32) -> ApiResult<Group> {
    diesel::sql_query(format!("{GROUP_SELECT} WHERE g.id = $1 AND g.is_deleted = false"))
        .bind::<Integer, _>(id)
        .get_result::<Group>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("Group"))
}

pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
) -> ApiResult<Json<Vec<Group>>> {
    let groups = state
        .db
        .run(&tenant, |conn| {
            Ok(diesel::sql_query(format!(
                "{GROUP_SELECT} WHERE g.is_deleted = false ORDER BY g.name ASC, g.id ASC"
            ))
            .load::<Group>(conn)?)
        })
        .await?;
    Ok(Json(groups))
}

pub async fn create_group(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<GroupRequest>,
) -> ApiResult<(StatusCode, Json<Group>)> {
    let name = require_text(req.name, "name")?;
    let description = blank_to_none(req.description);

    let group = state
        .db
        .run(&tenant, move |conn| {
            let created = diesel::sql_query(
                "INSERT INTO groups (name, description) VALUES ($1, $2) RETURNING id",
            )
            .bind::<Text, _>(name)
            .bind::<Nullable<Text>, _>(description)
            .get_result::<IdRow>(conn)?;
            fetch_group(conn, created.id)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn update_group(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
    Json(req): Json<GroupRequest>,
) -> ApiResult<Json<Group>> {
    if matches!(&req.name, Some(n) if n.trim().is_empty()) {
        return Err(ApiError::BadRequest("name cannot be blank".to_string()));
    }

    let group = state
        .db
        .run(&tenant, move |conn| {
            let updated = diesel::sql_query(
                "UPDATE groups SET name = COALESCE($1, name), \
                 description = COALESCE($2, description) \
                 WHERE id = $3 AND is_deleted = false",
            )
            .bind::<Nullable<Text>, _>(req.name.map(|n| n.trim().to_string()))
            .bind::<Nullable<Text>, _>(req.description)
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if updated == 0 {
                return Err(ApiError::not_found("Group"));
            }
            fetch_group(conn, id)
        })
        .await?;
    Ok(Json(group))
}

/// Soft-deletes the group and detaches its members. `cascaded` counts the
/// detached users.
pub async fn delete_group(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<DeletedResponse>> {
    let response = state
        .db
        .run(&tenant, move |conn| {
            let deleted = diesel::sql_query(
                "UPDATE groups SET is_deleted = true WHERE id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if deleted == 0 {
                return Err(ApiError::not_found("Group"));
            }
            let detached = diesel::sql_query("UPDATE users SET group_id = NULL WHERE group_id = $1")
                .bind::<Integer, _>(id)
                .execute(conn)?;
            Ok(DeletedResponse::new(id, detached))
        })
        .await?;

    info!(
        "[GROUPS] Soft-deleted group {} ({} users detached) for tenant {}",
        id, response.cascaded, tenant
    );
    Ok(Json(response))
}

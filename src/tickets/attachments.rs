use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::shared::db::ensure_live;
use crate::core::shared::error::{require_text, ApiError, ApiResult};
use crate::core::shared::models::DeletedResponse;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::blank_to_none;
use crate::core::tenant::TenantContext;

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Integer)]
    pub ticket_id: i32,
    #[diesel(sql_type = Text)]
    pub file_name: String,
    #[diesel(sql_type = Text)]
    pub file_url: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub mime_type: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub size_bytes: Option<i64>,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttachmentRequest {
    pub file_name: Option<String>,
    pub file_url: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
}

pub async fn list_attachments(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(ticket_id): Path<i32>,
) -> ApiResult<Json<Vec<Attachment>>> {
    let attachments = state
        .db
        .run(&tenant, move |conn| {
            ensure_live(conn, "tickets", ticket_id, "Ticket")?;
            Ok(diesel::sql_query(
                "SELECT id, ticket_id, file_name, file_url, mime_type, size_bytes, created_at \
                 FROM attachments WHERE ticket_id = $1 AND is_deleted = false \
                 ORDER BY created_at ASC, id ASC",
            )
            .bind::<Integer, _>(ticket_id)
            .load::<Attachment>(conn)?)
        })
        .await?;
    Ok(Json(attachments))
}

pub async fn create_attachment(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(ticket_id): Path<i32>,
    Json(req): Json<CreateAttachmentRequest>,
) -> ApiResult<(StatusCode, Json<Attachment>)> {
    let file_name = require_text(req.file_name, "fileName")?;
    let file_url = require_text(req.file_url, "fileUrl")?;
    if matches!(req.size_bytes, Some(size) if size < 0) {
        return Err(ApiError::BadRequest("sizeBytes cannot be negative".to_string()));
    }
    let mime_type = blank_to_none(req.mime_type);

    let attachment = state
        .db
        .run(&tenant, move |conn| {
            ensure_live(conn, "tickets", ticket_id, "Ticket")?;
            Ok(diesel::sql_query(
                "INSERT INTO attachments (ticket_id, file_name, file_url, mime_type, size_bytes) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING id, ticket_id, file_name, file_url, mime_type, size_bytes, created_at",
            )
            .bind::<Integer, _>(ticket_id)
            .bind::<Text, _>(file_name)
            .bind::<Text, _>(file_url)
            .bind::<Nullable<Text>, _>(mime_type)
            .bind::<Nullable<BigInt>, _>(req.size_bytes)
            .get_result::<Attachment>(conn)?)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

pub async fn delete_attachment(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path((ticket_id, attachment_id)): Path<(i32, i32)>,
) -> ApiResult<Json<DeletedResponse>> {
    let response = state
        .db
        .run(&tenant, move |conn| {
            let deleted = diesel::sql_query(
                "UPDATE attachments SET is_deleted = true \
                 WHERE id = $1 AND ticket_id = $2 AND is_deleted = false",
            )
            .bind::<Integer, _>(attachment_id)
            .bind::<Integer, _>(ticket_id)
            .execute(conn)?;
            if deleted == 0 {
                return Err(ApiError::not_found("Attachment"));
            }
            Ok(DeletedResponse::new(attachment_id, 0))
        })
        .await?;
    Ok(Json(response))
}

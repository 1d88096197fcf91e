pub mod client;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Nullable, Text, Timestamptz};
use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::shared::db::ensure_live;
use crate::core::shared::error::{require_text, ApiError, ApiResult};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{blank_to_none, page};
use crate::core::tenant::TenantContext;
use crate::core::urls::ApiUrls;

use self::client::{normalize_phone, TokenStatus, WhatsAppClient};

pub const DEFAULT_TEMPLATE_LANGUAGE: &str = "pt_BR";

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppMessage {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Nullable<Integer>)]
    pub ticket_id: Option<i32>,
    #[diesel(sql_type = Text)]
    pub recipient: String,
    #[diesel(sql_type = Text)]
    pub message_type: String,
    #[diesel(sql_type = Text)]
    pub body: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub provider_message_id: Option<String>,
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
}

const MESSAGE_COLUMNS: &str =
    "id, ticket_id, recipient, message_type, body, provider_message_id, status, created_at";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub to: Option<String>,
    pub body: Option<String>,
    pub ticket_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTemplateRequest {
    pub to: Option<String>,
    pub template: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    pub ticket_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    pub ticket_id: Option<i32>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn whatsapp_client(state: &AppState) -> ApiResult<Arc<WhatsAppClient>> {
    state
        .whatsapp
        .clone()
        .ok_or_else(|| ApiError::Unavailable("WhatsApp integration not configured".to_string()))
}

fn recipient(raw: Option<String>) -> ApiResult<String> {
    let raw = require_text(raw, "to")?;
    normalize_phone(&raw)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid phone number: {raw}")))
}

struct OutgoingLog {
    ticket_id: Option<i32>,
    recipient: String,
    message_type: &'static str,
    body: String,
}

/// Records the attempt whatever the provider answered, then surfaces a
/// provider failure as 502.
async fn record_send(
    state: &AppState,
    tenant: &TenantContext,
    log: OutgoingLog,
    outcome: anyhow::Result<Option<String>>,
) -> ApiResult<WhatsAppMessage> {
    let (status, provider_id, failed) = match outcome {
        Ok(id) => ("sent", id, false),
        Err(e) => {
            error!("[WHATSAPP] Send to {} failed: {e}", log.recipient);
            ("failed", None, true)
        }
    };

    let row = state
        .db
        .run(tenant, move |conn| {
            Ok(diesel::sql_query(format!(
                "INSERT INTO whatsapp_messages \
                 (ticket_id, recipient, message_type, body, provider_message_id, status) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING {MESSAGE_COLUMNS}"
            ))
            .bind::<Nullable<Integer>, _>(log.ticket_id)
            .bind::<Text, _>(log.recipient)
            .bind::<Text, _>(log.message_type)
            .bind::<Text, _>(log.body)
            .bind::<Nullable<Text>, _>(provider_id)
            .bind::<Text, _>(status)
            .get_result::<WhatsAppMessage>(conn)?)
        })
        .await?;

    if failed {
        return Err(ApiError::Upstream("WhatsApp provider unavailable".to_string()));
    }
    Ok(row)
}

async fn check_ticket(
    state: &AppState,
    tenant: &TenantContext,
    ticket_id: Option<i32>,
) -> ApiResult<()> {
    if let Some(id) = ticket_id {
        state
            .db
            .run(tenant, move |conn| ensure_live(conn, "tickets", id, "Ticket"))
            .await?;
    }
    Ok(())
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<WhatsAppMessage>)> {
    let client = whatsapp_client(&state)?;
    let to = recipient(req.to)?;
    let body = require_text(req.body, "body")?;
    check_ticket(&state, &tenant, req.ticket_id).await?;

    let outcome = client.send_text(&to, &body).await;
    let log = OutgoingLog {
        ticket_id: req.ticket_id,
        recipient: to,
        message_type: "text",
        body,
    };
    let message = record_send(&state, &tenant, log, outcome).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn send_template(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<SendTemplateRequest>,
) -> ApiResult<(StatusCode, Json<WhatsAppMessage>)> {
    let client = whatsapp_client(&state)?;
    let to = recipient(req.to)?;
    let template = require_text(req.template, "template")?;
    let language =
        blank_to_none(req.language).unwrap_or_else(|| DEFAULT_TEMPLATE_LANGUAGE.to_string());
    check_ticket(&state, &tenant, req.ticket_id).await?;

    let outcome = client
        .send_template(&to, &template, &language, &req.parameters)
        .await;
    let body = serde_json::json!({
        "template": template,
        "language": language,
        "parameters": req.parameters,
    })
    .to_string();
    let log = OutgoingLog {
        ticket_id: req.ticket_id,
        recipient: to,
        message_type: "template",
        body,
    };
    let message = record_send(&state, &tenant, log, outcome).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<Vec<WhatsAppMessage>>> {
    let (limit, offset) = page(query.limit, query.offset);

    let messages = state
        .db
        .run(&tenant, move |conn| {
            Ok(diesel::sql_query(format!(
                "SELECT {MESSAGE_COLUMNS} FROM whatsapp_messages \
                 WHERE is_deleted = false AND ($1::int IS NULL OR ticket_id = $1) \
                 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
            ))
            .bind::<Nullable<Integer>, _>(query.ticket_id)
            .bind::<BigInt, _>(limit)
            .bind::<BigInt, _>(offset)
            .load::<WhatsAppMessage>(conn)?)
        })
        .await?;
    Ok(Json(messages))
}

pub async fn token_status(State(state): State<Arc<AppState>>) -> Json<TokenStatus> {
    match &state.whatsapp {
        Some(client) => Json(client.token_status().await),
        None => Json(TokenStatus::unconfigured()),
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::WHATSAPP_SEND, post(send_message))
        .route(ApiUrls::WHATSAPP_TEMPLATE, post(send_template))
        .route(ApiUrls::WHATSAPP_MESSAGES, get(list_messages))
        .route(ApiUrls::WHATSAPP_TOKEN, get(token_status))
}

pub mod attachments;

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
use log::info;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::core::shared::db::{ensure_live, with_mock_fallback, IdRow};
use crate::core::shared::error::{require_text, ApiError, ApiResult};
use crate::core::shared::models::DeletedResponse;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{blank_to_none, like_pattern, page};
use crate::core::tenant::TenantContext;
use crate::core::urls::ApiUrls;
use crate::security::sql_guard::order_clause;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Open,
    InProgress,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        Self::Open,
        Self::InProgress,
        Self::Pending,
        Self::Resolved,
        Self::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Resolved and closed tickets carry a `closed_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

impl FromStr for TicketStatus {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            _ => Err(ApiError::BadRequest(format!("Invalid status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl FromStr for TicketPriority {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(ApiError::BadRequest(format!("Invalid priority: {s}"))),
        }
    }
}

fn parse_optional<T: FromStr<Err = ApiError>>(value: Option<String>) -> ApiResult<Option<T>> {
    blank_to_none(value).map(|v| v.parse()).transpose()
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub title: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub description: Option<String>,
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = Text)]
    pub priority: String,
    #[diesel(sql_type = Nullable<Integer>)]
    pub company_id: Option<i32>,
    #[diesel(sql_type = Nullable<Text>)]
    pub company_name: Option<String>,
    #[diesel(sql_type = Nullable<Integer>)]
    pub contact_id: Option<i32>,
    #[diesel(sql_type = Nullable<Integer>)]
    pub category_id: Option<i32>,
    #[diesel(sql_type = Nullable<Text>)]
    pub category_name: Option<String>,
    #[diesel(sql_type = Nullable<Integer>)]
    pub subcategory_id: Option<i32>,
    #[diesel(sql_type = Nullable<Integer>)]
    pub group_id: Option<i32>,
    #[diesel(sql_type = Nullable<Integer>)]
    pub assigned_user_id: Option<i32>,
    #[diesel(sql_type = Nullable<Text>)]
    pub assigned_user_name: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    pub updated_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    pub closed_at: Option<DateTime<Utc>>,
}

const TICKET_SELECT: &str = "SELECT t.id, t.title, t.description, t.status, t.priority, \
     t.company_id, c.name AS company_name, t.contact_id, \
     t.category_id, cat.name AS category_name, t.subcategory_id, t.group_id, \
     t.assigned_user_id, u.name AS assigned_user_name, \
     t.created_at, t.updated_at, t.closed_at \
     FROM tickets t \
     LEFT JOIN companies c ON c.id = t.company_id AND c.is_deleted = false \
     LEFT JOIN categories cat ON cat.id = t.category_id AND cat.is_deleted = false \
     LEFT JOIN users u ON u.id = t.assigned_user_id AND u.is_deleted = false";

const TICKET_SORT_COLUMNS: &[&str] = &[
    "id",
    "title",
    "status",
    "priority",
    "created_at",
    "updated_at",
    "closed_at",
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTicketsQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub company_id: Option<i32>,
    pub category_id: Option<i32>,
    pub assigned_user_id: Option<i32>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub company_id: Option<i32>,
    pub contact_id: Option<i32>,
    pub category_id: Option<i32>,
    pub subcategory_id: Option<i32>,
    pub group_id: Option<i32>,
    pub assigned_user_id: Option<i32>,
}

/// Foreign keys a ticket write may set. Each one present must point at a live row.
#[derive(Debug, Clone, Copy, Default)]
struct TicketRefs {
    company_id: Option<i32>,
    contact_id: Option<i32>,
    category_id: Option<i32>,
    subcategory_id: Option<i32>,
    group_id: Option<i32>,
    assigned_user_id: Option<i32>,
}

impl TicketRefs {
    fn checks(&self) -> [(&'static str, Option<i32>, &'static str); 6] {
        [
            ("companies", self.company_id, "Company"),
            ("contacts", self.contact_id, "Contact"),
            ("categories", self.category_id, "Category"),
            ("subcategories", self.subcategory_id, "Subcategory"),
            ("groups", self.group_id, "Group"),
            ("users", self.assigned_user_id, "User"),
        ]
    }

    fn ensure_all_live(&self, conn: &mut PgConnection) -> ApiResult<()> {
        for (table, id, entity) in self.checks() {
            if let Some(id) = id {
                ensure_live(conn, table, id, entity)?;
            }
        }
        Ok(())
    }
}

impl From<&CreateTicketRequest> for TicketRefs {
    fn from(req: &CreateTicketRequest) -> Self {
        Self {
            company_id: req.company_id,
            contact_id: req.contact_id,
            category_id: req.category_id,
            subcategory_id: req.subcategory_id,
            group_id: req.group_id,
            assigned_user_id: req.assigned_user_id,
        }
    }
}

impl From<&UpdateTicketRequest> for TicketRefs {
    fn from(req: &UpdateTicketRequest) -> Self {
        Self {
            company_id: req.company_id,
            contact_id: req.contact_id,
            category_id: req.category_id,
            subcategory_id: req.subcategory_id,
            group_id: req.group_id,
            assigned_user_id: req.assigned_user_id,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub company_id: Option<i32>,
    pub contact_id: Option<i32>,
    pub category_id: Option<i32>,
    pub subcategory_id: Option<i32>,
    pub group_id: Option<i32>,
    pub assigned_user_id: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketStats {
    pub total: i64,
    pub open: i64,
    pub in_progress: i64,
    pub pending: i64,
    pub resolved: i64,
    pub closed: i64,
}

impl TicketStats {
    pub fn from_counts<'a, I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut stats = TicketStats::default();
        for (status, count) in counts {
            stats.total += count;
            match TicketStatus::from_str(status) {
                Ok(TicketStatus::Open) => stats.open += count,
                Ok(TicketStatus::InProgress) => stats.in_progress += count,
                Ok(TicketStatus::Pending) => stats.pending += count,
                Ok(TicketStatus::Resolved) => stats.resolved += count,
                Ok(TicketStatus::Closed) => stats.closed += count,
                Err(_) => {}
            }
        }
        stats
    }

    pub fn mock() -> Self {
        Self::from_counts([
            ("open", 12),
            ("in_progress", 7),
            ("pending", 4),
            ("resolved", 21),
            ("closed", 56),
        ])
    }
}

#[derive(Debug, QueryableByName)]
struct StatusCount {
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

pub(crate) fn fetch_ticket(conn: &mut PgConnection, id: i32) -> ApiResult<Ticket> {
    diesel::sql_query(format!(
        "{TICKET_SELECT} WHERE t.id = $1 AND t.is_deleted = false"
    ))
    .bind::<Integer, _>(id)
    .get_result::<Ticket>(conn)
    .optional()?
    .ok_or_else(|| ApiError::not_found("Ticket"))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<ListTicketsQuery>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let status = parse_optional::<TicketStatus>(query.status)?.map(|s| s.as_str().to_string());
    let priority =
        parse_optional::<TicketPriority>(query.priority)?.map(|p| p.as_str().to_string());
    let search = blank_to_none(query.search).map(|s| like_pattern(&s));
    let order = order_clause(
        query.sort.as_deref(),
        query.order.as_deref(),
        TICKET_SORT_COLUMNS,
        "t.",
        "t.created_at DESC, t.id DESC",
    )?;
    let (limit, offset) = page(query.limit, query.offset);

    let sql = format!(
        "{TICKET_SELECT} WHERE t.is_deleted = false \
         AND ($1::text IS NULL OR t.status = $1) \
         AND ($2::text IS NULL OR t.priority = $2) \
         AND ($3::int IS NULL OR t.company_id = $3) \
         AND ($4::int IS NULL OR t.category_id = $4) \
         AND ($5::int IS NULL OR t.assigned_user_id = $5) \
         AND ($6::text IS NULL OR t.title ILIKE $6 OR t.description ILIKE $6) \
         {order} LIMIT $7 OFFSET $8"
    );

    let tickets = state
        .db
        .run(&tenant, move |conn| {
            Ok(diesel::sql_query(sql)
                .bind::<Nullable<Text>, _>(status)
                .bind::<Nullable<Text>, _>(priority)
                .bind::<Nullable<Integer>, _>(query.company_id)
                .bind::<Nullable<Integer>, _>(query.category_id)
                .bind::<Nullable<Integer>, _>(query.assigned_user_id)
                .bind::<Nullable<Text>, _>(search)
                .bind::<BigInt, _>(limit)
                .bind::<BigInt, _>(offset)
                .load::<Ticket>(conn)?)
        })
        .await?;

    Ok(Json(tickets))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<Ticket>> {
    let ticket = state.db.run(&tenant, move |conn| fetch_ticket(conn, id)).await?;
    Ok(Json(ticket))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    let refs = TicketRefs::from(&req);
    let title = require_text(req.title, "title")?;
    let status = parse_optional::<TicketStatus>(req.status)?.unwrap_or(TicketStatus::Open);
    let priority =
        parse_optional::<TicketPriority>(req.priority)?.unwrap_or(TicketPriority::Medium);
    let description = blank_to_none(req.description);

    let ticket = state
        .db
        .run(&tenant, move |conn| {
            refs.ensure_all_live(conn)?;
            let created = diesel::sql_query(
                "INSERT INTO tickets (title, description, status, priority, company_id, \
                 contact_id, category_id, subcategory_id, group_id, assigned_user_id, closed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                 CASE WHEN $11 THEN now() END) RETURNING id",
            )
            .bind::<Text, _>(title)
            .bind::<Nullable<Text>, _>(description)
            .bind::<Text, _>(status.as_str())
            .bind::<Text, _>(priority.as_str())
            .bind::<Nullable<Integer>, _>(req.company_id)
            .bind::<Nullable<Integer>, _>(req.contact_id)
            .bind::<Nullable<Integer>, _>(req.category_id)
            .bind::<Nullable<Integer>, _>(req.subcategory_id)
            .bind::<Nullable<Integer>, _>(req.group_id)
            .bind::<Nullable<Integer>, _>(req.assigned_user_id)
            .bind::<diesel::sql_types::Bool, _>(status.is_terminal())
            .get_result::<IdRow>(conn)?;
            fetch_ticket(conn, created.id)
        })
        .await?;

    info!("[TICKETS] Created ticket {} for tenant {}", ticket.id, tenant);
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
    Json(req): Json<UpdateTicketRequest>,
) -> ApiResult<Json<Ticket>> {
    let refs = TicketRefs::from(&req);
    let title = match req.title {
        Some(t) if t.trim().is_empty() => {
            return Err(ApiError::BadRequest("title cannot be blank".to_string()))
        }
        other => other.map(|t| t.trim().to_string()),
    };
    let status = parse_optional::<TicketStatus>(req.status)?.map(|s| s.as_str().to_string());
    let priority =
        parse_optional::<TicketPriority>(req.priority)?.map(|p| p.as_str().to_string());

    let ticket = state
        .db
        .run(&tenant, move |conn| {
            refs.ensure_all_live(conn)?;
            diesel::sql_query(
                "UPDATE tickets SET \
                 title = COALESCE($1, title), \
                 description = COALESCE($2, description), \
                 status = COALESCE($3, status), \
                 priority = COALESCE($4, priority), \
                 company_id = COALESCE($5, company_id), \
                 contact_id = COALESCE($6, contact_id), \
                 category_id = COALESCE($7, category_id), \
                 subcategory_id = COALESCE($8, subcategory_id), \
                 group_id = COALESCE($9, group_id), \
                 assigned_user_id = COALESCE($10, assigned_user_id), \
                 closed_at = CASE \
                   WHEN $3::text IN ('resolved', 'closed') THEN COALESCE(closed_at, now()) \
                   WHEN $3::text IS NOT NULL THEN NULL \
                   ELSE closed_at END, \
                 updated_at = now() \
                 WHERE id = $11 AND is_deleted = false RETURNING id",
            )
            .bind::<Nullable<Text>, _>(title)
            .bind::<Nullable<Text>, _>(req.description)
            .bind::<Nullable<Text>, _>(status)
            .bind::<Nullable<Text>, _>(priority)
            .bind::<Nullable<Integer>, _>(req.company_id)
            .bind::<Nullable<Integer>, _>(req.contact_id)
            .bind::<Nullable<Integer>, _>(req.category_id)
            .bind::<Nullable<Integer>, _>(req.subcategory_id)
            .bind::<Nullable<Integer>, _>(req.group_id)
            .bind::<Nullable<Integer>, _>(req.assigned_user_id)
            .bind::<Integer, _>(id)
            .get_result::<IdRow>(conn)
            .optional()?
            .ok_or_else(|| ApiError::not_found("Ticket"))?;
            fetch_ticket(conn, id)
        })
        .await?;

    Ok(Json(ticket))
}

pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<DeletedResponse>> {
    let response = state
        .db
        .run(&tenant, move |conn| {
            let deleted = diesel::sql_query(
                "UPDATE tickets SET is_deleted = true, updated_at = now() \
                 WHERE id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if deleted == 0 {
                return Err(ApiError::not_found("Ticket"));
            }
            let cascaded = diesel::sql_query(
                "UPDATE attachments SET is_deleted = true \
                 WHERE ticket_id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            Ok(DeletedResponse::new(id, cascaded))
        })
        .await?;

    info!(
        "[TICKETS] Soft-deleted ticket {} ({} attachments) for tenant {}",
        id, response.cascaded, tenant
    );
    Ok(Json(response))
}

pub async fn get_ticket_stats(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
) -> ApiResult<Json<TicketStats>> {
    let result = state
        .db
        .run(&tenant, |conn| {
            let rows = diesel::sql_query(
                "SELECT status, COUNT(*) AS count FROM tickets \
                 WHERE is_deleted = false GROUP BY status",
            )
            .load::<StatusCount>(conn)?;
            Ok(TicketStats::from_counts(
                rows.iter().map(|r| (r.status.as_str(), r.count)),
            ))
        })
        .await;

    let stats = with_mock_fallback(result, state.mock_fallback(), "TICKETS", TicketStats::mock)?;
    Ok(Json(stats))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::TICKETS, get(list_tickets).post(create_ticket))
        .route(ApiUrls::TICKET_STATS, get(get_ticket_stats))
        .route(
            ApiUrls::TICKET_BY_ID,
            get(get_ticket).put(update_ticket).delete(delete_ticket),
        )
        .route(
            ApiUrls::TICKET_ATTACHMENTS,
            get(attachments::list_attachments).post(attachments::create_attachment),
        )
        .route(
            ApiUrls::TICKET_ATTACHMENT_BY_ID,
            axum::routing::delete(attachments::delete_attachment),
        )
}

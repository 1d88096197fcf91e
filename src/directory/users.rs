use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bool, Integer, Nullable, Text, Timestamptz};
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::shared::db::{ensure_live, IdRow};
use crate::core::shared::error::{require_text, ApiError, ApiResult};
use crate::core::shared::models::DeletedResponse;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::{blank_to_none, like_pattern, page};
use crate::core::tenant::TenantContext;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    Agent,
    Viewer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Agent => "agent",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "agent" => Ok(Self::Agent),
            "viewer" => Ok(Self::Viewer),
            _ => Err(ApiError::BadRequest(format!("Invalid role: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Text)]
    pub email: String,
    #[diesel(sql_type = Text)]
    pub role: String,
    #[diesel(sql_type = Nullable<Integer>)]
    pub group_id: Option<i32>,
    #[diesel(sql_type = Nullable<Text>)]
    pub group_name: Option<String>,
    #[diesel(sql_type = Bool)]
    pub is_active: bool,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
}

const USER_SELECT: &str = "SELECT u.id, u.name, u.email, u.role, u.group_id, \
     g.name AS group_name, u.is_active, u.created_at \
     FROM users u LEFT JOIN groups g ON g.id = u.group_id AND g.is_deleted = false";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersQuery {
    pub group_id: Option<i32>,
    pub search: Option<String>,
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub group_id: Option<i32>,
    pub is_active: Option<bool>,
}

fn validate_email(email: &str) -> ApiResult<()> {
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && !domain.is_empty())
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Invalid email: {email}")))
    }
}

fn fetch_user(conn: &mut PgConnection, id: i32) -> ApiResult<User> {
    diesel::sql_query(format!("{USER_SELECT} WHERE u.id = $1 AND u.is_deleted = false"))
        .bind::<Integer, _>(id)
        .get_result::<User>(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found("User"))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let search = blank_to_none(query.search).map(|s| like_pattern(&s));
    let (limit, offset) = page(query.limit, query.offset);

    let users = state
        .db
        .run(&tenant, move |conn| {
            Ok(diesel::sql_query(format!(
                "{USER_SELECT} WHERE u.is_deleted = false \
                 AND ($1::int IS NULL OR u.group_id = $1) \
                 AND ($2::text IS NULL OR u.name ILIKE $2 OR u.email ILIKE $2) \
                 AND ($3::boolean IS NULL OR u.is_active = $3) \
                 ORDER BY u.name ASC, u.id ASC LIMIT $4 OFFSET $5"
            ))
            .bind::<Nullable<Integer>, _>(query.group_id)
            .bind::<Nullable<Text>, _>(search)
            .bind::<Nullable<Bool>, _>(query.active)
            .bind::<BigInt, _>(limit)
            .bind::<BigInt, _>(offset)
            .load::<User>(conn)?)
        })
        .await?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<User>> {
    let user = state.db.run(&tenant, move |conn| fetch_user(conn, id)).await?;
    Ok(Json(user))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<UserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let name = require_text(req.name, "name")?;
    let email = require_text(req.email, "email")?.to_lowercase();
    validate_email(&email)?;
    let role = match blank_to_none(req.role) {
        Some(r) => r.parse::<UserRole>()?,
        None => UserRole::default(),
    };
    let is_active = req.is_active.unwrap_or(true);

    let user = state
        .db
        .run(&tenant, move |conn| {
            if let Some(group_id) = req.group_id {
                ensure_live(conn, "groups", group_id, "Group")?;
            }
            let created = diesel::sql_query(
                "INSERT INTO users (name, email, role, group_id, is_active) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind::<Text, _>(name)
            .bind::<Text, _>(email)
            .bind::<Text, _>(role.as_str())
            .bind::<Nullable<Integer>, _>(req.group_id)
            .bind::<Bool, _>(is_active)
            .get_result::<IdRow>(conn)?;
            fetch_user(conn, created.id)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
    Json(req): Json<UserRequest>,
) -> ApiResult<Json<User>> {
    if matches!(&req.name, Some(n) if n.trim().is_empty()) {
        return Err(ApiError::BadRequest("name cannot be blank".to_string()));
    }
    let email = match req.email {
        Some(e) => {
            let e = e.trim().to_lowercase();
            validate_email(&e)?;
            Some(e)
        }
        None => None,
    };
    let role = blank_to_none(req.role)
        .map(|r| r.parse::<UserRole>())
        .transpose()?;

    let user = state
        .db
        .run(&tenant, move |conn| {
            if let Some(group_id) = req.group_id {
                ensure_live(conn, "groups", group_id, "Group")?;
            }
            let updated = diesel::sql_query(
                "UPDATE users SET \
                 name = COALESCE($1, name), \
                 email = COALESCE($2, email), \
                 role = COALESCE($3, role), \
                 group_id = COALESCE($4, group_id), \
                 is_active = COALESCE($5, is_active) \
                 WHERE id = $6 AND is_deleted = false",
            )
            .bind::<Nullable<Text>, _>(req.name.map(|n| n.trim().to_string()))
            .bind::<Nullable<Text>, _>(email)
            .bind::<Nullable<Text>, _>(role.map(|r| r.as_str()))
            .bind::<Nullable<Integer>, _>(req.group_id)
            .bind::<Nullable<Bool>, _>(req.is_active)
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if updated == 0 {
                return Err(ApiError::not_found("User"));
            }
            fetch_user(conn, id)
        })
        .await?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<DeletedResponse>> {
    let response = state
        .db
        .run(&tenant, move |conn| {
            let deleted = diesel::sql_query(
                "UPDATE users SET is_deleted = true, is_active = false \
                 WHERE id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if deleted == 0 {
                return Err(ApiError::not_found("User"));
            }
            Ok(DeletedResponse::new(id, 0))
        })
        .await?;
    Ok(Json(response))
}

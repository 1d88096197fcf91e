use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, TimeZone, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Integer, Nullable, Text, Timestamptz};
use diesel::PgConnection;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::shared::db::{ensure_live, with_mock_fallback};
use crate::core::shared::error::{require_text, ApiError, ApiResult};
use crate::core::shared::models::DeletedResponse;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::blank_to_none;
use crate::core::tenant::TenantContext;

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRow {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub description: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    #[diesel(sql_type = Integer)]
    pub id: i32,
    #[diesel(sql_type = Integer)]
    pub category_id: i32,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Timestamptz)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub subcategories: Vec<Subcategory>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubcategoryRequest {
    pub name: Option<String>,
}

/// Attaches each subcategory to its parent, keeping the input order of both.
fn nest(categories: Vec<CategoryRow>, subcategories: Vec<Subcategory>) -> Vec<Category> {
    let mut by_parent: HashMap<i32, Vec<Subcategory>> = HashMap::new();
    for sub in subcategories {
        by_parent.entry(sub.category_id).or_default().push(sub);
    }
    categories
        .into_iter()
        .map(|c| Category {
            subcategories: by_parent.remove(&c.id).unwrap_or_default(),
            id: c.id,
            name: c.name,
            description: c.description,
            created_at: c.created_at,
        })
        .collect()
}

fn mock_categories() -> Vec<Category> {
    let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();
    let sub = |id, category_id, name: &str| Subcategory {
        id,
        category_id,
        name: name.to_string(),
        created_at,
    };
    vec![
        Category {
            id: 1,
            name: "Support".to_string(),
            description: Some("Technical support requests".to_string()),
            created_at,
            subcategories: vec![sub(1, 1, "Installation"), sub(2, 1, "Bug report")],
        },
        Category {
            id: 2,
            name: "Billing".to_string(),
            description: Some("Invoices and payments".to_string()),
            created_at,
            subcategories: vec![sub(3, 2, "Invoice"), sub(4, 2, "Refund")],
        },
        Category {
            id: 3,
            name: "Sales".to_string(),
            description: None,
            created_at,
            subcategories: Vec::new(),
        },
    ]
}

fn fetch_category(conn: &mut PgConnection, id: i32) -> ApiResult<Category> {
    let row = diesel::sql_query(
        "SELECT id, name, description, created_at FROM categories \
         WHERE id = $1 AND is_deleted = false",
    )
    .bind::<Integer, _>(id)
    .get_result::<CategoryRow>(conn)
    .optional()?
    .ok_or_else(|| ApiError::not_found("Category"))?;
    let subs = load_subcategories(conn, id)?;
    Ok(nest(vec![row], subs).remove(0))
}

fn load_subcategories(conn: &mut PgConnection, category_id: i32) -> ApiResult<Vec<Subcategory>> {
    Ok(diesel::sql_query(
        "SELECT id, category_id, name, created_at FROM subcategories \
         WHERE category_id = $1 AND is_deleted = false ORDER BY name ASC, id ASC",
    )
    .bind::<Integer, _>(category_id)
    .load::<Subcategory>(conn)?)
}

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
) -> ApiResult<Json<Vec<Category>>> {
    let result = state
        .db
        .run(&tenant, |conn| {
            let categories = diesel::sql_query(
                "SELECT id, name, description, created_at FROM categories \
                 WHERE is_deleted = false ORDER BY name ASC, id ASC",
            )
            .load::<CategoryRow>(conn)?;
            let subcategories = diesel::sql_query(
                "SELECT s.id, s.category_id, s.name, s.created_at FROM subcategories s \
                 JOIN categories c ON c.id = s.category_id AND c.is_deleted = false \
                 WHERE s.is_deleted = false ORDER BY s.name ASC, s.id ASC",
            )
            .load::<Subcategory>(conn)?;
            Ok(nest(categories, subcategories))
        })
        .await;

    let categories =
        with_mock_fallback(result, state.mock_fallback(), "CATEGORIES", mock_categories)?;
    Ok(Json(categories))
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<CategoryRequest>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    let name = require_text(req.name, "name")?;
    let description = blank_to_none(req.description);

    let category = state
        .db
        .run(&tenant, move |conn| {
            let row = diesel::sql_query(
                "INSERT INTO categories (name, description) VALUES ($1, $2) \
                 RETURNING id, name, description, created_at",
            )
            .bind::<Text, _>(name)
            .bind::<Nullable<Text>, _>(description)
            .get_result::<CategoryRow>(conn)?;
            Ok(nest(vec![row], Vec::new()).remove(0))
        })
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
    Json(req): Json<CategoryRequest>,
) -> ApiResult<Json<Category>> {
    if matches!(&req.name, Some(n) if n.trim().is_empty()) {
        return Err(ApiError::BadRequest("name cannot be blank".to_string()));
    }

    let category = state
        .db
        .run(&tenant, move |conn| {
            let updated = diesel::sql_query(
                "UPDATE categories SET name = COALESCE($1, name), \
                 description = COALESCE($2, description) \
                 WHERE id = $3 AND is_deleted = false",
            )
            .bind::<Nullable<Text>, _>(req.name.map(|n| n.trim().to_string()))
            .bind::<Nullable<Text>, _>(req.description)
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if updated == 0 {
                return Err(ApiError::not_found("Category"));
            }
            fetch_category(conn, id)
        })
        .await?;
    Ok(Json(category))
}

/// Soft-deletes the category together with its subcategories.
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<DeletedResponse>> {
    let response = state
        .db
        .run(&tenant, move |conn| {
            let deleted = diesel::sql_query(
                "UPDATE categories SET is_deleted = true WHERE id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if deleted == 0 {
                return Err(ApiError::not_found("Category"));
            }
            let cascaded = diesel::sql_query(
                "UPDATE subcategories SET is_deleted = true \
                 WHERE category_id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            Ok(DeletedResponse::new(id, cascaded))
        })
        .await?;

    info!(
        "[CATEGORIES] Soft-deleted category {} ({} subcategories) for tenant {}",
        id, response.cascaded, tenant
    );
    Ok(Json(response))
}

pub async fn list_subcategories(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(category_id): Path<i32>,
) -> ApiResult<Json<Vec<Subcategory>>> {
    let subs = state
        .db
        .run(&tenant, move |conn| {
            ensure_live(conn, "categories", category_id, "Category")?;
            load_subcategories(conn, category_id)
        })
        .await?;
    Ok(Json(subs))
}

pub async fn create_subcategory(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(category_id): Path<i32>,
    Json(req): Json<SubcategoryRequest>,
) -> ApiResult<(StatusCode, Json<Subcategory>)> {
    let name = require_text(req.name, "name")?;

    let sub = state
        .db
        .run(&tenant, move |conn| {
            ensure_live(conn, "categories", category_id, "Category")?;
            Ok(diesel::sql_query(
                "INSERT INTO subcategories (category_id, name) VALUES ($1, $2) \
                 RETURNING id, category_id, name, created_at",
            )
            .bind::<Integer, _>(category_id)
            .bind::<Text, _>(name)
            .get_result::<Subcategory>(conn)?)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(sub)))
}

pub async fn delete_subcategory(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<i32>,
) -> ApiResult<Json<DeletedResponse>> {
    let response = state
        .db
        .run(&tenant, move |conn| {
            let deleted = diesel::sql_query(
                "UPDATE subcategories SET is_deleted = true WHERE id = $1 AND is_deleted = false",
            )
            .bind::<Integer, _>(id)
            .execute(conn)?;
            if deleted == 0 {
                return Err(ApiError::not_found("Subcategory"));
            }
            Ok(DeletedResponse::new(id, 0))
        })
        .await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_nest_groups_by_parent() {
        let categories = vec![
            CategoryRow { id: 1, name: "Billing".into(), description: None, created_at: at() },
            CategoryRow { id: 2, name: "Support".into(), description: None, created_at: at() },
        ];
        let subs = vec![
            Subcategory { id: 10, category_id: 2, name: "Bug".into(), created_at: at() },
            Subcategory { id: 11, category_id: 1, name: "Invoice".into(), created_at: at() },
            Subcategory { id: 12, category_id: 2, name: "Install".into(), created_at: at() },
            Subcategory { id: 13, category_id: 99, name: "Orphan".into(), created_at: at() },
        ];

        let nested = nest(categories, subs);
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].subcategories.iter().map(|s| s.id).collect::<Vec<_>>(), vec![11]);
        assert_eq!(nested[1].subcategories.iter().map(|s| s.id).collect::<Vec<_>>(), vec![10, 12]);
    }

    #[test]
    fn test_mock_categories_are_consistent() {
        for category in mock_categories() {
            assert!(category.subcategories.iter().all(|s| s.category_id == category.id));
        }
    }

    #[test]
    fn test_category_serializes_camel_case() {
        let json = serde_json::to_value(&mock_categories()[0]).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["subcategories"][0]["categoryId"], 1);
    }
}

pub mod categories;

use axum::{
    extract::{Path, State},
    routing::{delete, get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Jsonb, Text, Timestamptz};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::shared::error::{require, ApiError, ApiResult};
use crate::core::shared::state::AppState;
use crate::core::tenant::TenantContext;
use crate::core::urls::ApiUrls;
use crate::security::sql_guard::validate_setting_key;

#[derive(Debug, Clone, Serialize, QueryableByName)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    #[diesel(sql_type = Text)]
    pub key: String,
    #[diesel(sql_type = Jsonb)]
    pub value: serde_json::Value,
    #[diesel(sql_type = Timestamptz)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingValueRequest {
    pub value: Option<serde_json::Value>,
}

fn into_object(settings: Vec<Setting>) -> serde_json::Map<String, serde_json::Value> {
    settings.into_iter().map(|s| (s.key, s.value)).collect()
}

pub async fn list_settings(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
) -> ApiResult<Json<serde_json::Map<String, serde_json::Value>>> {
    let settings = state
        .db
        .run(&tenant, |conn| {
            Ok(diesel::sql_query("SELECT key, value, updated_at FROM settings ORDER BY key ASC")
                .load::<Setting>(conn)?)
        })
        .await?;
    Ok(Json(into_object(settings)))
}

pub async fn get_setting(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(key): Path<String>,
) -> ApiResult<Json<Setting>> {
    validate_setting_key(&key)?;

    let setting = state
        .db
        .run(&tenant, move |conn| {
            diesel::sql_query("SELECT key, value, updated_at FROM settings WHERE key = $1")
                .bind::<Text, _>(key)
                .get_result::<Setting>(conn)
                .optional()?
                .ok_or_else(|| ApiError::not_found("Setting"))
        })
        .await?;
    Ok(Json(setting))
}

pub async fn put_setting(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(key): Path<String>,
    Json(req): Json<SettingValueRequest>,
) -> ApiResult<Json<Setting>> {
    validate_setting_key(&key)?;
    let value = require(req.value, "value")?;

    let setting = state
        .db
        .run(&tenant, move |conn| {
            Ok(diesel::sql_query(
                "INSERT INTO settings (key, value) VALUES ($1, $2) \
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now() \
                 RETURNING key, value, updated_at",
            )
            .bind::<Text, _>(key)
            .bind::<Jsonb, _>(value)
            .get_result::<Setting>(conn)?)
        })
        .await?;
    Ok(Json(setting))
}

pub fn configure_settings_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::SETTINGS, get(list_settings))
        .route(ApiUrls::SETTING_BY_KEY, get(get_setting).put(put_setting))
        .route(
            ApiUrls::CATEGORIES,
            get(categories::list_categories).post(categories::create_category),
        )
        .route(
            ApiUrls::CATEGORY_BY_ID,
            put(categories::update_category).delete(categories::delete_category),
        )
        .route(
            ApiUrls::CATEGORY_SUBCATEGORIES,
            get(categories::list_subcategories).post(categories::create_subcategory),
        )
        .route(
            ApiUrls::SUBCATEGORY_BY_ID,
            delete(categories::delete_subcategory),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_collapse_into_object() {
        let now = Utc::now();
        let settings = vec![
            Setting {
                key: "sla.hours".into(),
                value: serde_json::json!(24),
                updated_at: now,
            },
            Setting {
                key: "whatsapp.greeting".into(),
                value: serde_json::json!({"text": "Olá"}),
                updated_at: now,
            },
        ];

        let object = into_object(settings);
        assert_eq!(object["sla.hours"], 24);
        assert_eq!(object["whatsapp.greeting"]["text"], "Olá");
    }
}

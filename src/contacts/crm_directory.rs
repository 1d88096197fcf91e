use anyhow::{anyhow, Result};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use diesel::prelude::*;
use diesel::sql_types::{Bool, Nullable, Text};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::config::CrmDirectoryConfig;
use crate::core::shared::error::{ApiError, ApiResult};
use crate::core::shared::state::AppState;
use crate::core::shared::utils::blank_to_none;
use crate::core::tenant::TenantContext;
use crate::core::urls::ApiUrls;

/// A company as the external directory reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryCompany {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported company id: {other}"
        ))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DirectoryPage {
    Bare(Vec<DirectoryCompany>),
    Wrapped { data: Vec<DirectoryCompany> },
}

impl From<DirectoryPage> for Vec<DirectoryCompany> {
    fn from(page: DirectoryPage) -> Self {
        match page {
            DirectoryPage::Bare(items) | DirectoryPage::Wrapped { data: items } => items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrmDirectoryClient {
    config: CrmDirectoryConfig,
    http_client: reqwest::Client,
}

impl CrmDirectoryClient {
    pub fn new(config: CrmDirectoryConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub async fn search_companies(
        &self,
        search: Option<&str>,
        page: u32,
    ) -> Result<Vec<DirectoryCompany>> {
        let url = format!("{}/companies", self.config.base_url);
        let page = page.max(1).to_string();

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .query(&[("search", search.unwrap_or_default()), ("page", page.as_str())])
            .send()
            .await
            .map_err(|e| anyhow!("Failed to query CRM directory: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("CRM directory returned {}: {}", status, error_text));
        }

        let page: DirectoryPage = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse CRM directory response: {}", e))?;

        Ok(page.into())
    }
}

fn crm_client(state: &AppState) -> ApiResult<Arc<CrmDirectoryClient>> {
    state
        .crm
        .clone()
        .ok_or_else(|| ApiError::Unavailable("CRM directory not configured".to_string()))
}

fn upstream_failure(e: anyhow::Error) -> ApiError {
    error!("[CRM] Directory request failed: {e}");
    ApiError::Upstream("CRM directory unavailable".to_string())
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectorySearchQuery {
    pub search: Option<String>,
    pub page: Option<u32>,
}

pub async fn search_crm_companies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DirectorySearchQuery>,
) -> ApiResult<Json<Vec<DirectoryCompany>>> {
    let client = crm_client(&state)?;
    let search = blank_to_none(query.search);
    let companies = client
        .search_companies(search.as_deref(), query.page.unwrap_or(1))
        .await
        .map_err(upstream_failure)?;
    Ok(Json(companies))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub search: Option<String>,
    pub external_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub updated: usize,
}

#[derive(QueryableByName)]
struct UpsertRow {
    #[diesel(sql_type = Bool)]
    inserted: bool,
}

/// Keeps only the directory companies named in `external_ids`, or all of them
/// when no filter is given.
fn select_for_import(
    companies: Vec<DirectoryCompany>,
    external_ids: Option<&[String]>,
) -> Vec<DirectoryCompany> {
    match external_ids {
        Some(ids) if !ids.is_empty() => companies
            .into_iter()
            .filter(|c| ids.iter().any(|id| id == &c.id))
            .collect(),
        _ => companies,
    }
}

pub async fn import_crm_companies(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(req): Json<ImportRequest>,
) -> ApiResult<Json<ImportSummary>> {
    let client = crm_client(&state)?;
    let search = blank_to_none(req.search);
    let fetched = client
        .search_companies(search.as_deref(), 1)
        .await
        .map_err(upstream_failure)?;
    let companies = select_for_import(fetched, req.external_ids.as_deref());

    let summary = state
        .db
        .run(&tenant, move |conn| {
            let mut summary = ImportSummary::default();
            for company in companies {
                let row = diesel::sql_query(
                    "INSERT INTO companies (name, document, email, phone, external_id) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (external_id) DO UPDATE SET \
                     name = EXCLUDED.name, document = EXCLUDED.document, \
                     email = EXCLUDED.email, phone = EXCLUDED.phone, \
                     is_deleted = false, updated_at = now() \
                     RETURNING (xmax = 0) AS inserted",
                )
                .bind::<Text, _>(company.name)
                .bind::<Nullable<Text>, _>(company.document)
                .bind::<Nullable<Text>, _>(company.email)
                .bind::<Nullable<Text>, _>(company.phone)
                .bind::<Text, _>(company.id)
                .get_result::<UpsertRow>(conn)?;
                if row.inserted {
                    summary.imported += 1;
                } else {
                    summary.updated += 1;
                }
            }
            Ok(summary)
        })
        .await?;

    info!(
        "[CRM] Imported {} and updated {} companies for tenant {}",
        summary.imported, summary.updated, tenant
    );
    Ok(Json(summary))
}

pub fn configure_crm_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::CRM_COMPANIES, get(search_crm_companies))
        .route(ApiUrls::CRM_COMPANIES_IMPORT, post(import_crm_companies))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::Server) -> CrmDirectoryClient {
        CrmDirectoryClient::new(CrmDirectoryConfig {
            base_url: server.url(),
            api_key: "secret-key".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_search_accepts_bare_array() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/companies")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("search".into(), "acme".into()),
                mockito::Matcher::UrlEncoded("page".into(), "2".into()),
            ]))
            .match_header("authorization", "Bearer secret-key")
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id": 10, "name": "Acme", "document": "123"}]"#)
            .create_async()
            .await;

        let companies = client_for(&server)
            .search_companies(Some("acme"), 2)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].id, "10");
        assert_eq!(companies[0].document.as_deref(), Some("123"));
        assert_eq!(companies[0].email, None);
    }

    #[tokio::test]
    async fn test_search_accepts_wrapped_data() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/companies")
            .match_query(mockito::Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [{"id": "c-1", "name": "Globex"}, {"id": "c-2", "name": "Initech"}]}"#)
            .create_async()
            .await;

        let companies = client_for(&server).search_companies(None, 1).await.unwrap();
        let names: Vec<_> = companies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Globex", "Initech"]);
    }

    #[tokio::test]
    async fn test_search_reports_upstream_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/companies")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client_for(&server).search_companies(None, 1).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_select_for_import() {
        let company = |id: &str| DirectoryCompany {
            id: id.to_string(),
            name: format!("Company {id}"),
            document: None,
            email: None,
            phone: None,
        };
        let all = vec![company("1"), company("2"), company("3")];

        assert_eq!(select_for_import(all.clone(), None).len(), 3);
        assert_eq!(select_for_import(all.clone(), Some(&[])).len(), 3);

        let ids = vec!["2".to_string(), "9".to_string()];
        let picked = select_for_import(all, Some(&ids));
        assert_eq!(picked, vec![company("2")]);
    }
}

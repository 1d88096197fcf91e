#[cfg(test)]
mod tenant_db_integration_tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use deskserver::core::config::AppConfig;
    use deskserver::core::shared::state::AppState;
    use deskserver::core::shared::utils::create_conn;
    use deskserver::core::shared::TenantDb;
    use deskserver::core::tenant::{TenantContext, TenantSource};
    use deskserver::main_module::{build_app, App};
    use diesel::connection::SimpleConnection;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Harness {
        app: App,
        tenant: String,
        state: Arc<AppState>,
    }

    impl Harness {
        async fn request(
            &self,
            method: Method,
            uri: &str,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let builder = Request::builder()
                .method(method)
                .uri(uri)
                .header("x-tenant-id", &self.tenant);
            let request = match body {
                Some(b) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(b.to_string())),
                None => builder.body(Body::empty()),
            }
            .unwrap();
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        fn drop_schema(&self) {
            if let Ok(mut conn) = self.state.conn.get() {
                let _ = conn.batch_execute(&format!(
                    "DROP SCHEMA IF EXISTS \"{}\" CASCADE",
                    self.tenant
                ));
            }
        }
    }

    /// Provisions a throwaway tenant, or returns `None` when no test database is configured.
    async fn harness() -> Option<Harness> {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping test - TEST_DATABASE_URL not set");
            return None;
        };
        let config = AppConfig::from_lookup(|key| match key {
            "DATABASE_URL" => Some(url.clone()),
            "MOCK_FALLBACK" => Some("false".to_string()),
            _ => None,
        })
        .unwrap();
        let pool = match create_conn(&config.database) {
            Ok(pool) => pool,
            Err(e) => {
                println!("Skipping test - Cannot connect to database: {}", e);
                return None;
            }
        };

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        let tenant = format!("desk_test_{}_{}", std::process::id(), nanos);
        let ctx = TenantContext::new(&tenant, TenantSource::Default).unwrap();
        TenantDb::new(pool.clone()).provision(&ctx).await.unwrap();

        let state = Arc::new(AppState::new(config, pool).unwrap());
        Some(Harness {
            app: build_app(state.clone()),
            tenant,
            state,
        })
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_404() {
        let Some(h) = harness().await else { return };
        let request = Request::builder()
            .uri("/api/companies")
            .header("x-tenant-id", "no_such_tenant_schema")
            .body(Body::empty())
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        h.drop_schema();
    }

    #[tokio::test]
    async fn test_delete_unknown_ids_are_404() {
        let Some(h) = harness().await else { return };
        for uri in [
            "/api/tickets/999999",
            "/api/companies/999999",
            "/api/contacts/999999",
            "/api/categories/999999",
            "/api/subcategories/999999",
            "/api/groups/999999",
            "/api/users/999999",
        ] {
            let (status, body) = h.request(Method::DELETE, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert!(body["error"].is_string(), "{uri}");
        }
        h.drop_schema();
    }

    #[tokio::test]
    async fn test_company_delete_cascades_to_contacts() {
        let Some(h) = harness().await else { return };

        let (status, company) = h
            .request(Method::POST, "/api/companies", Some(json!({"name": "Acme"})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let company_id = company["id"].as_i64().unwrap();

        let mut contact_ids = Vec::new();
        for name in ["Ana", "Bruno"] {
            let (status, contact) = h
                .request(
                    Method::POST,
                    "/api/contacts",
                    Some(json!({"name": name, "companyId": company_id})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(contact["companyName"], "Acme");
            contact_ids.push(contact["id"].as_i64().unwrap());
        }

        let (status, company) = h
            .request(Method::GET, &format!("/api/companies/{company_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(company["contactCount"], 2);

        let (status, deleted) = h
            .request(Method::DELETE, &format!("/api/companies/{company_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["cascaded"], 2);

        for id in contact_ids {
            let (status, _) = h.request(Method::GET, &format!("/api/contacts/{id}"), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }

        let (status, _) = h
            .request(Method::DELETE, &format!("/api/companies/{company_id}"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = h
            .request(
                Method::POST,
                "/api/contacts",
                Some(json!({"name": "Late", "companyId": company_id})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        h.drop_schema();
    }

    #[tokio::test]
    async fn test_ticket_hides_deleted_company() {
        let Some(h) = harness().await else { return };

        let (_, company) = h
            .request(Method::POST, "/api/companies", Some(json!({"name": "Acme"})))
            .await;
        let company_id = company["id"].as_i64().unwrap();
        let (status, ticket) = h
            .request(
                Method::POST,
                "/api/tickets",
                Some(json!({"title": "Invoice missing", "companyId": company_id})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(ticket["companyName"], "Acme");
        let id = ticket["id"].as_i64().unwrap();

        let (status, _) = h
            .request(Method::DELETE, &format!("/api/companies/{company_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, ticket) = h.request(Method::GET, &format!("/api/tickets/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(ticket["companyName"].is_null());

        let (status, body) = h
            .request(
                Method::POST,
                "/api/tickets",
                Some(json!({"title": "Another", "companyId": company_id})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("Company"));

        let (status, _) = h
            .request(
                Method::PUT,
                &format!("/api/tickets/{id}"),
                Some(json!({"companyId": company_id})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = h
            .request(
                Method::POST,
                "/api/tickets",
                Some(json!({"title": "Ghost user", "assignedUserId": 999999})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        h.drop_schema();
    }

    #[tokio::test]
    async fn test_ticket_lifecycle_and_attachment_cascade() {
        let Some(h) = harness().await else { return };

        let (status, ticket) = h
            .request(
                Method::POST,
                "/api/tickets",
                Some(json!({"title": "Printer on fire", "priority": "urgent"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(ticket["status"], "open");
        let id = ticket["id"].as_i64().unwrap();

        let (status, ticket) = h
            .request(
                Method::PUT,
                &format!("/api/tickets/{id}"),
                Some(json!({"status": "resolved"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(ticket["closedAt"].is_string());

        let (status, _) = h
            .request(
                Method::POST,
                &format!("/api/tickets/{id}/attachments"),
                Some(json!({"fileName": "log.txt", "fileUrl": "https://files.example/log.txt"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, stats) = h.request(Method::GET, "/api/tickets/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["resolved"], 1);

        let (status, deleted) = h
            .request(Method::DELETE, &format!("/api/tickets/{id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["cascaded"], 1);

        let (status, _) = h
            .request(Method::GET, &format!("/api/tickets/{id}/attachments"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        h.drop_schema();
    }

    #[tokio::test]
    async fn test_category_and_group_cascades() {
        let Some(h) = harness().await else { return };

        let (_, category) = h
            .request(Method::POST, "/api/categories", Some(json!({"name": "Billing"})))
            .await;
        let category_id = category["id"].as_i64().unwrap();
        for name in ["Invoice", "Refund"] {
            let (status, _) = h
                .request(
                    Method::POST,
                    &format!("/api/categories/{category_id}/subcategories"),
                    Some(json!({"name": name})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (_, categories) = h.request(Method::GET, "/api/categories", None).await;
        assert_eq!(categories[0]["subcategories"].as_array().unwrap().len(), 2);

        let (_, deleted) = h
            .request(Method::DELETE, &format!("/api/categories/{category_id}"), None)
            .await;
        assert_eq!(deleted["cascaded"], 2);

        let (_, group) = h
            .request(Method::POST, "/api/groups", Some(json!({"name": "Tier 1"})))
            .await;
        let group_id = group["id"].as_i64().unwrap();
        let (status, user) = h
            .request(
                Method::POST,
                "/api/users",
                Some(json!({"name": "Ana", "email": "ana@example.com", "groupId": group_id})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(user["role"], "agent");
        let user_id = user["id"].as_i64().unwrap();

        let (_, deleted) = h
            .request(Method::DELETE, &format!("/api/groups/{group_id}"), None)
            .await;
        assert_eq!(deleted["cascaded"], 1);

        let (_, user) = h.request(Method::GET, &format!("/api/users/{user_id}"), None).await;
        assert!(user["groupId"].is_null());
        h.drop_schema();
    }

    #[tokio::test]
    async fn test_settings_and_reports() {
        let Some(h) = harness().await else { return };

        let (status, _) = h
            .request(Method::PUT, "/api/settings/sla.hours", Some(json!({"value": 24})))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, all) = h.request(Method::GET, "/api/settings", None).await;
        assert_eq!(all["sla.hours"], 24);
        let (status, _) = h.request(Method::GET, "/api/settings/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, company) = h
            .request(Method::POST, "/api/companies", Some(json!({"name": "Globex"})))
            .await;
        let company_id = company["id"].as_i64().unwrap();
        if let Ok(mut conn) = h.state.conn.get() {
            conn.batch_execute(&format!(
                "SET search_path TO \"{tenant}\"; \
                 INSERT INTO transactions (company_id, kind, amount, occurred_at) VALUES \
                 ({company_id}, 'sale', 100.00, '2024-03-01T10:00:00Z'), \
                 ({company_id}, 'sale', 50.50, '2024-03-01T15:00:00Z'), \
                 ({company_id}, 'payment', 30.00, '2024-03-02T09:00:00Z'); \
                 SET search_path TO public;",
                tenant = h.tenant
            ))
            .unwrap();
        }

        let (_, balance) = h
            .request(Method::GET, &format!("/api/reports/balance?companyId={company_id}"), None)
            .await;
        assert_eq!(balance[0]["debits"], "150.50");
        assert_eq!(balance[0]["credits"], "30.00");
        assert_eq!(balance[0]["balance"], "120.50");

        let (_, page) = h
            .request(
                Method::GET,
                &format!("/api/reports/transactions?companyId={company_id}&kind=sale"),
                None,
            )
            .await;
        assert_eq!(page["total"], 2);

        let (_, sales) = h
            .request(Method::GET, "/api/reports/sales?from=2024-03-01&to=2024-03-31", None)
            .await;
        assert_eq!(sales["rows"][0]["period"], "2024-03-01");
        assert_eq!(sales["rows"][0]["count"], 2);
        assert_eq!(sales["total"], "150.50");
        h.drop_schema();
    }

    #[tokio::test]
    async fn test_bare_end_date_includes_last_microsecond() {
        let Some(h) = harness().await else { return };

        let (_, company) = h
            .request(Method::POST, "/api/companies", Some(json!({"name": "Initech"})))
            .await;
        let company_id = company["id"].as_i64().unwrap();
        if let Ok(mut conn) = h.state.conn.get() {
            conn.batch_execute(&format!(
                "SET search_path TO \"{tenant}\"; \
                 INSERT INTO transactions (company_id, kind, amount, occurred_at) VALUES \
                 ({company_id}, 'sale', 10.00, '2024-03-01 23:59:59.999999+00'), \
                 ({company_id}, 'sale', 99.00, '2024-03-02 00:00:00+00'); \
                 SET search_path TO public;",
                tenant = h.tenant
            ))
            .unwrap();
        }

        let (status, sales) = h
            .request(Method::GET, "/api/reports/sales?from=2024-03-01&to=2024-03-01", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sales["count"], 1);
        assert_eq!(sales["total"], "10.00");

        let (_, page) = h
            .request(
                Method::GET,
                &format!("/api/reports/transactions?companyId={company_id}&to=2024-03-01"),
                None,
            )
            .await;
        assert_eq!(page["total"], 1);

        let (_, page) = h
            .request(
                Method::GET,
                &format!(
                    "/api/reports/transactions?companyId={company_id}&to=2024-03-02T00:00:00Z"
                ),
                None,
            )
            .await;
        assert_eq!(page["total"], 2);
        h.drop_schema();
    }
}

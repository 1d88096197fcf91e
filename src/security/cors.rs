use axum::http::{header, HeaderName, HeaderValue, Method};
use log::{info, warn};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::core::tenant::TENANT_HEADER;

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            max_age_secs: 3600,
        }
    }
}

impl CorsConfig {
    pub fn with_origins(origins: &[String]) -> Self {
        Self {
            allowed_origins: origins.to_vec(),
            ..Self::default()
        }
    }
}

pub fn create_cors_layer(config: &CorsConfig) -> CorsLayer {
    let headers = [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        header::ACCEPT,
        HeaderName::from_static(TENANT_HEADER),
    ];

    let base = CorsLayer::new()
        .allow_methods(config.allowed_methods.clone())
        .allow_headers(headers)
        .max_age(Duration::from_secs(config.max_age_secs));

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        info!("CORS allowing any origin");
        base.allow_origin(Any)
    } else {
        info!("CORS configured with {} allowed origins", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

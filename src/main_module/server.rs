//! HTTP server initialization and routing

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router, ServiceExt};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::util::MapRequest;
use tower::Layer;
use tower_http::trace::TraceLayer;

use crate::core::shared::error::ApiError;
use crate::core::shared::state::AppState;
use crate::core::tenant::rewrite_tenant_path;
use crate::core::urls::ApiUrls;
use crate::security::{create_cors_layer, CorsConfig};

use super::{health_check, health_check_simple, shutdown_signal};

/// Largest error body re-wrapped into the JSON envelope.
const MAX_REWRAPPED_BODY: usize = 16 * 1024;

pub type App = MapRequest<Router, fn(Request) -> Request>;

/// Gives framework-generated client errors (wrong method, malformed body) the
/// same `{"error": ...}` shape handlers use.
async fn json_error_envelope(response: Response) -> Response {
    let status = response.status();
    if !status.is_client_error() {
        return response;
    }
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    if status == StatusCode::METHOD_NOT_ALLOWED {
        let allow = parts.headers.remove(header::ALLOW);
        let mut rewritten = ApiError::MethodNotAllowed.into_response();
        if let Some(allow) = allow {
            rewritten.headers_mut().insert(header::ALLOW, allow);
        }
        return rewritten;
    }

    let text = match axum::body::to_bytes(body, MAX_REWRAPPED_BODY).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(_) => String::new(),
    };
    let message = if text.is_empty() {
        status.canonical_reason().unwrap_or("Bad request").to_string()
    } else {
        text
    };
    let json = serde_json::json!({ "error": message }).to_string();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Response::from_parts(parts, Body::from(json))
}

async fn route_not_found() -> ApiError {
    ApiError::NotFound("Route not found".to_string())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = create_cors_layer(&CorsConfig::with_origins(
        &state.config.cors_allowed_origins,
    ));

    let api_router = Router::new()
        .route(ApiUrls::HEALTH_SIMPLE, get(health_check_simple))
        .route(ApiUrls::HEALTH, get(health_check))
        .merge(crate::tickets::configure_tickets_routes())
        .merge(crate::contacts::configure_contacts_routes())
        .merge(crate::settings::configure_settings_routes())
        .merge(crate::directory::configure_directory_routes())
        .merge(crate::reports::configure_reports_routes());

    #[cfg(feature = "whatsapp")]
    let api_router = api_router.merge(crate::whatsapp::configure());

    api_router
        .fallback(route_not_found)
        .with_state(state)
        .layer(axum::middleware::map_response(json_error_envelope))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// The router behind the `/t/{tenant}` prefix rewrite. The rewrite has to run
/// before routing, so it wraps the router instead of being a router layer.
pub fn build_app(state: Arc<AppState>) -> App {
    let rewrite: fn(Request) -> Request = rewrite_tenant_path::<Body>;
    tower::util::MapRequestLayer::new(rewrite).layer(build_router(state))
}

pub async fn run_server(app_state: Arc<AppState>) -> std::io::Result<()> {
    let host = app_state.config.server.host.clone();
    let port = app_state.config.server.port;
    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        error!("Invalid listen address {}:{}: {}", host, port, e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;

    let app = build_app(app_state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(
                "Failed to bind to {}: {} - is another instance running?",
                addr, e
            );
            return Err(e);
        }
    };
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::{get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::{AccessEngine, Database};

#[derive(Clone)]
pub struct AppState {
    pub engine: AccessEngine,
    /// Set when running on PostgreSQL; used by the health check.
    pub database: Option<Database>,
    pub service_name: String,
    pub service_version: String,
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(engine: AccessEngine) -> Self {
        Self {
            engine,
            database: None,
            service_name: "access-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let authz_routes = Router::new()
        .route("/authz/check", post(handlers::check))
        .route("/authz/check-any", post(handlers::check_any))
        .route("/authz/capabilities", get(handlers::list_capabilities));

    let grant_routes = Router::new()
        .route("/grant-requests", post(handlers::create_grant_request))
        .route("/grant-requests/mine", get(handlers::list_my_grant_requests))
        .route("/grant-requests/pending", get(handlers::list_pending_grant_requests))
        .route(
            "/grant-requests/:request_id/review",
            post(handlers::review_grant_request),
        )
        .route("/grants/:grant_id/revoke", post(handlers::revoke_grant));

    let impersonation_routes = Router::new()
        .route("/impersonation", post(handlers::start_impersonation))
        .route("/impersonation/active", get(handlers::get_active_impersonation))
        .route(
            "/impersonation/:session_id/stop",
            post(handlers::stop_impersonation),
        );

    let security_routes = Router::new()
        .route("/security-requests", post(handlers::create_security_request))
        .route(
            "/security-requests/pending",
            get(handlers::list_pending_security_requests),
        )
        .route(
            "/security-requests/:request_id/review",
            post(handlers::review_security_request),
        )
        .route(
            "/security-requests/:request_id/execute",
            post(handlers::execute_security_request),
        );

    let policy_routes = Router::new()
        .route(
            "/policies",
            post(handlers::create_policy).get(handlers::list_policies),
        )
        .route("/policies/evaluate", post(handlers::evaluate_policies))
        .route(
            "/policies/:policy_id",
            get(handlers::get_policy)
                .patch(handlers::update_policy)
                .delete(handlers::delete_policy),
        )
        .route(
            "/policies/:policy_id/evaluate",
            post(handlers::evaluate_policy),
        )
        .route("/devices/:device_id/trust", put(handlers::set_device_trust));

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .allowed_origins
                .iter()
                .filter_map(|o| match o.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(handlers::USER_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(authz_routes)
        .merge(grant_routes)
        .merge(impersonation_routes)
        .merge(security_routes)
        .merge(policy_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors);

    Ok(app)
}

/// Service health check
pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let store = match &state.database {
        Some(db) => {
            db.health_check()
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            "postgres"
        }
        None => "memory",
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
        "version": state.service_version,
        "checks": {
            "store": store,
        }
    })))
}

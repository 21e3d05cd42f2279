//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/trove/index-card-search?<qs>` | Cardsearch |
//! | `GET`  | `/trove/index-value-search?<qs>` | Valuesearch |
//! | `GET`  | `/admin/search-indexes` | Status of every strategy and its indexes |
//! | `POST` | `/admin/search-indexes/{indexname}/{action}` | Index lifecycle action |
//!
//! Actions: `setup`, `delete`, `make-default`, `start-backfill`,
//! `mark-backfill-complete`, `keep-live`, `stop-keeping-live`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "cardSearchFilter[x][nope]: unknown filter operator \"nope\"" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use trovesearch_core::error::{ParamError, StrategyError};
use trovesearch_core::response::{CardsearchResponse, ValuesearchResponse};
use trovesearch_core::strategy::{IndexStatus, StrategyStatus};

use crate::admin::{self, IndexAction};
use crate::config::Config;
use crate::progress::NoProgress;
use crate::search;
use crate::services::Services;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::connect(config).await?;
    let bind_addr = config.server.bind.clone();
    let app = router(Arc::new(services));

    info!(bind = %bind_addr, "trove server listening");
    println!("trove server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes, for serving or for driving in tests.
pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/trove/index-card-search", get(handle_cardsearch))
        .route("/trove/index-value-search", get(handle_valuesearch))
        .route("/admin/search-indexes", get(handle_index_status))
        .route(
            "/admin/search-indexes/{indexname}/{action}",
            post(handle_index_action),
        )
        .layer(cors)
        .with_state(AppState { services })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

/// Parameter problems are the caller's fault; unknown strategies or
/// indexes are not found; everything else is internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(param_error) = err.downcast_ref::<ParamError>() {
            return app_error(StatusCode::BAD_REQUEST, "bad_request", param_error.to_string());
        }
        if let Some(strategy_error) = err.downcast_ref::<StrategyError>() {
            let (status, code) = match strategy_error {
                StrategyError::UnknownStrategy(_)
                | StrategyError::UnknownCheck { .. }
                | StrategyError::IndexNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                StrategyError::IndexAlreadyExists(_) => (StatusCode::CONFLICT, "conflict"),
                StrategyError::UnsupportedMessageType { .. } => {
                    (StatusCode::BAD_REQUEST, "bad_request")
                }
            };
            return app_error(status, code, strategy_error.to_string());
        }
        // the chain can carry raw engine responses; keep it in the log
        error!(error = format!("{err:#}"), "request failed");
        app_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error",
        )
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /trove/... ============

async fn handle_cardsearch(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<CardsearchResponse>, AppError> {
    let querystring = query.unwrap_or_default();
    let response = search::cardsearch(&state.services.registry, &querystring).await?;
    Ok(Json(response))
}

async fn handle_valuesearch(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<ValuesearchResponse>, AppError> {
    let querystring = query.unwrap_or_default();
    let response = search::valuesearch(&state.services.registry, &querystring).await?;
    Ok(Json(response))
}

// ============ /admin/search-indexes ============

#[derive(Serialize)]
struct IndexStatusResponse {
    strategies: Vec<StrategyStatus>,
}

async fn handle_index_status(
    State(state): State<AppState>,
) -> Result<Json<IndexStatusResponse>, AppError> {
    let strategies = admin::index_statuses(&state.services.registry).await?;
    Ok(Json(IndexStatusResponse { strategies }))
}

async fn handle_index_action(
    State(state): State<AppState>,
    Path((indexname, action)): Path<(String, String)>,
) -> Result<Json<IndexStatus>, AppError> {
    let action: IndexAction = action
        .parse()
        .map_err(|e: anyhow::Error| app_error(StatusCode::NOT_FOUND, "not_found", e.to_string()))?;
    let status = admin::apply_index_action(
        &state.services.registry,
        &state.services.messenger,
        &indexname,
        action,
        &NoProgress,
    )
    .await?;
    Ok(Json(status))
}

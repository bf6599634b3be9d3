use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    fetch_page, lookup_cargo, perform_batch_action, ApiContext, DEFAULT_PAGE, DEFAULT_PAGE_LIMIT,
};
use shared::{
    domain::OrderId,
    error::{ApiError, ErrorCode},
    protocol::{
        ApiFailure, BatchActionRequest, BatchActionResponse, CargoLookupResponse, PageResponse,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<String>,
    limit: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext { storage };

    let state = AppState { api };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/shop", get(http_shop_page))
        .route("/api/shop/cargo/:orderid", get(http_shop_cargo))
        .route("/api/shop/batch-action", post(http_batch_action))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../assets/index.html"))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Mirrors the lenient caller intent: absent, non-numeric, or non-positive
/// values fall back to the default rather than erroring.
fn coerce_positive(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(default)
}

async fn http_shop_page(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PageQuery>,
) -> Result<Json<PageResponse>, (StatusCode, Json<ApiFailure>)> {
    let page = coerce_positive(q.page.as_deref(), DEFAULT_PAGE);
    let limit = coerce_positive(q.limit.as_deref(), DEFAULT_PAGE_LIMIT);

    let (data, pagination) = fetch_page(&state.api, page, limit).await.map_err(reject)?;
    Ok(Json(PageResponse {
        success: true,
        data,
        pagination,
    }))
}

async fn http_shop_cargo(
    State(state): State<Arc<AppState>>,
    Path(orderid): Path<String>,
) -> Result<Json<CargoLookupResponse>, (StatusCode, Json<ApiFailure>)> {
    let order_id: i64 = orderid
        .parse()
        .map_err(|_| reject(ApiError::validation("order id must be a positive integer")))?;

    let data = lookup_cargo(&state.api, order_id).await.map_err(reject)?;
    Ok(Json(CargoLookupResponse {
        success: true,
        data,
    }))
}

async fn http_batch_action(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<BatchActionResponse>, (StatusCode, Json<ApiFailure>)> {
    // Deserialized by hand so malformed payloads and unknown action tags get
    // the uniform {success:false, message} shape instead of axum's default.
    let request: BatchActionRequest = serde_json::from_value(body)
        .map_err(|err| reject(ApiError::validation(format!("invalid batch request: {err}"))))?;

    let ids: Vec<OrderId> = request.ids.iter().copied().map(OrderId).collect();
    let outcome = perform_batch_action(&state.api, &ids, request.action)
        .await
        .map_err(reject)?;

    Ok(Json(BatchActionResponse {
        success: true,
        message: outcome.message,
    }))
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiFailure>) {
    let status = match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiFailure::new(err.message)))
}

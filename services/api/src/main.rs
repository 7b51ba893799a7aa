//! API Service - Read API over uploaded spreadsheets and their records
//!
//! Endpoints:
//! - GET  /health - Health check
//! - GET  /files - List uploaded files, newest first (filters: anio, dependencia, usuario)
//! - GET  /files/:id - File metadata
//! - GET  /files/:id/summary - Record count and distinct years/departments/indicators
//! - GET  /records - Filtered records of one file (latest file by default)
//! - GET  /distinct - Distinct values of a field
//! - POST /aggregate - Group-by-count series for charts and reports
//! - POST /search - Paged term search over records
//! - GET  /statistics - Portal-wide counts
//!
//! The requesting user, when known, is passed in the `X-User-Id` header.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use records::{
    file_summary, search_records, statistics, Aggregation, AggregationEngine, FileFilter,
    FileSummary, FilterCriteria, FilterEngine, FilterOptions, PgStore, QueryError, Record, RecordStore,
    SearchPage, Statistics, TextSearch, UploadedFile,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    store: Arc<dyn RecordStore>,
    filter: FilterEngine,
    aggregation: AggregationEngine,
}

impl AppState {
    fn new(store: Arc<dyn RecordStore>, options: FilterOptions) -> Self {
        let filter = FilterEngine::new(store.clone(), options);
        Self {
            store,
            aggregation: AggregationEngine::new(filter.clone()),
            filter,
        }
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct RecordsResponse {
    file: UploadedFile,
    count: usize,
    records: Vec<Record>,
}

#[derive(Serialize)]
struct DistinctResponse {
    field: String,
    values: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        let status = match &e {
            QueryError::InvalidCriteria { .. } | QueryError::EmptyField => StatusCode::BAD_REQUEST,
            QueryError::MissingRequester => StatusCode::UNAUTHORIZED,
            QueryError::NoFilesAvailable | QueryError::FileNotFound(_) => StatusCode::NOT_FOUND,
            QueryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %e, "query failed");
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<records::StoreError> for ApiError {
    fn from(e: records::StoreError) -> Self {
        QueryError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Query params and bodies
// ============================================================================

#[derive(Deserialize)]
struct RecordsQuery {
    file_id: Option<String>,
    year: Option<String>,
    department: Option<String>,
    indicator: Option<String>,
    text_field: Option<String>,
    text_value: Option<String>,
}

impl RecordsQuery {
    fn into_criteria(self) -> FilterCriteria {
        let text = |v: Option<String>| v.map(Value::String);
        FilterCriteria {
            file_id: text(self.file_id),
            year: text(self.year),
            department: text(self.department),
            indicator: text(self.indicator),
            text_search: match (self.text_field, self.text_value) {
                (Some(field), Some(value)) => Some(TextSearch {
                    field,
                    value: Value::String(value),
                }),
                _ => None,
            },
            ..FilterCriteria::default()
        }
    }
}

#[derive(Deserialize)]
struct DistinctQuery {
    field: String,
    file_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct AggregateRequest {
    #[serde(alias = "groupField", alias = "tipo_grafico")]
    group_field: String,
    #[serde(default, alias = "filtros")]
    criteria: Value,
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default, alias = "termino")]
    term: String,
    #[serde(default, alias = "filtros")]
    criteria: Value,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    records::summary::DEFAULT_PAGE_SIZE
}

fn requester(headers: &HeaderMap) -> Result<Option<Uuid>, ApiError> {
    match headers.get("x-user-id") {
        None => Ok(None),
        Some(raw) => raw
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Some)
            .ok_or_else(|| ApiError::bad_request("X-User-Id must be a UUID")),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: "0.1.0",
    })
}

async fn files_handler(
    State(state): State<AppState>,
    Query(filter): Query<FileFilter>,
) -> ApiResult<Vec<UploadedFile>> {
    Ok(Json(state.store.list_files(&filter).await?))
}

async fn file_handler(State(state): State<AppState>, Path(file_id): Path<Uuid>) -> ApiResult<UploadedFile> {
    let file = state
        .store
        .get_file(file_id)
        .await?
        .ok_or(QueryError::FileNotFound(file_id))?;
    Ok(Json(file))
}

async fn summary_handler(State(state): State<AppState>, Path(file_id): Path<Uuid>) -> ApiResult<FileSummary> {
    Ok(Json(file_summary(state.store.as_ref(), file_id).await?))
}

async fn records_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RecordsQuery>,
) -> ApiResult<RecordsResponse> {
    let requester = requester(&headers)?;
    let set = state.filter.build_query(&params.into_criteria(), requester).await?;
    let file = set.file().clone();
    let records = set.into_records();
    Ok(Json(RecordsResponse {
        file,
        count: records.len(),
        records,
    }))
}

async fn distinct_handler(
    State(state): State<AppState>,
    Query(params): Query<DistinctQuery>,
) -> ApiResult<DistinctResponse> {
    let values = state.filter.list_distinct_values(&params.field, params.file_id).await?;
    Ok(Json(DistinctResponse {
        field: params.field,
        values,
    }))
}

async fn aggregate_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AggregateRequest>,
) -> ApiResult<Aggregation> {
    let requester = requester(&headers)?;
    let criteria = FilterCriteria::from_value(body.criteria)?;
    Ok(Json(
        state
            .aggregation
            .aggregate(&body.group_field, &criteria, requester)
            .await?,
    ))
}

async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SearchRequest>,
) -> ApiResult<SearchPage> {
    let requester = requester(&headers)?;
    let criteria = FilterCriteria::from_value(body.criteria)?;
    Ok(Json(
        search_records(&state.filter, &body.term, &criteria, body.page, body.page_size, requester).await?,
    ))
}

async fn statistics_handler(State(state): State<AppState>) -> ApiResult<Statistics> {
    Ok(Json(statistics(state.store.as_ref()).await?))
}

fn router(state: AppState) -> Router {
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/files", get(files_handler))
        .route("/files/:id", get(file_handler))
        .route("/files/:id/summary", get(summary_handler))
        .route("/records", get(records_handler))
        .route("/distinct", get(distinct_handler))
        .route("/aggregate", post(aggregate_handler))
        .route("/search", post(search_handler))
        .route("/statistics", get(statistics_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,records=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let options = FilterOptions::from_env();

    info!("Connecting to database...");
    let store = PgStore::connect(&db_url, 10)
        .await
        .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("Database connected");

    let state = AppState::new(Arc::new(store), options);
    let app = router(state);

    info!(%bind, strict_owner_scoping = options.strict_owner_scoping, "API listening");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! Read-only HTTP API over the persisted artifacts.
//!
//! Every request reads the artifact from disk, so a pipeline run that
//! replaces the files is visible immediately without a restart.

use crate::config::{Config, OutputConfig};
use crate::error::PipelineError;
use crate::storage::{read_table, Table};
use axum::{
    extract::{Path as UrlPath, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::NaiveDate;
use hyper::Server;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub output: Arc<OutputConfig>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(output: OutputConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            output: Arc::new(output),
            metrics,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Artifact {
    Cases,
    Deaths,
    RollingCases,
    RollingDeaths,
}

impl Artifact {
    fn path(self, output: &OutputConfig) -> PathBuf {
        match self {
            Artifact::Cases => output.cases(),
            Artifact::Deaths => output.deaths(),
            Artifact::RollingCases => output.rolling_cases(),
            Artifact::RollingDeaths => output.rolling_deaths(),
        }
    }
}

/// Optional inclusive date bounds applied to the date columns.
#[derive(Debug, Default, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |f| date >= f) && self.to.map_or(true, |t| date <= t)
    }
}

#[derive(Debug, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: Value,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub key: String,
    pub series: Vec<SeriesPoint>,
}

#[derive(Debug)]
pub enum ApiError {
    NotReady(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotReady(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => {
                error!("Request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "msa-pipeline",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

fn load(state: &AppState, artifact: Artifact) -> Result<Table, ApiError> {
    let path = artifact.path(&state.output);
    if !path.exists() {
        return Err(ApiError::NotReady(format!(
            "{} has not been generated yet",
            path.display()
        )));
    }
    Ok(read_table(&path)?)
}

fn cell_value(cell: &str) -> Value {
    if let Ok(n) = cell.parse::<i64>() {
        return Value::Number(n.into());
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}

/// Indices of the columns to emit: always the key column, then dates in range.
fn selected_columns(table: &Table, range: &DateRange) -> Vec<usize> {
    std::iter::once(0)
        .chain(table.headers.iter().enumerate().skip(1).filter_map(|(i, h)| {
            let date = NaiveDate::parse_from_str(h, "%Y-%m-%d").ok()?;
            range.contains(date).then_some(i)
        }))
        .collect()
}

/// Column-oriented JSON: `{ column: { row_index: value } }`.
pub fn table_to_json(table: &Table, range: &DateRange) -> Value {
    let mut columns = Map::new();
    if table.headers.is_empty() {
        return Value::Object(columns);
    }
    for idx in selected_columns(table, range) {
        let mut cells = Map::new();
        for (row_idx, row) in table.rows.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or("");
            let value = if idx == 0 {
                Value::String(cell.to_string())
            } else {
                cell_value(cell)
            };
            cells.insert(row_idx.to_string(), value);
        }
        columns.insert(table.headers[idx].clone(), Value::Object(cells));
    }
    Value::Object(columns)
}

async fn serve_table(
    state: AppState,
    artifact: Artifact,
    range: DateRange,
) -> Result<Json<Value>, ApiError> {
    let table = load(&state, artifact)?;
    Ok(Json(table_to_json(&table, &range)))
}

async fn serve_series(
    state: AppState,
    artifact: Artifact,
    key: String,
    range: DateRange,
) -> Result<Json<SeriesResponse>, ApiError> {
    let table = load(&state, artifact)?;
    let row = table
        .rows
        .iter()
        .find(|r| r.first().map(String::as_str) == Some(key.as_str()))
        .ok_or_else(|| ApiError::NotFound(format!("no series for '{key}'")))?;

    let series = table
        .headers
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, h)| {
            let date = NaiveDate::parse_from_str(h, "%Y-%m-%d").ok()?;
            range.contains(date).then(|| SeriesPoint {
                date,
                value: cell_value(row.get(i).map(String::as_str).unwrap_or("")),
            })
        })
        .collect();
    Ok(Json(SeriesResponse { key, series }))
}

async fn cases(
    State(s): State<AppState>,
    Query(r): Query<DateRange>,
) -> Result<Json<Value>, ApiError> {
    serve_table(s, Artifact::Cases, r).await
}

async fn deaths(
    State(s): State<AppState>,
    Query(r): Query<DateRange>,
) -> Result<Json<Value>, ApiError> {
    serve_table(s, Artifact::Deaths, r).await
}

async fn rolling_cases(
    State(s): State<AppState>,
    Query(r): Query<DateRange>,
) -> Result<Json<Value>, ApiError> {
    serve_table(s, Artifact::RollingCases, r).await
}

async fn rolling_deaths(
    State(s): State<AppState>,
    Query(r): Query<DateRange>,
) -> Result<Json<Value>, ApiError> {
    serve_table(s, Artifact::RollingDeaths, r).await
}

async fn cases_for(
    State(s): State<AppState>,
    UrlPath(key): UrlPath<String>,
    Query(r): Query<DateRange>,
) -> Result<Json<SeriesResponse>, ApiError> {
    serve_series(s, Artifact::Cases, key, r).await
}

async fn deaths_for(
    State(s): State<AppState>,
    UrlPath(key): UrlPath<String>,
    Query(r): Query<DateRange>,
) -> Result<Json<SeriesResponse>, ApiError> {
    serve_series(s, Artifact::Deaths, key, r).await
}

/// Create the HTTP router with all routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/cases", get(cases))
        .route("/deaths", get(deaths))
        .route("/cases/:key", get(cases_for))
        .route("/deaths/:key", get(deaths_for))
        .route("/rolling/cases", get(rolling_cases))
        .route("/rolling/deaths", get(rolling_deaths))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

/// Start the HTTP server on the configured port
pub async fn start_server(
    config: &Config,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let app = create_server(AppState::new(config.output.clone(), metrics));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!("🚀 HTTP server running on http://localhost:{}", config.server.port);
    info!("💚 Health check: http://localhost:{}/health", config.server.port);

    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

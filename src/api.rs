//! HTTP/JSON adapter over [`DataService`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::models::NewRecord;
use crate::service::DataService;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(_) => Self::not_found(err.to_string()),
            Error::Validation(_) => Self::bad_request(err.to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::internal(other.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

type AppState = Arc<DataService>;

pub fn router(service: Arc<DataService>) -> Router {
    let api = Router::new()
        .route("/records", post(create_record).get(list_records))
        .route("/records/{id}", get(get_record))
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/metrics", get(data_metrics))
        .route("/metrics/processing", get(processing_metrics))
        .route("/generate", post(generate))
        .route("/cleanup", delete(cleanup));

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn uptime_string(uptime: Duration) -> String {
    humantime::format_duration(Duration::from_secs(uptime.as_secs())).to_string()
}

async fn home(State(service): State<AppState>) -> ApiResult<Json<Value>> {
    let records = service.record_count().await?;
    Ok(Json(json!({
        "service": "Data Service",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": now_rfc3339(),
        "uptime": uptime_string(service.uptime()),
        "records": records,
        "active_jobs": service.active_jobs(),
    })))
}

async fn health(State(service): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = service.health().await;
    let (status, code) = if database {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(json!({
            "status": status,
            "timestamp": now_rfc3339(),
            "uptime": uptime_string(service.uptime()),
            "checks": { "database": database },
        })),
    )
}

async fn ready() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "timestamp": now_rfc3339(),
    }))
}

async fn create_record(
    State(service): State<AppState>,
    body: Result<Json<NewRecord>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(input) = body?;
    let record = service.create_record(input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_records(State(service): State<AppState>) -> ApiResult<Json<Value>> {
    let records = service.list_records().await?;
    Ok(Json(json!({
        "total": records.len(),
        "records": records,
    })))
}

async fn get_record(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.get_record(&id).await?))
}

async fn create_job(State(service): State<AppState>) -> impl IntoResponse {
    (StatusCode::CREATED, Json(service.create_job()))
}

async fn list_jobs(State(service): State<AppState>) -> Json<Value> {
    let jobs = service.list_jobs();
    Json(json!({
        "total": jobs.len(),
        "jobs": jobs,
    }))
}

async fn get_job(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.get_job(&id)?))
}

async fn data_metrics(State(service): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.data_metrics().await?))
}

async fn processing_metrics(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.processing_metrics())
}

async fn generate(State(service): State<AppState>) -> Json<Value> {
    service.generate_test_data();
    Json(json!({
        "message": "Test data generation started",
        "timestamp": now_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct CleanupParams {
    cutoff: Option<String>,
}

async fn cleanup(
    State(service): State<AppState>,
    Query(params): Query<CleanupParams>,
) -> ApiResult<Json<Value>> {
    let report = service.cleanup(params.cutoff.as_deref()).await?;
    Ok(Json(json!({
        "message": "Cleanup completed",
        "deleted_count": report.deleted_count,
        "cutoff_time": report.cutoff_time.to_rfc3339_opts(SecondsFormat::Secs, true),
    })))
}

//! HTTP boundary.
//!
//! A thin `axum` router over [`MigrationService`]. Bodies are JSON except
//! the definition export, which is YAML.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::compare::{CollectionComparison, ComparisonResult};
use crate::core::MigrationUnit;
use crate::error::{MigrateError, Result};
use crate::service::{
    CompareBatchRequest, CompareRequest, ConnectionRef, ConnectionTest, CreateTaskRequest,
    MigrationService,
};
use crate::state::{TaskDetail, TaskProgress, TaskStatus, TaskSummary};

type AppState = Arc<MigrationService>;

impl IntoResponse for MigrateError {
    fn into_response(self) -> Response {
        let status = match &self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_)
            | MigrateError::EmptySelection(_) => StatusCode::BAD_REQUEST,
            MigrateError::TaskNotFound(_) | MigrateError::NotFound(_) => StatusCode::NOT_FOUND,
            MigrateError::InvalidState(_) => StatusCode::CONFLICT,
            MigrateError::Connection { .. } | MigrateError::Discovery { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            MigrateError::Comparison {
                collection,
                partial,
                ..
            } => json!({
                "error": self.to_string(),
                "collection": collection,
                "partial": partial,
            }),
            _ => json!({ "error": self.to_string() }),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
        }
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
struct UnitsQuery {
    /// Comma-separated unit types; the connection default when absent.
    #[serde(default)]
    types: Option<String>,
}

/// Build the router.
pub fn router(service: Arc<MigrationService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/migrate/tasks", post(create_task).get(list_tasks))
        .route("/migrate/tasks/{id}", get(get_task))
        .route("/migrate/tasks/{id}/start", post(start_task))
        .route("/migrate/tasks/{id}/cancel", post(cancel_task))
        .route("/migrate/tasks/{id}/progress", get(get_progress))
        .route("/migrate/compare", post(compare))
        .route("/migrate/compare/batch", post(compare_batch))
        .route("/connections", get(list_connections))
        .route("/connections/test", post(test_connection))
        .route("/connections/{config}/collections", get(list_collections))
        .route("/connections/{config}/collections/{name}/units", get(list_units))
        .route(
            "/connections/{config}/collections/{name}/units/{unit_type}/{unit}/definition",
            get(export_definition),
        )
        .with_state(service)
}

/// Serve the router on `bind` until `shutdown` is cancelled.
pub async fn serve(
    service: Arc<MigrationService>,
    bind: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_task(
    State(service): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskCreated>)> {
    let task_id = service.create_task(request).await?;
    Ok((StatusCode::CREATED, Json(TaskCreated { task_id })))
}

async fn list_tasks(State(service): State<AppState>) -> Json<Vec<TaskSummary>> {
    Json(service.list_tasks().await)
}

async fn get_task(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>> {
    Ok(Json(service.get_task(&id).await?))
}

async fn start_task(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let status = service.start_task(&id).await?;
    Ok(Json(StatusResponse { status }))
}

async fn cancel_task(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>> {
    let status = service.cancel_task(&id).await?;
    Ok(Json(StatusResponse { status }))
}

async fn get_progress(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskProgress>> {
    Ok(Json(service.get_progress(&id).await?))
}

async fn compare(
    State(service): State<AppState>,
    Json(request): Json<CompareRequest>,
) -> Result<Json<ComparisonResult>> {
    Ok(Json(service.compare(request).await?))
}

async fn compare_batch(
    State(service): State<AppState>,
    Json(request): Json<CompareBatchRequest>,
) -> Result<Json<Vec<CollectionComparison>>> {
    Ok(Json(service.compare_batch(request).await?))
}

async fn list_connections(State(service): State<AppState>) -> Json<Vec<String>> {
    Json(service.connection_names())
}

async fn test_connection(
    State(service): State<AppState>,
    Json(config): Json<ConnectionRef>,
) -> Json<ConnectionTest> {
    Json(service.test_connection(&config).await)
}

async fn list_collections(
    State(service): State<AppState>,
    Path(config): Path<String>,
) -> Result<Json<Vec<String>>> {
    let config = service.named_connection(&config)?;
    Ok(Json(service.list_collections(&config).await?))
}

async fn list_units(
    State(service): State<AppState>,
    Path((config, name)): Path<(String, String)>,
    Query(query): Query<UnitsQuery>,
) -> Result<Json<Vec<MigrationUnit>>> {
    let config = service.named_connection(&config)?;
    let unit_types: Vec<String> = query
        .types
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Json(service.list_units(&config, &name, &unit_types).await?))
}

async fn export_definition(
    State(service): State<AppState>,
    Path((config, name, unit_type, unit)): Path<(String, String, String, String)>,
) -> Result<Response> {
    let config = service.named_connection(&config)?;
    let definition = service
        .fetch_definition(&config, &name, &format!("{}/{}", unit_type, unit))
        .await?;
    let yaml = definition.to_yaml()?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml).into_response())
}

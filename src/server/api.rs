//! File API endpoints.

use std::path::{Path, PathBuf};

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::files::{ErrorBody, FileApi, FileApiError, FileContent, FileTree, OpenRequest, WriteRequest};

pub(super) struct ApiError(FileApiError);

impl From<FileApiError> for ApiError {
    fn from(err: FileApiError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FileApiError::NotFound(_) => StatusCode::NOT_FOUND,
            FileApiError::IsDirectory(_)
            | FileApiError::NotDirectory(_)
            | FileApiError::EmptyPath
            | FileApiError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            FileApiError::Service { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            FileApiError::Request(_) => StatusCode::BAD_GATEWAY,
            FileApiError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!("[api] {}", self.0);
        }
        let body = ErrorBody {
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct PathQuery {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(super) struct WriteResponse {
    success: bool,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusResponse {
    connections: usize,
    max_connections: usize,
    watched_roots: Vec<PathBuf>,
}

pub(super) async fn open_directory(
    State(state): State<AppState>,
    Json(request): Json<OpenRequest>,
) -> Result<Json<FileTree>, ApiError> {
    let root = state.files.resolve_root(&request.path)?;
    crate::log_event!("api", "open", "{}", root.display());
    Ok(Json(state.files.list(&root).await?))
}

pub(super) async fn list_tree(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileTree>, ApiError> {
    Ok(Json(state.files.list(&query.path).await?))
}

pub(super) async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileContent>, ApiError> {
    Ok(Json(state.files.read(&query.path).await?))
}

pub(super) async fn write_file(
    State(state): State<AppState>,
    Json(request): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, ApiError> {
    state.files.write(&request.path, &request.content).await?;

    if let Some(tag) = request.origin_tag {
        let path = canonical(&request.path).await;
        state.hub.claim_origin(path, tag);
    }

    Ok(Json(WriteResponse {
        success: true,
        message: "File saved successfully",
    }))
}

pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connections: state.hub.connection_count(),
        max_connections: state.hub.settings().max_connections,
        watched_roots: state.hub.watched_roots(),
    })
}

async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

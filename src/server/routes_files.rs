use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{extract::State, http::StatusCode, routing::delete, Json, Router};
use serde::Deserialize;
use std::path::PathBuf;

pub fn file_routes() -> Router<AppContext> {
    Router::new().route("/files", delete(delete_file))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFileRequest {
    #[serde(default)]
    pub path: PathBuf,
}

/// Delete a library file or directory. Jobs for it are cancelled before the
/// response is sent.
async fn delete_file(
    State(ctx): State<AppContext>,
    Json(request): Json<DeleteFileRequest>,
) -> Result<StatusCode, AppError> {
    ctx.coordinator.delete_file(&request.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

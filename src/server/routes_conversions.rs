use crate::conversion::QueueSnapshot;
use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use mediashelf_db::models::ConversionJob;
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_HISTORY_LIMIT: usize = 20;

pub fn conversion_routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/conversions",
            get(get_snapshot).post(enqueue).delete(cancel),
        )
        .route("/conversions/history", get(get_history))
}

#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    /// Missing and empty are both rejected with `path_required`.
    #[serde(default)]
    pub source_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

async fn get_snapshot(State(ctx): State<AppContext>) -> Json<QueueSnapshot> {
    Json(ctx.queue.snapshot())
}

async fn enqueue(
    State(ctx): State<AppContext>,
    Json(request): Json<SourceRequest>,
) -> Result<(StatusCode, Json<ConversionJob>), AppError> {
    let job = ctx.queue.enqueue(&request.source_path)?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn cancel(
    State(ctx): State<AppContext>,
    Json(request): Json<SourceRequest>,
) -> Result<StatusCode, AppError> {
    ctx.queue.cancel(&request.source_path)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_history(
    State(ctx): State<AppContext>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<ConversionJob>> {
    Json(
        ctx.queue
            .recent_history(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
    )
}

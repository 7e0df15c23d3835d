use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppResult;
use crate::queue::{QueueName, QueueStats};
use crate::state::AppState;

// ============ Response DTOs ============

/// Per-queue counts for every queue in the pipeline
#[derive(Debug, Serialize, ToSchema)]
pub struct AllStatsResponse {
    pub queues: HashMap<String, QueueStats>,
}

/// Counts for one queue
#[derive(Debug, Serialize, ToSchema)]
pub struct QueueStatsResponse {
    pub queue: String,
    #[serde(flatten)]
    pub stats: QueueStats,
}

// ============ Handlers ============

/// Job counts across all queues
#[utoipa::path(
    get,
    path = "/api/jobs/stats",
    responses(
        (status = 200, description = "Counts for every queue", body = AllStatsResponse)
    ),
    tag = "Jobs"
)]
pub async fn all_queue_stats(State(state): State<AppState>) -> AppResult<Json<AllStatsResponse>> {
    let stats = state.store.all_stats().await?;

    let queues = stats
        .into_iter()
        .map(|(queue, counts)| (queue.as_str().to_string(), counts))
        .collect();

    Ok(Json(AllStatsResponse { queues }))
}

/// Job counts for a single queue
#[utoipa::path(
    get,
    path = "/api/jobs/stats/{queue}",
    params(
        ("queue" = String, Path, description = "Queue name")
    ),
    responses(
        (status = 200, description = "Counts for the queue", body = QueueStatsResponse),
        (status = 400, description = "Unknown queue name")
    ),
    tag = "Jobs"
)]
pub async fn queue_stats(
    State(state): State<AppState>,
    Path(queue): Path<String>,
) -> AppResult<Json<QueueStatsResponse>> {
    let queue: QueueName = queue.parse()?;
    let stats = state.store.stats(queue).await?;

    Ok(Json(QueueStatsResponse {
        queue: queue.as_str().to_string(),
        stats,
    }))
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::pipeline::{WorkflowRequest, GENERATE_WORKFLOW};
use crate::queue::{EnqueueOptions, QueueName};
use crate::state::AppState;

// ============ Request/Response DTOs ============

/// Request to generate an automation workflow
#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateWorkflowRequest {
    /// Natural-language description of the automation to build
    pub prompt: String,
    /// Where delivery notifications go
    pub customer_email: String,
    /// Paid requests are scheduled ahead of everything else
    #[serde(default)]
    pub paid: bool,
    /// Explicit priority override (lower = more urgent)
    pub priority: Option<i32>,
    /// Retry ceiling override (default: 3)
    pub max_attempts: Option<u32>,
    /// Delay admission by this many milliseconds
    pub delay_ms: Option<u64>,
}

/// Accepted response for an enqueued workflow job
#[derive(Debug, Serialize, ToSchema)]
pub struct EnqueuedWorkflowResponse {
    pub job_id: Uuid,
    pub state: String,
    /// Where to poll for progress and the final result
    pub status_endpoint: String,
}

/// Snapshot of a job's lifecycle, polled by clients
#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub queue: String,
    pub kind: String,
    pub state: String,
    pub progress: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: time::OffsetDateTime,
    #[schema(value_type = Option<String>)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<time::OffsetDateTime>,
    #[schema(value_type = Option<String>)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<time::OffsetDateTime>,
}

impl From<crate::queue::Job> for JobStatusResponse {
    fn from(job: crate::queue::Job) -> Self {
        Self {
            job_id: job.id,
            queue: job.queue.as_str().to_string(),
            kind: job.kind,
            state: job.state.as_str().to_string(),
            progress: job.progress,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            processed_at: job.processed_at,
            finished_at: job.finished_at,
        }
    }
}

// ============ Handlers ============

/// Enqueue a workflow generation job
#[utoipa::path(
    post,
    path = "/api/workflows/generate",
    request_body = GenerateWorkflowRequest,
    responses(
        (status = 202, description = "Generation job queued", body = EnqueuedWorkflowResponse),
        (status = 400, description = "Validation error")
    ),
    tag = "Workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<GenerateWorkflowRequest>,
) -> AppResult<(StatusCode, Json<EnqueuedWorkflowResponse>)> {
    if payload.prompt.trim().is_empty() {
        return Err(AppError::Validation("prompt must not be empty".to_string()));
    }
    if !payload.customer_email.contains('@') {
        return Err(AppError::Validation(
            "customer_email must be an email address".to_string(),
        ));
    }

    let request = WorkflowRequest {
        request_id: Uuid::new_v4(),
        prompt: payload.prompt,
        customer_email: payload.customer_email,
        paid: payload.paid,
    };

    let priority = payload.priority.unwrap_or(if request.paid {
        EnqueueOptions::PAID_PRIORITY
    } else {
        EnqueueOptions::DEFAULT_PRIORITY
    });
    let mut options = EnqueueOptions::default().with_priority(priority);
    if let Some(max_attempts) = payload.max_attempts {
        options = options.with_max_attempts(max_attempts);
    }
    if let Some(delay_ms) = payload.delay_ms {
        options = options.with_delay_ms(delay_ms);
    }

    let job_id = state
        .store
        .enqueue(
            QueueName::Generation,
            GENERATE_WORKFLOW,
            serde_json::to_value(&request)?,
            options,
        )
        .await?;

    let job = state
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueuedWorkflowResponse {
            job_id,
            state: job.state.as_str().to_string(),
            status_endpoint: format!("/api/workflows/status/{}", job_id),
        }),
    ))
}

/// Poll a workflow job's status
#[utoipa::path(
    get,
    path = "/api/workflows/status/{job_id}",
    params(
        ("job_id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job status", body = JobStatusResponse),
        (status = 404, description = "Job not found")
    ),
    tag = "Workflows"
)]
pub async fn workflow_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    let job = state
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

    Ok(Json(job.into()))
}

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use sentra_common::types::QueueJobStatus;

use crate::api::{error_response, success_empty_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(queue_status))
        .routes(routes!(queue_control))
}

/// Worker counters plus job counts per status.
#[utoipa::path(
    get,
    path = "/api/queue/status",
    tag = "Queue",
    responses((status = 200, description = "queue status"))
)]
async fn queue_status(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let stats = state.queue.stats();

    let mut counts = serde_json::Map::new();
    for status in [
        QueueJobStatus::Wait,
        QueueJobStatus::Running,
        QueueJobStatus::Failed,
        QueueJobStatus::Succeed,
        QueueJobStatus::Canceled,
    ] {
        match state.store.count_queue_jobs(Some(status)).await {
            Ok(n) => {
                counts.insert(status.to_string(), serde_json::json!(n));
            }
            Err(e) => {
                tracing::error!(error = %e, "queue count failed");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &trace_id,
                    "storage_error",
                    "failed to count queue jobs",
                );
            }
        }
    }

    success_response(
        StatusCode::OK,
        &trace_id,
        serde_json::json!({
            "stats": stats,
            "jobs": counts,
        }),
    )
}

#[derive(Deserialize, ToSchema)]
struct QueueControlBody {
    /// "pause" or "resume".
    op: String,
}

/// Pause stops the workers without draining; enqueues keep landing.
#[utoipa::path(
    post,
    path = "/api/queue/control",
    tag = "Queue",
    request_body = QueueControlBody,
    responses(
        (status = 200, description = "queue state changed"),
        (status = 422, description = "unknown op", body = crate::api::ApiError)
    )
)]
async fn queue_control(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(body): Json<QueueControlBody>,
) -> impl IntoResponse {
    match body.op.as_str() {
        "pause" => {
            state.queue.pause();
            success_empty_response(StatusCode::OK, &trace_id, "queue paused")
        }
        "resume" => {
            state.queue.resume();
            success_empty_response(StatusCode::OK, &trace_id, "queue resumed")
        }
        other => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &trace_id,
            "unprocessable",
            &format!("unknown op: {other}"),
        ),
    }
}

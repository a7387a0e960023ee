use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use sentra_common::types::{CommonEvent, Event, EventStatus};

use crate::api::{error_response, resolve_page, success_response};
use crate::jobs::aggregation::match_test;
use crate::logging::TraceId;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_event, list_events))
        .routes(routes!(test_event))
}

#[derive(Serialize, ToSchema)]
struct EventCreatedResponse {
    id: String,
}

/// Ingest a common event. The event lands as `pending` and is classified by
/// the next aggregation pass.
#[utoipa::path(
    post,
    path = "/api/events/",
    tag = "Events",
    request_body = CommonEventBody,
    responses(
        (status = 200, description = "event enqueued"),
        (status = 422, description = "schema error", body = crate::api::ApiError),
        (status = 500, description = "storage failure", body = crate::api::ApiError)
    )
)]
async fn create_event(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(body): Json<CommonEvent>,
) -> impl IntoResponse {
    let event = body.into_event(Utc::now());

    match state.store.insert_event(&event).await {
        Ok(()) => {
            tracing::debug!(event_id = %event.id, origin = %event.origin, "event ingested");
            success_response(StatusCode::OK, &trace_id, EventCreatedResponse { id: event.id })
        }
        Err(e) => {
            tracing::error!(error = %e, "event insert failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to store event",
            )
        }
    }
}

/// Schema mirror of [`CommonEvent`] for the OpenAPI document.
#[derive(Deserialize, ToSchema)]
#[allow(dead_code)]
struct CommonEventBody {
    content: String,
    #[schema(value_type = Object)]
    meta: Option<serde_json::Value>,
    tags: Option<Vec<String>>,
    origin: Option<String>,
    control: Option<ControlBody>,
}

#[derive(Deserialize, ToSchema)]
#[allow(dead_code)]
struct ControlBody {
    id: Option<String>,
    inhibit_interval: Option<String>,
    recovery_after: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListEventsParams {
    /// Filter by status (pending / grouped / canceled / ignored / expired).
    status: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/events/",
    tag = "Events",
    params(ListEventsParams),
    responses(
        (status = 200, description = "event page"),
        (status = 422, description = "bad status filter", body = crate::api::ApiError)
    )
)]
async fn list_events(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> impl IntoResponse {
    let (limit, offset) = resolve_page(params.limit, params.offset);

    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => match s.parse::<EventStatus>() {
            Ok(st) => Some(st),
            Err(e) => {
                return error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    &trace_id,
                    "unprocessable",
                    &e,
                )
            }
        },
        None => None,
    };

    match state.store.paginate_events(status, limit, offset).await {
        Ok(events) => {
            let next = if events.len() as u64 == limit {
                offset + limit
            } else {
                0
            };
            success_response(
                StatusCode::OK,
                &trace_id,
                serde_json::json!({ "events": events, "next": next }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "event listing failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to list events",
            )
        }
    }
}

#[derive(Serialize, ToSchema)]
struct MatchedRuleResponse {
    rule_id: String,
    rule_name: String,
    aggregate_key: String,
}

/// Dry-run classification: which enabled rules would claim this event, and
/// the aggregate key each would derive.
#[utoipa::path(
    post,
    path = "/api/events-test/",
    tag = "Events",
    request_body = CommonEventBody,
    responses(
        (status = 200, description = "matched rules", body = [MatchedRuleResponse])
    )
)]
async fn test_event(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(body): Json<CommonEvent>,
) -> impl IntoResponse {
    let event: Event = body.into_event(Utc::now());

    match match_test(&state.store, &event).await {
        Ok(matched) => {
            let items: Vec<MatchedRuleResponse> = matched
                .into_iter()
                .map(|m| MatchedRuleResponse {
                    rule_id: m.rule.id,
                    rule_name: m.rule.name,
                    aggregate_key: m.aggregate_key,
                })
                .collect();
            success_response(StatusCode::OK, &trace_id, items)
        }
        Err(e) => {
            tracing::error!(error = %e, "event match test failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "match test failed",
            )
        }
    }
}

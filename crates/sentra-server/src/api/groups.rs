use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa_axum::{router::OpenApiRouter, routes};

use sentra_common::types::{EventGroup, GroupStatus};

use crate::api::{error_response, resolve_page, success_response};
use crate::bus::BusEvent;
use crate::logging::TraceId;
use crate::state::AppState;

/// Local timeout for the cut operation (spec'd at 10 s).
const CUT_TIMEOUT_SECS: u64 = 10;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_groups))
        .routes(routes!(get_group))
        .routes(routes!(cut_group))
        .routes(routes!(recoverable_groups))
}

#[derive(Serialize)]
struct GroupResponse {
    #[serde(flatten)]
    group: EventGroup,
    /// Seconds until readiness for collecting groups, else 0.
    collect_time_remain: i64,
}

fn to_group_response(group: EventGroup) -> GroupResponse {
    let collect_time_remain = if group.status == GroupStatus::Collecting {
        (group.rule.expected_ready_at - Utc::now()).num_seconds().max(0)
    } else {
        0
    };
    GroupResponse {
        group,
        collect_time_remain,
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListGroupsParams {
    /// collecting / pending / okay / failed / partial / recovering
    status: Option<String>,
    rule_id: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/groups/",
    tag = "Groups",
    params(ListGroupsParams),
    responses(
        (status = 200, description = "group page"),
        (status = 422, description = "bad status filter", body = crate::api::ApiError)
    )
)]
async fn list_groups(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListGroupsParams>,
) -> impl IntoResponse {
    let (limit, offset) = resolve_page(params.limit, params.offset);

    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => match s.parse::<GroupStatus>() {
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

    match state
        .store
        .paginate_groups(status, params.rule_id.as_deref(), limit, offset)
        .await
    {
        Ok(groups) => {
            let next = if groups.len() as u64 == limit {
                offset + limit
            } else {
                0
            };
            let groups: Vec<GroupResponse> = groups.into_iter().map(to_group_response).collect();
            success_response(
                StatusCode::OK,
                &trace_id,
                serde_json::json!({ "groups": groups, "next": next }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "group listing failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to list groups",
            )
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct GroupEventsParams {
    limit: Option<u64>,
    offset: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/groups/{id}/",
    tag = "Groups",
    params(("id" = String, Path, description = "group id"), GroupEventsParams),
    responses(
        (status = 200, description = "group with its events"),
        (status = 404, description = "unknown group", body = crate::api::ApiError)
    )
)]
async fn get_group(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<GroupEventsParams>,
) -> impl IntoResponse {
    let (limit, offset) = resolve_page(params.limit, params.offset);

    let group = match state.store.get_group(&id).await {
        Ok(Some(group)) => group,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, &trace_id, "not_found", "unknown group")
        }
        Err(e) => {
            tracing::error!(group_id = %id, error = %e, "group load failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to load group",
            );
        }
    };

    match state.store.events_in_group(&id, limit, offset).await {
        Ok(events) => {
            let next = if events.len() as u64 == limit {
                offset + limit
            } else {
                0
            };
            success_response(
                StatusCode::OK,
                &trace_id,
                serde_json::json!({
                    "group": to_group_response(group),
                    "events": events,
                    "next": next,
                }),
            )
        }
        Err(e) => {
            tracing::error!(group_id = %id, error = %e, "group events load failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to load group events",
            )
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct CutGroupParams {
    /// Events to keep (0..=1000, default 20).
    keep: Option<u64>,
}

/// Cut a finished group's stored events down to `keep`, preserving
/// `event_count`. Collecting and pending groups are not cuttable.
#[utoipa::path(
    delete,
    path = "/api/groups/{id}/reduce/",
    tag = "Groups",
    params(("id" = String, Path, description = "group id"), CutGroupParams),
    responses(
        (status = 200, description = "events removed"),
        (status = 422, description = "group not cuttable", body = crate::api::ApiError)
    )
)]
async fn cut_group(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CutGroupParams>,
) -> impl IntoResponse {
    let keep = params.keep.unwrap_or(20);
    if keep > 1000 {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &trace_id,
            "unprocessable",
            "keep must be between 0 and 1000",
        );
    }

    let group = match state.store.get_group(&id).await {
        Ok(Some(group)) => group,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, &trace_id, "not_found", "unknown group")
        }
        Err(e) => {
            tracing::error!(group_id = %id, error = %e, "group load failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to load group",
            );
        }
    };

    if matches!(group.status, GroupStatus::Collecting | GroupStatus::Pending) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &trace_id,
            "unprocessable",
            "group is still being aggregated",
        );
    }

    let cut = tokio::time::timeout(
        std::time::Duration::from_secs(CUT_TIMEOUT_SECS),
        state.store.cut_group_events(&id, keep),
    )
    .await;

    match cut {
        Ok(Ok(deleted)) => {
            if deleted > 0 {
                state.bus.publish(BusEvent::GroupReduced {
                    group_id: id.clone(),
                    keep,
                    deleted,
                });
            }
            success_response(
                StatusCode::OK,
                &trace_id,
                serde_json::json!({ "deleted_count": deleted }),
            )
        }
        Ok(Err(e)) => {
            tracing::error!(group_id = %id, error = %e, "group cut failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "group cut failed",
            )
        }
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &trace_id,
            "storage_error",
            "group cut timed out",
        ),
    }
}

/// Pending recovery markers: incidents that will emit a recovery event if
/// their dedup id stays quiet.
#[utoipa::path(
    get,
    path = "/api/recoverable-groups/",
    tag = "Groups",
    responses((status = 200, description = "pending recovery markers"))
)]
async fn recoverable_groups(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.store.list_recoveries(1000, 0).await {
        Ok(markers) => success_response(StatusCode::OK, &trace_id, markers),
        Err(e) => {
            tracing::error!(error = %e, "recovery listing failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to list recovery markers",
            )
        }
    }
}

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use sentra_common::types::{
    Action, GroupAction, ReadinessPolicy, Rule, RuleStatus,
};
use sentra_matcher::{EventFinger, EventMatcher, TriggerMatcher};

use crate::api::{error_response, resolve_page, success_empty_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_rule, list_rules))
        .routes(routes!(get_rule, delete_rule))
}

#[derive(Deserialize, ToSchema)]
struct RuleBody {
    name: String,
    #[serde(default)]
    match_rule: String,
    #[serde(default)]
    ignore_rule: String,
    #[serde(default)]
    aggregate_rule: String,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    readiness: Option<ReadinessPolicy>,
    interval_secs: i64,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    actions: Vec<Action>,
}

/// Compile every expression up front so an invalid rule is rejected at save
/// time instead of degrading the aggregation pass.
fn validate_expressions(rule: &Rule) -> Result<(), String> {
    EventMatcher::new(rule.clone()).map_err(|e| format!("match/ignore rule: {e}"))?;

    if !rule.aggregate_rule.trim().is_empty() {
        EventFinger::new(&rule.aggregate_rule).map_err(|e| format!("aggregate rule: {e}"))?;
    }

    for action in &rule.actions {
        TriggerMatcher::new(GroupAction::from(action.clone()))
            .map_err(|e| format!("action `{}` condition: {e}", action.id))?;
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/rules/",
    tag = "Rules",
    request_body = RuleBody,
    responses(
        (status = 200, description = "rule created"),
        (status = 422, description = "expression does not compile", body = crate::api::ApiError)
    )
)]
async fn create_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(body): Json<RuleBody>,
) -> impl IntoResponse {
    let now = Utc::now();
    let mut actions = body.actions;
    for action in &mut actions {
        if action.id.is_empty() {
            action.id = sentra_common::id::next_id();
        }
    }

    let rule = Rule {
        id: sentra_common::id::next_id(),
        name: body.name,
        status: if body.enabled.unwrap_or(true) {
            RuleStatus::Enabled
        } else {
            RuleStatus::Disabled
        },
        match_rule: body.match_rule,
        ignore_rule: body.ignore_rule,
        aggregate_rule: body.aggregate_rule,
        readiness: body.readiness.unwrap_or_default(),
        interval_secs: body.interval_secs,
        actions,
        created_at: now,
        updated_at: now,
    };

    if let Err(msg) = validate_expressions(&rule) {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &trace_id,
            "unprocessable",
            &msg,
        );
    }

    match state.store.insert_rule(&rule).await {
        Ok(()) => {
            tracing::info!(rule_id = %rule.id, name = %rule.name, "rule created");
            success_response(
                StatusCode::OK,
                &trace_id,
                serde_json::json!({ "id": rule.id }),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "rule insert failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to store rule",
            )
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListRulesParams {
    /// enabled / disabled
    status: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/rules/",
    tag = "Rules",
    params(ListRulesParams),
    responses((status = 200, description = "rule page"))
)]
async fn list_rules(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListRulesParams>,
) -> impl IntoResponse {
    let (limit, offset) = resolve_page(params.limit, params.offset);
    let status = match params.status.as_deref() {
        Some("enabled") => Some(RuleStatus::Enabled),
        Some("disabled") => Some(RuleStatus::Disabled),
        _ => None,
    };

    match state.store.list_rules(status, limit, offset).await {
        Ok(rules) => success_response(
            StatusCode::OK,
            &trace_id,
            serde_json::json!({ "rules": rules }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "rule listing failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to list rules",
            )
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/rules/{id}/",
    tag = "Rules",
    params(("id" = String, Path, description = "rule id")),
    responses(
        (status = 200, description = "rule detail"),
        (status = 404, description = "unknown rule", body = crate::api::ApiError)
    )
)]
async fn get_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_rule(&id).await {
        Ok(Some(rule)) => success_response(StatusCode::OK, &trace_id, rule),
        Ok(None) => error_response(StatusCode::NOT_FOUND, &trace_id, "not_found", "unknown rule"),
        Err(e) => {
            tracing::error!(rule_id = %id, error = %e, "rule load failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to load rule",
            )
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/rules/{id}/",
    tag = "Rules",
    params(("id" = String, Path, description = "rule id")),
    responses(
        (status = 200, description = "rule removed"),
        (status = 404, description = "unknown rule", body = crate::api::ApiError)
    )
)]
async fn delete_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_rule(&id).await {
        Ok(true) => success_empty_response(StatusCode::OK, &trace_id, "rule removed"),
        Ok(false) => error_response(StatusCode::NOT_FOUND, &trace_id, "not_found", "unknown rule"),
        Err(e) => {
            tracing::error!(rule_id = %id, error = %e, "rule delete failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "failed to delete rule",
            )
        }
    }
}

use axum::routing::get;
use axum::{middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::logging;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "sentra API",
        description = "event aggregation and alert dispatch REST API",
    ),
    tags(
        (name = "Events", description = "event ingestion and inspection"),
        (name = "Groups", description = "event group lifecycle"),
        (name = "Rules", description = "classification rules"),
        (name = "Queue", description = "dispatch queue control")
    )
)]
struct ApiDoc;

pub fn build_http_app(state: AppState) -> Router {
    let (api_router, spec) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(api::events::routes())
        .merge(api::groups::routes())
        .merge(api::queue::routes())
        .merge(api::rules::routes())
        .split_for_parts();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = api_router.layer(middleware::from_fn_with_state(
        state.clone(),
        crate::middleware::bearer_auth,
    ));

    Router::new()
        .merge(protected)
        .route("/health", get(health))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api/openapi.json", spec))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Shared bearer-token check for the API surface. A blank `api_token`
/// disables authentication.
pub async fn bearer_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let expected = &state.config.api_token;
    if expected.is_empty() {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "err_code": 1002,
                "err_msg": "invalid or missing bearer token",
            })),
        )
            .into_response(),
    }
}

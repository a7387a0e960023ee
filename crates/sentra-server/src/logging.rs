use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Per-request trace id, attached as a request extension and echoed in the
/// `X-Trace-Id` response header.
#[derive(Debug, Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// 16 hex chars from 8 random bytes.
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Request/response logging middleware.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        tracing::error!(%method, path, %status, ?elapsed, trace_id, "request failed");
    } else {
        tracing::info!(%method, path, %status, ?elapsed, trace_id, "request");
    }

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", val);
    }
    response
}

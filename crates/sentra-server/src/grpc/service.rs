use chrono::Utc;
use tonic::{Request, Response, Status};

use sentra_common::proto::event_relay_server::EventRelay;
use sentra_common::proto::{IdResponse, PushRequest};
use sentra_common::types::CommonEvent;

use crate::state::AppState;

/// gRPC ingress for edge agents: one `Push` carrying the JSON-serialized
/// common event.
pub struct EventRelayService {
    state: AppState,
}

impl EventRelayService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn check_auth<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let expected = &self.state.config.api_token;
        if expected.is_empty() {
            return Ok(());
        }

        let presented = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match presented {
            Some(token) if token == expected => Ok(()),
            _ => Err(Status::unauthenticated("invalid or missing bearer token")),
        }
    }
}

#[tonic::async_trait]
impl EventRelay for EventRelayService {
    async fn push(
        &self,
        request: Request<PushRequest>,
    ) -> Result<Response<IdResponse>, Status> {
        self.check_auth(&request)?;

        let data = request.into_inner().data;
        let common: CommonEvent = serde_json::from_str(&data)
            .map_err(|e| Status::invalid_argument(format!("malformed event payload: {e}")))?;

        let event = common.into_event(Utc::now());
        self.state.store.insert_event(&event).await.map_err(|e| {
            tracing::error!(error = %e, "relay event insert failed");
            Status::internal("failed to store event")
        })?;

        tracing::debug!(event_id = %event.id, origin = %event.origin, "relay event ingested");
        Ok(Response::new(IdResponse { id: event.id }))
    }
}

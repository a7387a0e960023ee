//! Server wiring for the aggregation pipeline: HTTP + gRPC ingress, the
//! leader-elected scheduler jobs, and the dispatch queue workers.

pub mod api;
pub mod app;
pub mod bus;
pub mod config;
pub mod grpc;
pub mod jobs;
pub mod logging;
pub mod middleware;
pub mod queue;
pub mod state;
pub mod template_seed;

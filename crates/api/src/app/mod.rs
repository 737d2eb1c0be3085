//! HTTP application wiring.
//!
//! - `services.rs`: engine, event store and background workers
//! - `routes/`: handlers, one file per resource
//! - `dto.rs`: request DTOs and path/query parsing
//! - `errors.rs`: the shared error body and status mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router around already-built services.
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::user_context_middleware))
                .layer(Extension(services)),
        )
}

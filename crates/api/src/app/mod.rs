//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger wiring (entry store, event bus, retry policy)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and mapping to ledger commands
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: services::AppServices) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(Arc::new(services))))
}

use axum::{
    routing::{get, post},
    Router,
};

pub mod entries;
pub mod movements;
pub mod stock;
pub mod system;

/// Router for every ledger endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/lots", post(movements::receive_lot))
        .route("/adjustments", post(movements::record_adjustment))
        .route("/consumptions", post(movements::withdraw))
        .route("/sales", post(movements::fulfill_sale))
        .route("/productions", post(movements::complete_production))
        .nest("/entries", entries::router())
        .nest("/stock", stock::router())
        .route("/system/backend", get(system::backend))
}

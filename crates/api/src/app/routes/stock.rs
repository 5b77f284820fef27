use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:ledger/:subject_id/:store_id", get(get_stock))
        .route("/:ledger/:subject_id/:store_id/lots", get(list_lots))
}

pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(partition): Path<dto::PartitionRef>,
) -> axum::response::Response {
    let key = match partition.key() {
        Ok(k) => k,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    match services.run(move |ledger| ledger.stock_level(key)).await {
        Ok(level) => (StatusCode::OK, Json(dto::StockResponse::from(level))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_lots(
    Extension(services): Extension<Arc<AppServices>>,
    Path(partition): Path<dto::PartitionRef>,
    Query(query): Query<dto::LotsQuery>,
) -> axum::response::Response {
    let key = match partition.key() {
        Ok(k) => k,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    match services
        .run(move |ledger| ledger.list_lots(key, query.include_inactive))
        .await
    {
        Ok(lots) => (StatusCode::OK, Json(serde_json::json!({ "lots": lots }))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

//! Stock movements: lots in, stock out.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub async fn receive_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ReceiveLotRequest>,
) -> axum::response::Response {
    let cmd = match body.into_command() {
        Ok(c) => c,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    match services.run(move |ledger| ledger.receive_lot(&cmd)).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "lot_id": id })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn record_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::AdjustmentRequest>,
) -> axum::response::Response {
    let cmd = match body.into_command() {
        Ok(c) => c,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    match services.run(move |ledger| ledger.record_adjustment(&cmd)).await {
        Ok(adjustment) => (StatusCode::CREATED, Json(adjustment)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Manual FIFO withdrawal (waste, samples, internal use).
pub async fn withdraw(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::WithdrawalRequest>,
) -> axum::response::Response {
    let req = match body.into_command() {
        Ok(r) => r,
        Err(e) => return errors::ledger_error_to_response(e),
    };

    match services.run(move |ledger| ledger.consume(&req)).await {
        Ok(allocation) => {
            let total_cost = allocation.total_cost();
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "allocation": allocation,
                    "total_cost": total_cost,
                })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn fulfill_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SaleRequest>,
) -> axum::response::Response {
    let cmd = body.into_command();

    match services.run(move |ledger| ledger.fulfill_sale(&cmd)).await {
        Ok(outcome) => {
            let cost_of_goods = outcome.cost_of_goods();
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "sale": outcome,
                    "cost_of_goods": cost_of_goods,
                })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn complete_production(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ProductionRequest>,
) -> axum::response::Response {
    let cmd = body.into_command();

    match services.run(move |ledger| ledger.complete_production(&cmd)).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

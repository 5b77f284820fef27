use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockledger_core::EntryId;
use stockledger_ledger::{AnnulEntry, CorrectEntry};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_history))
        .route("/:id/correction", post(correct_entry))
        .route("/:id/annulment", post(annul_entry))
}

fn parse_entry_id(id: &str) -> Result<EntryId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid entry id"))
}

pub async fn get_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_entry_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.run(move |ledger| ledger.entry_history(id)).await {
        Ok(history) => (StatusCode::OK, Json(history)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn correct_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CorrectionRequest>,
) -> axum::response::Response {
    let entry = match parse_entry_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = CorrectEntry {
        entry,
        quantity: body.quantity,
        unit_cost: body.unit_cost,
        reason: body.reason,
    };

    match services.run(move |ledger| ledger.correct(&cmd)).await {
        Ok(correction) => (StatusCode::CREATED, Json(correction)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn annul_entry(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AnnulmentRequest>,
) -> axum::response::Response {
    let entry = match parse_entry_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let cmd = AnnulEntry {
        entry,
        reason: body.reason,
    };

    match services.run(move |ledger| ledger.annul(&cmd)).await {
        Ok(annulment) => (StatusCode::OK, Json(annulment)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

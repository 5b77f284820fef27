use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockledger_core::LedgerError;

/// Map a ledger error onto an HTTP status and JSON body.
pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let code = err.code();
    match &err {
        LedgerError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, code, msg.clone()),
        LedgerError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, code, msg.clone()),
        LedgerError::InsufficientStock {
            subject,
            store,
            requested,
            available,
            shortfall,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(json!({
                "error": code,
                "message": err.to_string(),
                "ledger": subject.ledger(),
                "subject_id": subject.raw_id(),
                "store_id": store,
                "requested": requested,
                "available": available,
                "shortfall": shortfall,
            })),
        )
            .into_response(),
        LedgerError::Conflict(reason) => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": code,
                "message": err.to_string(),
                "reason": reason,
            })),
        )
            .into_response(),
        LedgerError::Concurrency(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, code, msg.clone())
        }
        LedgerError::Storage(msg) => {
            tracing::error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, code, "storage failure")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use stockledger_core::{ConflictReason, ProductId, StoreId, Subject};

    use super::*;

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        let cases = [
            (LedgerError::validation("bad"), StatusCode::BAD_REQUEST),
            (LedgerError::not_found("entry 1"), StatusCode::NOT_FOUND),
            (LedgerError::conflict(ConflictReason::SaleLinked), StatusCode::CONFLICT),
            (LedgerError::concurrency("busy"), StatusCode::SERVICE_UNAVAILABLE),
            (LedgerError::storage("down"), StatusCode::INTERNAL_SERVER_ERROR),
            (
                LedgerError::InsufficientStock {
                    subject: Subject::Product(ProductId::new(1)),
                    store: StoreId::new(1),
                    requested: 100,
                    available: 5,
                    shortfall: 95,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ledger_error_to_response(err).status(), status);
        }
    }
}

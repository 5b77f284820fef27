use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

use stockledger_api::app::services::build_in_memory_services;
use stockledger_infra::LedgerConfig;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over the in-memory store, bound to an ephemeral port.
        let app = stockledger_api::app::build_app(build_in_memory_services(&LedgerConfig::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn receive(&self, ledger: &str, subject_id: i64, quantity: i64, unit_cost: i64, days_ago: i64) -> u64 {
        let (status, body) = self
            .post(
                "/lots",
                json!({
                    "ledger": ledger,
                    "subject_id": subject_id,
                    "store_id": 1,
                    "quantity": quantity,
                    "unit_cost": unit_cost,
                    "occurred_at": Utc::now() - ChronoDuration::days(days_ago),
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "receive failed: {body}");
        body["lot_id"].as_u64().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = srv
        .client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (_, body) = srv.get("/system/backend").await;
    assert_eq!(body["backend"], "in_memory");
}

#[tokio::test]
async fn fifo_withdrawal_draws_oldest_lot_first() {
    let srv = TestServer::spawn().await;
    let a = srv.receive("product", 1, 10, 100, 2).await;
    let b = srv.receive("product", 1, 10, 120, 1).await;

    let (status, body) = srv
        .post(
            "/consumptions",
            json!({ "ledger": "product", "subject_id": 1, "store_id": 1, "quantity": 15, "reason": "spoilage" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "withdrawal failed: {body}");
    let draws = body["allocation"]["draws"].as_array().unwrap();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0]["lot"].as_u64().unwrap(), a);
    assert_eq!(draws[0]["quantity"], 10);
    assert_eq!(draws[1]["lot"].as_u64().unwrap(), b);
    assert_eq!(draws[1]["quantity"], 5);
    assert_eq!(body["total_cost"], 10 * 100 + 5 * 120);

    let (status, stock) = srv.get("/stock/product/1/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock["available"], 5);
    assert_eq!(stock["value"], 5 * 120);

    let (_, lots) = srv.get("/stock/product/1/1/lots").await;
    assert_eq!(lots["lots"].as_array().unwrap().len(), 1);
    let (_, lots) = srv.get("/stock/product/1/1/lots?include_inactive=true").await;
    let lots = lots["lots"].as_array().unwrap();
    assert_eq!(lots.len(), 2);
    assert_eq!(lots[0]["status"], "exhausted");
}

#[tokio::test]
async fn shortfall_is_unprocessable_and_writes_nothing() {
    let srv = TestServer::spawn().await;
    srv.receive("supply", 3, 5, 40, 0).await;

    let (status, body) = srv
        .post(
            "/consumptions",
            json!({ "ledger": "supply", "subject_id": 3, "store_id": 1, "quantity": 100, "reason": "batch" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_stock");
    assert_eq!(body["shortfall"], 95);
    assert_eq!(body["available"], 5);

    let (_, stock) = srv.get("/stock/supply/3/1").await;
    assert_eq!(stock["available"], 5);
}

#[tokio::test]
async fn sale_is_all_or_nothing_and_cannot_be_annulled() {
    let srv = TestServer::spawn().await;
    srv.receive("product", 1, 10, 100, 1).await;
    srv.receive("product", 2, 1, 300, 1).await;

    let (status, body) = srv
        .post(
            "/sales",
            json!({
                "sale_id": 7,
                "store_id": 1,
                "lines": [
                    { "product_id": 1, "quantity": 4 },
                    { "product_id": 2, "quantity": 2 },
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    let (_, stock) = srv.get("/stock/product/1/1").await;
    assert_eq!(stock["available"], 10);

    let (status, body) = srv
        .post(
            "/sales",
            json!({ "sale_id": 8, "store_id": 1, "lines": [{ "product_id": 1, "quantity": 4 }] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["cost_of_goods"], 400);
    let sold = body["sale"]["lines"][0]["draws"][0]["entry"].as_u64().unwrap();

    let (status, body) = srv
        .post(&format!("/entries/{sold}/annulment"), json!({ "reason": "refund" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "sale-linked");
}

#[tokio::test]
async fn adjustment_can_be_corrected_then_annulled() {
    let srv = TestServer::spawn().await;
    let lot = srv.receive("supply", 9, 10, 25, 0).await;

    let (status, body) = srv
        .post(
            "/adjustments",
            json!({
                "ledger": "supply",
                "subject_id": 9,
                "store_id": 1,
                "quantity": -2,
                "lot_id": lot,
                "reason": "spilled",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let shrink = body["entries"][0].as_u64().unwrap();

    let (status, body) = srv
        .post(&format!("/entries/{shrink}/correction"), json!({ "quantity": -3, "reason": "recount" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let replacement = body["replacement"].as_u64().unwrap();

    let (_, stock) = srv.get("/stock/supply/9/1").await;
    assert_eq!(stock["available"], 7);

    let (status, history) = srv.get(&format!("/entries/{replacement}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["replaces"][0]["id"].as_u64().unwrap(), shrink);
    assert_eq!(history["replaces"][0]["status"], "superseded");

    // The superseded original is inactive now.
    let (status, body) = srv
        .post(&format!("/entries/{shrink}/correction"), json!({ "quantity": -1, "reason": "again" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "inactive");

    let (status, _) = srv
        .post(&format!("/entries/{replacement}/annulment"), json!({ "reason": "never happened" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, stock) = srv.get("/stock/supply/9/1").await;
    assert_eq!(stock["available"], 10);
}

#[tokio::test]
async fn lots_with_dependents_cannot_be_corrected() {
    let srv = TestServer::spawn().await;
    let lot = srv.receive("product", 4, 10, 100, 0).await;
    srv.post(
        "/consumptions",
        json!({ "ledger": "product", "subject_id": 4, "store_id": 1, "quantity": 1, "reason": "sample" }),
    )
    .await;

    let (status, body) = srv
        .post(&format!("/entries/{lot}/correction"), json!({ "quantity": 12, "reason": "miscount" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "has-dependents");
}

#[tokio::test]
async fn production_consumes_ingredients_and_receives_output() {
    let srv = TestServer::spawn().await;
    srv.receive("supply", 1, 100, 2, 1).await;

    let (status, body) = srv
        .post(
            "/productions",
            json!({
                "production_id": 3,
                "store_id": 1,
                "produced": 4,
                "ingredients": [{ "ledger": "supply", "subject_id": 1, "per_unit": 5 }],
                "output_product_id": 11,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["ingredient_cost"], 40);
    assert_eq!(body["unit_cost"], 10);

    let (_, flour) = srv.get("/stock/supply/1/1").await;
    assert_eq!(flour["available"], 80);
    let (_, output) = srv.get("/stock/product/11/1").await;
    assert_eq!(output["available"], 4);
    assert_eq!(output["value"], 40);
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let srv = TestServer::spawn().await;

    let (status, body) = srv.get("/stock/product/0/1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = srv.get("/entries/not-a-number").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = srv.get("/entries/424242").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let lot = srv.receive("product", 1, 5, 10, 0).await;
    let (status, _) = srv
        .post(&format!("/entries/{lot}/correction"), json!({ "quantity": 6, "reason": "  " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

//! Payment failure paths: unsupported methods, gateway declines, timeouts,
//! retry semantics, and the payment trust boundary on completion.

mod common;

use axum::http::Method;
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

async fn session_awaiting_payment(app: &TestApp, key_prefix: &str) -> Uuid {
    let customer_id = Uuid::new_v4();
    let product = app.seed_product("Backpack", dec!(65.00), None).await;
    let variant = app
        .seed_variant(product.id, "Canvas", None, None, 10)
        .await;
    let line = app
        .seed_cart_item(customer_id, product.id, Some(variant.id), 1)
        .await;
    app.initiate_to_awaiting_payment(customer_id, &[line.id], &format!("{key_prefix}-init"))
        .await
}

#[tokio::test]
async fn unsupported_method_creates_no_payment_row() {
    let app = TestApp::new().await;
    let session_id = session_awaiting_payment(&app, "method").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", session_id),
            Some(json!({
                "paymentMethod": "BITCOIN",
                "idempotencyKey": "method-pay-1",
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["error"], "INVALID_PAYMENT_METHOD");

    assert_eq!(app.count_payments().await, 0);
    assert_eq!(app.gateway.attempt_count(), 0);
    assert_eq!(app.session_status(session_id).await, "awaiting_payment");
}

#[tokio::test]
async fn declined_payment_reverts_session_and_permits_retry() {
    let app = TestApp::new().await;
    let session_id = session_awaiting_payment(&app, "decline").await;

    app.gateway.inject_failure("CARD_DECLINED", "insufficient funds");

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", session_id),
            Some(json!({
                "paymentMethod": "CARD",
                "idempotencyKey": "decline-pay-1",
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["error"], "PAYMENT_FAILED");
    let failed_payment_id = body["details"]["paymentId"].as_str().unwrap().to_string();
    assert_eq!(body["details"]["errorCode"], "CARD_DECLINED");

    // Session is retryable, not stuck in processing_payment
    assert_eq!(app.session_status(session_id).await, "awaiting_payment");

    // Retry with a fresh idempotency key succeeds and gets a new payment row
    app.gateway.clear_failure();
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", session_id),
            Some(json!({
                "paymentMethod": "CARD",
                "idempotencyKey": "decline-pay-2",
            })),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = response_json(response).await;
    assert_eq!(body["status"], "succeeded");
    assert_ne!(body["paymentId"].as_str().unwrap(), failed_payment_id);

    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
    use storefront_checkout_api::entities::{payment, Payment};
    let failed = Payment::find()
        .filter(payment::Column::IdempotencyKey.eq("decline-pay-1"))
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status.to_string(), "failed");
    assert_eq!(failed.attempt, 1);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("insufficient funds")
    );

    let succeeded = Payment::find()
        .filter(payment::Column::IdempotencyKey.eq("decline-pay-2"))
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(succeeded.attempt, 2);
}

#[tokio::test]
async fn gateway_timeout_fails_the_attempt() {
    let app = TestApp::new().await;
    let session_id = session_awaiting_payment(&app, "timeout").await;

    // Configured timeout in the harness is 250ms
    app.gateway.inject_latency(Duration::from_secs(5));

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", session_id),
            Some(json!({
                "paymentMethod": "CARD",
                "idempotencyKey": "timeout-pay-1",
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["error"], "PAYMENT_FAILED");
    assert_eq!(body["details"]["errorCode"], "GATEWAY_TIMEOUT");

    use sea_orm::EntityTrait;
    let payment = storefront_checkout_api::entities::Payment::find()
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status.to_string(), "failed");
    assert!(payment
        .error_message
        .unwrap()
        .contains("did not respond"));

    assert_eq!(app.session_status(session_id).await, "awaiting_payment");
}

#[tokio::test]
async fn replayed_failure_answers_like_the_original() {
    let app = TestApp::new().await;
    let session_id = session_awaiting_payment(&app, "replayfail").await;

    app.gateway.inject_failure("CARD_DECLINED", "do not honor");

    let payload = json!({
        "paymentMethod": "CARD",
        "idempotencyKey": "replayfail-pay-1",
    });

    let first = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", session_id),
            Some(payload.clone()),
        )
        .await;
    assert_eq!(first.status(), 400);

    // Replay after the injection is cleared: stored outcome wins, no new charge
    app.gateway.clear_failure();
    let second = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", session_id),
            Some(payload),
        )
        .await;
    assert_eq!(second.status(), 400);
    let body = response_json(second).await;
    assert_eq!(body["error"], "PAYMENT_FAILED");

    assert_eq!(app.count_payments().await, 1);
    assert_eq!(app.gateway.attempt_count(), 1);
}

#[tokio::test]
async fn pay_requires_a_validated_session() {
    let app = TestApp::new().await;
    let customer_id = Uuid::new_v4();
    let product = app.seed_product("Scarf", dec!(25.00), None).await;
    let line = app.seed_cart_item(customer_id, product.id, None, 1).await;

    // Initiated but never validated
    let session_id = app.initiate(customer_id, &[line.id], "unvalidated").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", session_id),
            Some(json!({
                "paymentMethod": "CARD",
                "idempotencyKey": "unvalidated-pay",
            })),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert_eq!(body["error"], "INVALID_REQUEST");
    assert_eq!(app.count_payments().await, 0);
}

#[tokio::test]
async fn complete_without_successful_payment_is_rejected() {
    let app = TestApp::new().await;
    let session_id = session_awaiting_payment(&app, "nopay").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/complete", session_id),
            Some(json!({})),
        )
        .await;
    assert_eq!(response.status(), 404);
    let body = response_json(response).await;
    assert_eq!(body["error"], "PAYMENT_NOT_FOUND");
    assert_eq!(app.count_orders().await, 0);
}

#[tokio::test]
async fn complete_rejects_payment_from_another_session() {
    let app = TestApp::new().await;

    // Customer A completes a payment
    let customer_a = Uuid::new_v4();
    let product = app.seed_product("Lantern", dec!(40.00), None).await;
    let variant = app.seed_variant(product.id, "Brass", None, None, 10).await;
    let line_a = app
        .seed_cart_item(customer_a, product.id, Some(variant.id), 1)
        .await;
    let session_a = app
        .initiate_to_awaiting_payment(customer_a, &[line_a.id], "trust-a-init")
        .await;
    let pay = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", session_a),
            Some(json!({
                "paymentMethod": "CARD",
                "idempotencyKey": "trust-a-pay",
            })),
        )
        .await;
    assert_eq!(pay.status(), 200);
    let foreign_payment_id = response_json(pay).await["paymentId"]
        .as_str()
        .unwrap()
        .to_string();

    // Customer B tries to complete with A's payment id
    let customer_b = Uuid::new_v4();
    let line_b = app
        .seed_cart_item(customer_b, product.id, Some(variant.id), 1)
        .await;
    let session_b = app
        .initiate_to_awaiting_payment(customer_b, &[line_b.id], "trust-b-init")
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/{}/complete", session_b),
            Some(json!({ "paymentId": foreign_payment_id })),
        )
        .await;
    assert_eq!(response.status(), 404);
    let body = response_json(response).await;
    assert_eq!(body["error"], "PAYMENT_NOT_FOUND");

    // No order, no stock movement for customer B
    assert_eq!(app.count_orders().await, 0);
    assert_eq!(app.variant_stock(variant.id).await, 10);
}
